// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command-line interface code. The arguments of each `postproc` subcommand
//! are contained in modules.
//!
//! Only 3 things should be public in this module: `Postproc`, `Postproc::run`,
//! and `PostprocError`.

mod common;
mod error;
mod postprocess;

pub(crate) use common::{display_warnings, InfoPrinter, Warn};
pub use error::PostprocError;

use std::borrow::Cow;

use clap::{AppSettings, Args, Parser, Subcommand};
use log::info;

use crate::PROGRESS_BARS;

// Git commit, build time and compiler version, for the start of every log.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    about = r#"Postprocessing of fMRIPrep derivatives: confound regression, scrubbing, temporal filtering and more, one job per subject and image
Usage notes: README.md"#
)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_subcommands = true)]
#[clap(propagate_version = true)]
#[clap(infer_long_args = true)]
pub struct Postproc {
    #[clap(flatten)]
    global_opts: GlobalArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Don't draw progress bars.
    #[clap(long)]
    #[clap(global = true)]
    no_progress_bars: bool,

    /// More output; repeat for more (-vv). Child jobs inherit it through
    /// --debug, which is the same as a single -v.
    #[clap(short, long, parse(from_occurrences))]
    #[clap(global = true)]
    verbosity: u8,

    /// Only verify that arguments and configuration were correctly ingested
    /// and print out high-level information. No jobs are run or submitted.
    #[clap(long)]
    #[clap(global = true)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
#[clap(arg_required_else_help = true)]
enum Command {
    #[clap(about = r#"Write the run configuration of a processing stream, index the target directory and hand out one job per subject.
See the "Configuration" section of README.md"#)]
    PostprocessSubjects(postprocess::PostprocessSubjectsArgs),

    #[clap(about = "Hand out one job per preprocessed BOLD image of a subject.")]
    PostprocessSubject(postprocess::PostprocessSubjectArgs),

    #[clap(about = r#"Compose and run the postprocessing workflow of one image.
See the "Processing steps" section of README.md"#)]
    PostprocessImage(postprocess::PostprocessImageArgs),
}

impl Postproc {
    pub fn run(self) -> Result<(), PostprocError> {
        // Set up logging.
        let GlobalArgs {
            verbosity,
            dry_run,
            no_progress_bars,
        } = self.global_opts;
        let debug = match &self.command {
            Command::PostprocessSubjects(args) => args.job_args.debug,
            Command::PostprocessSubject(args) => args.job_args.debug,
            Command::PostprocessImage(args) => args.debug,
        };
        // --debug is the same as -v.
        let verbosity = if debug { verbosity.max(1) } else { verbosity };
        setup_logging(verbosity).map_err(|e| PostprocError::Generic(e.to_string()))?;
        if !no_progress_bars {
            PROGRESS_BARS.store(true);
        }

        // Print the version of postproc and its build-time information.
        let sub_command = match &self.command {
            Command::PostprocessSubjects(_) => "postprocess-subjects",
            Command::PostprocessSubject(_) => "postprocess-subject",
            Command::PostprocessImage(_) => "postprocess-image",
        };
        info!("postproc {} {}", sub_command, env!("CARGO_PKG_VERSION"));
        display_build_info();
        if dry_run {
            "Dry run: no jobs are run or submitted, and no workflow is executed".warn();
        }

        let result = match self.command {
            Command::PostprocessSubjects(args) => args.run(dry_run),
            Command::PostprocessSubject(args) => args.run(dry_run),
            Command::PostprocessImage(args) => args.run(dry_run),
        };
        display_warnings();
        result?;

        info!("postproc {} complete.", sub_command);
        Ok(())
    }
}

/// Log to `stdout`. Job logs are captured by the scheduler, so colours only
/// appear on a tty. At `-vvv` each message also carries its source line.
fn setup_logging(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.try_init()
}

/// Report how this executable was compiled.
fn display_build_info() {
    let commit = match (GIT_COMMIT_HASH_SHORT, GIT_DIRTY) {
        (Some(hash), Some(true)) => format!("{hash} (dirty)"),
        (Some(hash), _) => hash.to_string(),
        (None, _) => "<no git info>".to_string(),
    };
    let mut printer = InfoPrinter::new(format!("Compiled on git commit {commit}").into());
    let mut block: Vec<Cow<'static, str>> = vec![];
    if let Some(head) = GIT_HEAD_REF {
        block.push(format!("git head ref: {head}").into());
    }
    block.push(format!("built {BUILT_TIME_UTC}").into());
    block.push(format!("with compiler {RUSTC_VERSION}").into());
    printer.push_block(block);
    printer.display();
}
