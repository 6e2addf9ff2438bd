// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Grouped, tree-drawn reports for the log, and warnings held back until the
//! end of a command.

use std::{borrow::Cow, sync::Mutex};

const VERTICAL: char = '│';
const UP_AND_RIGHT: char = '└';
const VERTICAL_AND_RIGHT: char = '├';

lazy_static::lazy_static! {
    static ref WARNING_PRINTER: Mutex<WarningPrinter> = Mutex::new(WarningPrinter::default());
}

/// A titled tree of info-level lines, e.g. the inputs found for an image.
pub(crate) struct InfoPrinter {
    title: Cow<'static, str>,
    blocks: Vec<Vec<Cow<'static, str>>>,
}

impl InfoPrinter {
    pub(crate) fn new(title: Cow<'static, str>) -> Self {
        Self {
            title,
            blocks: vec![],
        }
    }

    pub(crate) fn push_line(&mut self, line: Cow<'static, str>) {
        self.blocks.push(vec![line]);
    }

    pub(crate) fn push_block(&mut self, block: Vec<Cow<'static, str>>) {
        self.blocks.push(block);
    }

    pub(crate) fn display(self) {
        log::info!("{}", console::style(self.title).bold());
        for (symbol, line) in tree_lines(&self.blocks) {
            log::info!("{symbol} {line}");
        }
        log::info!("");
    }
}

/// Pair every line of `blocks` with the tree symbol drawn before it.
fn tree_lines<'a>(blocks: &'a [Vec<Cow<'static, str>>]) -> Vec<(char, &'a str)> {
    let num_blocks = blocks.len();
    let mut lines = vec![];
    for (i_block, block) in blocks.iter().enumerate() {
        let num_lines = block.len();
        for (i_line, line) in block.iter().enumerate() {
            let symbol = match (i_line, i_line + 1 == num_lines, i_block + 1 == num_blocks) {
                (0, false, _) => VERTICAL_AND_RIGHT,
                (0, _, false) => VERTICAL_AND_RIGHT,
                (0, true, true) => UP_AND_RIGHT,
                _ => VERTICAL,
            };
            lines.push((symbol, line.as_ref()));
        }
    }
    lines
}

#[derive(Default)]
struct WarningPrinter {
    blocks: Vec<Vec<Cow<'static, str>>>,
}

impl WarningPrinter {
    fn push_line(&mut self, line: Cow<'static, str>) {
        self.blocks.push(vec![line]);
    }

    /// Log the collected warnings, then forget them.
    fn display(&mut self) {
        log::debug!("Displaying warnings");
        if self.blocks.is_empty() {
            return;
        }

        log::warn!("{}", console::style("Warnings").bold());
        for (symbol, line) in tree_lines(&self.blocks) {
            log::warn!("{symbol} {line}");
        }
        log::warn!("");
        self.blocks.clear();
    }
}

/// Collect a warning to be displayed once the current job has finished.
pub(crate) trait Warn {
    fn warn(self);
}

impl Warn for &'static str {
    fn warn(self) {
        push_warning(self.into());
    }
}

impl Warn for String {
    fn warn(self) {
        push_warning(self.into());
    }
}

fn push_warning(line: Cow<'static, str>) {
    // A poisoned printer only means another thread panicked mid-push.
    let mut printer = WARNING_PRINTER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    printer.push_line(line);
}

/// Print out any warnings that have been collected while postprocessing.
pub(crate) fn display_warnings() {
    WARNING_PRINTER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .display();
}
