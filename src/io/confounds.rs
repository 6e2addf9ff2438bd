// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Confounds tables, plus the other small text matrices that fMRIPrep and
//! AROMA write (MELODIC mixing matrices, noise component lists).

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use itertools::Itertools;
use ndarray::prelude::*;
use thiserror::Error;

use crate::{constants::CONFOUNDS_NA, scrub::expand_column_pattern};

/// A tab-separated table with one row per timepoint and one named column per
/// confound. Missing values are NaN in memory and "n/a" on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfoundsTable {
    pub columns: Vec<String>,

    /// `[T × C]`
    pub data: Array2<f64>,
}

impl ConfoundsTable {
    pub fn new(columns: Vec<String>, data: Array2<f64>) -> ConfoundsTable {
        assert_eq!(columns.len(), data.ncols());
        ConfoundsTable { columns, data }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<ConfoundsTable, ConfoundsError> {
        let path = path.as_ref();
        let file = path.display().to_string();
        let mut lines = BufReader::new(File::open(path)?).lines();

        let columns: Vec<String> = match lines.next() {
            Some(header) => header?
                .trim_end_matches(['\r', '\n'])
                .split('\t')
                .map(|c| c.to_string())
                .collect(),
            None => return Err(ConfoundsError::Empty { file }),
        };

        let mut values = vec![];
        let mut num_rows = 0;
        for (i_line, line) in lines.enumerate() {
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            let row: Vec<&str> = line.split('\t').collect();
            if row.len() != columns.len() {
                return Err(ConfoundsError::RaggedRow {
                    file,
                    row: i_line + 1,
                    expected: columns.len(),
                    got: row.len(),
                });
            }
            for (i_col, cell) in row.into_iter().enumerate() {
                values.push(parse_cell(cell).ok_or_else(|| ConfoundsError::BadValue {
                    file: file.clone(),
                    row: i_line + 1,
                    column: columns[i_col].clone(),
                    value: cell.to_string(),
                })?);
            }
            num_rows += 1;
        }

        let data = Array2::from_shape_vec((num_rows, columns.len()), values)?;
        Ok(ConfoundsTable { columns, data })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfoundsError> {
        let mut f = BufWriter::new(File::create(path)?);
        writeln!(f, "{}", self.columns.iter().join("\t"))?;
        for row in self.data.outer_iter() {
            writeln!(f, "{}", row.iter().map(|&v| format_cell(v)).join("\t"))?;
        }
        f.flush()?;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<f64>> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.data.column(i))
    }

    /// Select columns by name. Patterns ending in "*" are expanded against
    /// the table's columns (prefix match); other patterns must match exactly.
    /// Columns are returned in the order of the patterns, and within a
    /// wildcard pattern in table order, without duplicates. Patterns that
    /// match nothing are returned so the caller can report them.
    pub fn select(&self, patterns: &[String]) -> (ConfoundsTable, Vec<String>) {
        let mut selected: Vec<usize> = vec![];
        let mut unmatched = vec![];
        for pattern in patterns {
            let matches = expand_column_pattern(&self.columns, pattern);
            if matches.is_empty() {
                unmatched.push(pattern.clone());
            }
            for m in matches {
                let i = self
                    .columns
                    .iter()
                    .position(|c| *c == m)
                    .expect("expanded columns come from this table");
                if !selected.contains(&i) {
                    selected.push(i);
                }
            }
        }

        let columns = selected.iter().map(|&i| self.columns[i].clone()).collect();
        let data = self.data.select(Axis(1), &selected);
        (ConfoundsTable { columns, data }, unmatched)
    }

    /// Replace NaNs in each column with the mean of that column's finite
    /// values. An all-NaN column becomes zeros.
    pub fn fill_nan_with_mean(&mut self) {
        for mut column in self.data.columns_mut() {
            let (sum, count) = column
                .iter()
                .filter(|v| v.is_finite())
                .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
            let mean = if count == 0 { 0.0 } else { sum / count as f64 };
            column.mapv_inplace(|v| if v.is_nan() { mean } else { v });
        }
    }

    /// Append columns to the right of the table.
    pub fn append_columns(&mut self, names: Vec<String>, columns: ArrayView2<f64>) {
        assert_eq!(names.len(), columns.ncols());
        assert_eq!(self.num_rows(), columns.nrows());
        let data = ndarray::concatenate(Axis(1), &[self.data.view(), columns.view()])
            .expect("row counts were checked");
        self.data = data;
        self.columns.extend(names);
    }
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case(CONFOUNDS_NA) || cell.eq_ignore_ascii_case("nan")
    {
        Some(f64::NAN)
    } else {
        cell.parse().ok()
    }
}

fn format_cell(v: f64) -> String {
    if v.is_nan() {
        CONFOUNDS_NA.to_string()
    } else {
        format!("{v}")
    }
}

/// Read a headerless whitespace-separated matrix, e.g. a MELODIC mixing
/// matrix `[T × components]`.
pub fn read_matrix<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, ConfoundsError> {
    let path = path.as_ref();
    let file = path.display().to_string();
    let mut values = vec![];
    let mut num_rows = 0;
    let mut num_cols = None;
    for (i_line, line) in BufReader::new(File::open(path)?).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = line.split_whitespace().collect::<Vec<_>>();
        match num_cols {
            None => num_cols = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(ConfoundsError::RaggedRow {
                    file,
                    row: i_line,
                    expected: n,
                    got: row.len(),
                })
            }
            Some(_) => (),
        }
        for cell in row {
            values.push(cell.parse().map_err(|_| ConfoundsError::BadValue {
                file: file.clone(),
                row: i_line,
                column: String::new(),
                value: cell.to_string(),
            })?);
        }
        num_rows += 1;
    }
    match num_cols {
        Some(n) => Ok(Array2::from_shape_vec((num_rows, n), values)?),
        None => Err(ConfoundsError::Empty { file }),
    }
}

/// Write a headerless tab-separated matrix, readable by [`read_matrix`].
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    matrix: ArrayView2<f64>,
) -> Result<(), ConfoundsError> {
    let mut f = BufWriter::new(File::create(path)?);
    for row in matrix.outer_iter() {
        writeln!(f, "{}", row.iter().join("\t"))?;
    }
    f.flush()?;
    Ok(())
}

/// Read an AROMA noise-component list: comma-separated, 1-based component
/// indices. The returned indices are 0-based.
pub fn read_noise_components<P: AsRef<Path>>(path: P) -> Result<Vec<usize>, ConfoundsError> {
    let path = path.as_ref();
    let file = path.display().to_string();
    let contents = std::fs::read_to_string(path)?;
    let mut components = vec![];
    for cell in contents.split(|c: char| c == ',' || c.is_whitespace()) {
        if cell.is_empty() {
            continue;
        }
        match cell.parse::<usize>() {
            Ok(i) if i > 0 => components.push(i - 1),
            _ => {
                return Err(ConfoundsError::BadValue {
                    file,
                    row: 0,
                    column: String::new(),
                    value: cell.to_string(),
                })
            }
        }
    }
    Ok(components)
}

#[derive(Error, Debug)]
pub enum ConfoundsError {
    #[error("{file} is empty")]
    Empty { file: String },

    #[error("{file} row {row} has {got} values, but {expected} were expected")]
    RaggedRow {
        file: String,
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("{file} row {row} column '{column}': couldn't parse '{value}' as a number")]
    BadValue {
        file: String,
        row: usize,
        column: String,
        value: String,
    },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
