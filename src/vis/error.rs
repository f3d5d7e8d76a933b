// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading or writing visibility containers.

use thiserror::Error;

use crate::Pol;

#[derive(Error, Debug)]
pub enum VisReadError {
    #[error("Tried to read a visibility file with an unsupported extension '{ext}'! Supported formats: {}", *super::VIS_FILE_EXTENSIONS)]
    UnsupportedExt { ext: String },

    #[error("Visibility file '{file}' contains no {thing}")]
    Empty { file: String, thing: &'static str },

    #[error("Frequencies in '{file}' are not strictly increasing")]
    FreqsNotIncreasing { file: String },

    #[error("Baseline ({ant1}, {ant2}, {pol}) has {thing} with shape {got:?}, but ({expected_times}, {expected_freqs}) was expected")]
    BadShape {
        ant1: usize,
        ant2: usize,
        pol: Pol,
        thing: &'static str,
        got: (usize, usize),
        expected_times: usize,
        expected_freqs: usize,
    },

    #[error("Baseline ({ant1}, {ant2}, {pol}) appears more than once (possibly reversed)")]
    Duplicate { ant1: usize, ant2: usize, pol: Pol },

    #[error("Antenna {ant} is used by a baseline but has no position")]
    MissingAntennaPosition { ant: usize },

    #[error("Couldn't decode json structure from '{file}': {err}")]
    Json { file: String, err: serde_json::Error },

    #[error("Couldn't decode yaml structure from '{file}': {err}")]
    Yaml { file: String, err: serde_yaml::Error },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum VisWriteError {
    #[error("Tried to write a visibility file with an unsupported extension '{ext}'! Supported formats: {}", *super::VIS_FILE_EXTENSIONS)]
    UnsupportedExt { ext: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum VisRephaseError {
    #[error("Got {got} LST offsets, but the visibilities have {expected} times")]
    DlstLength { got: usize, expected: usize },

    #[error("Antenna {ant} has no position")]
    MissingAntennaPosition { ant: usize },
}
