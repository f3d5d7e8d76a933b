// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading or writing calibration solutions.

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolutionsReadError {
    #[error("Tried to read calibration solutions file with an unsupported extension '{ext}'! Supported formats: {}", *super::CAL_SOLUTION_EXTENSIONS)]
    UnsupportedExt { ext: String },

    #[error("Based on the dimensions of the solutions, expected {thing} to have {expected} elements, but it had {actual} instead!")]
    BadShape {
        /// What was it that wasn't sensible? Number of antennas, frequencies,
        /// etc.
        thing: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Calibration solutions contain neither delays nor gains")]
    NoSolutions,

    #[error("Antenna number {0} is negative")]
    BadAntenna(i32),

    #[error("Couldn't parse '{value}' from {key}: {reason}")]
    BadValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SolutionsWriteError {
    #[error("Tried to write calibration solutions file with an unsupported extension '{ext}'! Supported formats: {}", *super::CAL_SOLUTION_EXTENSIONS)]
    UnsupportedExt { ext: String },

    #[error("Antenna number {0} is too large to be written to FITS")]
    AntennaTooLarge(usize),

    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SolutionsCombineError {
    #[error("No calibration solutions were given to combine")]
    NoSolutions,

    #[error("Calibration solutions {index} don't have gains")]
    NoGains { index: usize },

    #[error("Calibration solutions {index} have different {what} to the first solutions")]
    Mismatch { index: usize, what: &'static str },
}

/// Errors from reading FITS files, with the location in this crate's source
/// that the error came from.
#[derive(Error, Debug)]
pub enum FitsError {
    /// Error when opening a fits file.
    #[error(
        "{source_file}:{source_line}:{source_column}: Couldn't open {fits_filename}: {fits_error}"
    )]
    Open {
        fits_error: Box<fitsio::errors::Error>,
        fits_filename: Box<Path>,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },

    /// Error describing a key that couldn't be found in a fits header.
    #[error("{source_file}:{source_line}:{source_column}: {fits_filename} HDU {hdu_num}: Couldn't find key {key}")]
    MissingKey {
        key: Box<str>,
        fits_filename: Box<Path>,
        hdu_num: usize,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },

    /// Error describing a HDU that couldn't be used as an image.
    #[error("{source_file}:{source_line}:{source_column}: {fits_filename} HDU {hdu_num}: Tried to use as an image, but not an image")]
    NotImage {
        fits_filename: Box<Path>,
        hdu_num: usize,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },

    /// Failure to read a long string.
    #[error("{source_file}:{source_line}:{source_column}: {fits_filename} HDU {hdu_num}: Couldn't read a long string from {key}")]
    LongString {
        key: Box<str>,
        fits_filename: Box<Path>,
        hdu_num: usize,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },

    /// A generic error associated with the fitsio crate.
    #[error(
        "{source_file}:{source_line}:{source_column}: {fits_filename} HDU '{hdu_description}': {fits_error}"
    )]
    Fitsio {
        fits_error: Box<fitsio::errors::Error>,
        fits_filename: Box<Path>,
        hdu_description: Box<str>,
        source_file: &'static str,
        source_line: u32,
        source_column: u32,
    },
}
