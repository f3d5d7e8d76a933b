// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all firstcal-related errors. This should be the *only* error
//! enum that is publicly visible.

use thiserror::Error;

use super::{abscal::AbscalArgsError, firstcal::FirstcalArgsError};
use crate::{
    abscal::AbsCalError,
    chisq::ChisqError,
    firstcal::FirstCalError,
    flagging::FlaggingError,
    polarisation::PolError,
    redundancy::RedundancyError,
    solutions::{SolutionsCombineError, SolutionsReadError, SolutionsWriteError},
    submit::SubmitError,
    vis::{VisReadError, VisWriteError},
};

/// The *only* publicly visible error from firstcal. Each error message should
/// point to the relevant help, unless it's "generic".
#[derive(Error, Debug)]
pub enum FirstcalError {
    /// An error related to submit.
    #[error("{0}\n\nSee for more info: firstcal submit --help")]
    Submit(String),

    /// An error related to first-cal.
    #[error("{0}\n\nSee for more info: firstcal firstcal --help")]
    Firstcal(String),

    /// An error related to absolute calibration.
    #[error("{0}\n\nSee for more info: firstcal abscal --help")]
    Abscal(String),

    /// Generic error surrounding calibration solutions.
    #[error("{0}\n\nSee for more info: firstcal solutions-convert --help")]
    Solutions(String),

    /// An error related to reading visibilities.
    #[error("{0}\n\nVisibility files are json or yaml documents with the keys antenna_positions, freqs, times and visibilities")]
    VisRead(String),

    /// An error related to writing visibilities.
    #[error("{0}")]
    VisWrite(String),

    /// An error related to argument files.
    #[error("{0}\n\nArgument files use the same names as the long command-line arguments, with dashes replaced by underscores")]
    ArgFile(String),

    /// A cfitsio error. Because these are usually quite spartan, some
    /// suggestions are provided here.
    #[error("cfitsio error: {0}\n\nIf you don't know what this means, try turning up verbosity (-v or -vv) and maybe disabling progress bars.")]
    Cfitsio(String),

    /// A generic error that can't be clarified further with documentation, e.g.
    /// IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

// Binary sub-command errors.

impl From<FirstcalArgsError> for FirstcalError {
    fn from(e: FirstcalArgsError) -> Self {
        match e {
            FirstcalArgsError::NoInputs
            | FirstcalArgsError::OutputCountMismatch { .. }
            | FirstcalArgsError::CrossPol(_)
            | FirstcalArgsError::BadWindow(_)
            | FirstcalArgsError::NoPols { .. }
            | FirstcalArgsError::PolNotPresent { .. } => Self::Firstcal(e.to_string()),
            FirstcalArgsError::BadOutputExt { .. } => Self::Solutions(e.to_string()),
            FirstcalArgsError::Pol(e) => Self::from(e),
        }
    }
}

impl From<AbscalArgsError> for FirstcalError {
    fn from(e: AbscalArgsError) -> Self {
        match e {
            AbscalArgsError::NoData
            | AbscalArgsError::NoModel
            | AbscalArgsError::PolNotInModel(_)
            | AbscalArgsError::NoPols
            | AbscalArgsError::CrossPol(_)
            | AbscalArgsError::FreqsDiffer
            | AbscalArgsError::TimesDiffer => Self::Abscal(e.to_string()),
            AbscalArgsError::BadOutputExt { .. } => Self::Solutions(e.to_string()),
            AbscalArgsError::Pol(e) => Self::from(e),
        }
    }
}

// Library errors.

impl From<SubmitError> for FirstcalError {
    fn from(e: SubmitError) -> Self {
        let s = e.to_string();
        match e {
            SubmitError::InvalidPol(_)
            | SubmitError::BadTaskVariable { .. }
            | SubmitError::TaskOutOfRange { .. }
            | SubmitError::ZeroTasks
            | SubmitError::ConfigFileType(_)
            | SubmitError::ConfigFile { .. } => Self::Submit(s),
            SubmitError::Git { .. } => Self::Generic(s),
            SubmitError::IO(e) => Self::from(e),
        }
    }
}

impl From<VisReadError> for FirstcalError {
    fn from(e: VisReadError) -> Self {
        let s = e.to_string();
        match e {
            VisReadError::IO(e) => Self::from(e),
            _ => Self::VisRead(s),
        }
    }
}

impl From<VisWriteError> for FirstcalError {
    fn from(e: VisWriteError) -> Self {
        Self::VisWrite(e.to_string())
    }
}

impl From<FirstCalError> for FirstcalError {
    fn from(e: FirstCalError) -> Self {
        Self::Firstcal(e.to_string())
    }
}

impl From<RedundancyError> for FirstcalError {
    fn from(e: RedundancyError) -> Self {
        Self::Firstcal(e.to_string())
    }
}

impl From<AbsCalError> for FirstcalError {
    fn from(e: AbsCalError) -> Self {
        Self::Abscal(e.to_string())
    }
}

impl From<FlaggingError> for FirstcalError {
    fn from(e: FlaggingError) -> Self {
        Self::Abscal(e.to_string())
    }
}

impl From<ChisqError> for FirstcalError {
    fn from(e: ChisqError) -> Self {
        Self::Abscal(e.to_string())
    }
}

impl From<PolError> for FirstcalError {
    fn from(e: PolError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<SolutionsReadError> for FirstcalError {
    fn from(e: SolutionsReadError) -> Self {
        let s = e.to_string();
        match e {
            SolutionsReadError::UnsupportedExt { .. }
            | SolutionsReadError::BadShape { .. }
            | SolutionsReadError::NoSolutions
            | SolutionsReadError::BadAntenna(_)
            | SolutionsReadError::BadValue { .. }
            | SolutionsReadError::Json(_) => Self::Solutions(s),
            SolutionsReadError::Fits(_) => Self::Cfitsio(s),
            SolutionsReadError::IO(e) => Self::from(e),
        }
    }
}

impl From<SolutionsCombineError> for FirstcalError {
    fn from(e: SolutionsCombineError) -> Self {
        Self::Solutions(e.to_string())
    }
}

impl From<SolutionsWriteError> for FirstcalError {
    fn from(e: SolutionsWriteError) -> Self {
        let s = e.to_string();
        match e {
            SolutionsWriteError::UnsupportedExt { .. }
            | SolutionsWriteError::AntennaTooLarge(_)
            | SolutionsWriteError::Json(_) => Self::Solutions(s),
            SolutionsWriteError::Fitsio(_) => Self::Cfitsio(s),
            SolutionsWriteError::IO(e) => Self::from(e),
        }
    }
}

impl From<std::io::Error> for FirstcalError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
