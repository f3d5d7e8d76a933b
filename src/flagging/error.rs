// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with flagging.

use thiserror::Error;

use crate::Pol;

#[derive(Error, Debug)]
pub enum FlaggingError {
    #[error("The flagging threshold must be between 0 and 1 (inclusive), but got {0}")]
    BadThreshold(f64),

    #[error("No visibility flags were supplied")]
    NoFlags,

    #[error("Flags for baseline ({ant1}, {ant2}, {pol}) have dimensions {got:?}, but ({}, {}) was expected", expected.0, expected.1)]
    ShapeMismatch {
        ant1: usize,
        ant2: usize,
        pol: Pol,
        got: (usize, usize),
        expected: (usize, usize),
    },

    #[error("Flags have {got} time samples, but {expected} times were given")]
    TimesMismatch { got: usize, expected: usize },
}
