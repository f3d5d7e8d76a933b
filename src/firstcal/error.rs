// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with first-order delay calibration.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FirstCalError {
    #[error("At least two frequency channels are needed to measure delays, but only {0} were supplied")]
    TooFewChannels(usize),

    #[error("Frequency channels must be evenly spaced; channel {index} is {got} Hz from its predecessor, but {expected} Hz was expected")]
    UnevenChannels {
        index: usize,
        got: f64,
        expected: f64,
    },

    #[error("Data or weights of a baseline pair have different shapes: {0:?} and {1:?}")]
    PairShapeMismatch((usize, usize), (usize, usize)),

    #[error("The baseline data have {got} channels, but there are {expected} frequencies")]
    ChannelCountMismatch { got: usize, expected: usize },

    #[error("Invalid fit band: {low} GHz to {high} GHz; the lower edge must be below the upper edge")]
    BadFitBand { low: f64, high: f64 },

    #[error(transparent)]
    Redundancy(#[from] crate::redundancy::RedundancyError),

    #[error(transparent)]
    Math(#[from] crate::math::MathError),
}
