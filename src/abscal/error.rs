// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AbsCalError {
    #[error("None of the data baselines have a corresponding model baseline")]
    NoCommonBaselines,

    #[error("Baseline ({}, {}) has shape {got:?}, but ({expected_times}, {expected_freqs}) was expected", .bl.0, .bl.1)]
    BadShape {
        bl: crate::Baseline,
        got: (usize, usize),
        expected_times: usize,
        expected_freqs: usize,
    },

    #[error("Antenna {0} has no position")]
    MissingAntennaPosition(usize),

    #[error("The reference antenna {0} is not among the calibrated antennas")]
    RefAntNotPresent(usize),

    #[error("At least two frequency channels are needed to measure delays, but only {0} were supplied")]
    TooFewChannels(usize),

    #[error(transparent)]
    Math(#[from] crate::math::MathError),
}
