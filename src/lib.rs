// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! First-order delay calibration and absolute calibration for redundant radio
//! interferometers, plus a batch dispatcher for running first-cal jobs over
//! many files.

pub mod abscal;
pub mod chisq;
mod cli;
pub mod constants;
pub mod firstcal;
pub mod flagging;
pub(crate) mod math;
pub(crate) mod misc;
pub mod polarisation;
pub mod redundancy;
pub mod solutions;
pub mod submit;
pub mod time;
pub mod vis;

use crossbeam_utils::atomic::AtomicCell;

// Re-exports.
pub use cli::{Firstcal, FirstcalError};
pub use polarisation::{AntPol, Pol};
pub use solutions::CalSolutions;
pub use vis::VisContainer;

/// Complex double-precision numbers.
#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex<f64>;

/// A pair of antenna numbers. The first antenna is conjugated in the
/// visibility.
pub type Baseline = (usize, usize);

/// Should progress bars be drawn? This is set by the command-line interface;
/// library users get no progress bars unless they ask for them.
pub(crate) static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
