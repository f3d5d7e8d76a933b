// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision.
 */

pub use std::f64::consts::{PI, TAU};

/// Speed of light \[metres/second\]
pub const VEL_C: f64 = 299_792_458.0;

/// HERA's longitude \[degrees East\].
pub const HERA_LONG_DEG: f64 = 21.42830;

/// HERA's latitude \[degrees\].
pub const HERA_LAT_DEG: f64 = -30.72152;

/// The antennas excluded from first-cal for the X polarisation when nothing
/// else is specified.
pub const DEFAULT_EX_ANTS_XX: &[usize] = &[81];

/// The antennas excluded from first-cal for the Y polarisation when nothing
/// else is specified.
pub const DEFAULT_EX_ANTS_YY: &[usize] = &[81];

/// The calibration file handed to first-cal jobs.
pub const DEFAULT_CALFILE: &str = "hsa7458_v001";

/// The program that the dispatcher runs once per file.
pub const DEFAULT_FIRSTCAL_EXECUTABLE: &str = "firstcal.py";

/// Baselines whose separation vectors are within this distance of each other
/// are considered redundant \[metres\].
pub const DEFAULT_REDUNDANCY_TOLERANCE: f64 = 1.0;

/// The lower edge of the band used to fine-tune first-cal delays \[GHz\].
pub const DEFAULT_FIT_BAND_LOW_GHZ: f64 = 0.11;

/// The upper edge of the band used to fine-tune first-cal delays \[GHz\].
pub const DEFAULT_FIT_BAND_HIGH_GHZ: f64 = 0.19;

/// Gains with moduli smaller than this are replaced with unity and flagged
/// when building solutions.
pub const ZERO_GAIN_TOLERANCE: f64 = 1e-10;

/// The ratio of a sidereal day to a solar day.
pub const SIDEREAL_DAY_FRACTION: f64 = 0.997_269_566_3;

/// The Julian date of the J2000 epoch.
pub const J2000_JD: f64 = 2_451_545.0;
