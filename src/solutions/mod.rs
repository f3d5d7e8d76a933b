// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write calibration solutions.
//!
//! Solutions can be per-antenna delays (from first-cal), complex gains (from
//! abscal, or derived from delays), or both. They are stored as FITS files
//! (preferred) or json.

mod combine;
mod error;
mod fits;
mod json;

pub use error::{FitsError, SolutionsCombineError, SolutionsReadError, SolutionsWriteError};

use std::{path::Path, str::FromStr};

use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, trace};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{c64, constants::ZERO_GAIN_TOLERANCE, firstcal::delays_to_gains, Pol};

lazy_static::lazy_static! {
    pub(crate) static ref CAL_SOLUTION_EXTENSIONS: String = CalSolutionType::iter().join(", ");
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(crate) enum CalSolutionType {
    #[strum(serialize = "fits")]
    Fits,

    #[strum(serialize = "json")]
    Json,
}

/// How gains relate data to the truth. With the "divide" convention,
/// `V_ij^data = g_i conj(g_j) V_ij^true`, so calibration divides the data by
/// the gains. With "multiply", `V_ij^true = g_i conj(g_j) V_ij^data`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GainConvention {
    #[default]
    Divide,
    Multiply,
}

/// What kind of calibration made these solutions?
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CalType {
    #[default]
    Delay,
    Gain,
}

/// Calibration solutions and the metadata describing how they were made.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalSolutions {
    /// Antenna numbers. The first axis of `delays`, `gains` and `flags` follows
    /// this order.
    pub ants: Vec<usize>,

    /// Polarisations. The last axis of `delays`, `gains` and `flags` follows
    /// this order.
    pub pols: Vec<Pol>,

    /// Frequencies \[Hz\].
    pub freqs: Vec<f64>,

    /// Times \[Julian date\].
    pub times: Vec<f64>,

    /// Per-antenna delays \[ns\] with dimensions (num_ants, num_times,
    /// num_pols).
    pub delays: Option<Array3<f64>>,

    /// Complex gains with dimensions (num_ants, num_times, num_freqs,
    /// num_pols).
    pub gains: Option<Array4<c64>>,

    /// Gain flags with the same dimensions as `gains`.
    pub flags: Option<Array4<bool>>,

    /// Antennas that were excluded from calibration.
    pub ex_ants: Vec<usize>,

    pub gain_convention: GainConvention,

    pub cal_type: CalType,

    /// The calibration file (array description) used.
    pub calfile: Option<String>,

    pub observer: Option<String>,

    /// The git origin of the calibration code.
    pub git_origin_cal: Option<String>,

    /// The git hash of the calibration code.
    pub git_hash_cal: Option<String>,

    /// Free-form history.
    pub history: Option<String>,
}

impl CalSolutions {
    /// Solutions from per-antenna delays \[ns\] with dimensions (num_ants,
    /// num_times, num_pols). Gains `exp(-2πi f τ)` (divide convention) are
    /// derived from the delays.
    pub fn from_delays(
        ants: Vec<usize>,
        pols: Vec<Pol>,
        freqs: Vec<f64>,
        times: Vec<f64>,
        delays: Array3<f64>,
    ) -> CalSolutions {
        let (num_ants, num_times, num_pols) = delays.dim();
        let mut gains = Array4::zeros((num_ants, num_times, freqs.len(), num_pols));
        for (i_ant, i_pol) in (0..num_ants).cartesian_product(0..num_pols) {
            gains
                .slice_mut(s![i_ant, .., .., i_pol])
                .assign(&delays_to_gains(delays.slice(s![i_ant, .., i_pol]), &freqs));
        }
        let flags = Array4::from_elem(gains.dim(), false);
        CalSolutions {
            ants,
            pols,
            freqs,
            times,
            delays: Some(delays),
            gains: Some(gains),
            flags: Some(flags),
            gain_convention: GainConvention::Divide,
            cal_type: CalType::Delay,
            ..Default::default()
        }
    }

    /// Solutions from per-polarisation maps of antenna → gains (num_times,
    /// num_freqs). Antennas missing from a polarisation are flagged. Gains that
    /// are non-finite or have an amplitude within [`ZERO_GAIN_TOLERANCE`] of
    /// zero are replaced by 1 and flagged.
    pub fn from_gain_maps(
        pols: Vec<Pol>,
        freqs: Vec<f64>,
        times: Vec<f64>,
        gain_maps: &[IndexMap<usize, Array2<c64>>],
        gain_convention: GainConvention,
    ) -> CalSolutions {
        let ants: Vec<usize> = gain_maps
            .iter()
            .flat_map(|m| m.keys().copied())
            .unique()
            .sorted()
            .collect();
        let shape = (ants.len(), times.len(), freqs.len(), pols.len());
        let mut gains = Array4::from_elem(shape, c64::new(1.0, 0.0));
        let mut flags = Array4::from_elem(shape, true);
        for (i_pol, map) in gain_maps.iter().enumerate().take(pols.len()) {
            for (i_ant, ant) in ants.iter().enumerate() {
                let g = match map.get(ant) {
                    Some(g) if g.dim() == (times.len(), freqs.len()) => g,
                    _ => continue,
                };
                let mut out_g = gains.slice_mut(s![i_ant, .., .., i_pol]);
                let mut out_f = flags.slice_mut(s![i_ant, .., .., i_pol]);
                for ((out_g, out_f), &g) in out_g.iter_mut().zip(out_f.iter_mut()).zip(g.iter()) {
                    if g.is_finite() && g.norm() > ZERO_GAIN_TOLERANCE {
                        *out_g = g;
                        *out_f = false;
                    }
                }
            }
        }
        trace!(
            "{} of {} gains are flagged",
            flags.iter().filter(|&&f| f).count(),
            flags.len()
        );

        CalSolutions {
            ants,
            pols,
            freqs,
            times,
            delays: None,
            gains: Some(gains),
            flags: Some(flags),
            gain_convention,
            cal_type: CalType::Gain,
            ..Default::default()
        }
    }

    /// Check that every array agrees with the metadata.
    pub fn validate(&self) -> Result<(), SolutionsReadError> {
        if self.delays.is_none() && self.gains.is_none() {
            return Err(SolutionsReadError::NoSolutions);
        }
        let (na, nt, nf, np) = (
            self.ants.len(),
            self.times.len(),
            self.freqs.len(),
            self.pols.len(),
        );
        let check = |thing: &'static str, expected: usize, actual: usize| {
            if expected == actual {
                Ok(())
            } else {
                Err(SolutionsReadError::BadShape {
                    thing,
                    expected,
                    actual,
                })
            }
        };
        if let Some(d) = &self.delays {
            check("the delays", na * nt * np, d.len())?;
            check("the delay antenna axis", na, d.len_of(Axis(0)))?;
            check("the delay polarisation axis", np, d.len_of(Axis(2)))?;
        }
        if let Some(g) = &self.gains {
            check("the gains", na * nt * nf * np, g.len())?;
            check("the gain antenna axis", na, g.len_of(Axis(0)))?;
            check("the gain frequency axis", nf, g.len_of(Axis(2)))?;
        }
        if let (Some(g), Some(f)) = (&self.gains, &self.flags) {
            if g.dim() != f.dim() {
                return Err(SolutionsReadError::BadShape {
                    thing: "the flags",
                    expected: g.len(),
                    actual: f.len(),
                });
            }
        }
        Ok(())
    }

    /// The antennas whose gains are completely flagged.
    pub fn flagged_ants(&self) -> Vec<usize> {
        match &self.flags {
            None => vec![],
            Some(flags) => self
                .ants
                .iter()
                .zip(flags.outer_iter())
                .filter(|(_, f)| f.iter().all(|&f| f))
                .map(|(&a, _)| a)
                .collect(),
        }
    }

    /// Read in calibration solutions from a file. The format of the file is
    /// determined by the file's extension (e.g. ".fits").
    pub fn read_solutions_from_ext<P: AsRef<Path>>(
        file: P,
    ) -> Result<CalSolutions, SolutionsReadError> {
        let file = file.as_ref();
        let ext = file.extension().and_then(|e| e.to_str());
        let sols = match ext.and_then(|s| CalSolutionType::from_str(&s.to_lowercase()).ok()) {
            Some(CalSolutionType::Fits) => fits::read(file),
            Some(CalSolutionType::Json) => json::read(file),
            None => Err(SolutionsReadError::UnsupportedExt {
                ext: ext.unwrap_or("<no extension>").to_string(),
            }),
        }?;
        sols.validate()?;
        debug!(
            "Read {} solutions for {} antennas from '{}'",
            sols.cal_type,
            sols.ants.len(),
            file.display()
        );
        Ok(sols)
    }

    /// From the target file extension, write out the appropriately-formatted
    /// solutions.
    pub fn write_solutions_from_ext<P: AsRef<Path>>(
        &self,
        file: P,
    ) -> Result<(), SolutionsWriteError> {
        let file = file.as_ref();
        let ext = file.extension().and_then(|e| e.to_str());
        match ext.and_then(|s| CalSolutionType::from_str(&s.to_lowercase()).ok()) {
            Some(CalSolutionType::Fits) => fits::write(self, file),
            Some(CalSolutionType::Json) => json::write(self, file),
            None => Err(SolutionsWriteError::UnsupportedExt {
                ext: ext.unwrap_or("<no extension>").to_string(),
            }),
        }?;
        debug!("Wrote solutions to '{}'", file.display());
        Ok(())
    }
}
