// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multiplying calibration solutions together.

use itertools::Itertools;
use log::debug;
use ndarray::prelude::*;

use super::{CalSolutions, CalType, SolutionsCombineError};
use crate::c64;

/// Frequencies of different solutions must agree to within this \[Hz\].
const FREQ_TOLERANCE_HZ: f64 = 1.0;

/// Times of different solutions must agree to within this \[Julian date\].
const TIME_TOLERANCE_JD: f64 = 1e-6;

fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| (a - b).abs() <= tol)
}

impl CalSolutions {
    /// Multiply the gains of several solutions together. All solutions must
    /// have the same antennas, polarisations, frequencies, times and gain
    /// convention. Flagged gains count as 1 in the product.
    ///
    /// With `broadcast_flags`, a gain is flagged if it's flagged in any of the
    /// solutions; otherwise only if it's flagged in all of them. Delays are
    /// summed if every solution has them. Metadata are taken from the first
    /// solutions.
    pub fn combine(
        sols: &[CalSolutions],
        broadcast_flags: bool,
    ) -> Result<CalSolutions, SolutionsCombineError> {
        let first = sols.first().ok_or(SolutionsCombineError::NoSolutions)?;
        let shape = (
            first.ants.len(),
            first.times.len(),
            first.freqs.len(),
            first.pols.len(),
        );
        for (index, s) in sols.iter().enumerate() {
            let mismatch = |what| SolutionsCombineError::Mismatch { index, what };
            match &s.gains {
                None => return Err(SolutionsCombineError::NoGains { index }),
                Some(g) if g.dim() != shape => return Err(mismatch("gain dimensions")),
                Some(_) => (),
            }
            if s.flags.as_ref().is_some_and(|f| f.dim() != shape) {
                return Err(mismatch("flag dimensions"));
            }
            if s.delays.as_ref().is_some_and(|d| d.dim() != (shape.0, shape.1, shape.3)) {
                return Err(mismatch("delay dimensions"));
            }
            if s.ants != first.ants {
                return Err(mismatch("antennas"));
            }
            if s.pols != first.pols {
                return Err(mismatch("polarisations"));
            }
            if !close(&s.freqs, &first.freqs, FREQ_TOLERANCE_HZ) {
                return Err(mismatch("frequencies"));
            }
            if !close(&s.times, &first.times, TIME_TOLERANCE_JD) {
                return Err(mismatch("times"));
            }
            if s.gain_convention != first.gain_convention {
                return Err(mismatch("gain conventions"));
            }
        }

        let mut gains = Array4::from_elem(shape, c64::new(1.0, 0.0));
        let mut flags = Array4::from_elem(shape, !broadcast_flags);
        for s in sols {
            let no_flags;
            let s_flags = match &s.flags {
                Some(f) => f.view(),
                None => {
                    no_flags = Array4::from_elem(shape, false);
                    no_flags.view()
                }
            };
            if let Some(g) = &s.gains {
                Zip::from(&mut gains)
                    .and(g)
                    .and(&s_flags)
                    .for_each(|out, &g, &f| {
                        if !f {
                            *out *= g;
                        }
                    });
            }
            Zip::from(&mut flags).and(&s_flags).for_each(|out, &f| {
                if broadcast_flags {
                    *out |= f;
                } else {
                    *out &= f;
                }
            });
        }

        let delays = sols
            .iter()
            .map(|s| s.delays.as_ref())
            .collect::<Option<Vec<_>>>()
            .map(|d| {
                d.into_iter()
                    .fold(Array3::zeros((shape.0, shape.1, shape.3)), |acc, d| acc + d)
            });
        let cal_type = if delays.is_some() && sols.iter().all(|s| s.cal_type == CalType::Delay) {
            CalType::Delay
        } else {
            CalType::Gain
        };

        let history = format!("Product of {} calibration solutions", sols.len());
        debug!("{history}");
        Ok(CalSolutions {
            ants: first.ants.clone(),
            pols: first.pols.clone(),
            freqs: first.freqs.clone(),
            times: first.times.clone(),
            delays,
            gains: Some(gains),
            flags: Some(flags),
            ex_ants: sols
                .iter()
                .flat_map(|s| s.ex_ants.iter().copied())
                .unique()
                .sorted()
                .collect(),
            gain_convention: first.gain_convention,
            cal_type,
            calfile: first.calfile.clone(),
            observer: first.observer.clone(),
            git_origin_cal: first.git_origin_cal.clone(),
            git_hash_cal: first.git_hash_cal.clone(),
            history: Some(match &first.history {
                Some(h) => format!("{h}\n{history}"),
                None => history,
            }),
        })
    }
}
