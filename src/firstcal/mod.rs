// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! First-order (delay) calibration of redundant arrays.
//!
//! Redundant baselines should measure the same visibility. The ratio of two
//! redundant baselines `((i, j), (k, l))` therefore only contains the
//! antenna-based gains; when each antenna has a pure delay `τ`, the ratio
//! `V_kl conj(V_ij)` has a single delay `τ_i - τ_j - τ_k + τ_l`. Measuring this
//! delay for every pair of redundant baselines gives an over-determined linear
//! system in the antenna delays, solved here by least squares.
//!
//! Gains follow `V_ij = g_i conj(g_j) V_true` with `g = exp(-2πi f τ)`.
//! Delays are in nanoseconds and frequencies in GHz internally.

mod error;
#[cfg(test)]
mod tests;

pub use error::FirstCalError;

use indexmap::IndexMap;
use log::{debug, info, trace};
use ndarray::prelude::*;
use num_traits::Zero;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    c64,
    constants::{DEFAULT_FIT_BAND_HIGH_GHZ, DEFAULT_FIT_BAND_LOW_GHZ, TAU},
    math::{cexp, fit_slope_through_origin, peak_delay, pinv, Window},
    misc::{expensive_op, make_progress_bar},
    redundancy::RedundantInfo,
    Baseline,
};

/// Options that control how the delay of each baseline pair is measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FirstCalParams {
    /// The window applied before the Fourier transform.
    pub window: Window,

    /// Refine the Fourier-transform delay with a linear fit to the residual
    /// phase.
    pub finetune: bool,

    /// Average over time before measuring delays, yielding a single delay per
    /// antenna.
    pub average: bool,

    /// The frequencies \[GHz\] that participate in the residual phase fit
    /// (exclusive bounds).
    pub fit_band: (f64, f64),
}

impl Default for FirstCalParams {
    fn default() -> Self {
        FirstCalParams {
            window: Window::None,
            finetune: true,
            average: false,
            fit_band: (DEFAULT_FIT_BAND_LOW_GHZ, DEFAULT_FIT_BAND_HIGH_GHZ),
        }
    }
}

/// Measure the relative delay between two redundant baselines.
///
/// `d1`, `w1`, `d2` and `w2` have dimensions (num_times, num_freqs) and
/// `freqs_ghz` must be evenly spaced. The product `d2 conj(d1)` is weighted,
/// normalised to unit modulus (zero samples stay zero), windowed and Fourier
/// transformed along frequency. The peak of the delay spectrum, refined by its
/// neighbours, gives a coarse delay; if `params.finetune` is set, the slope of
/// the remaining phase across the fit band is added.
///
/// Returns one delay \[ns\] per time, or a single delay if `params.average` is
/// set.
pub fn redundant_bl_cal_simple(
    d1: ArrayView2<c64>,
    w1: ArrayView2<f64>,
    d2: ArrayView2<c64>,
    w2: ArrayView2<f64>,
    freqs_ghz: &[f64],
    params: &FirstCalParams,
) -> Result<Vec<f64>, FirstCalError> {
    let num_freqs = freqs_ghz.len();
    if num_freqs < 2 {
        return Err(FirstCalError::TooFewChannels(num_freqs));
    }
    for other in [d2.dim(), w1.dim(), w2.dim()] {
        if other != d1.dim() {
            return Err(FirstCalError::PairShapeMismatch(d1.dim(), other));
        }
    }
    if d1.len_of(Axis(1)) != num_freqs {
        return Err(FirstCalError::ChannelCountMismatch {
            got: d1.len_of(Axis(1)),
            expected: num_freqs,
        });
    }

    // Weighted cross product.
    let mut d12 = Array2::from_shape_fn(d1.dim(), |(t, f)| {
        d2[(t, f)] * d1[(t, f)].conj() * w1[(t, f)] * w2[(t, f)]
    });
    if params.average {
        d12 = d12.sum_axis(Axis(0)).insert_axis(Axis(0));
    }
    d12.mapv_inplace(|v| {
        let a = v.norm();
        if a == 0.0 {
            v
        } else {
            v / a
        }
    });

    let window = params.window.generate(num_freqs);
    let df = freqs_ghz[1] - freqs_ghz[0];
    let (band_low, band_high) = params.fit_band;

    let delays = d12
        .outer_iter()
        .map(|row| -> Result<f64, FirstCalError> {
            let row = row.to_vec();
            let tau = peak_delay(&row, &window, df)?;
            if !params.finetune {
                return Ok(tau);
            }

            let valid: Vec<bool> = row
                .iter()
                .zip(freqs_ghz)
                .map(|(d, &f)| !d.is_zero() && f > band_low && f < band_high)
                .collect();
            let residual_phase: Vec<f64> = row
                .iter()
                .zip(freqs_ghz)
                .map(|(&d, &f)| (d * cexp(-TAU * tau * f)).arg())
                .collect();
            let dt = fit_slope_through_origin(freqs_ghz, &residual_phase, &valid);
            trace!("coarse delay {tau} ns, fine-tune {dt} ns");
            Ok(tau + dt)
        })
        .collect::<Result<Vec<f64>, FirstCalError>>()?;
    Ok(delays)
}

/// Per-antenna delays found by first-cal.
#[derive(Debug, Clone)]
pub struct FirstCalResult {
    /// The antennas that were solved for.
    pub ants: Vec<usize>,

    /// Delays \[ns\] with dimensions (num_ants, num_times); `num_times` is 1
    /// if data were averaged.
    pub delays: Array2<f64>,
}

impl FirstCalResult {
    /// Antenna number → delays.
    pub fn delay_map(&self) -> IndexMap<usize, Array1<f64>> {
        self.ants
            .iter()
            .zip(self.delays.outer_iter())
            .map(|(&a, d)| (a, d.to_owned()))
            .collect()
    }
}

/// First-cal for a single polarisation.
pub struct FirstCal<'a> {
    info: &'a RedundantInfo,

    /// Data in redundant-group baseline order, (num_bls, num_times,
    /// num_freqs).
    data: Array3<c64>,

    /// Weights in the same order as `data`.
    weights: Array3<f64>,

    freqs_ghz: Vec<f64>,
}

impl<'a> FirstCal<'a> {
    /// Prepare first-cal. `freqs_hz` must contain at least two evenly-spaced
    /// channels.
    pub fn new(
        info: &'a RedundantInfo,
        data: &IndexMap<Baseline, Array2<c64>>,
        weights: &IndexMap<Baseline, Array2<f64>>,
        freqs_hz: &[f64],
    ) -> Result<FirstCal<'a>, FirstCalError> {
        check_freqs(freqs_hz)?;
        let data = info.order_data(data)?;
        let weights = info.order_weights(weights)?;
        if data.len_of(Axis(2)) != freqs_hz.len() {
            return Err(FirstCalError::ChannelCountMismatch {
                got: data.len_of(Axis(2)),
                expected: freqs_hz.len(),
            });
        }
        if weights.dim() != data.dim() {
            return Err(FirstCalError::PairShapeMismatch(
                (weights.len_of(Axis(1)), weights.len_of(Axis(2))),
                (data.len_of(Axis(1)), data.len_of(Axis(2))),
            ));
        }

        Ok(FirstCal {
            info,
            data,
            weights,
            freqs_ghz: freqs_hz.iter().map(|f| f / 1e9).collect(),
        })
    }

    /// Measure the delay of every baseline pair. The result `M` has dimensions
    /// (num_bl_pairs, num_times).
    pub fn data_to_delays(&self, params: &FirstCalParams) -> Result<Array2<f64>, FirstCalError> {
        let (band_low, band_high) = params.fit_band;
        if band_low >= band_high {
            return Err(FirstCalError::BadFitBand {
                low: band_low,
                high: band_high,
            });
        }

        let num_pairs = self.info.bl_pairs.len();
        let pb = make_progress_bar(num_pairs, "Baseline pairs", "pairs");
        let rows = self
            .info
            .bl_pairs
            .par_iter()
            .map(|&(bl1, bl2)| {
                // Every baseline in a pair comes from the info, so its index
                // exists.
                let i1 = self.info.bl_index(bl1).unwrap_or_default();
                let i2 = self.info.bl_index(bl2).unwrap_or_default();
                let r = redundant_bl_cal_simple(
                    self.data.slice(s![i1, .., ..]),
                    self.weights.slice(s![i1, .., ..]),
                    self.data.slice(s![i2, .., ..]),
                    self.weights.slice(s![i2, .., ..]),
                    &self.freqs_ghz,
                    params,
                );
                pb.inc(1);
                r
            })
            .collect::<Result<Vec<_>, _>>()?;
        pb.finish_with_message("Measured delays");

        let num_rows = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut m = Array2::zeros((num_pairs, num_rows));
        for (mut m_row, delays) in m.outer_iter_mut().zip(rows) {
            m_row.assign(&ArrayView1::from(&delays));
        }
        Ok(m)
    }

    /// Run first-cal, returning per-antenna delays. Solutions are
    /// `x̂ = pinv(AᵀA) Aᵀ M`; the overall delay and any other degeneracies are
    /// fixed by the minimum-norm property of the pseudo-inverse.
    pub fn run(&self, params: &FirstCalParams) -> Result<FirstCalResult, FirstCalError> {
        info!(
            "Running first-cal on {} baselines in {} redundant groups ({} baseline pairs)",
            self.data.len_of(Axis(0)),
            self.info.reds.len(),
            self.info.bl_pairs.len()
        );
        let m = self.data_to_delays(params)?;

        let a = &self.info.a;
        debug!("Shape of coefficient matrix: {:?}", a.dim());
        let ata = a.t().dot(a);
        let atm = a.t().dot(&m);
        let ata_inv = expensive_op(
            || pinv(ata.view(), 1e-12),
            "Still inverting the first-cal normal matrix",
        )?;
        let delays = ata_inv.dot(&atm);

        Ok(FirstCalResult {
            ants: self.info.subsetant.clone(),
            delays,
        })
    }
}

fn check_freqs(freqs_hz: &[f64]) -> Result<(), FirstCalError> {
    if freqs_hz.len() < 2 {
        return Err(FirstCalError::TooFewChannels(freqs_hz.len()));
    }
    let expected = freqs_hz[1] - freqs_hz[0];
    for (index, pair) in freqs_hz.windows(2).enumerate().skip(1) {
        let got = pair[1] - pair[0];
        if (got - expected).abs() > 1e-6 * expected.abs() {
            return Err(FirstCalError::UnevenChannels {
                index: index + 1,
                got,
                expected,
            });
        }
    }
    Ok(())
}

/// Convert per-time delays \[ns\] into complex gains with dimensions
/// (num_times, num_freqs). Gains are `exp(-2πi f τ)`, i.e. data are divided by
/// `g_i conj(g_j)` to calibrate them.
pub fn delays_to_gains(delays_ns: ArrayView1<f64>, freqs_hz: &[f64]) -> Array2<c64> {
    Array2::from_shape_fn((delays_ns.len(), freqs_hz.len()), |(t, f)| {
        cexp(-TAU * delays_ns[t] * freqs_hz[f] / 1e9)
    })
}
