// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.


use std::str::FromStr;

use fftw::{
    array::AlignedVec,
    plan::{C2CPlan, C2CPlan64},
    types::{Flag, Sign},
};
use nalgebra::DMatrix;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::{c64, constants::TAU};

#[derive(Error, Debug)]
pub enum MathError {
    #[error("Singular value decomposition did not converge: {0}")]
    Svd(&'static str),

    #[error("FFTW error: {0}")]
    Fft(#[from] fftw::error::Error),

    #[error("Least-squares system has {rows} equations but {cols} unknowns; not enough equations")]
    Underdetermined { rows: usize, cols: usize },
}

/// Complex exponential. The argument is assumed to be purely imaginary.
///
/// This function doesn't actually use complex numbers; it just returns the real
/// and imag components from Euler's formula (i.e. e^{ix} = cos{x} + i sin{x}).
#[inline]
pub(crate) fn cexp(x: f64) -> c64 {
    let (im, re) = x.sin_cos();
    c64::new(re, im)
}

/// Window functions that can be applied before taking a Fourier transform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum Window {
    #[default]
    #[strum(serialize = "none")]
    None,
    #[strum(to_string = "hann", serialize = "hanning")]
    Hann,
    #[strum(serialize = "blackman")]
    Blackman,
    #[strum(to_string = "blackman-harris", serialize = "blackmanharris")]
    BlackmanHarris,
}

impl Window {
    pub fn parse(s: &str) -> Option<Window> {
        Window::from_str(s).ok()
    }

    /// Generate this window with `n` samples.
    pub fn generate(self, n: usize) -> Vec<f64> {
        if n <= 1 {
            return vec![1.0; n];
        }
        let denom = n as f64;
        (0..n)
            .map(|i| {
                let x = TAU * i as f64 / denom;
                match self {
                    Window::None => 1.0,
                    Window::Hann => 0.5 - 0.5 * x.cos(),
                    Window::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                    Window::BlackmanHarris => {
                        0.35875 - 0.48829 * x.cos() + 0.14128 * (2.0 * x).cos()
                            - 0.01168 * (3.0 * x).cos()
                    }
                }
            })
            .collect()
    }
}

/// The discrete Fourier transform of `input` with the forward sign convention
/// (`X_k = Σ x_n exp(-2πi kn/N)`), done by FFTW.
pub(crate) fn dft(input: &[c64]) -> Result<Vec<c64>, MathError> {
    let n = input.len();
    if n == 0 {
        return Ok(vec![]);
    }
    let mut plan: C2CPlan64 = C2CPlan::aligned(&[n], Sign::Forward, Flag::ESTIMATE)?;
    let mut fft_in: AlignedVec<c64> = AlignedVec::new(n);
    let mut fft_out: AlignedVec<c64> = AlignedVec::new(n);
    fft_in.copy_from_slice(input);
    plan.c2c(&mut fft_in, &mut fft_out)?;
    Ok(fft_out.to_vec())
}

/// The sample frequencies of a DFT with `n` bins and sample spacing `d`, in
/// the standard order (zero, positive, then negative frequencies).
pub(crate) fn fftfreq(n: usize, d: f64) -> Vec<f64> {
    let scale = 1.0 / (n as f64 * d);
    (0..n)
        .map(|i| {
            let k = if i < n.div_ceil(2) {
                i as isize
            } else {
                i as isize - n as isize
            };
            k as f64 * scale
        })
        .collect()
}

/// Find the delay of a complex spectrum `spectrum` sampled with channel
/// spacing `df`. The DFT peak is found and refined by the amplitude-weighted
/// centroid of the peak bin and its two neighbours (indices wrap). The result
/// has the inverse units of `df`.
pub(crate) fn peak_delay(spectrum: &[c64], window: &[f64], df: f64) -> Result<f64, MathError> {
    let n = spectrum.len();
    let windowed: Vec<c64> = spectrum
        .iter()
        .zip(window.iter())
        .map(|(&s, &w)| s * w)
        .collect();
    let amps: Vec<f64> = dft(&windowed)?.into_iter().map(|c| c.norm()).collect();
    let dlys = fftfreq(n, df);

    let mut max_index = 0;
    let mut max_amp = f64::NEG_INFINITY;
    for (i, &a) in amps.iter().enumerate() {
        if a > max_amp {
            max_amp = a;
            max_index = i;
        }
    }

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for offset in [-1_isize, 0, 1] {
        let i = (max_index as isize + offset).rem_euclid(n as isize) as usize;
        numerator += amps[i] * dlys[i];
        denominator += amps[i];
    }
    if denominator > 0.0 {
        Ok(numerator / denominator)
    } else {
        Ok(0.0)
    }
}

/// Fit `y = 2π x m` for the slope `m` by least squares, using only the points
/// where `valid` is true. Returns 0 if there are no valid points.
pub(crate) fn fit_slope_through_origin(x: &[f64], y: &[f64], valid: &[bool]) -> f64 {
    let mut xy = 0.0;
    let mut xx = 0.0;
    for ((&x, &y), &v) in x.iter().zip(y.iter()).zip(valid.iter()) {
        if !v {
            continue;
        }
        let a = TAU * x;
        xy += a * y;
        xx += a * a;
    }
    if xx > 0.0 {
        xy / xx
    } else {
        0.0
    }
}

pub(crate) fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[(i, j)])
}

pub(crate) fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// The Moore-Penrose pseudo-inverse of `a`. Singular values smaller than
/// `eps` times the largest are treated as zero.
pub(crate) fn pinv(a: ArrayView2<f64>, eps: f64) -> Result<Array2<f64>, MathError> {
    let m = to_dmatrix(a);
    let max_sv = m.clone().svd(false, false).singular_values.max();
    let p = m.pseudo_inverse(eps * max_sv.max(f64::MIN_POSITIVE))
        .map_err(MathError::Svd)?;
    Ok(from_dmatrix(&p))
}

/// Solve the weighted linear least-squares problem `min Σ w (A x - b)²` for
/// `x`. Rows with zero (or negative) weight are ignored. Rank deficiency is
/// handled with a pseudo-inverse, giving the minimum-norm solution.
pub(crate) fn weighted_lstsq(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
    w: ArrayView1<f64>,
) -> Result<Array1<f64>, MathError> {
    let (rows, cols) = a.dim();
    let mut ata = Array2::<f64>::zeros((cols, cols));
    let mut atb = Array1::<f64>::zeros(cols);
    let mut used = 0;
    for r in 0..rows {
        let wr = w[r];
        if wr <= 0.0 || !b[r].is_finite() {
            continue;
        }
        used += 1;
        for i in 0..cols {
            let ai = a[(r, i)];
            if ai == 0.0 {
                continue;
            }
            atb[i] += wr * ai * b[r];
            for j in 0..cols {
                ata[(i, j)] += wr * ai * a[(r, j)];
            }
        }
    }
    if used == 0 {
        return Err(MathError::Underdetermined { rows: 0, cols });
    }
    let inv = pinv(ata.view(), 1e-12)?;
    Ok(inv.dot(&atb))
}

/// The median of some values, ignoring NaNs. Returns NaN if there are no
/// values.
pub(crate) fn median(values: &[f64]) -> f64 {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}
