// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Chi-squared of data against a (gain-corrupted) model.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use ndarray::prelude::*;
use thiserror::Error;

use crate::{c64, AntPol, Pol};

#[derive(Error, Debug)]
pub enum ChisqError {
    #[error("No gains were supplied for antenna {ant}{pol}")]
    MissingGain { ant: usize, pol: AntPol },

    #[error("Baseline ({ant1}, {ant2}, {pol}) has {thing} with dimensions {got:?}, but ({}, {}) was expected", expected.0, expected.1)]
    BadShape {
        ant1: usize,
        ant2: usize,
        pol: Pol,
        thing: &'static str,
        got: (usize, usize),
        expected: (usize, usize),
    },

    #[error("No baselines are common to the data, model and weights")]
    NoCommonBaselines,
}

/// Sums of `|data_ij - g_i conj(g_j) model_ij|^2 w_ij`, all with dimensions
/// (num_times, num_freqs).
#[derive(Debug, Clone, Default)]
pub struct Chisq {
    /// Summed over every baseline used.
    pub chisq: Array2<f64>,

    /// The number of samples with non-zero weight going into `chisq`.
    pub num_obs: Array2<usize>,

    /// Summed over the baselines of each antenna polarisation. Only populated
    /// when splitting by antenna polarisation.
    pub chisq_per_antpol: BTreeMap<AntPol, Array2<f64>>,

    pub num_obs_per_antpol: BTreeMap<AntPol, Array2<usize>>,

    /// Summed over the baselines involving each antenna.
    pub chisq_per_ant: BTreeMap<(usize, AntPol), Array2<f64>>,

    pub num_obs_per_ant: BTreeMap<(usize, AntPol), Array2<usize>>,
}

/// Compute chi-squared. Baselines missing from the model or the weights are
/// skipped. Without `gains`, every gain is 1 (i.e. the data are calibrated).
/// Gain flags zero the weights of the visibilities they touch. When
/// `split_by_antpol` is set, cross-polarised visibilities are ignored and
/// per-antenna-polarisation sums are kept.
pub fn chisq(
    data: &IndexMap<(usize, usize, Pol), Array2<c64>>,
    model: &IndexMap<(usize, usize, Pol), Array2<c64>>,
    weights: &IndexMap<(usize, usize, Pol), Array2<f64>>,
    gains: Option<&IndexMap<(usize, AntPol), Array2<c64>>>,
    gain_flags: Option<&IndexMap<(usize, AntPol), Array2<bool>>>,
    split_by_antpol: bool,
) -> Result<Chisq, ChisqError> {
    let mut out: Option<Chisq> = None;

    for (&(ant1, ant2, pol), d) in data {
        let (Some(m), Some(w)) = (model.get(&(ant1, ant2, pol)), weights.get(&(ant1, ant2, pol)))
        else {
            continue;
        };
        let (p1, p2) = pol.split();
        if split_by_antpol && pol.is_cross() {
            continue;
        }
        let shape = d.dim();
        for (thing, got) in [("a model", m.dim()), ("weights", w.dim())] {
            if got != shape {
                return Err(ChisqError::BadShape {
                    ant1,
                    ant2,
                    pol,
                    thing,
                    got,
                    expected: shape,
                });
            }
        }
        let ap1 = (ant1, p1);
        let ap2 = (ant2, p2);

        let mut model_here = m.clone();
        if let Some(gains) = gains {
            let g1 = gains.get(&ap1).ok_or(ChisqError::MissingGain { ant: ant1, pol: p1 })?;
            let g2 = gains.get(&ap2).ok_or(ChisqError::MissingGain { ant: ant2, pol: p2 })?;
            Zip::from(&mut model_here)
                .and(g1)
                .and(g2)
                .for_each(|m, &g1, &g2| *m *= g1 * g2.conj());
        }
        let mut w = w.clone();
        if let Some(gain_flags) = gain_flags {
            for ap in [ap1, ap2] {
                if let Some(f) = gain_flags.get(&ap) {
                    Zip::from(&mut w).and(f).for_each(|w, &f| {
                        if f {
                            *w = 0.0;
                        }
                    });
                }
            }
        }

        let mut chisq_here = Array2::zeros(shape);
        Zip::from(&mut chisq_here)
            .and(d)
            .and(&model_here)
            .and(&w)
            .for_each(|c, &d, &m, &w| *c = (d - m).norm_sqr() * w);
        let obs_here = w.mapv(|w| usize::from(w > 0.0));

        let out = out.get_or_insert_with(|| Chisq {
            chisq: Array2::zeros(shape),
            num_obs: Array2::zeros(shape),
            ..Default::default()
        });
        out.chisq += &chisq_here;
        out.num_obs += &obs_here;
        if split_by_antpol {
            *out
                .chisq_per_antpol
                .entry(p1)
                .or_insert_with(|| Array2::zeros(shape)) += &chisq_here;
            *out
                .num_obs_per_antpol
                .entry(p1)
                .or_insert_with(|| Array2::zeros(shape)) += &obs_here;
        }
        for ap in [ap1, ap2] {
            *out
                .chisq_per_ant
                .entry(ap)
                .or_insert_with(|| Array2::zeros(shape)) += &chisq_here;
            *out
                .num_obs_per_ant
                .entry(ap)
                .or_insert_with(|| Array2::zeros(shape)) += &obs_here;
        }
    }

    out.ok_or(ChisqError::NoCommonBaselines)
}
