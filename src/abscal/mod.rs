// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Absolute calibration of visibilities against a model.
//!
//! The calibration equation is
//!
//! `V_ij^model = g_i conj(g_j) V_ij^data`
//!
//! (a "multiply" gain convention) and each solver linearises a part of it:
//!
//! 1. Average amplitude: `|V_ij^model| / |V_ij^data| = |g|²`.
//! 2. Tip-tilt phase: `φ_ij^model - φ_ij^data = ψ + Φ · B_ij`, where `ψ` is an
//!    overall phase and `Φ` a phase gradient \[radians/metre\] across the
//!    array (East and North components).
//! 3. Delay: `τ_ij^model - τ_ij^data = τ_i - τ_j`, with the reference antenna
//!    fixed at zero delay. Delays become gains via `g = exp(2πi ν τ)`.
//!
//! Solutions are made per time and frequency, unless the time and/or
//! frequency axes are tied, in which case a single solution covers the whole
//! axis.

mod error;

pub use error::AbsCalError;

use std::ops::Range;

use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info};
use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use crate::{
    c64,
    constants::TAU,
    math::{cexp, median, peak_delay, weighted_lstsq, MathError, Window},
    Baseline,
};

/// Options for amplitude and phase calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsCalOptions {
    /// Use one solution for all times.
    pub tie_time: bool,

    /// Use one solution for all frequencies.
    pub tie_freq: bool,

    /// Don't solve for the overall phase `ψ`; it is fixed at zero.
    pub zero_psi: bool,
}

/// Absolute calibration of a single polarisation.
#[derive(Debug, Clone)]
pub struct AbsCal {
    /// The baselines common to the data and model, with their separation
    /// vectors \[metres\].
    bls: IndexMap<Baseline, [f64; 3]>,

    /// Model visibilities (num_bls, num_times, num_freqs), in the order of
    /// `bls`.
    model: Array3<c64>,

    /// Data visibilities in the same order as `model`.
    data: Array3<c64>,

    /// Weights in the same order as `model`.
    weights: Array3<f64>,

    /// The antennas that appear in `bls`, sorted.
    pub ants: Vec<usize>,

    /// Antenna positions \[metres\] (num_ants, 3), relative to the median
    /// position.
    pub antpos: Array2<f64>,

    pub freqs: Vec1<f64>,
    pub times: Vec1<f64>,

    /// Gain amplitudes (num_times, num_freqs), after [`AbsCal::amp_lincal`].
    pub gain_amp: Option<Array2<f64>>,

    /// Overall gain phase \[radians\] (num_times, num_freqs), after
    /// [`AbsCal::phs_logcal`].
    pub gain_psi: Option<Array2<f64>>,

    /// Phase gradient \[radians/metre\] (2, num_times, num_freqs); East then
    /// North. Set by [`AbsCal::phs_logcal`].
    pub gain_phi: Option<Array3<f64>>,

    /// Per-antenna delays \[ns\] (num_ants, num_times), after
    /// [`AbsCal::delay_lincal`].
    pub delays: Option<Array2<f64>>,
}

impl AbsCal {
    /// Set up absolute calibration. Waterfalls are (num_times, num_freqs). Only
    /// cross-correlation baselines present in both `data` and `model` (in
    /// either orientation) are used. Without `weights`, every sample has unit
    /// weight.
    pub fn new(
        model: &IndexMap<Baseline, Array2<c64>>,
        data: &IndexMap<Baseline, Array2<c64>>,
        weights: Option<&IndexMap<Baseline, Array2<f64>>>,
        antpos: &IndexMap<usize, [f64; 3]>,
        freqs: Vec1<f64>,
        times: Vec1<f64>,
    ) -> Result<AbsCal, AbsCalError> {
        let (num_times, num_freqs) = (times.len(), freqs.len());
        let shape = (num_times, num_freqs);

        let mut common = vec![];
        for (&bl, d) in data {
            if bl.0 == bl.1 {
                continue;
            }
            let m = match (model.get(&bl), model.get(&(bl.1, bl.0))) {
                (Some(m), _) => m.clone(),
                (None, Some(m)) => m.mapv(|v| v.conj()),
                (None, None) => {
                    debug!("Baseline {bl:?} has no model; skipping it");
                    continue;
                }
            };
            let w = match weights {
                Some(ws) => ws.get(&bl).cloned().unwrap_or_else(|| Array2::zeros(shape)),
                None => Array2::ones(shape),
            };
            for got in [d.dim(), m.dim(), w.dim()] {
                if got != shape {
                    return Err(AbsCalError::BadShape {
                        bl,
                        got,
                        expected_times: num_times,
                        expected_freqs: num_freqs,
                    });
                }
            }
            common.push((bl, d, m, w));
        }
        if common.is_empty() {
            return Err(AbsCalError::NoCommonBaselines);
        }

        let ants: Vec<usize> = common
            .iter()
            .flat_map(|((a1, a2), ..)| [*a1, *a2])
            .unique()
            .sorted()
            .collect();
        let mut positions = Array2::zeros((ants.len(), 3));
        for (mut row, ant) in positions.outer_iter_mut().zip(&ants) {
            let pos = antpos
                .get(ant)
                .ok_or(AbsCalError::MissingAntennaPosition(*ant))?;
            row.assign(&ArrayView1::from(pos));
        }
        for mut col in positions.columns_mut() {
            let med = median(&col.to_vec());
            col -= med;
        }

        let mut bls = IndexMap::with_capacity(common.len());
        let num_bls = common.len();
        let mut model_arr = Array3::zeros((num_bls, num_times, num_freqs));
        let mut data_arr = Array3::zeros((num_bls, num_times, num_freqs));
        let mut weights_arr = Array3::zeros((num_bls, num_times, num_freqs));
        for (i, (bl, d, m, w)) in common.into_iter().enumerate() {
            let p1 = antpos[&bl.0];
            let p2 = antpos[&bl.1];
            bls.insert(bl, [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]]);
            data_arr.slice_mut(s![i, .., ..]).assign(d);
            model_arr.slice_mut(s![i, .., ..]).assign(&m);
            weights_arr.slice_mut(s![i, .., ..]).assign(&w);
        }
        debug!(
            "Absolute calibration set up with {} baselines and {} antennas",
            bls.len(),
            ants.len()
        );

        Ok(AbsCal {
            bls,
            model: model_arr,
            data: data_arr,
            weights: weights_arr,
            ants,
            antpos: positions,
            freqs,
            times,
            gain_amp: None,
            gain_psi: None,
            gain_phi: None,
            delays: None,
        })
    }

    pub fn num_times(&self) -> usize {
        self.times.len()
    }

    pub fn num_freqs(&self) -> usize {
        self.freqs.len()
    }

    /// The baselines used, in order.
    pub fn baselines(&self) -> impl Iterator<Item = Baseline> + '_ {
        self.bls.keys().copied()
    }

    fn cells(&self, opts: &AbsCalOptions) -> Vec<(Range<usize>, Range<usize>)> {
        let time_groups = if opts.tie_time {
            vec![0..self.num_times()]
        } else {
            (0..self.num_times()).map(|t| t..t + 1).collect()
        };
        let freq_groups = if opts.tie_freq {
            vec![0..self.num_freqs()]
        } else {
            (0..self.num_freqs()).map(|f| f..f + 1).collect()
        };
        time_groups
            .into_iter()
            .cartesian_product(freq_groups)
            .collect()
    }

    /// Solve for the average gain amplitude. The weighted mean of
    /// `|V^model| / |V^data|` in each cell is `|g|²`, so the gain amplitude is
    /// its square root. Cells without usable data get NaN.
    pub fn amp_lincal(&mut self, opts: &AbsCalOptions) {
        info!("Running amplitude calibration");
        let cells = self.cells(opts);
        let results: Vec<f64> = cells
            .par_iter()
            .map(|(ts, fs)| {
                let mut num = 0.0;
                let mut den = 0.0;
                let m = self.model.slice(s![.., ts.clone(), fs.clone()]);
                let d = self.data.slice(s![.., ts.clone(), fs.clone()]);
                let w = self.weights.slice(s![.., ts.clone(), fs.clone()]);
                for ((m, d), &w) in m.iter().zip(d.iter()).zip(w.iter()) {
                    let ratio = m.norm() / d.norm();
                    if w <= 0.0 || !ratio.is_finite() {
                        continue;
                    }
                    num += w * ratio;
                    den += w;
                }
                if den > 0.0 {
                    (num / den).sqrt()
                } else {
                    f64::NAN
                }
            })
            .collect();

        let mut gain_amp = Array2::from_elem((self.num_times(), self.num_freqs()), f64::NAN);
        for ((ts, fs), amp) in cells.into_iter().zip(results) {
            gain_amp.slice_mut(s![ts, fs]).fill(amp);
        }
        self.gain_amp = Some(gain_amp);
    }

    /// Solve for an overall phase and an East/North phase gradient by weighted
    /// least squares on the phase of `V^model conj(V^data)`. Cells that can't
    /// be solved get NaN.
    pub fn phs_logcal(&mut self, opts: &AbsCalOptions) -> Result<(), AbsCalError> {
        info!("Running phase calibration");
        let cells = self.cells(opts);
        let bl_vecs: Vec<[f64; 3]> = self.bls.values().copied().collect();
        let num_params = if opts.zero_psi { 2 } else { 3 };

        let results: Vec<Option<[f64; 3]>> = cells
            .par_iter()
            .map(|(ts, fs)| {
                let num_rows = bl_vecs.len() * ts.len() * fs.len();
                let mut a = Array2::zeros((num_rows, num_params));
                let mut b = Array1::zeros(num_rows);
                let mut w = Array1::zeros(num_rows);
                let mut row = 0;
                for (i_bl, bl_vec) in bl_vecs.iter().enumerate() {
                    for t in ts.clone() {
                        for f in fs.clone() {
                            let m = self.model[(i_bl, t, f)];
                            let d = self.data[(i_bl, t, f)];
                            let weight = self.weights[(i_bl, t, f)];
                            let mut col = 0;
                            if !opts.zero_psi {
                                a[(row, 0)] = 1.0;
                                col = 1;
                            }
                            a[(row, col)] = bl_vec[0];
                            a[(row, col + 1)] = bl_vec[1];
                            b[row] = (m * d.conj()).arg();
                            let usable = m.norm() > 0.0 && d.norm() > 0.0;
                            w[row] = if usable { weight } else { 0.0 };
                            row += 1;
                        }
                    }
                }
                match weighted_lstsq(a.view(), b.view(), w.view()) {
                    Ok(x) if opts.zero_psi => Some([0.0, x[0], x[1]]),
                    Ok(x) => Some([x[0], x[1], x[2]]),
                    Err(e) => {
                        debug!("Phase solve failed for times {ts:?}, freqs {fs:?}: {e}");
                        None
                    }
                }
            })
            .collect();

        let (nt, nf) = (self.num_times(), self.num_freqs());
        let mut psi = Array2::from_elem((nt, nf), f64::NAN);
        let mut phi = Array3::from_elem((2, nt, nf), f64::NAN);
        for ((ts, fs), r) in cells.into_iter().zip(results) {
            if let Some([p, px, py]) = r {
                psi.slice_mut(s![ts.clone(), fs.clone()]).fill(p);
                phi.slice_mut(s![0, ts.clone(), fs.clone()]).fill(px);
                phi.slice_mut(s![1, ts, fs]).fill(py);
            }
        }
        self.gain_psi = Some(psi);
        self.gain_phi = Some(phi);
        Ok(())
    }

    /// Solve for per-antenna delays relative to `refant`. The delay of each
    /// baseline's `V^model / V^data` is measured from the peak of its delay
    /// spectrum, then `τ_ij = τ_i - τ_j` is solved by least squares per time.
    pub fn delay_lincal(&mut self, refant: usize) -> Result<(), AbsCalError> {
        info!("Running delay calibration with reference antenna {refant}");
        let nf = self.num_freqs();
        if nf < 2 {
            return Err(AbsCalError::TooFewChannels(nf));
        }
        let i_ref = self
            .ants
            .iter()
            .position(|&a| a == refant)
            .ok_or(AbsCalError::RefAntNotPresent(refant))?;
        let freqs_ghz: Vec<f64> = self.freqs.iter().map(|f| f / 1e9).collect();
        let df = median(&freqs_ghz.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>());
        let window = Window::None.generate(nf);

        let num_bls = self.bls.len();
        let nt = self.num_times();
        // Baseline delays and their weights, (num_bls, num_times).
        let mut bl_delays = Array2::zeros((num_bls, nt));
        let mut bl_weights = Array2::zeros((num_bls, nt));
        bl_delays
            .outer_iter_mut()
            .into_par_iter()
            .zip(bl_weights.outer_iter_mut())
            .enumerate()
            .try_for_each(|(i_bl, (mut delays, mut weights))| {
                for t in 0..nt {
                    let mut any = false;
                    let ratio: Vec<c64> = (0..nf)
                        .map(|f| {
                            let d = self.data[(i_bl, t, f)];
                            let w = self.weights[(i_bl, t, f)];
                            if w > 0.0 && d.norm() > 0.0 {
                                any = true;
                                self.model[(i_bl, t, f)] / d
                            } else {
                                c64::new(0.0, 0.0)
                            }
                        })
                        .collect();
                    if any {
                        delays[t] = peak_delay(&ratio, &window, df)?;
                        weights[t] = 1.0;
                    }
                }
                Ok::<(), MathError>(())
            })?;

        // Unknowns are every antenna except the reference.
        let ant_cols: Vec<Option<usize>> = (0..self.ants.len())
            .map(|i| match i.cmp(&i_ref) {
                std::cmp::Ordering::Less => Some(i),
                std::cmp::Ordering::Equal => None,
                std::cmp::Ordering::Greater => Some(i - 1),
            })
            .collect();
        let mut a = Array2::zeros((num_bls, self.ants.len() - 1));
        for (i_bl, &(a1, a2)) in self.bls.keys().enumerate() {
            let i1 = self.ant_position(a1);
            let i2 = self.ant_position(a2);
            if let Some(c) = ant_cols[i1] {
                a[(i_bl, c)] += 1.0;
            }
            if let Some(c) = ant_cols[i2] {
                a[(i_bl, c)] -= 1.0;
            }
        }

        let mut delays = Array2::zeros((self.ants.len(), nt));
        for t in 0..nt {
            let x = weighted_lstsq(a.view(), bl_delays.column(t), bl_weights.column(t))?;
            for (i_ant, col) in ant_cols.iter().enumerate() {
                if let Some(c) = col {
                    delays[(i_ant, t)] = x[*c];
                }
            }
        }
        self.delays = Some(delays);
        Ok(())
    }

    fn ant_position(&self, ant: usize) -> usize {
        // Every baseline antenna is in `ants` by construction.
        self.ants.binary_search(&ant).unwrap_or_default()
    }

    /// Combine the amplitude and phase solutions into complex gains per
    /// antenna, (num_times, num_freqs), with the multiply convention:
    /// `g_a = |g| exp(-iψ) exp(-i Φ·x_a)`. Missing solutions are ignored.
    pub fn make_gains(&self) -> IndexMap<usize, Array2<c64>> {
        let shape = (self.num_times(), self.num_freqs());
        self.ants
            .iter()
            .zip(self.antpos.outer_iter())
            .map(|(&ant, pos)| {
                let mut g = Array2::from_elem(shape, c64::new(1.0, 0.0));
                if let Some(amp) = self.gain_amp.as_ref() {
                    g.zip_mut_with(amp, |g, &a| *g *= a);
                }
                if let Some(psi) = self.gain_psi.as_ref() {
                    g.zip_mut_with(psi, |g, &p| *g *= cexp(-p));
                }
                if let Some(phi) = self.gain_phi.as_ref() {
                    let phase = &phi.index_axis(Axis(0), 0) * pos[0]
                        + &phi.index_axis(Axis(0), 1) * pos[1];
                    g.zip_mut_with(&phase, |g, &p| *g *= cexp(-p));
                }
                (ant, g)
            })
            .collect()
    }

    /// Complex gains from the delay solutions, `g = exp(2πi ν τ)`, per antenna
    /// with dimensions (num_times, num_freqs).
    pub fn delay_gains(&self) -> Option<IndexMap<usize, Array2<c64>>> {
        let delays = self.delays.as_ref()?;
        let freqs = &self.freqs;
        Some(
            self.ants
                .iter()
                .zip(delays.outer_iter())
                .map(|(&ant, tau)| {
                    let g = Array2::from_shape_fn((tau.len(), freqs.len()), |(t, f)| {
                        cexp(TAU * freqs[f] / 1e9 * tau[t])
                    });
                    (ant, g)
                })
                .collect(),
        )
    }

    /// Amplitude then phase calibration.
    pub fn run(&mut self, opts: &AbsCalOptions) -> Result<(), AbsCalError> {
        self.amp_lincal(opts);
        self.phs_logcal(opts)
    }
}
