// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bookkeeping for redundant array configurations.
//!
//! Baselines with the same separation vector are redundant; in a perfectly
//! calibrated array they measure the same visibility. First-cal compares
//! pairs of redundant baselines, and each pair constrains a linear
//! combination of four antenna delays. The coefficients of those combinations
//! form the matrix `A` built here.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, trace};
use ndarray::prelude::*;
use thiserror::Error;

use crate::{c64, Baseline};

#[derive(Error, Debug)]
pub enum RedundancyError {
    #[error("No redundant baseline groups were found; at least one group with two or more baselines is needed")]
    NoRedundantGroups,

    #[error("Antenna {ant} is in a redundant group but has no position")]
    MissingAntennaPosition { ant: usize },

    #[error("Baseline ({}, {}) is needed but is not available in either orientation", .bl.0, .bl.1)]
    MissingBaseline { bl: Baseline },

    #[error("Baseline ({}, {}) has shape {got:?}, but the first baseline has shape {expected:?}", .bl.0, .bl.1)]
    ShapeMismatch {
        bl: Baseline,
        got: (usize, usize),
        expected: (usize, usize),
    },
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dist(a: [f64; 3], b: [f64; 3]) -> f64 {
    let d = sub(a, b);
    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}

/// Group cross-correlation baselines into sets of redundant baselines.
///
/// Each baseline `(i, j)` has separation vector `pos[j] - pos[i]`. Baselines
/// are oriented so that the first component of their vector that exceeds
/// `tol` is positive (e.g. East-pointing), then greedily grouped with any
/// group whose first vector is within `tol` metres. Groups with fewer than two
/// baselines are discarded, as they cannot be compared against anything.
///
/// Antennas listed in `ex_ants` are ignored.
pub fn get_reds(
    antpos: &IndexMap<usize, [f64; 3]>,
    ex_ants: &[usize],
    tol: f64,
) -> Vec<Vec<Baseline>> {
    let ants: Vec<usize> = antpos
        .keys()
        .copied()
        .filter(|a| !ex_ants.contains(a))
        .sorted()
        .collect();

    // (reference vector, baselines)
    let mut groups: Vec<([f64; 3], Vec<Baseline>)> = vec![];
    for (i_pos, &i) in ants.iter().enumerate() {
        for &j in &ants[i_pos + 1..] {
            let mut bl = (i, j);
            let mut v = sub(antpos[&j], antpos[&i]);
            let flip = v
                .iter()
                .find(|c| c.abs() > tol)
                .map(|&c| c < 0.0)
                .unwrap_or(false);
            if flip {
                bl = (j, i);
                v = [-v[0], -v[1], -v[2]];
            }

            match groups.iter_mut().find(|(r, _)| dist(*r, v) < tol) {
                Some((_, bls)) => bls.push(bl),
                None => groups.push((v, vec![bl])),
            }
        }
    }

    let mut reds: Vec<Vec<Baseline>> = groups
        .into_iter()
        .map(|(_, bls)| bls)
        .filter(|bls| bls.len() > 1)
        .collect();
    reds.sort_by_key(|g| g[0]);
    debug!(
        "Found {} redundant groups containing {} baselines",
        reds.len(),
        reds.iter().map(|g| g.len()).sum::<usize>()
    );
    reds
}

/// Redundancy information augmented with what first-cal needs.
#[derive(Debug, Clone)]
pub struct RedundantInfo {
    /// The redundant groups.
    pub reds: Vec<Vec<Baseline>>,

    /// The sorted antennas that appear in `reds`. The columns of `a` follow
    /// this order.
    pub subsetant: Vec<usize>,

    /// Every pair of baselines within each redundant group, in group order.
    pub bl_pairs: Vec<(Baseline, Baseline)>,

    /// The first-cal coefficient matrix with dimensions (num_bl_pairs,
    /// num_ants). For pair ((i, j), (k, l)), the row has +1 at i, -1 at j, -1
    /// at k and +1 at l.
    pub a: Array2<f64>,

    /// The mean separation vector of each redundant group \[metres\].
    pub ubl: Vec<[f64; 3]>,

    ant_to_index: HashMap<usize, usize>,
    bl_to_index: HashMap<Baseline, usize>,
    blpair_to_index: HashMap<(Baseline, Baseline), usize>,
}

impl RedundantInfo {
    pub fn new(
        reds: Vec<Vec<Baseline>>,
        antpos: &IndexMap<usize, [f64; 3]>,
    ) -> Result<RedundantInfo, RedundancyError> {
        if reds.iter().all(|g| g.len() < 2) {
            return Err(RedundancyError::NoRedundantGroups);
        }

        let subsetant: Vec<usize> = reds
            .iter()
            .flatten()
            .flat_map(|&(i, j)| [i, j])
            .unique()
            .sorted()
            .collect();
        for ant in &subsetant {
            if !antpos.contains_key(ant) {
                return Err(RedundancyError::MissingAntennaPosition { ant: *ant });
            }
        }
        let ant_to_index: HashMap<usize, usize> = subsetant
            .iter()
            .enumerate()
            .map(|(i, &a)| (a, i))
            .collect();
        let bl_to_index: HashMap<Baseline, usize> = reds
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, &bl)| (bl, i))
            .collect();

        let bl_pairs: Vec<(Baseline, Baseline)> = reds
            .iter()
            .flat_map(|group| group.iter().copied().tuple_combinations::<(_, _)>())
            .collect();
        let blpair_to_index = bl_pairs
            .iter()
            .enumerate()
            .map(|(i, &bp)| (bp, i))
            .collect();

        let mut a = Array2::zeros((bl_pairs.len(), subsetant.len()));
        for (n, &((i, j), (k, l))) in bl_pairs.iter().enumerate() {
            a[(n, ant_to_index[&i])] += 1.0;
            a[(n, ant_to_index[&j])] -= 1.0;
            a[(n, ant_to_index[&k])] -= 1.0;
            a[(n, ant_to_index[&l])] += 1.0;
        }
        trace!("First-cal coefficient matrix:\n{a}");

        let ubl = reds
            .iter()
            .map(|group| {
                let mut mean = [0.0; 3];
                for &(i, j) in group {
                    let v = sub(antpos[&j], antpos[&i]);
                    for (m, c) in mean.iter_mut().zip(v) {
                        *m += c;
                    }
                }
                mean.map(|m| m / group.len() as f64)
            })
            .collect();

        Ok(RedundantInfo {
            reds,
            subsetant,
            bl_pairs,
            a,
            ubl,
            ant_to_index,
            bl_to_index,
            blpair_to_index,
        })
    }

    /// All baselines in group order.
    pub fn bl_order(&self) -> impl Iterator<Item = Baseline> + '_ {
        self.reds.iter().flatten().copied()
    }

    pub fn num_ants(&self) -> usize {
        self.subsetant.len()
    }

    pub fn ant_index(&self, ant: usize) -> Option<usize> {
        self.ant_to_index.get(&ant).copied()
    }

    pub fn bl_index(&self, bl: Baseline) -> Option<usize> {
        self.bl_to_index.get(&bl).copied()
    }

    pub fn blpair_index(&self, blpair: (Baseline, Baseline)) -> Option<usize> {
        self.blpair_to_index.get(&blpair).copied()
    }

    /// The column indices in `a` of the four antennas of a baseline pair.
    pub fn blpair_to_antind(&self, blpair: (Baseline, Baseline)) -> Option<[usize; 4]> {
        let ((i, j), (k, l)) = blpair;
        Some([
            self.ant_index(i)?,
            self.ant_index(j)?,
            self.ant_index(k)?,
            self.ant_index(l)?,
        ])
    }

    /// Arrange data in `bl_order`. Baselines are looked up as given, and
    /// otherwise in the reverse orientation, in which case the data are
    /// conjugated. The output has dimensions (num_bls, num_times, num_freqs).
    pub fn order_data(
        &self,
        dd: &IndexMap<Baseline, Array2<c64>>,
    ) -> Result<Array3<c64>, RedundancyError> {
        self.order(dd, |v| v.conj())
    }

    /// Like [`RedundantInfo::order_data`], but for real weights (which are
    /// not conjugated).
    pub fn order_weights(
        &self,
        ww: &IndexMap<Baseline, Array2<f64>>,
    ) -> Result<Array3<f64>, RedundancyError> {
        self.order(ww, |v| v)
    }

    fn order<T: Clone + num_traits::Zero>(
        &self,
        map: &IndexMap<Baseline, Array2<T>>,
        reverse: impl Fn(T) -> T,
    ) -> Result<Array3<T>, RedundancyError> {
        let mut expected = None;
        let mut out: Option<Array3<T>> = None;
        for (n, bl) in self.bl_order().enumerate() {
            let slice = match (map.get(&bl), map.get(&(bl.1, bl.0))) {
                (Some(v), _) => v.clone(),
                (None, Some(v)) => v.mapv(|x| reverse(x)),
                (None, None) => return Err(RedundancyError::MissingBaseline { bl }),
            };
            let dim = slice.dim();
            let expected = *expected.get_or_insert(dim);
            if dim != expected {
                return Err(RedundancyError::ShapeMismatch {
                    bl,
                    got: dim,
                    expected,
                });
            }
            let out = out.get_or_insert_with(|| {
                Array3::zeros((self.bl_to_index.len(), expected.0, expected.1))
            });
            out.slice_mut(s![n, .., ..]).assign(&slice);
        }
        // `new` guarantees at least two baselines.
        Ok(out.unwrap_or_else(|| Array3::zeros((0, 0, 0))))
    }
}
