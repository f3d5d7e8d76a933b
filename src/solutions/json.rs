// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration solutions as json. Arrays are stored as nested lists; complex
//! gains are `[re, im]` pairs.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use ndarray::{prelude::*, IntoDimension};
use serde::{Deserialize, Serialize};

use super::{CalSolutions, CalType, GainConvention, SolutionsReadError, SolutionsWriteError};
use crate::{c64, Pol};

#[derive(Debug, Serialize, Deserialize)]
struct SolutionsFile {
    ants: Vec<usize>,
    pols: Vec<Pol>,
    freqs: Vec<f64>,
    times: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delays: Option<Vec<Vec<Vec<f64>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gains: Option<Vec<Vec<Vec<Vec<[f64; 2]>>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flags: Option<Vec<Vec<Vec<Vec<bool>>>>>,
    #[serde(default)]
    ex_ants: Vec<usize>,
    #[serde(default)]
    gain_convention: GainConvention,
    #[serde(default)]
    cal_type: CalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    calfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    observer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    git_origin_cal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    git_hash_cal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    history: Option<String>,
}

pub(super) fn read(file: &Path) -> Result<CalSolutions, SolutionsReadError> {
    let f = BufReader::new(File::open(file)?);
    let s: SolutionsFile = serde_json::from_reader(f)?;

    let (na, nt, nf, np) = (s.ants.len(), s.times.len(), s.freqs.len(), s.pols.len());
    let delays = s
        .delays
        .map(|d| {
            let flat: Vec<f64> = d.into_iter().flatten().flatten().collect();
            to_array(flat, (na, nt, np), "the delays")
        })
        .transpose()?;
    let gains = s
        .gains
        .map(|g| {
            let flat: Vec<c64> = g
                .into_iter()
                .flatten()
                .flatten()
                .flatten()
                .map(|[re, im]| c64::new(re, im))
                .collect();
            to_array(flat, (na, nt, nf, np), "the gains")
        })
        .transpose()?;
    let flags = s
        .flags
        .map(|f| {
            let flat: Vec<bool> = f.into_iter().flatten().flatten().flatten().collect();
            to_array(flat, (na, nt, nf, np), "the flags")
        })
        .transpose()?;

    Ok(CalSolutions {
        ants: s.ants,
        pols: s.pols,
        freqs: s.freqs,
        times: s.times,
        delays,
        gains,
        flags,
        ex_ants: s.ex_ants,
        gain_convention: s.gain_convention,
        cal_type: s.cal_type,
        calfile: s.calfile,
        observer: s.observer,
        git_origin_cal: s.git_origin_cal,
        git_hash_cal: s.git_hash_cal,
        history: s.history,
    })
}

/// Nested lists can be ragged, so only the total element count is checked
/// before reshaping.
fn to_array<T, D: Dimension>(
    flat: Vec<T>,
    shape: impl IntoDimension<Dim = D>,
    thing: &'static str,
) -> Result<Array<T, D>, SolutionsReadError> {
    let shape = shape.into_dimension();
    let expected = shape.size();
    let actual = flat.len();
    Array::from_shape_vec(shape, flat).map_err(|_| SolutionsReadError::BadShape {
        thing,
        expected,
        actual,
    })
}

pub(super) fn write(sols: &CalSolutions, file: &Path) -> Result<(), SolutionsWriteError> {
    let s = SolutionsFile {
        ants: sols.ants.clone(),
        pols: sols.pols.clone(),
        freqs: sols.freqs.clone(),
        times: sols.times.clone(),
        delays: sols.delays.as_ref().map(|d| {
            d.outer_iter()
                .map(|d| d.outer_iter().map(|d| d.to_vec()).collect())
                .collect()
        }),
        gains: sols.gains.as_ref().map(|g| {
            g.outer_iter()
                .map(|g| {
                    g.outer_iter()
                        .map(|g| {
                            g.outer_iter()
                                .map(|g| g.iter().map(|g| [g.re, g.im]).collect())
                                .collect()
                        })
                        .collect()
                })
                .collect()
        }),
        flags: sols.flags.as_ref().map(|f| {
            f.outer_iter()
                .map(|f| {
                    f.outer_iter()
                        .map(|f| f.outer_iter().map(|f| f.to_vec()).collect())
                        .collect()
                })
                .collect()
        }),
        ex_ants: sols.ex_ants.clone(),
        gain_convention: sols.gain_convention,
        cal_type: sols.cal_type,
        calfile: sols.calfile.clone(),
        observer: sols.observer.clone(),
        git_origin_cal: sols.git_origin_cal.clone(),
        git_hash_cal: sols.git_hash_cal.clone(),
        history: sols.history.clone(),
    };
    let f = BufWriter::new(File::create(file)?);
    serde_json::to_writer_pretty(f, &s)?;
    Ok(())
}
