// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility containers.
//!
//! A visibility container holds the complex waterfalls (time × frequency) of
//! every baseline and polarisation of an observation, along with the metadata
//! that calibration needs: antenna positions (topocentric ENU, metres),
//! frequencies \[Hz\] and times \[Julian date\].
//!
//! On disk, containers are json or yaml documents. Complex numbers are written
//! as `[re, im]` pairs; flags are optional and default to unflagged.

mod error;
mod rephase;

pub use error::{VisReadError, VisRephaseError, VisWriteError};

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
    str::FromStr,
};

use indexmap::IndexMap;
use itertools::Itertools;
use log::debug;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use crate::{c64, Baseline, Pol};

lazy_static::lazy_static! {
    pub(crate) static ref VIS_FILE_EXTENSIONS: String = VisFileType::iter().join(", ");
}

#[derive(Debug, Clone, Copy, Display, EnumIter, EnumString)]
pub(crate) enum VisFileType {
    #[strum(serialize = "json")]
    Json,

    #[strum(serialize = "yaml")]
    Yaml,
}

impl VisFileType {
    fn from_path(path: &Path) -> Option<VisFileType> {
        let ext = path.extension().and_then(|e| e.to_str())?.to_lowercase();
        match ext.as_str() {
            "yml" => Some(VisFileType::Yaml),
            e => VisFileType::from_str(e).ok(),
        }
    }
}

fn ext_string(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("<no extension>")
        .to_string()
}

/// The data and flags of a single baseline and polarisation. Both arrays have
/// dimensions (num_times, num_freqs).
#[derive(Debug, Clone, PartialEq)]
pub struct Waterfall {
    pub data: Array2<c64>,
    pub flags: Array2<bool>,
}

impl Waterfall {
    /// Unflagged data.
    pub fn new(data: Array2<c64>) -> Waterfall {
        let flags = Array2::from_elem(data.raw_dim(), false);
        Waterfall { data, flags }
    }

    /// Binary weights: 1 where unflagged, 0 where flagged.
    pub fn weights(&self) -> Array2<f64> {
        self.flags.mapv(|f| if f { 0.0 } else { 1.0 })
    }

    /// The waterfall of the reversed baseline.
    pub fn conj(&self) -> Waterfall {
        Waterfall {
            data: self.data.mapv(|v| v.conj()),
            flags: self.flags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisContainer {
    /// Antenna positions \[metres\], keyed by antenna number.
    pub antpos: IndexMap<usize, [f64; 3]>,

    /// Channel frequencies \[Hz\].
    pub freqs: Vec1<f64>,

    /// Integration centres \[Julian date\].
    pub times: Vec1<f64>,

    /// The visibilities, keyed by (ant1, ant2, pol).
    pub vis: IndexMap<(usize, usize, Pol), Waterfall>,
}

impl VisContainer {
    pub fn new(antpos: IndexMap<usize, [f64; 3]>, freqs: Vec1<f64>, times: Vec1<f64>) -> Self {
        VisContainer {
            antpos,
            freqs,
            times,
            vis: IndexMap::new(),
        }
    }

    pub fn num_times(&self) -> usize {
        self.times.len()
    }

    pub fn num_freqs(&self) -> usize {
        self.freqs.len()
    }

    /// The polarisations present, in order of first appearance.
    pub fn pols(&self) -> Vec<Pol> {
        self.vis.keys().map(|&(_, _, p)| p).unique().collect()
    }

    /// The sorted antenna numbers used by the visibilities.
    pub fn ants(&self) -> Vec<usize> {
        self.vis
            .keys()
            .flat_map(|&(a1, a2, _)| [a1, a2])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Add a waterfall. A baseline that is already present (in either
    /// orientation) is rejected, as are waterfalls of the wrong shape and
    /// antennas without positions.
    pub fn insert(
        &mut self,
        ant1: usize,
        ant2: usize,
        pol: Pol,
        waterfall: Waterfall,
    ) -> Result<(), VisReadError> {
        let expected = (self.num_times(), self.num_freqs());
        for (thing, got) in [("data", waterfall.data.dim()), ("flags", waterfall.flags.dim())] {
            if got != expected {
                return Err(VisReadError::BadShape {
                    ant1,
                    ant2,
                    pol,
                    thing,
                    got,
                    expected_times: expected.0,
                    expected_freqs: expected.1,
                });
            }
        }
        for ant in [ant1, ant2] {
            if !self.antpos.contains_key(&ant) {
                return Err(VisReadError::MissingAntennaPosition { ant });
            }
        }
        if self.vis.contains_key(&(ant1, ant2, pol))
            || self.vis.contains_key(&(ant2, ant1, pol.conj()))
        {
            return Err(VisReadError::Duplicate { ant1, ant2, pol });
        }
        self.vis.insert((ant1, ant2, pol), waterfall);
        Ok(())
    }

    /// Get the waterfall of a baseline and polarisation. If only the reversed
    /// baseline is stored, its conjugate is returned.
    pub fn get(&self, bl: Baseline, pol: Pol) -> Option<Waterfall> {
        let (a1, a2) = bl;
        if let Some(w) = self.vis.get(&(a1, a2, pol)) {
            return Some(w.clone());
        }
        self.vis.get(&(a2, a1, pol.conj())).map(Waterfall::conj)
    }

    /// The separation vector of a baseline (position of `ant2` minus position
    /// of `ant1`).
    pub fn baseline_vector(&self, bl: Baseline) -> Option<[f64; 3]> {
        let p1 = self.antpos.get(&bl.0)?;
        let p2 = self.antpos.get(&bl.1)?;
        Some([p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]])
    }

    /// The cross-correlation visibilities of a single polarisation as data and
    /// weights, with the excluded antennas removed.
    pub fn select_pol(
        &self,
        pol: Pol,
        ex_ants: &[usize],
    ) -> IndexMap<Baseline, (Array2<c64>, Array2<f64>)> {
        self.vis
            .iter()
            .filter(|(&(a1, a2, p), _)| {
                p == pol && a1 != a2 && !ex_ants.contains(&a1) && !ex_ants.contains(&a2)
            })
            .map(|(&(a1, a2, _), w)| ((a1, a2), (w.data.clone(), w.weights())))
            .collect()
    }

    /// Antenna positions of the given antennas, with any missing antennas
    /// skipped.
    pub fn positions_of(&self, ants: &[usize]) -> IndexMap<usize, [f64; 3]> {
        ants.iter()
            .filter_map(|a| self.antpos.get(a).map(|p| (*a, *p)))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VisFile {
    antenna_positions: BTreeMap<usize, [f64; 3]>,
    freqs: Vec<f64>,
    times: Vec<f64>,
    visibilities: Vec<VisRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VisRecord {
    ant1: usize,
    ant2: usize,
    pol: Pol,
    data: Vec<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flags: Option<Vec<Vec<bool>>>,
}

fn rows_to_array<T: Clone, U>(
    rows: &[Vec<U>],
    f: impl Fn(&U) -> T,
) -> Result<Array2<T>, (usize, usize)> {
    let num_rows = rows.len();
    let num_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != num_cols) {
        // Report the first ragged row's length.
        let bad = rows
            .iter()
            .find(|r| r.len() != num_cols)
            .map(|r| r.len())
            .unwrap_or(0);
        return Err((num_rows, bad));
    }
    let flat: Vec<T> = rows.iter().flat_map(|r| r.iter().map(&f)).collect();
    Array2::from_shape_vec((num_rows, num_cols), flat).map_err(|_| (num_rows, num_cols))
}

/// Read a visibility container. The format is determined by the file
/// extension.
pub fn read_vis<P: AsRef<Path>>(file: P) -> Result<VisContainer, VisReadError> {
    let file = file.as_ref();
    let file_str = file.display().to_string();
    debug!("Reading visibilities from {file_str}");
    let vis_file: VisFile = match VisFileType::from_path(file) {
        Some(VisFileType::Json) => {
            let reader = BufReader::new(File::open(file)?);
            serde_json::from_reader(reader).map_err(|err| VisReadError::Json {
                file: file_str.clone(),
                err,
            })?
        }
        Some(VisFileType::Yaml) => {
            let reader = BufReader::new(File::open(file)?);
            serde_yaml::from_reader(reader).map_err(|err| VisReadError::Yaml {
                file: file_str.clone(),
                err,
            })?
        }
        None => {
            return Err(VisReadError::UnsupportedExt {
                ext: ext_string(file),
            })
        }
    };

    let VisFile {
        antenna_positions,
        freqs,
        times,
        visibilities,
    } = vis_file;
    let freqs = Vec1::try_from_vec(freqs).map_err(|_| VisReadError::Empty {
        file: file_str.clone(),
        thing: "frequencies",
    })?;
    if freqs.windows(2).any(|w| w[1] <= w[0]) {
        return Err(VisReadError::FreqsNotIncreasing { file: file_str });
    }
    let times = Vec1::try_from_vec(times).map_err(|_| VisReadError::Empty {
        file: file_str.clone(),
        thing: "times",
    })?;
    if visibilities.is_empty() {
        return Err(VisReadError::Empty {
            file: file_str,
            thing: "visibilities",
        });
    }

    let mut container = VisContainer::new(antenna_positions.into_iter().collect(), freqs, times);
    let expected = (container.num_times(), container.num_freqs());
    for VisRecord {
        ant1,
        ant2,
        pol,
        data,
        flags,
    } in visibilities
    {
        let bad_shape = |thing, got| VisReadError::BadShape {
            ant1,
            ant2,
            pol,
            thing,
            got,
            expected_times: expected.0,
            expected_freqs: expected.1,
        };
        let data = rows_to_array(&data, |&[re, im]| c64::new(re, im))
            .map_err(|got| bad_shape("data", got))?;
        let flags = match flags {
            Some(flags) => rows_to_array(&flags, |&f| f).map_err(|got| bad_shape("flags", got))?,
            None => Array2::from_elem(data.raw_dim(), false),
        };
        container.insert(ant1, ant2, pol, Waterfall { data, flags })?;
    }

    debug!(
        "Read {} waterfalls ({} times, {} channels, pols {:?})",
        container.vis.len(),
        container.num_times(),
        container.num_freqs(),
        container.pols()
    );
    Ok(container)
}

/// Write a visibility container. The format is determined by the file
/// extension.
pub fn write_vis<P: AsRef<Path>>(file: P, container: &VisContainer) -> Result<(), VisWriteError> {
    let file = file.as_ref();
    let file_type = VisFileType::from_path(file).ok_or_else(|| VisWriteError::UnsupportedExt {
        ext: ext_string(file),
    })?;

    let vis_file = VisFile {
        antenna_positions: container.antpos.iter().map(|(&a, &p)| (a, p)).collect(),
        freqs: container.freqs.to_vec(),
        times: container.times.to_vec(),
        visibilities: container
            .vis
            .iter()
            .map(|(&(ant1, ant2, pol), w)| VisRecord {
                ant1,
                ant2,
                pol,
                data: w
                    .data
                    .outer_iter()
                    .map(|row| row.iter().map(|v| [v.re, v.im]).collect())
                    .collect(),
                flags: if w.flags.iter().any(|&f| f) {
                    Some(w.flags.outer_iter().map(|row| row.to_vec()).collect())
                } else {
                    None
                },
            })
            .collect(),
    };

    let mut writer = BufWriter::new(File::create(file)?);
    match file_type {
        VisFileType::Json => serde_json::to_writer(&mut writer, &vis_file)?,
        VisFileType::Yaml => serde_yaml::to_writer(&mut writer, &vis_file)?,
    }
    writer.flush()?;
    Ok(())
}
