// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to turn visibility flags into antenna (gain) flags, and to flag
//! daytime data.

mod error;

pub use error::FlaggingError;

use std::collections::BTreeMap;

use indexmap::IndexMap;
use log::debug;
use ndarray::prelude::*;

use crate::{time::sun_alt, AntPol, Pol};

/// Thresholds this close to 1 are nudged down, otherwise nothing could ever be
/// flagged.
const THRESHOLD_ONE_NUDGE: f64 = 1e-10;

/// Synthesise flags on visibilities into flags on antenna gains.
///
/// For a given antenna polarisation at a given time and frequency, if the
/// fraction of flagged samples over all visibilities involving that antenna
/// exceeds `threshold`, the antenna's gain is flagged. Antennas whose every
/// visibility is completely flagged are "dead"; they are completely flagged,
/// and they don't count towards the fractions of the antennas they're
/// paired with.
///
/// The returned map is sorted by antenna number, then antenna polarisation.
pub fn synthesize_ant_flags(
    flags: &IndexMap<(usize, usize, Pol), Array2<bool>>,
    threshold: f64,
) -> Result<IndexMap<(usize, AntPol), Array2<bool>>, FlaggingError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(FlaggingError::BadThreshold(threshold));
    }
    let threshold = if (threshold - 1.0).abs() < 1e-8 {
        threshold - THRESHOLD_ONE_NUDGE
    } else {
        threshold
    };

    let shape = flags.values().next().ok_or(FlaggingError::NoFlags)?.dim();
    for (&(ant1, ant2, pol), f) in flags {
        if f.dim() != shape {
            return Err(FlaggingError::ShapeMismatch {
                ant1,
                ant2,
                pol,
                got: f.dim(),
                expected: shape,
            });
        }
    }

    let antpols_of = |&(ant1, ant2, pol): &(usize, usize, Pol)| {
        let (p1, p2) = pol.split();
        ((ant1, p1), (ant2, p2))
    };

    // An antenna polarisation is dead until one of its visibilities has an
    // unflagged sample.
    let mut dead: BTreeMap<(usize, AntPol), bool> = BTreeMap::new();
    for (key, f) in flags {
        let (ap1, ap2) = antpols_of(key);
        let all_flagged = f.iter().all(|&f| f);
        for ap in [ap1, ap2] {
            let d = dead.entry(ap).or_insert(true);
            *d &= all_flagged;
        }
    }

    let mut num_vis: BTreeMap<(usize, AntPol), usize> = BTreeMap::new();
    let mut num_flagged: BTreeMap<(usize, AntPol), Array2<f64>> = BTreeMap::new();
    for (key, f) in flags {
        let (ap1, ap2) = antpols_of(key);
        if dead[&ap1] || dead[&ap2] {
            continue;
        }
        for ap in [ap1, ap2] {
            *num_vis.entry(ap).or_insert(0) += 1;
            let n = num_flagged
                .entry(ap)
                .or_insert_with(|| Array2::zeros(shape));
            Zip::from(n).and(f).for_each(|n, &f| {
                if f {
                    *n += 1.0;
                }
            });
        }
    }

    let ant_flags: IndexMap<(usize, AntPol), Array2<bool>> = dead
        .into_iter()
        .map(|(ap, is_dead)| {
            let f = match (is_dead, num_flagged.get(&ap)) {
                (false, Some(n)) => {
                    let num_vis = num_vis.get(&ap).copied().unwrap_or(0).max(1) as f64;
                    n.mapv(|n| n / num_vis > threshold)
                }
                // Dead, or only paired with dead antennas.
                (true, _) => Array2::from_elem(shape, true),
                (false, None) => Array2::from_elem(shape, false),
            };
            (ap, f)
        })
        .collect();
    debug!(
        "Synthesised antenna flags; {} of {} antenna polarisations are completely flagged",
        ant_flags
            .values()
            .filter(|f| f.iter().all(|&f| f))
            .count(),
        ant_flags.len()
    );
    Ok(ant_flags)
}

/// Flag every time sample (row) of `flags` at which the Sun is higher than
/// `flag_alt_deg` degrees. `times` are the (UTC) Julian dates of the rows.
/// Returns which times are flagged.
pub fn solar_flag<'a>(
    flags: impl IntoIterator<Item = &'a mut Array2<bool>>,
    times: &[f64],
    flag_alt_deg: f64,
    longitude_deg: f64,
    latitude_deg: f64,
) -> Result<Vec<bool>, FlaggingError> {
    let daytime: Vec<bool> = times
        .iter()
        .map(|&jd| sun_alt(jd, longitude_deg, latitude_deg) > flag_alt_deg)
        .collect();
    for f in flags {
        if f.len_of(Axis(0)) != times.len() {
            return Err(FlaggingError::TimesMismatch {
                got: f.len_of(Axis(0)),
                expected: times.len(),
            });
        }
        for (mut row, &day) in f.outer_iter_mut().zip(daytime.iter()) {
            if day {
                row.fill(true);
            }
        }
    }
    debug!(
        "The Sun is above {flag_alt_deg} degrees at {} of {} times",
        daytime.iter().filter(|&&d| d).count(),
        times.len()
    );
    Ok(daytime)
}
