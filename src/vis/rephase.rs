// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Moving the phase centre of drift-scan visibilities along right ascension.

use nalgebra::{Matrix3, Vector3};
use ndarray::prelude::*;

use super::{VisContainer, VisRephaseError};
use crate::{
    constants::{TAU, VEL_C},
    math::cexp,
};

/// The matrix converting equatorial coordinates to topocentric at hour angle
/// `ha` and declination `dec` \[radians\].
fn eq2top(ha: f64, dec: f64) -> Matrix3<f64> {
    let (sin_h, cos_h) = ha.sin_cos();
    let (sin_d, cos_d) = dec.sin_cos();
    Matrix3::new(
        sin_h,
        cos_h,
        0.0,
        -sin_d * cos_h,
        sin_d * sin_h,
        cos_d,
        cos_d * cos_h,
        -cos_d * sin_h,
        sin_d,
    )
}

/// The matrix converting topocentric coordinates to equatorial at hour angle
/// `ha` and declination `dec` \[radians\].
fn top2eq(ha: f64, dec: f64) -> Matrix3<f64> {
    let (sin_h, cos_h) = ha.sin_cos();
    let (sin_d, cos_d) = dec.sin_cos();
    Matrix3::new(
        sin_h,
        -cos_h * sin_d,
        cos_d * cos_h,
        cos_h,
        sin_d * sin_h,
        -cos_d * sin_h,
        0.0,
        cos_d,
        sin_d,
    )
}

/// The change in the pointing (zenith) vector after the sky has rotated by
/// `dlst` radians, for an observer at latitude `lat` \[radians\].
pub(super) fn pointing_shift(dlst: f64, lat: f64) -> Vector3<f64> {
    let zenith = Vector3::z();
    eq2top(-dlst, lat) * top2eq(0.0, lat) * zenith - zenith
}

impl VisContainer {
    /// Shift the phase centre of each integration by `dlst[t]` radians along
    /// right ascension, so that integrations at different LSTs can be
    /// combined. Each visibility is multiplied by `exp(-2πi f τ)`, where `τ` is
    /// the delay of the baseline towards the shifted pointing centre.
    pub fn lst_rephase(&mut self, dlst: &[f64], latitude_deg: f64) -> Result<(), VisRephaseError> {
        if dlst.len() != self.num_times() {
            return Err(VisRephaseError::DlstLength {
                got: dlst.len(),
                expected: self.num_times(),
            });
        }
        let lat = latitude_deg.to_radians();
        let shifts: Vec<Vector3<f64>> = dlst.iter().map(|&d| pointing_shift(d, lat)).collect();

        for (&(ant1, ant2, _), waterfall) in self.vis.iter_mut() {
            let bl = match (self.antpos.get(&ant1), self.antpos.get(&ant2)) {
                (Some(p1), Some(p2)) => {
                    Vector3::new(p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2])
                }
                (None, _) => return Err(VisRephaseError::MissingAntennaPosition { ant: ant1 }),
                (_, None) => return Err(VisRephaseError::MissingAntennaPosition { ant: ant2 }),
            };
            for (mut row, shift) in waterfall.data.outer_iter_mut().zip(shifts.iter()) {
                let tau = shift.dot(&bl) / VEL_C;
                Zip::from(&mut row)
                    .and(ArrayView1::from(&self.freqs[..]))
                    .for_each(|v, &f| *v *= cexp(-TAU * f * tau));
            }
        }
        Ok(())
    }
}
