// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions around time.
//!
//! Sidereal times are mean sidereal times (GMST plus longitude); UT1 is taken
//! to be UTC. The difference from apparent sidereal time is at most about a
//! second. Solar positions use the low-precision formulae of the Astronomical
//! Almanac, good to about 0.01 degrees.

use hifitime::Epoch;

use crate::constants::{J2000_JD, SIDEREAL_DAY_FRACTION, TAU};

/// Convert a (UTC) Julian date to an [`Epoch`].
pub fn jd_to_epoch(jd: f64) -> Epoch {
    Epoch::from_jde_utc(jd)
}

/// The local mean sidereal time \[radians, in [0, 2π)\] at a (UTC) Julian date,
/// for an observer at `longitude_deg` degrees East.
pub fn jd_to_lst(jd: f64, longitude_deg: f64) -> f64 {
    let d = jd - J2000_JD;
    let t = d / 36525.0;
    let gmst_deg =
        280.460_618_37 + 360.985_647_366_29 * d + 0.000_387_933 * t * t - t * t * t / 38_710_000.0;
    (gmst_deg + longitude_deg).to_radians().rem_euclid(TAU)
}

/// Convert a local sidereal time \[radians\] to the Julian date on the day
/// starting at `start_jd`. The result is always within one day after
/// `start_jd`.
pub fn lst_to_jd(lst: f64, start_jd: f64, longitude_deg: f64) -> f64 {
    // Radians of sidereal time per solar day.
    let rate = TAU / SIDEREAL_DAY_FRACTION;
    let lst0 = jd_to_lst(start_jd, longitude_deg);
    let mut jd = start_jd + (lst - lst0).rem_euclid(TAU) / rate;
    // The sidereal rate isn't quite constant; a couple of refinements take
    // care of that.
    for _ in 0..2 {
        let diff = (lst - jd_to_lst(jd, longitude_deg) + TAU / 2.0).rem_euclid(TAU) - TAU / 2.0;
        jd += diff / rate;
    }
    jd
}

/// The right ascension of the zenith \[degrees\] in the epoch of date. This is
/// the local sidereal time.
pub fn jd_to_ra(jd: f64, longitude_deg: f64) -> f64 {
    jd_to_lst(jd, longitude_deg).to_degrees()
}

/// The apparent right ascension and declination of the Sun \[radians\].
fn sun_ra_dec(jd: f64) -> (f64, f64) {
    // Days since J2000 in terrestrial time.
    let n = jd_to_epoch(jd).to_jde_tt_days() - J2000_JD;
    let mean_long = (280.460 + 0.985_647_4 * n).to_radians();
    let mean_anomaly = (357.528 + 0.985_600_3 * n).to_radians();
    let ecliptic_long = mean_long
        + (1.915 * mean_anomaly.sin() + 0.020 * (2.0 * mean_anomaly).sin()).to_radians();
    let obliquity = (23.439 - 0.000_000_4 * n).to_radians();
    let ra = (obliquity.cos() * ecliptic_long.sin()).atan2(ecliptic_long.cos());
    let dec = (obliquity.sin() * ecliptic_long.sin()).asin();
    (ra, dec)
}

/// The altitude of the Sun \[degrees\] at a (UTC) Julian date, for an observer
/// at `longitude_deg` degrees East and `latitude_deg` degrees North.
pub fn sun_alt(jd: f64, longitude_deg: f64, latitude_deg: f64) -> f64 {
    let (ra, dec) = sun_ra_dec(jd);
    let hour_angle = jd_to_lst(jd, longitude_deg) - ra;
    let lat = latitude_deg.to_radians();
    (lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos())
        .asin()
        .to_degrees()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::constants::{HERA_LAT_DEG, HERA_LONG_DEG};

    #[test]
    fn test_gmst_at_j2000() {
        assert_abs_diff_eq!(
            jd_to_lst(J2000_JD, 0.0),
            280.460_618_37_f64.to_radians(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_lst_wraps_and_uses_longitude() {
        let jd = 2458098.3;
        let lst_greenwich = jd_to_lst(jd, 0.0);
        let lst_hera = jd_to_lst(jd, HERA_LONG_DEG);
        assert!((0.0..TAU).contains(&lst_hera));
        assert_abs_diff_eq!(
            (lst_hera - lst_greenwich).rem_euclid(TAU),
            HERA_LONG_DEG.to_radians(),
            epsilon = 1e-9
        );
        // One sidereal day later, the LST is the same.
        assert_abs_diff_eq!(
            jd_to_lst(jd + SIDEREAL_DAY_FRACTION, HERA_LONG_DEG),
            lst_hera,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_lst_to_jd() {
        let start_jd = 2458098.0;
        for lst in [0.0, 0.5, 2.0, 3.1, 5.9, 6.28] {
            let jd = lst_to_jd(lst, start_jd, HERA_LONG_DEG);
            assert!(jd >= start_jd && jd < start_jd + 1.0, "{jd}");
            let back = jd_to_lst(jd, HERA_LONG_DEG);
            // Compare on the circle.
            let diff = (back - lst + TAU / 2.0).rem_euclid(TAU) - TAU / 2.0;
            // Better than a millisecond.
            assert!(diff.abs() < TAU / 86400.0 * 1e-3, "{lst} {back}");
        }
    }

    #[test]
    fn test_jd_to_epoch() {
        let e = jd_to_epoch(J2000_JD + 0.11);
        let (y, m, d, h, min, _, _) = e.to_gregorian_utc();
        assert_eq!((y, m, d, h, min), (2000, 1, 1, 14, 38));
        assert_abs_diff_eq!(e.to_jde_utc_days(), J2000_JD + 0.11, epsilon = 1e-8);
    }

    #[test]
    fn test_jd_to_ra() {
        let jd = 2458098.3;
        assert_abs_diff_eq!(
            jd_to_ra(jd, HERA_LONG_DEG),
            jd_to_lst(jd, HERA_LONG_DEG).to_degrees(),
            epsilon = 1e-12
        );
        assert!((0.0..360.0).contains(&jd_to_ra(jd, HERA_LONG_DEG)));
    }

    #[test]
    fn test_sun_alt_at_hera() {
        // Local noon on the December solstice; the Sun is about 7.3 degrees
        // from the zenith.
        let start = 2458108.5;
        let highest = (0..1440)
            .map(|i| sun_alt(start + i as f64 / 1440.0, HERA_LONG_DEG, HERA_LAT_DEG))
            .fold(f64::NEG_INFINITY, f64::max);
        assert_abs_diff_eq!(highest, 90.0 + HERA_LAT_DEG + 23.437, epsilon = 0.1);

        // Near the March equinox.
        let start = 2458197.5;
        let highest = (0..1440)
            .map(|i| sun_alt(start + i as f64 / 1440.0, HERA_LONG_DEG, HERA_LAT_DEG))
            .fold(f64::NEG_INFINITY, f64::max);
        assert_abs_diff_eq!(highest, 90.0 + HERA_LAT_DEG, epsilon = 0.3);

        // 2017-12-05 12:00 UTC is the early afternoon in South Africa; 19:12
        // UTC is after sunset.
        assert!(sun_alt(2458098.0, HERA_LONG_DEG, HERA_LAT_DEG) > 60.0);
        assert!(sun_alt(2458098.3, HERA_LONG_DEG, HERA_LAT_DEG) < -10.0);
    }
}
