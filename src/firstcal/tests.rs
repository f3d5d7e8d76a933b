// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;

use super::*;
use crate::redundancy::get_reds;

const NUM_FREQS: usize = 256;

fn freqs_hz() -> Vec<f64> {
    (0..NUM_FREQS)
        .map(|i| 100e6 + i as f64 * 100e6 / NUM_FREQS as f64)
        .collect()
}

fn tone(delay_ns: f64, freqs_hz: &[f64]) -> Array2<c64> {
    Array2::from_shape_fn((1, freqs_hz.len()), |(_, f)| {
        cexp(TAU * delay_ns * freqs_hz[f] / 1e9)
    })
}

/// Five antennas in an East-West line with per-antenna, per-time delays
/// `true_delays` (num_ants, num_times). Each redundant group has its own sky
/// visibility.
fn synthesise(
    true_delays: &Array2<f64>,
) -> (
    IndexMap<usize, [f64; 3]>,
    IndexMap<Baseline, Array2<c64>>,
    IndexMap<Baseline, Array2<f64>>,
) {
    let freqs = freqs_hz();
    let (num_ants, num_times) = true_delays.dim();
    let antpos: IndexMap<usize, [f64; 3]> = (0..num_ants)
        .map(|a| (a, [14.6 * a as f64, 0.0, 0.0]))
        .collect();

    let mut data = IndexMap::new();
    let mut weights = IndexMap::new();
    for i in 0..num_ants {
        for j in i + 1..num_ants {
            let sky_delay = 25.0 * (j - i) as f64;
            let vis = Array2::from_shape_fn((num_times, NUM_FREQS), |(t, f)| {
                let f_ghz = freqs[f] / 1e9;
                let g_i = cexp(-TAU * f_ghz * true_delays[(i, t)]);
                let g_j = cexp(-TAU * f_ghz * true_delays[(j, t)]);
                g_i * g_j.conj() * cexp(TAU * f_ghz * sky_delay) * (j - i) as f64
            });
            data.insert((i, j), vis);
            weights.insert((i, j), Array2::ones((num_times, NUM_FREQS)));
        }
    }
    (antpos, data, weights)
}

#[test]
fn test_single_pair_delay() {
    let freqs = freqs_hz();
    let freqs_ghz: Vec<f64> = freqs.iter().map(|f| f / 1e9).collect();
    let d1 = tone(0.0, &freqs);
    let d2 = tone(4.2, &freqs);
    let w = Array2::ones((1, NUM_FREQS));

    let coarse = FirstCalParams {
        finetune: false,
        ..Default::default()
    };
    let result =
        redundant_bl_cal_simple(d1.view(), w.view(), d2.view(), w.view(), &freqs_ghz, &coarse)
            .unwrap();
    assert_eq!(result.len(), 1);
    // The channel width gives 10 ns delay bins; the centroid only gets close.
    assert!((result[0] - 4.2).abs() < 2.5, "{}", result[0]);

    let result = redundant_bl_cal_simple(
        d1.view(),
        w.view(),
        d2.view(),
        w.view(),
        &freqs_ghz,
        &FirstCalParams::default(),
    )
    .unwrap();
    assert_abs_diff_eq!(result[0], 4.2, epsilon = 1e-9);

    // The sign flips when the baselines are swapped.
    let result = redundant_bl_cal_simple(
        d2.view(),
        w.view(),
        d1.view(),
        w.view(),
        &freqs_ghz,
        &FirstCalParams::default(),
    )
    .unwrap();
    assert_abs_diff_eq!(result[0], -4.2, epsilon = 1e-9);
}

#[test]
fn test_single_pair_with_flags_and_window() {
    let freqs = freqs_hz();
    let freqs_ghz: Vec<f64> = freqs.iter().map(|f| f / 1e9).collect();
    let d1 = tone(-1.0, &freqs);
    let d2 = tone(6.5, &freqs);
    let mut w = Array2::ones((1, NUM_FREQS));
    w.slice_mut(s![.., 100..110]).fill(0.0);

    let params = FirstCalParams {
        window: Window::BlackmanHarris,
        ..Default::default()
    };
    let result =
        redundant_bl_cal_simple(d1.view(), w.view(), d2.view(), w.view(), &freqs_ghz, &params)
            .unwrap();
    assert_abs_diff_eq!(result[0], 7.5, epsilon = 1e-9);
}

#[test]
fn test_single_pair_errors() {
    let d = Array2::<c64>::zeros((1, 1));
    let w = Array2::<f64>::ones((1, 1));
    assert!(matches!(
        redundant_bl_cal_simple(d.view(), w.view(), d.view(), w.view(), &[0.15], &FirstCalParams::default()),
        Err(FirstCalError::TooFewChannels(1))
    ));

    let d1 = Array2::<c64>::zeros((1, 2));
    let d2 = Array2::<c64>::zeros((2, 2));
    let w = Array2::<f64>::ones((1, 2));
    assert!(matches!(
        redundant_bl_cal_simple(d1.view(), w.view(), d2.view(), w.view(), &[0.1, 0.2], &FirstCalParams::default()),
        Err(FirstCalError::PairShapeMismatch(..))
    ));
}

#[test]
fn test_firstcal_recovers_delays() {
    let true_delays = array![
        [0.0, 0.3],
        [1.5, 1.8],
        [-2.0, -1.7],
        [0.7, 1.0],
        [3.1, 3.4]
    ];
    let (antpos, data, weights) = synthesise(&true_delays);
    let info = RedundantInfo::new(get_reds(&antpos, &[], 1.0), &antpos).unwrap();
    let fc = FirstCal::new(&info, &data, &weights, &freqs_hz()).unwrap();

    let m = fc.data_to_delays(&FirstCalParams::default()).unwrap();
    assert_eq!(m.dim(), (info.bl_pairs.len(), 2));
    let expected_m = info.a.dot(&true_delays);
    assert_abs_diff_eq!(m, expected_m, epsilon = 1e-8);

    let result = fc.run(&FirstCalParams::default()).unwrap();
    assert_eq!(result.ants, vec![0, 1, 2, 3, 4]);
    assert_eq!(result.delays.dim(), (5, 2));
    // Delays are only known up to the degeneracies of the array, so compare
    // what the measurements constrain.
    assert_abs_diff_eq!(info.a.dot(&result.delays), expected_m, epsilon = 1e-6);
    // The minimum-norm solution has no overall delay.
    for col in result.delays.columns() {
        assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-6);
    }

    let map = result.delay_map();
    assert_eq!(map.len(), 5);
    assert_eq!(map[&2].len(), 2);
}

#[test]
fn test_firstcal_average() {
    let true_delays = array![[0.0, 0.0], [1.0, 1.0], [-0.5, -0.5], [2.0, 2.0]];
    let (antpos, data, weights) = synthesise(&true_delays);
    let info = RedundantInfo::new(get_reds(&antpos, &[], 1.0), &antpos).unwrap();
    let fc = FirstCal::new(&info, &data, &weights, &freqs_hz()).unwrap();
    let params = FirstCalParams {
        average: true,
        ..Default::default()
    };
    let result = fc.run(&params).unwrap();
    assert_eq!(result.delays.dim(), (4, 1));
    let expected = info.a.dot(&true_delays.slice(s![.., 0..1]));
    assert_abs_diff_eq!(info.a.dot(&result.delays), expected, epsilon = 1e-6);
}

#[test]
fn test_firstcal_rejects_bad_input() {
    let true_delays = Array2::zeros((3, 1));
    let (antpos, data, weights) = synthesise(&true_delays);
    let info = RedundantInfo::new(get_reds(&antpos, &[], 1.0), &antpos).unwrap();

    let mut uneven = freqs_hz();
    uneven[10] += 1e5;
    assert!(matches!(
        FirstCal::new(&info, &data, &weights, &uneven),
        Err(FirstCalError::UnevenChannels { index: 10, .. })
    ));
    assert!(matches!(
        FirstCal::new(&info, &data, &weights, &freqs_hz()[..10]),
        Err(FirstCalError::ChannelCountMismatch { .. })
    ));

    let fc = FirstCal::new(&info, &data, &weights, &freqs_hz()).unwrap();
    let params = FirstCalParams {
        fit_band: (0.2, 0.1),
        ..Default::default()
    };
    assert!(matches!(
        fc.run(&params),
        Err(FirstCalError::BadFitBand { .. })
    ));
}

#[test]
fn test_delays_to_gains() {
    let gains = delays_to_gains(array![0.0, 1.0].view(), &[250e6, 500e6]);
    assert_abs_diff_eq!(gains[(0, 0)].re, 1.0);
    assert_abs_diff_eq!(gains[(1, 0)].re, 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(gains[(1, 0)].im, -1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(gains[(1, 1)].re, -1.0, epsilon = 1e-12);
}
