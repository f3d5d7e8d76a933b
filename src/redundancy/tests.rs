// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;

use super::*;

/// Four antennas in an East-West line, 14.6 m apart.
fn linear_array() -> IndexMap<usize, [f64; 3]> {
    (0..4).map(|i| (i, [14.6 * i as f64, 0.0, 0.0])).collect()
}

#[test]
fn test_get_reds_linear_array() {
    let reds = get_reds(&linear_array(), &[], 1.0);
    // 14.6 m: 3 baselines, 29.2 m: 2 baselines, 43.8 m: 1 baseline (dropped).
    assert_eq!(
        reds,
        vec![vec![(0, 1), (1, 2), (2, 3)], vec![(0, 2), (1, 3)]]
    );
}

#[test]
fn test_get_reds_orients_baselines_east() {
    // Antenna numbers increase westward, so every baseline is flipped.
    let antpos: IndexMap<usize, [f64; 3]> =
        (0..3).map(|i| (i, [-14.6 * i as f64, 0.0, 0.0])).collect();
    let reds = get_reds(&antpos, &[], 1.0);
    assert_eq!(reds, vec![vec![(1, 0), (2, 1)]]);
}

#[test]
fn test_get_reds_excludes_ants() {
    let reds = get_reds(&linear_array(), &[3], 1.0);
    assert_eq!(reds, vec![vec![(0, 1), (1, 2)]]);
    // Nothing redundant is left.
    assert!(get_reds(&linear_array(), &[0, 1], 1.0).is_empty());
}

#[test]
fn test_redundant_info_matrix() {
    let antpos = linear_array();
    let info = RedundantInfo::new(get_reds(&antpos, &[], 1.0), &antpos).unwrap();
    assert_eq!(info.subsetant, vec![0, 1, 2, 3]);
    assert_eq!(
        info.bl_pairs,
        vec![
            ((0, 1), (1, 2)),
            ((0, 1), (2, 3)),
            ((1, 2), (2, 3)),
            ((0, 2), (1, 3)),
        ]
    );
    assert_eq!(
        info.a,
        array![
            [1.0, -2.0, 1.0, 0.0],
            [1.0, -1.0, -1.0, 1.0],
            [0.0, 1.0, -2.0, 1.0],
            [1.0, -1.0, -1.0, 1.0],
        ]
    );
    // Every row sums to zero; a common delay is unconstrained.
    for row in info.a.rows() {
        assert_abs_diff_eq!(row.sum(), 0.0);
    }
    assert_abs_diff_eq!(info.ubl[0][0], 14.6, epsilon = 1e-12);
    assert_abs_diff_eq!(info.ubl[1][0], 29.2, epsilon = 1e-12);

    assert_eq!(info.bl_index((1, 3)), Some(4));
    assert_eq!(info.bl_index((3, 1)), None);
    assert_eq!(info.blpair_index(((0, 2), (1, 3))), Some(3));
    assert_eq!(info.blpair_to_antind(((0, 1), (2, 3))), Some([0, 1, 2, 3]));
    assert_eq!(info.num_ants(), 4);
}

#[test]
fn test_redundant_info_errors() {
    let antpos = linear_array();
    assert!(matches!(
        RedundantInfo::new(vec![vec![(0, 1)]], &antpos),
        Err(RedundancyError::NoRedundantGroups)
    ));
    assert!(matches!(
        RedundantInfo::new(vec![vec![(0, 1), (1, 9)]], &antpos),
        Err(RedundancyError::MissingAntennaPosition { ant: 9 })
    ));
}

#[test]
fn test_order_data_conjugates_reversed() {
    let antpos = linear_array();
    let info = RedundantInfo::new(vec![vec![(0, 1), (1, 2)]], &antpos).unwrap();
    let mut dd = IndexMap::new();
    dd.insert((0, 1), Array2::from_elem((1, 2), c64::new(1.0, 1.0)));
    // Only the reverse of (1, 2) is available.
    dd.insert((2, 1), Array2::from_elem((1, 2), c64::new(2.0, 3.0)));
    let ordered = info.order_data(&dd).unwrap();
    assert_eq!(ordered.dim(), (2, 1, 2));
    assert_eq!(ordered[(0, 0, 0)], c64::new(1.0, 1.0));
    assert_eq!(ordered[(1, 0, 1)], c64::new(2.0, -3.0));

    dd.swap_remove(&(2, 1));
    assert!(matches!(
        info.order_data(&dd),
        Err(RedundancyError::MissingBaseline { bl: (1, 2) })
    ));

    dd.insert((1, 2), Array2::from_elem((2, 2), c64::new(0.0, 0.0)));
    assert!(matches!(
        info.order_data(&dd),
        Err(RedundancyError::ShapeMismatch { .. })
    ));
}
