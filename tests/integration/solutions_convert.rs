// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests against the command-line interface for solutions-convert.

use approx::assert_abs_diff_eq;
use hera_firstcal::CalSolutions;

use crate::*;

#[test]
fn test_convert_fits_to_json() {
    let tmp = tmp_dir();
    let vis = write_redundant_vis(tmp.path());
    let fits = tmp.path().join("sols.fits");
    let json = tmp.path().join("sols.json");

    let cmd = firstcal()
        .args(["firstcal", "--outputs"])
        .arg(&fits)
        .arg(&vis)
        .ok();
    assert!(cmd.is_ok(), "{:?}", cmd.as_ref().err());

    let cmd = firstcal()
        .arg("solutions-convert")
        .arg(&fits)
        .arg(&json)
        .ok();
    assert!(cmd.is_ok(), "{:?}", cmd.as_ref().err());

    let from_fits = CalSolutions::read_solutions_from_ext(&fits).unwrap();
    let from_json = CalSolutions::read_solutions_from_ext(&json).unwrap();
    assert_eq!(from_fits.ants, from_json.ants);
    assert_eq!(from_fits.times, from_json.times);
    assert_abs_diff_eq!(
        from_fits.delays.unwrap(),
        from_json.delays.unwrap(),
        epsilon = 1e-12
    );
}

#[test]
fn test_convert_to_unknown_format_fails() {
    let tmp = tmp_dir();
    let vis = write_redundant_vis(tmp.path());
    let fits = tmp.path().join("sols.fits");
    firstcal()
        .args(["firstcal", "--outputs"])
        .arg(&fits)
        .arg(&vis)
        .assert()
        .success();

    let cmd = firstcal()
        .arg("solutions-convert")
        .arg(&fits)
        .arg(tmp.path().join("sols.bin"))
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("solutions-convert --help"), "{stderr}");
}
