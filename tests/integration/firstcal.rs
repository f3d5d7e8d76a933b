// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests against the command-line interface for first-cal.

use hera_firstcal::CalSolutions;

use crate::*;

#[test]
fn test_firstcal_help_is_correct() {
    let mut stdouts = vec![];

    // First with --help
    let cmd = firstcal().arg("--help").ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty());
    stdouts.push(stdout);

    // Then with -h
    let cmd = firstcal().arg("-h").ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty());
    stdouts.push(stdout);

    for stdout in stdouts {
        for sub in [
            "submit",
            "firstcal",
            "abscal",
            "solutions-convert",
            "solutions-combine",
        ] {
            assert!(stdout.contains(sub), "'{sub}' is missing from the help");
        }
    }
}

#[test]
fn test_firstcal_subcommand_help_lists_outputs() {
    let cmd = firstcal().args(["firstcal", "--help"]).ok();
    assert!(cmd.is_ok());
    let (stdout, _) = get_cmd_output(cmd);
    let help = stdout.split_ascii_whitespace().collect::<Vec<_>>().join(" ");
    assert!(help.contains("--outputs"));
    assert!(
        help.contains("Supported formats: fits, json"),
        "The solution formats are missing from the help: {help}"
    );
}

#[test]
fn test_firstcal_writes_solutions() {
    let tmp = tmp_dir();
    let vis = write_redundant_vis(tmp.path());
    let sols_file = tmp.path().join("sols.fits");

    #[rustfmt::skip]
    let cmd = firstcal()
        .args([
            "firstcal",
            "-p", "xx",
            "--ex_ants", "81",
            "-C", "hsa7458_v001",
            "--observer", "obs",
            "--git_origin_cal", "unknown",
            "--git_hash_cal", "unknown",
            "--no-progress-bars",
            "--outputs",
        ])
        .arg(&sols_file)
        .arg(&vis)
        .ok();
    assert!(cmd.is_ok(), "{:?}", cmd.as_ref().err());

    let sols = CalSolutions::read_solutions_from_ext(&sols_file).unwrap();
    assert_eq!(sols.ants, vec![0, 1, 2, 3, 4]);
    assert_eq!(sols.pols, vec![Pol::XX]);
    assert_eq!(sols.ex_ants, vec![81]);
    assert_eq!(sols.calfile.as_deref(), Some("hsa7458_v001"));
    assert_eq!(sols.observer.as_deref(), Some("obs"));
    assert_eq!(sols.git_hash_cal.as_deref(), Some("unknown"));
    let delays = sols.delays.unwrap();
    assert_eq!(delays.dim(), (5, 1, 1));
    assert!(delays.iter().all(|d| d.is_finite()));
}

#[test]
fn test_firstcal_default_output_name() {
    let tmp = tmp_dir();
    let vis = write_redundant_vis(tmp.path());
    let cmd = firstcal().arg("firstcal").arg(&vis).ok();
    assert!(cmd.is_ok(), "{:?}", cmd.as_ref().err());

    let expected = PathBuf::from(format!("{}.first.fits", vis.display()));
    assert!(expected.exists());
}

#[test]
fn test_firstcal_missing_file_is_an_error() {
    let tmp = tmp_dir();
    let cmd = firstcal()
        .arg("firstcal")
        .arg(tmp.path().join("does_not_exist.json"))
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error: "), "{stderr}");
}
