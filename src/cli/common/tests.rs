// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use super::*;

#[test]
fn test_metadata_merge_prefers_self() {
    let cli = CalMetadataArgs {
        calfile: Some("hsa7458_v001".to_string()),
        ..Default::default()
    };
    let file = CalMetadataArgs {
        calfile: Some("hsa7458_v000".to_string()),
        observer: Some("someone".to_string()),
        ..Default::default()
    };
    let merged = cli.merge(file);
    assert_eq!(merged.calfile.as_deref(), Some("hsa7458_v001"));
    assert_eq!(merged.observer.as_deref(), Some("someone"));
    assert_eq!(merged.git_origin_cal, None);
    assert_eq!(merged.git_hash_cal, None);
}

#[test]
fn test_metadata_apply() {
    let metadata = CalMetadataArgs {
        calfile: Some("hsa7458_v001".to_string()),
        observer: Some("obs".to_string()),
        git_origin_cal: Some("https://github.com/HERA-Team/hera_cal.git".to_string()),
        git_hash_cal: Some("a1b2c3d4".to_string()),
    };
    let mut sols = CalSolutions::default();
    metadata.apply(&mut sols);
    assert_eq!(sols.calfile.as_deref(), Some("hsa7458_v001"));
    assert_eq!(sols.observer.as_deref(), Some("obs"));
    assert_eq!(
        sols.git_origin_cal.as_deref(),
        Some("https://github.com/HERA-Team/hera_cal.git")
    );
    assert_eq!(sols.git_hash_cal.as_deref(), Some("a1b2c3d4"));
    assert!(sols.history.is_some());

    // There's always an observer.
    let mut sols = CalSolutions::default();
    CalMetadataArgs::default().apply(&mut sols);
    assert!(sols.observer.is_some());
    assert_eq!(sols.calfile, None);

    let lines = CalMetadataArgs::default().describe();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Calfile: <not set>");
}

#[test]
fn test_is_solutions_file() {
    for (file, expected) in [
        ("sols.fits", true),
        ("sols.FITS", true),
        ("sols.json", true),
        ("zen.2458098.12552.xx.HH.uvOR.first.fits", true),
        ("sols.txt", false),
        ("sols", false),
        ("sols.uvOR", false),
    ] {
        assert_eq!(
            is_solutions_file(&PathBuf::from(file)),
            expected,
            "unexpected result for {file}"
        );
    }
}

#[test]
fn test_describe_times() {
    assert_eq!(describe_times(&[], HERA_LONG_DEG), vec!["No times"]);

    let lines = describe_times(&[2458098.3, 2458098.31], HERA_LONG_DEG);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "2 timesteps");
    assert!(lines[1].contains("JD 2458098.30000"));
    assert!(lines[2].contains("JD 2458098.31000"));
}
