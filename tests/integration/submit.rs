// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests against the command-line interface for submitting first-cal jobs.

use crate::*;

#[test]
fn test_missing_pol_exits_with_1() {
    let tmp = tmp_dir();
    let cmd = firstcal()
        .args(["submit", "--cal-repo"])
        .arg(tmp.path())
        .args(["a.uv", "b.uv"])
        .ok();
    assert!(cmd.is_err());
    let output = cmd.unwrap_err();
    assert_eq!(output.as_output().unwrap().status.code(), Some(1));
    let (stdout, stderr) = get_cmd_output(Err(output));
    assert!(invocation_lines(&stdout, "firstcal.py").is_empty());
    assert!(stderr.contains("--pol"), "{stderr}");
}

#[test]
fn test_invalid_pol_exits_with_1() {
    let tmp = tmp_dir();
    for pol in ["zz", "xy", "XXX"] {
        let cmd = firstcal()
            .args(["submit", "--dry-run", "-p", pol, "--cal-repo"])
            .arg(tmp.path())
            .arg("a.uv")
            .ok();
        assert!(cmd.is_err());
        let output = cmd.unwrap_err();
        assert_eq!(output.as_output().unwrap().status.code(), Some(1));
        let (stdout, stderr) = get_cmd_output(Err(output));
        assert!(invocation_lines(&stdout, "firstcal.py").is_empty());
        assert!(stderr.starts_with("Error: "), "{stderr}");
    }
}

#[test]
fn test_unrecognised_option_exits_with_1() {
    let cmd = firstcal()
        .args(["submit", "-p", "xx", "--not-an-option", "a.uv"])
        .ok();
    assert!(cmd.is_err());
    assert_eq!(
        cmd.unwrap_err().as_output().unwrap().status.code(),
        Some(1)
    );
}

#[test]
fn test_one_invocation_per_file() {
    let tmp = tmp_dir();
    for (pol, expected) in [("XX", "xx"), ("xx", "xx"), ("YY", "yy"), ("yy", "yy")] {
        let cmd = firstcal()
            .args(["submit", "--dry-run", "-p", pol, "--observer", "obs", "--cal-repo"])
            .arg(tmp.path())
            .args(["f1.uv", "f2.uv", "f3.uv"])
            .ok();
        assert!(cmd.is_ok(), "{:?}", cmd.as_ref().err());
        let (stdout, _) = get_cmd_output(cmd);
        let lines = invocation_lines(&stdout, "firstcal.py");
        assert_eq!(lines.len(), 3, "{stdout}");
        for (line, file) in lines.iter().zip(["f1.uv", "f2.uv", "f3.uv"]) {
            assert_eq!(
                line,
                &format!(
                    "firstcal.py -p {expected} --ex_ants 81 -C hsa7458_v001 --observer obs --git_origin_cal unknown --git_hash_cal unknown {file}"
                )
            );
        }
    }
}

#[test]
fn test_no_files_is_fine() {
    let tmp = tmp_dir();
    let cmd = firstcal()
        .args(["submit", "--dry-run", "-p", "yy", "--cal-repo"])
        .arg(tmp.path())
        .ok();
    assert!(cmd.is_ok());
    let (stdout, _) = get_cmd_output(cmd);
    assert!(invocation_lines(&stdout, "firstcal.py").is_empty());
}

#[test]
fn test_grid_engine_task_share() {
    let tmp = tmp_dir();
    let cmd = firstcal()
        .env("SGE_TASK_ID", "2")
        .env("SGE_TASK_FIRST", "1")
        .env("SGE_TASK_LAST", "2")
        .args(["submit", "--dry-run", "-p", "xx", "--cal-repo"])
        .arg(tmp.path())
        .args(["f1.uv", "f2.uv", "f3.uv", "f4.uv"])
        .ok();
    assert!(cmd.is_ok(), "{:?}", cmd.as_ref().err());
    let (stdout, _) = get_cmd_output(cmd);
    let lines = invocation_lines(&stdout, "firstcal.py");
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("f2.uv"));
    assert!(lines[1].ends_with("f4.uv"));
}

#[cfg(unix)]
#[test]
fn test_exit_code_is_the_last_commands() {
    let tmp = tmp_dir();
    for (executable, code) in [("true", 0), ("false", 1)] {
        let output = firstcal()
            .args(["submit", "-p", "xx", "--executable", executable, "--cal-repo"])
            .arg(tmp.path())
            .args(["f1.uv", "f2.uv"])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(code));
    }
}

#[test]
fn test_missing_executable_is_tried_for_every_file() {
    let tmp = tmp_dir();
    let output = firstcal()
        .args([
            "submit",
            "-p",
            "xx",
            "--executable",
            "/nonexistent/firstcal.py",
            "--cal-repo",
        ])
        .arg(tmp.path())
        .args(["f1.uv", "f2.uv", "f3.uv"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(127));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines = invocation_lines(&stdout, "/nonexistent/firstcal.py");
    assert_eq!(lines.len(), 3, "{stdout}");
    for (line, file) in lines.iter().zip(["f1.uv", "f2.uv", "f3.uv"]) {
        assert!(line.ends_with(file), "{line}");
    }
}
