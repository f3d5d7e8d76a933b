// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod firstcal;
mod solutions_convert;
mod submit;

use std::path::{Path, PathBuf};
use std::process::Output;
use std::str::from_utf8;

use assert_cmd::{output::OutputError, Command};
use ndarray::prelude::*;
use tempfile::TempDir;
use vec1::Vec1;

use hera_firstcal::{
    c64,
    vis::{write_vis, Waterfall},
    Pol, VisContainer,
};

fn firstcal() -> Command {
    let mut cmd = Command::cargo_bin("firstcal").unwrap();
    // Don't let a grid-engine environment split the files between tasks.
    for var in [
        "SGE_TASK_ID",
        "SGE_TASK_FIRST",
        "SGE_TASK_LAST",
        "SGE_TASK_STEPSIZE",
        "HERA_CAL_REPO",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// The lines of stdout that are first-cal invocations (as opposed to log
/// messages).
fn invocation_lines(stdout: &str, program: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|l| l.starts_with(program))
        .map(|l| l.to_string())
        .collect()
}

/// Write xx visibilities of five antennas in an East-West line, each with its
/// own delay [ns].
fn write_redundant_vis<P: AsRef<Path>>(dir: P) -> PathBuf {
    const NUM_FREQS: usize = 256;
    let true_delays = [0.0, 1.5, -2.0, 0.7, 3.1];
    let freqs: Vec<f64> = (0..NUM_FREQS)
        .map(|i| 100e6 + i as f64 * 100e6 / NUM_FREQS as f64)
        .collect();
    let antpos = (0..true_delays.len())
        .map(|a| (a, [14.6 * a as f64, 0.0, 0.0]))
        .collect();
    let mut vis = VisContainer::new(
        antpos,
        Vec1::try_from_vec(freqs.clone()).unwrap(),
        Vec1::try_from_vec(vec![2458098.3]).unwrap(),
    );
    for i in 0..true_delays.len() {
        for j in i + 1..true_delays.len() {
            let sky_delay = 25.0 * (j - i) as f64;
            let data = Array2::from_shape_fn((1, NUM_FREQS), |(_, f)| {
                let phase = -std::f64::consts::TAU * freqs[f] / 1e9
                    * (true_delays[i] - true_delays[j] - sky_delay);
                c64::from_polar(1.0, phase)
            });
            vis.insert(i, j, Pol::XX, Waterfall::new(data)).unwrap();
        }
    }

    let file = dir.as_ref().join("zen.2458098.30000.xx.HH.json");
    write_vis(&file, &vis).unwrap();
    file
}

fn tmp_dir() -> TempDir {
    TempDir::new().expect("couldn't make tmp dir")
}
