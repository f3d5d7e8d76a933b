// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use approx::assert_abs_diff_eq;
use tempfile::{tempdir, TempDir};
use vec1::Vec1;

use super::*;
use crate::{
    constants::TAU,
    vis::{write_vis, Waterfall},
};

const NUM_TIMES: usize = 2;
const NUM_FREQS: usize = 64;

fn antpos() -> IndexMap<usize, [f64; 3]> {
    [
        (0, [0.0, 0.0, 0.0]),
        (1, [14.6, 0.0, 0.0]),
        (2, [7.3, 12.6, 0.0]),
        (3, [21.9, 12.6, 0.0]),
        (11, [-7.3, 12.6, 0.0]),
    ]
    .into_iter()
    .collect()
}

fn freqs() -> Vec<f64> {
    (0..NUM_FREQS)
        .map(|i| 100e6 + i as f64 * 100e6 / NUM_FREQS as f64)
        .collect()
}

fn container() -> VisContainer {
    VisContainer::new(
        antpos(),
        Vec1::try_from_vec(freqs()).unwrap(),
        Vec1::try_from_vec(vec![2458098.3, 2458098.31]).unwrap(),
    )
}

/// Write xx data and model files. The model is the data with `corrupt(ant1,
/// ant2, f)` multiplied in; `flag_ant`'s data visibilities are flagged.
fn write_files(
    dir: &TempDir,
    corrupt: impl Fn(usize, usize, f64) -> c64,
    flag_ant: Option<usize>,
) -> (PathBuf, PathBuf) {
    let freqs = freqs();
    let ants: Vec<usize> = antpos().keys().copied().collect();
    let mut data = container();
    let mut model = container();
    for (i, &a1) in ants.iter().enumerate() {
        for &a2 in &ants[i + 1..] {
            let d = Array2::from_shape_fn((NUM_TIMES, NUM_FREQS), |(t, f)| {
                let amp = 1.0 + 0.1 * (a1 + a2) as f64 + 0.01 * f as f64;
                c64::from_polar(amp, 0.05 * (a1 * 7 + a2) as f64 + 0.2 * t as f64)
            });
            let m = Array2::from_shape_fn(d.dim(), |(t, f)| {
                d[(t, f)] * corrupt(a1, a2, freqs[f])
            });
            let mut waterfall = Waterfall::new(d);
            if flag_ant == Some(a1) || flag_ant == Some(a2) {
                waterfall.flags.fill(true);
            }
            data.insert(a1, a2, Pol::XX, waterfall).unwrap();
            model.insert(a1, a2, Pol::XX, Waterfall::new(m)).unwrap();
        }
    }

    let data_file = dir.path().join("data.json");
    let model_file = dir.path().join("model.json");
    write_vis(&data_file, &data).unwrap();
    write_vis(&model_file, &model).unwrap();
    (data_file, model_file)
}

fn args(data: PathBuf, model: PathBuf, output: PathBuf) -> AbscalArgs {
    AbscalArgs {
        abscal_args: AbscalCliArgs {
            data: Some(data),
            model: Some(model),
            output: Some(output),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Check that the solutions take the data to the model.
fn assert_calibrates(sols: &CalSolutions, data: &Path, model: &Path) {
    let data = read_vis(data).unwrap();
    let model = read_vis(model).unwrap();
    let gains = sols.gains.as_ref().unwrap();
    let i_ant = |a: usize| sols.ants.iter().position(|&b| b == a).unwrap();
    for (&(a1, a2, pol), d) in &data.vis {
        let m = model.get((a1, a2), pol).unwrap();
        let (i1, i2) = (i_ant(a1), i_ant(a2));
        for t in 0..NUM_TIMES {
            for f in [0, 17, NUM_FREQS - 1] {
                let g = gains[(i1, t, f, 0)] * gains[(i2, t, f, 0)].conj();
                let calibrated = g * d.data[(t, f)];
                assert_abs_diff_eq!(calibrated.re, m.data[(t, f)].re, epsilon = 1e-6);
                assert_abs_diff_eq!(calibrated.im, m.data[(t, f)].im, epsilon = 1e-6);
            }
        }
    }
}

#[test]
fn test_abscal_amplitude_and_phase() {
    let dir = tempdir().unwrap();
    let pos = antpos();
    let (data, model) = write_files(
        &dir,
        |a1, a2, _| {
            let b = [pos[&a2][0] - pos[&a1][0], pos[&a2][1] - pos[&a1][1]];
            c64::from_polar(4.0, 0.01 * b[0] - 0.02 * b[1])
        },
        None,
    );
    let output = dir.path().join("sols.json");
    args(data.clone(), model.clone(), output.clone())
        .run(false)
        .unwrap();

    let sols = CalSolutions::read_solutions_from_ext(&output).unwrap();
    assert_eq!(sols.ants, vec![0, 1, 2, 3, 11]);
    assert_eq!(sols.pols, vec![Pol::XX]);
    assert_eq!(sols.gain_convention, GainConvention::Multiply);
    assert!(sols.delays.is_none());
    assert!(sols.flags.as_ref().unwrap().iter().all(|&f| !f));
    for g in sols.gains.as_ref().unwrap() {
        assert_abs_diff_eq!(g.norm(), 2.0, epsilon = 1e-9);
    }
    assert_calibrates(&sols, &data, &model);
}

#[test]
fn test_abscal_with_delays() {
    let dir = tempdir().unwrap();
    // Delays that fall on delay bins (1 / 100 MHz = 10 ns).
    let true_delays: IndexMap<usize, f64> =
        [(0, 0.0), (1, 10.0), (2, -20.0), (3, 30.0), (11, 50.0)]
            .into_iter()
            .collect();
    let (data, model) = write_files(
        &dir,
        |a1, a2, freq| {
            let tau = true_delays[&a1] - true_delays[&a2];
            c64::from_polar(1.0, TAU * freq / 1e9 * tau)
        },
        None,
    );
    let output = dir.path().join("sols.fits");
    let mut args = args(data.clone(), model.clone(), output.clone());
    args.abscal_args.delay = true;
    args.abscal_args.refant = Some(1);
    args.run(false).unwrap();

    let sols = CalSolutions::read_solutions_from_ext(&output).unwrap();
    assert_calibrates(&sols, &data, &model);
}

#[test]
fn test_dead_antennas_are_flagged() {
    let dir = tempdir().unwrap();
    let (data, model) = write_files(&dir, |_, _, _| c64::new(2.0, 0.0), Some(11));
    let output = dir.path().join("sols.json");
    args(data, model, output.clone()).run(false).unwrap();

    let sols = CalSolutions::read_solutions_from_ext(&output).unwrap();
    assert_eq!(sols.flagged_ants(), vec![11]);
    let flags = sols.flags.unwrap();
    let gains = sols.gains.unwrap();
    for (i_ant, &ant) in sols.ants.iter().enumerate() {
        if ant == 11 {
            continue;
        }
        assert!(flags.slice(s![i_ant, .., .., ..]).iter().all(|&f| !f));
        for g in gains.slice(s![i_ant, .., .., ..]) {
            assert_abs_diff_eq!(g.norm(), 2.0_f64.sqrt(), epsilon = 1e-9);
        }
    }
}

#[test]
fn test_pol_errors() {
    let dir = tempdir().unwrap();
    let (data, model) = write_files(&dir, |_, _, _| c64::new(1.0, 0.0), None);
    let output = dir.path().join("sols.json");

    let mut a = args(data.clone(), model.clone(), output.clone());
    a.abscal_args.pols = Some(vec!["yy".to_string()]);
    assert!(matches!(a.run(false), Err(FirstcalError::Abscal(_))));

    let mut a = args(data.clone(), model.clone(), output.clone());
    a.abscal_args.pols = Some(vec!["xy".to_string()]);
    assert!(matches!(a.run(false), Err(FirstcalError::Abscal(_))));

    let mut a = args(data, model, output.clone());
    a.abscal_args.pols = Some(vec!["zz".to_string()]);
    assert!(matches!(a.run(false), Err(FirstcalError::Generic(_))));
    assert!(!output.exists());
}

#[test]
fn test_incompatible_model() {
    let dir = tempdir().unwrap();
    let (data, _) = write_files(&dir, |_, _, _| c64::new(1.0, 0.0), None);

    let mut other = VisContainer::new(
        antpos(),
        Vec1::try_from_vec(freqs().into_iter().map(|f| f + 1e6).collect()).unwrap(),
        Vec1::try_from_vec(vec![2458098.3, 2458098.31]).unwrap(),
    );
    other
        .insert(
            0,
            1,
            Pol::XX,
            Waterfall::new(Array2::zeros((NUM_TIMES, NUM_FREQS))),
        )
        .unwrap();
    let model = dir.path().join("other.json");
    write_vis(&model, &other).unwrap();

    let result = args(data, model, dir.path().join("sols.json")).run(false);
    assert!(matches!(result, Err(FirstcalError::Abscal(_))));
}

#[test]
fn test_parse_errors_and_defaults() {
    let result = AbscalArgs::default().parse();
    assert!(matches!(result, Err(FirstcalError::Abscal(_))));

    let mut a = AbscalArgs::default();
    a.abscal_args.data = Some(PathBuf::from("data.json"));
    assert!(matches!(a.parse(), Err(FirstcalError::Abscal(_))));

    let a = args(
        PathBuf::from("data.json"),
        PathBuf::from("model.json"),
        PathBuf::from("sols.txt"),
    );
    assert!(matches!(a.parse(), Err(FirstcalError::Solutions(_))));

    let mut a = args(
        PathBuf::from("data.json"),
        PathBuf::from("model.json"),
        PathBuf::from("sols.fits"),
    );
    a.abscal_args.output = None;
    a.abscal_args.pols = Some(vec!["XX".to_string(), "xx".to_string()]);
    let params = a.parse().unwrap();
    assert_eq!(params.output, PathBuf::from("data.json.abs.fits"));
    assert_eq!(params.pols, Some(vec![Pol::XX]));
    assert_eq!(params.flag_threshold, DEFAULT_FLAG_THRESHOLD);
    assert_eq!(params.opts, AbsCalOptions::default());
}

#[test]
fn test_dry_run_doesnt_write() {
    let dir = tempdir().unwrap();
    let (data, model) = write_files(&dir, |_, _, _| c64::new(1.0, 0.0), None);
    let output = dir.path().join("sols.fits");
    args(data, model, output.clone()).run(true).unwrap();
    assert!(!output.exists());
}

#[test]
fn test_chisq_report_with_everything_flagged() {
    let dir = tempdir().unwrap();
    let (data_file, model_file) = write_files(&dir, |_, _, _| c64::new(1.0, 0.0), None);
    let params = args(
        data_file.clone(),
        model_file.clone(),
        dir.path().join("sols.json"),
    )
    .parse()
    .unwrap();
    let data = read_vis(&data_file).unwrap();
    let model = read_vis(&model_file).unwrap();

    let ants: Vec<usize> = antpos().keys().copied().collect();
    let sol = PolSolution {
        gains: ants
            .iter()
            .map(|&a| (a, Array2::from_elem((NUM_TIMES, NUM_FREQS), c64::new(1.0, 0.0))))
            .collect(),
        bls: ants.iter().copied().tuple_combinations().collect(),
    };
    let flags = |flagged: bool| -> IndexMap<(usize, AntPol), Array2<bool>> {
        ants.iter()
            .map(|&a| ((a, AntPol::X), Array2::from_elem((NUM_TIMES, NUM_FREQS), flagged)))
            .collect()
    };

    let chisq = params
        .report_chisq(&data, &model, Pol::XX, &sol, &flags(false))
        .unwrap();
    assert_abs_diff_eq!(chisq.unwrap(), 0.0);

    let chisq = params
        .report_chisq(&data, &model, Pol::XX, &sol, &flags(true))
        .unwrap();
    assert!(chisq.is_none());
}

#[test]
fn test_solar_flagging() {
    let dir = tempdir().unwrap();
    let (data, model) = write_files(&dir, |_, _, _| c64::new(4.0, 0.0), None);

    // The Sun is never above the zenith.
    let output = dir.path().join("night.json");
    let mut a = args(data.clone(), model.clone(), output.clone());
    a.abscal_args.solar_alt = Some(90.0);
    a.run(false).unwrap();
    let sols = CalSolutions::read_solutions_from_ext(&output).unwrap();
    assert!(sols.flags.as_ref().unwrap().iter().all(|&f| !f));
    assert_calibrates(&sols, &data, &model);

    // ... and it's always above the nadir.
    let output = dir.path().join("day.json");
    let mut a = args(data, model, output.clone());
    a.abscal_args.solar_alt = Some(-90.0);
    a.run(false).unwrap();
    let sols = CalSolutions::read_solutions_from_ext(&output).unwrap();
    assert!(sols.flags.as_ref().unwrap().iter().all(|&f| f));
    assert_eq!(sols.flagged_ants(), vec![0, 1, 2, 3, 11]);
}
