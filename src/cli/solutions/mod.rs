// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to convert and combine calibration solutions.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use crate::{CalSolutions, FirstcalError};

#[derive(Parser, Debug, Default)]
pub(super) struct SolutionsConvertArgs {
    /// The path to the input file.
    #[clap(name = "INPUT_SOLUTIONS_FILE", parse(from_os_str))]
    input: PathBuf,

    /// The path to the output file. The format is taken from its extension.
    #[clap(name = "OUTPUT_SOLUTIONS_FILE", parse(from_os_str))]
    output: PathBuf,
}

impl SolutionsConvertArgs {
    pub(super) fn run(self) -> Result<(), FirstcalError> {
        let sols = CalSolutions::read_solutions_from_ext(&self.input)?;
        sols.write_solutions_from_ext(&self.output)?;

        info!(
            "Converted {} to {}",
            self.input.display(),
            self.output.display()
        );

        Ok(())
    }
}

#[derive(Parser, Debug, Default)]
pub(super) struct SolutionsCombineArgs {
    /// The solutions to multiply together. They must have the same antennas,
    /// polarisations, frequencies and times.
    #[clap(
        name = "INPUT_SOLUTIONS_FILES",
        parse(from_os_str),
        required = true,
        min_values = 2
    )]
    inputs: Vec<PathBuf>,

    /// The path to the output file. The format is taken from its extension.
    #[clap(short, long, parse(from_os_str))]
    output: PathBuf,

    /// Only flag a gain if it's flagged in every input. By default, a gain
    /// flagged in any input is flagged.
    #[clap(long)]
    no_broadcast_flags: bool,
}

impl SolutionsCombineArgs {
    pub(super) fn run(self) -> Result<(), FirstcalError> {
        let sols = self
            .inputs
            .iter()
            .map(|f| {
                info!("Reading {}", f.display());
                CalSolutions::read_solutions_from_ext(f)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let combined = CalSolutions::combine(&sols, !self.no_broadcast_flags)?;
        combined.write_solutions_from_ext(&self.output)?;

        info!(
            "Wrote the product of {} solutions to {}",
            sols.len(),
            self.output.display()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::Pol;

    #[test]
    fn test_convert_json_to_fits_and_back() {
        let dir = tempdir().unwrap();
        let json = dir.path().join("sols.json");
        let fits = dir.path().join("sols.fits");
        let json2 = dir.path().join("sols2.json");

        let delays = ndarray::Array3::from_shape_fn((3, 1, 1), |(a, _, _)| a as f64 - 1.0);
        let mut sols = CalSolutions::from_delays(
            vec![0, 1, 2],
            vec![Pol::YY],
            vec![100e6, 101e6, 102e6, 103e6],
            vec![2458098.3],
            delays,
        );
        sols.calfile = Some("hsa7458_v001".to_string());
        sols.write_solutions_from_ext(&json).unwrap();

        SolutionsConvertArgs {
            input: json,
            output: fits.clone(),
        }
        .run()
        .unwrap();
        SolutionsConvertArgs {
            input: fits,
            output: json2.clone(),
        }
        .run()
        .unwrap();

        let round_trip = CalSolutions::read_solutions_from_ext(&json2).unwrap();
        assert_eq!(round_trip.ants, sols.ants);
        assert_eq!(round_trip.pols, sols.pols);
        assert_eq!(round_trip.calfile, sols.calfile);
        assert_eq!(round_trip.delays, sols.delays);
    }

    #[test]
    fn test_unsupported_extensions() {
        let dir = tempdir().unwrap();
        let result = SolutionsConvertArgs {
            input: dir.path().join("sols.bin"),
            output: dir.path().join("sols.fits"),
        }
        .run();
        assert!(matches!(result, Err(FirstcalError::Solutions(_))));
    }

    #[test]
    fn test_combine_files() {
        let dir = tempdir().unwrap();
        let delays = ndarray::Array3::from_shape_fn((3, 1, 1), |(a, _, _)| a as f64 - 1.0);
        let sols = CalSolutions::from_delays(
            vec![0, 1, 2],
            vec![Pol::XX],
            vec![100e6, 101e6, 102e6, 103e6],
            vec![2458098.3],
            delays.clone(),
        );
        let first = dir.path().join("first.fits");
        let second = dir.path().join("second.json");
        let output = dir.path().join("combined.fits");
        sols.write_solutions_from_ext(&first).unwrap();
        sols.write_solutions_from_ext(&second).unwrap();

        SolutionsCombineArgs {
            inputs: vec![first, second],
            output: output.clone(),
            no_broadcast_flags: false,
        }
        .run()
        .unwrap();

        let combined = CalSolutions::read_solutions_from_ext(&output).unwrap();
        assert_eq!(combined.ants, sols.ants);
        approx::assert_abs_diff_eq!(combined.delays.unwrap(), delays * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_combine_mismatched_files() {
        let dir = tempdir().unwrap();
        let make = |ants: Vec<usize>| {
            let delays = ndarray::Array3::zeros((ants.len(), 1, 1));
            CalSolutions::from_delays(
                ants,
                vec![Pol::XX],
                vec![100e6, 101e6],
                vec![2458098.3],
                delays,
            )
        };
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        make(vec![0, 1]).write_solutions_from_ext(&first).unwrap();
        make(vec![0, 2]).write_solutions_from_ext(&second).unwrap();
        let output = dir.path().join("combined.json");
        let result = SolutionsCombineArgs {
            inputs: vec![first, second],
            output: output.clone(),
            no_broadcast_flags: true,
        }
        .run();
        assert!(matches!(result, Err(FirstcalError::Solutions(_))));
        assert!(!output.exists());
    }
}
