// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parse first-cal arguments into parameters, and run first-cal on each input
//! file.


use std::path::{Path, PathBuf};

use clap::Parser;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, log_enabled, Level::Debug};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;

use super::common::{
    describe_times, display_warnings, is_solutions_file, CalMetadataArgs, InfoPrinter, Warn,
    ARG_FILE_HELP, LONGITUDE_HELP,
};
use crate::{
    c64,
    constants::{
        DEFAULT_FIT_BAND_HIGH_GHZ, DEFAULT_FIT_BAND_LOW_GHZ, DEFAULT_REDUNDANCY_TOLERANCE,
        HERA_LONG_DEG,
    },
    firstcal::{FirstCal, FirstCalParams, FirstCalResult},
    math::Window,
    polarisation::PolError,
    redundancy::{get_reds, RedundantInfo},
    solutions::{CalSolutions, CAL_SOLUTION_EXTENSIONS},
    vis::{read_vis, VisContainer},
    Baseline, FirstcalError, Pol,
};

/// Appended to an input file's name to make its default output name.
const DEFAULT_OUTPUT_SUFFIX: &str = ".first.fits";

lazy_static::lazy_static! {
    static ref OUTPUTS_HELP: String =
        format!("Paths to the output calibration solution files, one per input file. Supported formats: {}. Default: the input file name with '{DEFAULT_OUTPUT_SUFFIX}' appended", *CAL_SOLUTION_EXTENSIONS);

    static ref WINDOW_HELP: String =
        format!("The window applied across frequency before measuring delays. Supported windows: {}. Default: {}", Window::iter().join(", "), Window::default());

    static ref FIT_BAND_LOW_HELP: String =
        format!("The lower edge of the band used to fine-tune delays [GHz]. Default: {DEFAULT_FIT_BAND_LOW_GHZ}");

    static ref FIT_BAND_HIGH_HELP: String =
        format!("The upper edge of the band used to fine-tune delays [GHz]. Default: {DEFAULT_FIT_BAND_HIGH_GHZ}");

    static ref TOLERANCE_HELP: String =
        format!("Baselines whose separations differ by less than this are redundant [metres]. Default: {DEFAULT_REDUNDANCY_TOLERANCE}");
}

#[derive(Error, Debug)]
pub(super) enum FirstcalArgsError {
    #[error("No input visibility files were supplied")]
    NoInputs,

    #[error("{inputs} input files were supplied, but {outputs} outputs; there must be one output per input")]
    OutputCountMismatch { inputs: usize, outputs: usize },

    #[error("Cannot write calibration solutions to '{file}'; supported formats: {}", *CAL_SOLUTION_EXTENSIONS)]
    BadOutputExt { file: PathBuf },

    #[error("First-cal works on one feed polarisation at a time, but {0} was requested; use xx or yy")]
    CrossPol(Pol),

    #[error("Unrecognised window '{0}'")]
    BadWindow(String),

    #[error("'{file}' contains no xx or yy visibilities")]
    NoPols { file: PathBuf },

    #[error("'{file}' contains no {pol} visibilities")]
    PolNotPresent { pol: Pol, file: PathBuf },

    #[error(transparent)]
    Pol(#[from] PolError),
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct FirstcalCliArgs {
    /// The polarisation to calibrate. Default: every xx and yy polarisation in
    /// the input.
    #[clap(short = 'p', long = "pol", help_heading = "CALIBRATION")]
    pol: Option<String>,

    /// Antennas to exclude from calibration, e.g. --ex_ants 22,43,81
    #[clap(
        long = "ex_ants",
        alias = "ex-ants",
        value_delimiter = ',',
        help_heading = "CALIBRATION"
    )]
    ex_ants: Option<Vec<usize>>,

    #[clap(long, help = WINDOW_HELP.as_str(), help_heading = "CALIBRATION")]
    window: Option<String>,

    /// Don't refine delays with a linear fit to the residual phase.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    no_finetune: bool,

    /// Average over time before measuring delays, giving one delay per
    /// antenna.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    average: bool,

    #[clap(long, help = FIT_BAND_LOW_HELP.as_str(), help_heading = "CALIBRATION")]
    fit_band_low: Option<f64>,

    #[clap(long, help = FIT_BAND_HIGH_HELP.as_str(), help_heading = "CALIBRATION")]
    fit_band_high: Option<f64>,

    #[clap(long, help = TOLERANCE_HELP.as_str(), help_heading = "CALIBRATION")]
    tolerance: Option<f64>,

    #[clap(long, help = LONGITUDE_HELP.as_str(), help_heading = "CALIBRATION")]
    longitude: Option<f64>,

    #[clap(short = 'o', long = "outputs", help = OUTPUTS_HELP.as_str(), parse(from_os_str), help_heading = "OUTPUT FILES")]
    outputs: Option<Vec<PathBuf>>,
}

impl FirstcalCliArgs {
    fn merge(self, other: Self) -> Self {
        Self {
            pol: self.pol.or(other.pol),
            ex_ants: self.ex_ants.or(other.ex_ants),
            window: self.window.or(other.window),
            no_finetune: self.no_finetune || other.no_finetune,
            average: self.average || other.average,
            fit_band_low: self.fit_band_low.or(other.fit_band_low),
            fit_band_high: self.fit_band_high.or(other.fit_band_high),
            tolerance: self.tolerance.or(other.tolerance),
            longitude: self.longitude.or(other.longitude),
            outputs: self.outputs.or(other.outputs),
        }
    }
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct FirstcalArgs {
    #[clap(long = "args-file", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    /// The visibility files to calibrate. Each gets its own solutions.
    #[clap(name = "FILES", parse(from_os_str), help_heading = "INPUT FILES")]
    files: Option<Vec<PathBuf>>,

    #[clap(flatten)]
    #[serde(rename = "firstcal")]
    #[serde(default)]
    firstcal_args: FirstcalCliArgs,

    #[clap(flatten)]
    #[serde(rename = "metadata")]
    #[serde(default)]
    metadata: CalMetadataArgs,
}

/// Everything needed to run first-cal.
#[derive(Debug)]
struct FirstcalRunParams {
    /// (input, output) pairs.
    files: Vec<(PathBuf, PathBuf)>,
    pol: Option<Pol>,
    ex_ants: Vec<usize>,
    params: FirstCalParams,
    tolerance: f64,
    longitude_deg: f64,
    metadata: CalMetadataArgs,
}

impl FirstcalArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    ///
    /// This function should only ever merge arguments, and not try to make
    /// sense of them.
    pub(super) fn merge(self) -> Result<FirstcalArgs, FirstcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            // Read in the file arguments. Ensure all of the file args are
            // accounted for by pattern matching.
            let FirstcalArgs {
                args_file: _,
                files,
                firstcal_args,
                metadata,
            } = unpack_arg_file!(arg_file);

            // Merge all the arguments, preferring the CLI args when available.
            Ok(FirstcalArgs {
                args_file: None,
                files: cli_args.files.or(files),
                firstcal_args: cli_args.firstcal_args.merge(firstcal_args),
                metadata: cli_args.metadata.merge(metadata),
            })
        } else {
            Ok(cli_args)
        }
    }

    fn parse(self) -> Result<FirstcalRunParams, FirstcalError> {
        debug!("{:#?}", self);

        let FirstcalArgs {
            args_file: _,
            files,
            firstcal_args:
                FirstcalCliArgs {
                    pol,
                    ex_ants,
                    window,
                    no_finetune,
                    average,
                    fit_band_low,
                    fit_band_high,
                    tolerance,
                    longitude,
                    outputs,
                },
            metadata,
        } = self;

        let files = match files {
            Some(f) if !f.is_empty() => f,
            _ => return Err(FirstcalArgsError::NoInputs.into()),
        };
        let outputs = match outputs {
            Some(outputs) => {
                if outputs.len() != files.len() {
                    return Err(FirstcalArgsError::OutputCountMismatch {
                        inputs: files.len(),
                        outputs: outputs.len(),
                    }
                    .into());
                }
                outputs
            }
            None => files
                .iter()
                .map(|f| PathBuf::from(format!("{}{DEFAULT_OUTPUT_SUFFIX}", f.display())))
                .collect(),
        };
        for output in &outputs {
            if !is_solutions_file(output) {
                return Err(FirstcalArgsError::BadOutputExt {
                    file: output.clone(),
                }
                .into());
            }
            if output.exists() {
                format!("Will overwrite the existing file '{}'", output.display()).warn();
            }
        }

        let pol = match pol {
            Some(s) => {
                let pol = Pol::parse(&s).map_err(FirstcalArgsError::from)?;
                if pol.is_cross() {
                    return Err(FirstcalArgsError::CrossPol(pol).into());
                }
                Some(pol)
            }
            None => None,
        };
        let window = match window {
            Some(s) => Window::parse(&s).ok_or(FirstcalArgsError::BadWindow(s))?,
            None => Window::default(),
        };
        let ex_ants = ex_ants
            .unwrap_or_default()
            .into_iter()
            .sorted()
            .dedup()
            .collect();

        Ok(FirstcalRunParams {
            files: files.into_iter().zip(outputs).collect(),
            pol,
            ex_ants,
            params: FirstCalParams {
                window,
                finetune: !no_finetune,
                average,
                fit_band: (
                    fit_band_low.unwrap_or(DEFAULT_FIT_BAND_LOW_GHZ),
                    fit_band_high.unwrap_or(DEFAULT_FIT_BAND_HIGH_GHZ),
                ),
            },
            tolerance: tolerance.unwrap_or(DEFAULT_REDUNDANCY_TOLERANCE),
            longitude_deg: longitude.unwrap_or(HERA_LONG_DEG),
            metadata,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), FirstcalError> {
        let params = self.parse()?;

        let mut printer = InfoPrinter::new("First-cal set up".into());
        printer.push_block(
            params
                .files
                .iter()
                .map(|(input, output)| {
                    format!("{} → {}", input.display(), output.display()).into()
                })
                .collect(),
        );
        printer.push_block(vec![
            match params.pol {
                Some(pol) => format!("Polarisation: {pol}").into(),
                None => "Polarisations: all of xx and yy".into(),
            },
            format!("Excluded antennas: {:?}", params.ex_ants).into(),
            format!("Redundancy tolerance: {} m", params.tolerance).into(),
        ]);
        printer.push_block(vec![
            format!("Window: {}", params.params.window).into(),
            format!(
                "Fine-tuning: {}",
                if params.params.finetune {
                    format!(
                        "{} to {} GHz",
                        params.params.fit_band.0, params.params.fit_band.1
                    )
                } else {
                    "off".to_string()
                }
            )
            .into(),
            format!("Time averaging: {}", params.params.average).into(),
        ]);
        printer.push_block(params.metadata.describe());
        printer.display();
        display_warnings();

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        for (input, output) in &params.files {
            let sols = params.calibrate_file(input)?;
            sols.write_solutions_from_ext(output)?;
            info!("Calibration solutions written to {}", output.display());
        }
        Ok(())
    }
}

impl FirstcalRunParams {
    /// Run first-cal on every requested polarisation of a file.
    fn calibrate_file(&self, file: &Path) -> Result<CalSolutions, FirstcalError> {
        let vis = read_vis(file)?;

        let pols = match self.pol {
            Some(pol) => {
                if !vis.pols().contains(&pol) {
                    return Err(FirstcalArgsError::PolNotPresent {
                        pol,
                        file: file.to_path_buf(),
                    }
                    .into());
                }
                vec![pol]
            }
            None => {
                let pols: Vec<Pol> = vis.pols().into_iter().filter(|p| !p.is_cross()).collect();
                if pols.is_empty() {
                    return Err(FirstcalArgsError::NoPols {
                        file: file.to_path_buf(),
                    }
                    .into());
                }
                pols
            }
        };

        let mut printer = InfoPrinter::new(format!("Calibrating {}", file.display()).into());
        printer.push_block(describe_times(&vis.times, self.longitude_deg));
        printer.push_line(
            format!(
                "{} channels from {:.3} to {:.3} MHz",
                vis.num_freqs(),
                vis.freqs.first() / 1e6,
                vis.freqs.last() / 1e6
            )
            .into(),
        );
        printer.display();

        let results = pols
            .iter()
            .map(|&pol| self.calibrate_pol(&vis, pol))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.to_solutions(&vis, pols, &results))
    }

    fn calibrate_pol(&self, vis: &VisContainer, pol: Pol) -> Result<FirstCalResult, FirstcalError> {
        info!("Running first-cal on {pol}");
        let (data, weights): (
            IndexMap<Baseline, Array2<c64>>,
            IndexMap<Baseline, Array2<f64>>,
        ) = vis
            .select_pol(pol, &self.ex_ants)
            .into_iter()
            .map(|(bl, (d, w))| ((bl, d), (bl, w)))
            .unzip();

        // Only antennas with data can be calibrated.
        let ants: Vec<usize> = data
            .keys()
            .flat_map(|&(a1, a2)| [a1, a2])
            .unique()
            .sorted()
            .collect();
        let antpos = vis.positions_of(&ants);
        let reds = get_reds(&antpos, &self.ex_ants, self.tolerance);
        let info = RedundantInfo::new(reds, &antpos)?;
        let unused = ants.len() - info.num_ants();
        if unused > 0 {
            info!("{unused} antennas have no redundant partners and won't be calibrated");
        }

        let firstcal = FirstCal::new(&info, &data, &weights, &vis.freqs)?;
        let result = firstcal.run(&self.params)?;

        if log_enabled!(Debug) {
            for (ant, delays) in result.delay_map() {
                debug!(
                    "Antenna {ant}{}: mean delay {:.4} ns",
                    pol.split().0,
                    delays.mean().unwrap_or(f64::NAN)
                );
            }
        }
        Ok(result)
    }

    /// Pack the per-polarisation results into solutions. Antennas without a
    /// solution in a polarisation are flagged there.
    fn to_solutions(
        &self,
        vis: &VisContainer,
        pols: Vec<Pol>,
        results: &[FirstCalResult],
    ) -> CalSolutions {
        let ants: Vec<usize> = results
            .iter()
            .flat_map(|r| r.ants.iter().copied())
            .unique()
            .sorted()
            .collect();
        let times = if self.params.average {
            vec![vis.times.iter().sum::<f64>() / vis.num_times() as f64]
        } else {
            vis.times.to_vec()
        };

        let mut delays = Array3::zeros((ants.len(), times.len(), pols.len()));
        let mut missing = vec![];
        for (i_pol, result) in results.iter().enumerate() {
            let delay_map = result.delay_map();
            for (i_ant, ant) in ants.iter().enumerate() {
                match delay_map.get(ant) {
                    Some(d) => delays.slice_mut(s![i_ant, .., i_pol]).assign(d),
                    None => missing.push((i_ant, i_pol)),
                }
            }
        }

        let mut sols = CalSolutions::from_delays(ants, pols, vis.freqs.to_vec(), times, delays);
        if let Some(flags) = sols.flags.as_mut() {
            for (i_ant, i_pol) in missing {
                flags.slice_mut(s![i_ant, .., .., i_pol]).fill(true);
            }
        }
        sols.ex_ants = self.ex_ants.clone();
        self.metadata.apply(&mut sols);
        sols
    }
}
