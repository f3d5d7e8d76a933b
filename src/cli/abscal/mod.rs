// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parse absolute calibration arguments into parameters, and calibrate data
//! against a model.

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use clap::Parser;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, info, log_enabled, warn, Level::Debug};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::common::{
    describe_times, display_warnings, is_solutions_file, CalMetadataArgs, InfoPrinter, Warn,
    ARG_FILE_HELP, LONGITUDE_HELP,
};
use crate::{
    abscal::{AbsCal, AbsCalOptions},
    c64,
    chisq::chisq,
    constants::{HERA_LAT_DEG, HERA_LONG_DEG},
    flagging::{solar_flag, synthesize_ant_flags},
    polarisation::PolError,
    solutions::{CalSolutions, GainConvention, CAL_SOLUTION_EXTENSIONS},
    vis::{read_vis, VisContainer},
    AntPol, Baseline, FirstcalError, Pol,
};

/// Appended to the data file's name to make the default output name.
const DEFAULT_OUTPUT_SUFFIX: &str = ".abs.fits";

/// The fraction of an antenna's visibilities that must be flagged before its
/// gain is flagged. 0 flags a gain if any of its visibilities is flagged.
const DEFAULT_FLAG_THRESHOLD: f64 = 0.0;

/// Frequencies of the data and model must agree to within this \[Hz\].
const FREQ_TOLERANCE_HZ: f64 = 1.0;

/// Times of the data and model must agree to within this \[days\].
const TIME_TOLERANCE_JD: f64 = 1e-6;

lazy_static::lazy_static! {
    static ref OUTPUT_HELP: String =
        format!("Path to the output calibration solutions. Supported formats: {}. Default: the data file name with '{DEFAULT_OUTPUT_SUFFIX}' appended", *CAL_SOLUTION_EXTENSIONS);

    static ref FLAG_THRESHOLD_HELP: String =
        format!("An antenna's gain is flagged where more than this fraction of its visibilities are flagged. Default: {DEFAULT_FLAG_THRESHOLD}");
}

#[derive(Error, Debug)]
pub(super) enum AbscalArgsError {
    #[error("No data visibilities were supplied")]
    NoData,

    #[error("No model visibilities were supplied")]
    NoModel,

    #[error("The model doesn't contain any {0} visibilities")]
    PolNotInModel(Pol),

    #[error("The data and model have no polarisations in common")]
    NoPols,

    #[error("Absolute calibration works on one feed polarisation at a time, but {0} was requested")]
    CrossPol(Pol),

    #[error("The frequencies of the data and model differ")]
    FreqsDiffer,

    #[error("The times of the data and model differ")]
    TimesDiffer,

    #[error("Cannot write calibration solutions to '{file}'; supported formats: {}", *CAL_SOLUTION_EXTENSIONS)]
    BadOutputExt { file: PathBuf },

    #[error(transparent)]
    Pol(#[from] PolError),
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AbscalCliArgs {
    /// The visibilities to calibrate.
    #[clap(short, long, parse(from_os_str), help_heading = "INPUT FILES")]
    data: Option<PathBuf>,

    /// The model visibilities to calibrate against. Frequencies and times
    /// must match the data.
    #[clap(short, long, parse(from_os_str), help_heading = "INPUT FILES")]
    model: Option<PathBuf>,

    #[clap(short = 'o', long, help = OUTPUT_HELP.as_str(), parse(from_os_str), help_heading = "OUTPUT FILES")]
    output: Option<PathBuf>,

    /// The polarisations to calibrate, e.g. --pols xx,yy. Default: every xx and
    /// yy polarisation in both the data and model.
    #[clap(long, value_delimiter = ',', help_heading = "CALIBRATION")]
    pols: Option<Vec<String>>,

    /// Antennas to exclude from calibration, e.g. --ex-ants 22,43,81
    #[clap(long = "ex-ants", value_delimiter = ',', help_heading = "CALIBRATION")]
    ex_ants: Option<Vec<usize>>,

    /// Solve for one gain amplitude and phase over all times.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    tie_time: bool,

    /// Solve for one gain amplitude and phase over all frequencies.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    tie_freq: bool,

    /// Don't solve for the overall phase.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    zero_psi: bool,

    /// Solve for per-antenna delays before the amplitude and phase.
    #[clap(long, help_heading = "CALIBRATION")]
    #[serde(default)]
    delay: bool,

    /// The antenna whose delay is fixed at zero. Default: the lowest-numbered
    /// antenna.
    #[clap(long, requires = "delay", help_heading = "CALIBRATION")]
    refant: Option<usize>,

    #[clap(long, help = FLAG_THRESHOLD_HELP.as_str(), help_heading = "CALIBRATION")]
    flag_threshold: Option<f64>,

    #[clap(long, help = LONGITUDE_HELP.as_str(), help_heading = "CALIBRATION")]
    longitude: Option<f64>,

    /// Flag the data at times when the Sun is higher than this altitude
    /// in degrees. Default: no solar flagging.
    #[clap(long, help_heading = "CALIBRATION")]
    solar_alt: Option<f64>,
}

impl AbscalCliArgs {
    fn merge(self, other: Self) -> Self {
        Self {
            data: self.data.or(other.data),
            model: self.model.or(other.model),
            output: self.output.or(other.output),
            pols: self.pols.or(other.pols),
            ex_ants: self.ex_ants.or(other.ex_ants),
            tie_time: self.tie_time || other.tie_time,
            tie_freq: self.tie_freq || other.tie_freq,
            zero_psi: self.zero_psi || other.zero_psi,
            delay: self.delay || other.delay,
            refant: self.refant.or(other.refant),
            flag_threshold: self.flag_threshold.or(other.flag_threshold),
            longitude: self.longitude.or(other.longitude),
            solar_alt: self.solar_alt.or(other.solar_alt),
        }
    }
}

#[derive(Parser, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct AbscalArgs {
    #[clap(long = "args-file", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    args_file: Option<PathBuf>,

    #[clap(flatten)]
    #[serde(rename = "abscal")]
    #[serde(default)]
    abscal_args: AbscalCliArgs,

    #[clap(flatten)]
    #[serde(rename = "metadata")]
    #[serde(default)]
    metadata: CalMetadataArgs,
}

#[derive(Debug)]
struct AbscalRunParams {
    data: PathBuf,
    model: PathBuf,
    output: PathBuf,
    pols: Option<Vec<Pol>>,
    ex_ants: Vec<usize>,
    opts: AbsCalOptions,
    delay: bool,
    refant: Option<usize>,
    flag_threshold: f64,
    longitude_deg: f64,
    solar_alt: Option<f64>,
    metadata: CalMetadataArgs,
}

/// What came out of calibrating one polarisation.
struct PolSolution {
    /// Gains in the multiply convention.
    gains: IndexMap<usize, Array2<c64>>,

    /// The baselines used.
    bls: Vec<Baseline>,
}

impl AbscalArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    pub(super) fn merge(self) -> Result<AbscalArgs, FirstcalError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let AbscalArgs {
                args_file: _,
                abscal_args,
                metadata,
            } = unpack_arg_file!(arg_file);

            Ok(AbscalArgs {
                args_file: None,
                abscal_args: cli_args.abscal_args.merge(abscal_args),
                metadata: cli_args.metadata.merge(metadata),
            })
        } else {
            Ok(cli_args)
        }
    }

    fn parse(self) -> Result<AbscalRunParams, FirstcalError> {
        debug!("{:#?}", self);

        let AbscalArgs {
            args_file: _,
            abscal_args:
                AbscalCliArgs {
                    data,
                    model,
                    output,
                    pols,
                    ex_ants,
                    tie_time,
                    tie_freq,
                    zero_psi,
                    delay,
                    refant,
                    flag_threshold,
                    longitude,
                    solar_alt,
                },
            metadata,
        } = self;

        let data = data.ok_or(AbscalArgsError::NoData)?;
        let model = model.ok_or(AbscalArgsError::NoModel)?;
        let output = output
            .unwrap_or_else(|| PathBuf::from(format!("{}{DEFAULT_OUTPUT_SUFFIX}", data.display())));
        if !is_solutions_file(&output) {
            return Err(AbscalArgsError::BadOutputExt { file: output }.into());
        }
        if output.exists() {
            format!("Will overwrite the existing file '{}'", output.display()).warn();
        }

        let pols = match pols {
            Some(pols) => {
                let mut parsed = vec![];
                for s in pols {
                    let pol = Pol::parse(&s).map_err(AbscalArgsError::from)?;
                    if pol.is_cross() {
                        return Err(AbscalArgsError::CrossPol(pol).into());
                    }
                    parsed.push(pol);
                }
                Some(parsed.into_iter().unique().collect())
            }
            None => None,
        };
        if refant.is_some() && !delay {
            "A reference antenna was given without delay calibration; it will be ignored".warn();
        }

        Ok(AbscalRunParams {
            data,
            model,
            output,
            pols,
            ex_ants: ex_ants
                .unwrap_or_default()
                .into_iter()
                .sorted()
                .dedup()
                .collect(),
            opts: AbsCalOptions {
                tie_time,
                tie_freq,
                zero_psi,
            },
            delay,
            refant,
            flag_threshold: flag_threshold.unwrap_or(DEFAULT_FLAG_THRESHOLD),
            longitude_deg: longitude.unwrap_or(HERA_LONG_DEG),
            solar_alt,
            metadata,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), FirstcalError> {
        let params = self.parse()?;

        let mut data = read_vis(&params.data)?;
        let model = read_vis(&params.model)?;
        check_compatible(&data, &model)?;
        let pols = params.choose_pols(&data, &model)?;

        let mut printer = InfoPrinter::new("Absolute calibration set up".into());
        printer.push_block(vec![
            format!("Data:   {}", params.data.display()).into(),
            format!("Model:  {}", params.model.display()).into(),
            format!("Output: {}", params.output.display()).into(),
        ]);
        printer.push_block(describe_times(&data.times, params.longitude_deg));
        printer.push_block(vec![
            format!("Polarisations: [{}]", pols.iter().join(", ")).into(),
            format!("Excluded antennas: {:?}", params.ex_ants).into(),
            format!(
                "Delay calibration: {}",
                match (params.delay, params.refant) {
                    (false, _) => "off".to_string(),
                    (true, Some(r)) => format!("on, reference antenna {r}"),
                    (true, None) => "on".to_string(),
                }
            )
            .into(),
            format!(
                "Tied axes: time {}, frequency {}",
                params.opts.tie_time, params.opts.tie_freq
            )
            .into(),
            format!("Solve for overall phase: {}", !params.opts.zero_psi).into(),
            format!("Gain flag threshold: {}", params.flag_threshold).into(),
            match params.solar_alt {
                Some(alt) => format!("Solar flagging above {alt} degrees").into(),
                None => "No solar flagging".into(),
            },
        ]);
        printer.push_block(params.metadata.describe());
        printer.display();
        display_warnings();

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        if let Some(alt) = params.solar_alt {
            let times = data.times.to_vec();
            let daytime = solar_flag(
                data.vis.values_mut().map(|w| &mut w.flags),
                &times,
                alt,
                params.longitude_deg,
                HERA_LAT_DEG,
            )?;
            let num_day = daytime.iter().filter(|&&d| d).count();
            if num_day > 0 {
                info!("Flagged {num_day} of {} times for the Sun", times.len());
            }
        }

        let sols = params.calibrate(&data, &model, pols)?;
        sols.write_solutions_from_ext(&params.output)?;
        info!("Calibration solutions written to {}", params.output.display());
        Ok(())
    }
}

/// The data and model must share a frequency and time grid.
fn check_compatible(data: &VisContainer, model: &VisContainer) -> Result<(), AbscalArgsError> {
    let same = |a: &[f64], b: &[f64], tol: f64| {
        a.len() == b.len() && a.iter().zip(b).all(|(a, b)| (a - b).abs() <= tol)
    };
    if !same(&data.freqs, &model.freqs, FREQ_TOLERANCE_HZ) {
        return Err(AbscalArgsError::FreqsDiffer);
    }
    if !same(&data.times, &model.times, TIME_TOLERANCE_JD) {
        return Err(AbscalArgsError::TimesDiffer);
    }
    Ok(())
}

impl AbscalRunParams {
    fn choose_pols(
        &self,
        data: &VisContainer,
        model: &VisContainer,
    ) -> Result<Vec<Pol>, AbscalArgsError> {
        let model_pols = model.pols();
        match &self.pols {
            Some(pols) => {
                for &pol in pols {
                    if !model_pols.contains(&pol) {
                        return Err(AbscalArgsError::PolNotInModel(pol));
                    }
                }
                Ok(pols.clone())
            }
            None => {
                let pols: Vec<Pol> = data
                    .pols()
                    .into_iter()
                    .filter(|p| !p.is_cross() && model_pols.contains(p))
                    .collect();
                if pols.is_empty() {
                    return Err(AbscalArgsError::NoPols);
                }
                Ok(pols)
            }
        }
    }

    fn calibrate(
        &self,
        data: &VisContainer,
        model: &VisContainer,
        pols: Vec<Pol>,
    ) -> Result<CalSolutions, FirstcalError> {
        let pol_sols = pols
            .iter()
            .map(|&pol| self.calibrate_pol(data, model, pol))
            .collect::<Result<Vec<_>, _>>()?;

        let vis_flags: IndexMap<(usize, usize, Pol), Array2<bool>> = data
            .vis
            .iter()
            .filter(|(&(a1, a2, pol), _)| {
                pols.contains(&pol) && !self.ex_ants.contains(&a1) && !self.ex_ants.contains(&a2)
            })
            .map(|(&key, w)| (key, w.flags.clone()))
            .collect();
        let ant_flags = synthesize_ant_flags(&vis_flags, self.flag_threshold)?;

        for (&pol, sol) in pols.iter().zip(pol_sols.iter()) {
            self.report_chisq(data, model, pol, sol, &ant_flags)?;
        }

        let gain_maps: Vec<IndexMap<usize, Array2<c64>>> =
            pol_sols.into_iter().map(|s| s.gains).collect();
        let mut sols = CalSolutions::from_gain_maps(
            pols,
            data.freqs.to_vec(),
            data.times.to_vec(),
            &gain_maps,
            GainConvention::Multiply,
        );
        if let Some(flags) = sols.flags.as_mut() {
            for (i_pol, pol) in sols.pols.iter().enumerate() {
                for (i_ant, &ant) in sols.ants.iter().enumerate() {
                    if let Some(f) = ant_flags.get(&(ant, pol.split().0)) {
                        flags
                            .slice_mut(s![i_ant, .., .., i_pol])
                            .zip_mut_with(f, |a, &b| *a |= b);
                    }
                }
            }
        }
        sols.ex_ants = self.ex_ants.clone();
        self.metadata.apply(&mut sols);
        Ok(sols)
    }

    /// Delay calibration (if requested), then amplitude and phase calibration
    /// of the delay-corrected data.
    fn calibrate_pol(
        &self,
        data: &VisContainer,
        model: &VisContainer,
        pol: Pol,
    ) -> Result<PolSolution, FirstcalError> {
        info!("Running absolute calibration on {pol}");
        let (mut data_map, weights): (
            IndexMap<Baseline, Array2<c64>>,
            IndexMap<Baseline, Array2<f64>>,
        ) = data
            .select_pol(pol, &self.ex_ants)
            .into_iter()
            .map(|(bl, (d, w))| ((bl, d), (bl, w)))
            .unzip();
        let model_map: IndexMap<Baseline, Array2<c64>> = model
            .select_pol(pol, &self.ex_ants)
            .into_iter()
            .map(|(bl, (m, _))| (bl, m))
            .collect();

        let delay_gains = if self.delay {
            let mut cal = AbsCal::new(
                &model_map,
                &data_map,
                Some(&weights),
                &data.antpos,
                data.freqs.clone(),
                data.times.clone(),
            )?;
            let refant = match self.refant {
                Some(r) => r,
                None => cal.ants.first().copied().unwrap_or_default(),
            };
            cal.delay_lincal(refant)?;
            if log_enabled!(Debug) {
                if let Some(delays) = cal.delays.as_ref() {
                    for (ant, tau) in cal.ants.iter().zip(delays.outer_iter()) {
                        debug!(
                            "Antenna {ant}{}: mean delay {:.4} ns",
                            pol.split().0,
                            tau.mean().unwrap_or(f64::NAN)
                        );
                    }
                }
            }
            let delay_gains = cal.delay_gains();
            if let Some(g) = delay_gains.as_ref() {
                apply_gains(&mut data_map, g);
            }
            delay_gains
        } else {
            None
        };

        let mut cal = AbsCal::new(
            &model_map,
            &data_map,
            Some(&weights),
            &data.antpos,
            data.freqs.clone(),
            data.times.clone(),
        )?;
        cal.run(&self.opts)?;
        if let (Some(amp), Some(phi)) = (cal.gain_amp.as_ref(), cal.gain_phi.as_ref()) {
            debug!(
                "{pol}: mean gain amplitude {:.4}, mean phase gradient ({:.4e}, {:.4e}) rad/m",
                amp.mean().unwrap_or(f64::NAN),
                phi.index_axis(Axis(0), 0).mean().unwrap_or(f64::NAN),
                phi.index_axis(Axis(0), 1).mean().unwrap_or(f64::NAN),
            );
        }

        let mut gains = cal.make_gains();
        if let Some(delay_gains) = delay_gains {
            for (ant, g) in gains.iter_mut() {
                if let Some(d) = delay_gains.get(ant) {
                    g.zip_mut_with(d, |g, &d| *g *= d);
                }
            }
        }
        Ok(PolSolution {
            gains,
            bls: cal.baselines().collect(),
        })
    }

    /// Log how well the gain-corrupted model matches the data. Returns the
    /// chi-squared per observation, or `None` if every visibility is flagged.
    fn report_chisq(
        &self,
        data: &VisContainer,
        model: &VisContainer,
        pol: Pol,
        sol: &PolSolution,
        ant_flags: &IndexMap<(usize, AntPol), Array2<bool>>,
    ) -> Result<Option<f64>, FirstcalError> {
        let mut data_map = IndexMap::new();
        let mut model_map = IndexMap::new();
        let mut weights = IndexMap::new();
        for &bl in &sol.bls {
            if let (Some(d), Some(m)) = (data.get(bl, pol), model.get(bl, pol)) {
                weights.insert((bl.0, bl.1, pol), d.weights());
                data_map.insert((bl.0, bl.1, pol), d.data);
                model_map.insert((bl.0, bl.1, pol), m.data);
            }
        }
        // The data are modelled as the model corrupted by the inverse of the
        // multiply-convention gains.
        let antpol = pol.split().0;
        let inverse_gains: IndexMap<(usize, AntPol), Array2<c64>> = sol
            .gains
            .iter()
            .map(|(&ant, g)| ((ant, antpol), g.mapv(|g| g.inv())))
            .collect();

        let result = chisq(
            &data_map,
            &model_map,
            &weights,
            Some(&inverse_gains),
            Some(ant_flags),
            true,
        )?;
        let num_obs = result.num_obs.sum();
        if num_obs == 0 {
            warn!("{pol}: every visibility is flagged; no chi-squared");
            return Ok(None);
        }
        let chisq_per_obs = result.chisq.sum() / num_obs as f64;
        info!("{pol}: χ² per observation {chisq_per_obs:.4e} ({num_obs} observations)");
        Ok(Some(chisq_per_obs))
    }
}

/// Correct visibilities with multiply-convention gains,
/// `V_ij ← g_i conj(g_j) V_ij`. Baselines with an antenna lacking a gain are
/// left alone.
fn apply_gains(vis: &mut IndexMap<Baseline, Array2<c64>>, gains: &IndexMap<usize, Array2<c64>>) {
    for (&(a1, a2), v) in vis.iter_mut() {
        if let (Some(g1), Some(g2)) = (gains.get(&a1), gains.get(&a2)) {
            Zip::from(v)
                .and(g1)
                .and(g2)
                .for_each(|v, &g1, &g2| *v *= g1 * g2.conj());
        }
    }
}
