// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Common arguments for command-line interfaces. e.g. the `firstcal` and
//! `abscal` subcommands both write calibration solutions with provenance
//! metadata, so the same metadata arguments are shared between them.

mod printers;
#[cfg(test)]
mod tests;

pub(super) use printers::{display_warnings, InfoPrinter, Warn};

use std::{borrow::Cow, path::Path, str::FromStr};

use clap::Parser;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    constants::HERA_LONG_DEG,
    solutions::{CalSolutionType, CalSolutions},
    submit::default_observer,
    time::{jd_to_epoch, jd_to_lst},
};

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);

    pub(super) static ref LONGITUDE_HELP: String =
        format!("The longitude of the array [degrees East], used to report local sidereal times. Default (HERA): {HERA_LONG_DEG}°");
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read, str::FromStr};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        let arg_file_type = $arg_file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok());

        match arg_file_type {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(FirstcalError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(FirstcalError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            _ => {
                return Err(FirstcalError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

/// Provenance of calibration solutions. These are recorded in the output
/// solutions and otherwise have no effect.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct CalMetadataArgs {
    /// The calibration file (array description) these solutions relate to.
    #[clap(short = 'C', long, help_heading = "METADATA")]
    pub(super) calfile: Option<String>,

    /// The person running calibration. Default: $USER
    #[clap(long, help_heading = "METADATA")]
    pub(super) observer: Option<String>,

    /// The origin URL of the git repository holding the calibration files.
    #[clap(long = "git_origin_cal", help_heading = "METADATA")]
    pub(super) git_origin_cal: Option<String>,

    /// The commit hash of the git repository holding the calibration files.
    #[clap(long = "git_hash_cal", help_heading = "METADATA")]
    pub(super) git_hash_cal: Option<String>,
}

impl CalMetadataArgs {
    pub(super) fn merge(self, other: Self) -> Self {
        Self {
            calfile: self.calfile.or(other.calfile),
            observer: self.observer.or(other.observer),
            git_origin_cal: self.git_origin_cal.or(other.git_origin_cal),
            git_hash_cal: self.git_hash_cal.or(other.git_hash_cal),
        }
    }

    /// Record this metadata (and the command line) in solutions.
    pub(super) fn apply(&self, sols: &mut CalSolutions) {
        sols.calfile = self.calfile.clone();
        sols.observer = Some(self.observer.clone().unwrap_or_else(default_observer));
        sols.git_origin_cal = self.git_origin_cal.clone();
        sols.git_hash_cal = self.git_hash_cal.clone();
        sols.history = Some(command_line());
    }

    pub(super) fn describe(&self) -> Vec<Cow<'static, str>> {
        let or_unset = |s: &Option<String>| s.clone().unwrap_or_else(|| "<not set>".to_string());
        vec![
            format!("Calfile: {}", or_unset(&self.calfile)).into(),
            format!(
                "Observer: {}",
                self.observer.clone().unwrap_or_else(default_observer)
            )
            .into(),
            format!(
                "Cal. repo: {} @ {}",
                or_unset(&self.git_origin_cal),
                or_unset(&self.git_hash_cal)
            )
            .into(),
        ]
    }
}

/// Can calibration solutions be written to this file? Only the extension is
/// checked.
pub(super) fn is_solutions_file(file: &Path) -> bool {
    file.extension()
        .and_then(|e| e.to_str())
        .map(|e| CalSolutionType::from_str(&e.to_lowercase()).is_ok())
        .unwrap_or(false)
}

/// How this program was invoked, for the history of output files.
pub(super) fn command_line() -> String {
    std::env::args().join(" ")
}

/// Describe the time span of some Julian dates, with local sidereal times at
/// `longitude_deg`.
pub(super) fn describe_times(times: &[f64], longitude_deg: f64) -> Vec<Cow<'static, str>> {
    let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
        return vec!["No times".into()];
    };
    let lst_hours = |jd: f64| jd_to_lst(jd, longitude_deg).to_degrees() / 15.0;
    vec![
        format!("{} timesteps", times.len()).into(),
        format!(
            "First: {} (JD {first:.5}, LST {:.4}h)",
            jd_to_epoch(first),
            lst_hours(first)
        )
        .into(),
        format!(
            "Last:  {} (JD {last:.5}, LST {:.4}h)",
            jd_to_epoch(last),
            lst_hours(last)
        )
        .into(),
    ]
}
