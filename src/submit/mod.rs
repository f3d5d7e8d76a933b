// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dispatch first-cal jobs over many files.
//!
//! Each input file gets one invocation of the first-cal program. Every
//! invocation carries the same polarisation, excluded antennas, calibration
//! file and provenance (observer and git metadata of the calibration code).
//! When run as a grid-engine array job, each task only takes its share of the
//! files.

mod error;

pub use error::SubmitError;

use std::{
    fmt::Display,
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};

use itertools::Itertools;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    constants::{
        DEFAULT_CALFILE, DEFAULT_EX_ANTS_XX, DEFAULT_EX_ANTS_YY, DEFAULT_FIRSTCAL_EXECUTABLE,
    },
    Pol,
};

lazy_static::lazy_static! {
    pub(crate) static ref CONFIG_FILE_EXTENSIONS: String = ConfigFileType::iter().join(", ");
}

#[derive(Debug, Display, EnumIter, EnumString)]
enum ConfigFileType {
    #[strum(serialize = "toml")]
    Toml,

    #[strum(serialize = "json")]
    Json,

    #[strum(serialize = "yaml")]
    Yaml,
}

/// Antennas to exclude from first-cal, per polarisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExAnts {
    #[serde(default = "default_ex_ants_xx")]
    pub xx: Vec<usize>,

    #[serde(default = "default_ex_ants_yy")]
    pub yy: Vec<usize>,
}

fn default_ex_ants_xx() -> Vec<usize> {
    DEFAULT_EX_ANTS_XX.to_vec()
}

fn default_ex_ants_yy() -> Vec<usize> {
    DEFAULT_EX_ANTS_YY.to_vec()
}

impl Default for ExAnts {
    fn default() -> Self {
        ExAnts {
            xx: default_ex_ants_xx(),
            yy: default_ex_ants_yy(),
        }
    }
}

impl ExAnts {
    /// The excluded antennas of `pol`. Only xx and yy have a list.
    pub fn for_pol(&self, pol: Pol) -> Result<&[usize], SubmitError> {
        match pol {
            Pol::XX => Ok(self.xx.as_slice()),
            Pol::YY => Ok(self.yy.as_slice()),
            Pol::XY | Pol::YX => Err(SubmitError::InvalidPol(pol.to_string())),
        }
    }

    pub fn for_pol_mut(&mut self, pol: Pol) -> Result<&mut Vec<usize>, SubmitError> {
        match pol {
            Pol::XX => Ok(&mut self.xx),
            Pol::YY => Ok(&mut self.yy),
            Pol::XY | Pol::YX => Err(SubmitError::InvalidPol(pol.to_string())),
        }
    }
}

/// Everything about a dispatch that doesn't change between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitConfig {
    #[serde(default)]
    pub ex_ants: ExAnts,

    /// The calibration file handed to each job.
    #[serde(default = "default_calfile")]
    pub calfile: String,

    /// The program run once per file.
    #[serde(default = "default_executable")]
    pub executable: String,
}

fn default_calfile() -> String {
    DEFAULT_CALFILE.to_string()
}

fn default_executable() -> String {
    DEFAULT_FIRSTCAL_EXECUTABLE.to_string()
}

impl Default for SubmitConfig {
    fn default() -> Self {
        SubmitConfig {
            ex_ants: ExAnts::default(),
            calfile: default_calfile(),
            executable: default_executable(),
        }
    }
}

impl SubmitConfig {
    /// Read a config file (toml, json or yaml). Anything the file doesn't
    /// specify takes its default value.
    pub fn from_file(file: &Path) -> Result<SubmitConfig, SubmitError> {
        let file_type = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| match e.as_str() {
                "yml" => Some(ConfigFileType::Yaml),
                e => ConfigFileType::from_str(e).ok(),
            })
            .ok_or_else(|| SubmitError::ConfigFileType(file.to_path_buf()))?;
        debug!("Parsing {file_type} config file {}", file.display());

        let mut contents = String::new();
        File::open(file)?.read_to_string(&mut contents)?;
        let config_err = |err: String| SubmitError::ConfigFile {
            file: file.to_path_buf(),
            err,
        };
        match file_type {
            ConfigFileType::Toml => toml::from_str(&contents).map_err(|e| config_err(e.to_string())),
            ConfigFileType::Json => {
                serde_json::from_str(&contents).map_err(|e| config_err(e.to_string()))
            }
            ConfigFileType::Yaml => {
                serde_yaml::from_str(&contents).map_err(|e| config_err(e.to_string()))
            }
        }
    }
}

/// Parse a command-line polarisation for first-cal. Only `xx` and `yy` are
/// allowed (in any case).
pub fn parse_firstcal_pol(s: &str) -> Result<Pol, SubmitError> {
    match s.to_lowercase().as_str() {
        "xx" => Ok(Pol::XX),
        "yy" => Ok(Pol::YY),
        _ => Err(SubmitError::InvalidPol(s.to_string())),
    }
}

/// The provenance of the calibration code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    pub origin: String,
    pub hash: String,
}

impl GitInfo {
    pub fn unknown() -> GitInfo {
        GitInfo {
            origin: "unknown".to_string(),
            hash: "unknown".to_string(),
        }
    }

    /// Ask git for the origin URL and HEAD commit of the repository at `repo`.
    pub fn query(repo: &Path) -> Result<GitInfo, SubmitError> {
        let git = |args: &[&str]| -> Result<String, SubmitError> {
            let cmd_str = format!("git -C {} {}", repo.display(), args.join(" "));
            trace!("Running '{cmd_str}'");
            let output = Command::new("git")
                .arg("-C")
                .arg(repo)
                .args(args)
                .output()
                .map_err(|e| SubmitError::Git {
                    cmd: cmd_str.clone(),
                    err: e.to_string(),
                })?;
            if !output.status.success() {
                return Err(SubmitError::Git {
                    cmd: cmd_str,
                    err: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        };

        Ok(GitInfo {
            origin: git(&["remote", "get-url", "origin"])?,
            hash: git(&["rev-parse", "HEAD"])?,
        })
    }
}

/// Who is running the calibration? `$USER`, or "unknown".
pub fn default_observer() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Which share of the files this process takes. Task `task_index` (counting
/// from 0) of `num_tasks` takes every `num_tasks`-th file, starting from the
/// file at `task_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDistribution {
    pub task_index: usize,
    pub num_tasks: usize,
}

impl TaskDistribution {
    pub fn new(task_index: usize, num_tasks: usize) -> Result<TaskDistribution, SubmitError> {
        if num_tasks == 0 {
            return Err(SubmitError::ZeroTasks);
        }
        if task_index >= num_tasks {
            return Err(SubmitError::TaskOutOfRange {
                task_index,
                num_tasks,
            });
        }
        Ok(TaskDistribution {
            task_index,
            num_tasks,
        })
    }

    /// Get the task distribution from the grid-engine variables `SGE_TASK_ID`,
    /// `SGE_TASK_FIRST`, `SGE_TASK_LAST` and `SGE_TASK_STEPSIZE`. If
    /// `SGE_TASK_ID` is unset or "undefined", this isn't an array job and
    /// `None` is returned.
    pub fn from_env() -> Result<Option<TaskDistribution>, SubmitError> {
        fn get(var: &'static str) -> Result<Option<usize>, SubmitError> {
            match std::env::var(var) {
                Err(_) => Ok(None),
                Ok(v) if v.trim().is_empty() || v.trim() == "undefined" => Ok(None),
                Ok(v) => match v.trim().parse::<usize>() {
                    Ok(n) if n > 0 => Ok(Some(n)),
                    _ => Err(SubmitError::BadTaskVariable { var, value: v }),
                },
            }
        }

        let id = match get("SGE_TASK_ID")? {
            Some(id) => id,
            None => return Ok(None),
        };
        let first = get("SGE_TASK_FIRST")?.unwrap_or(1);
        let last = get("SGE_TASK_LAST")?.unwrap_or(id);
        let step = get("SGE_TASK_STEPSIZE")?.unwrap_or(1);
        trace!("SGE task {id} (first {first}, last {last}, step {step})");
        if id < first || last < first {
            return Err(SubmitError::TaskOutOfRange {
                task_index: id.saturating_sub(first) / step,
                num_tasks: last.saturating_sub(first) / step + 1,
            });
        }
        TaskDistribution::new((id - first) / step, (last - first) / step + 1).map(Some)
    }

    /// This task's share of `items`.
    pub fn select<'a, T>(&self, items: &'a [T]) -> Vec<&'a T> {
        items
            .iter()
            .skip(self.task_index)
            .step_by(self.num_tasks)
            .collect()
    }
}

/// One run of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Quote a word for display the way a shell would need it.
fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./,:=@+%".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Everything that goes into each invocation besides the file.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub pol: Pol,
    pub config: SubmitConfig,
    pub git: GitInfo,
    pub observer: String,
}

/// Build one invocation per file (after task distribution):
///
/// `<executable> -p <pol> --ex_ants <a,b,...> -C <calfile> --observer <user>
/// --git_origin_cal <url> --git_hash_cal <hash> <file>`
pub fn plan(
    params: &SubmitParams,
    files: &[PathBuf],
    task: Option<TaskDistribution>,
) -> Result<Vec<Invocation>, SubmitError> {
    let files: Vec<&PathBuf> = match task {
        Some(t) => {
            debug!(
                "Task {} of {} takes its share of {} files",
                t.task_index + 1,
                t.num_tasks,
                files.len()
            );
            t.select(files)
        }
        None => files.iter().collect(),
    };
    let ex_ants = params.config.ex_ants.for_pol(params.pol)?.iter().join(",");

    let invocations = files
        .into_iter()
        .map(|file| Invocation {
            program: params.config.executable.clone(),
            args: vec![
                "-p".to_string(),
                params.pol.to_string(),
                "--ex_ants".to_string(),
                ex_ants.clone(),
                "-C".to_string(),
                params.config.calfile.clone(),
                "--observer".to_string(),
                params.observer.clone(),
                "--git_origin_cal".to_string(),
                params.git.origin.clone(),
                "--git_hash_cal".to_string(),
                params.git.hash.clone(),
                file.display().to_string(),
            ],
        })
        .collect();
    Ok(invocations)
}

/// Print each invocation to stdout and, unless this is a dry run, run it and
/// wait for it to finish. The returned exit code is that of the last
/// invocation (0 if nothing was run). A program that can't be started counts
/// as exiting with 127 if it wasn't found and 126 otherwise, and the
/// remaining invocations still run.
pub fn run(invocations: &[Invocation], dry_run: bool) -> i32 {
    let mut code = 0;
    for inv in invocations {
        println!("{inv}");
        if dry_run {
            continue;
        }
        code = match inv.command().status() {
            // Killed by a signal; there's no exit code.
            Ok(status) => status.code().unwrap_or(1),
            Err(e) => {
                warn!("Couldn't start '{}': {e}", inv.program);
                match e.kind() {
                    ErrorKind::NotFound => 127,
                    _ => 126,
                }
            }
        };
        if code != 0 {
            info!("'{}' exited with code {code}", inv.program);
        }
    }
    code
}
