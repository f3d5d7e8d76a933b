// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Run the first-cal program over many files.


use std::path::PathBuf;

use clap::Parser;
use itertools::Itertools;
use log::debug;

use super::common::{display_warnings, InfoPrinter, Warn};
use crate::{
    submit::{
        self, default_observer, parse_firstcal_pol, plan, GitInfo, SubmitConfig, SubmitParams,
        TaskDistribution, CONFIG_FILE_EXTENSIONS,
    },
    FirstcalError,
};

/// The environment variable naming the calibration repository.
const CAL_REPO_ENV: &str = "HERA_CAL_REPO";

lazy_static::lazy_static! {
    static ref CONFIG_HELP: String =
        format!("A file specifying the excluded antennas per polarisation, the calfile and the executable. Supported formats: {}", *CONFIG_FILE_EXTENSIONS);

    static ref CAL_REPO_HELP: String =
        format!("The git repository holding the calibration files; its origin and commit are handed to each job. Default: ${CAL_REPO_ENV}, else the current directory");
}

#[derive(Parser, Debug, Clone, Default)]
pub(super) struct SubmitArgs {
    /// The polarisation to calibrate; xx or yy (case insensitive).
    #[clap(short = 'p', long = "pol")]
    pol: String,

    /// The visibility files to run first-cal on. If running as part of a task
    /// array (SGE_TASK_ID is set), only this task's share is run.
    #[clap(name = "FILES", parse(from_os_str))]
    files: Vec<PathBuf>,

    #[clap(short, long, help = CONFIG_HELP.as_str(), parse(from_os_str))]
    config: Option<PathBuf>,

    /// Antennas to exclude, overriding the defaults or config file for the
    /// chosen polarisation, e.g. --ex-ants 22,43,81
    #[clap(long = "ex-ants", value_delimiter = ',', help_heading = "OVERRIDES")]
    ex_ants: Option<Vec<usize>>,

    /// The calfile handed to each job.
    #[clap(long, help_heading = "OVERRIDES")]
    calfile: Option<String>,

    /// The program run for each file.
    #[clap(long, help_heading = "OVERRIDES")]
    executable: Option<String>,

    /// The observer recorded by each job. Default: $USER
    #[clap(long, help_heading = "OVERRIDES")]
    observer: Option<String>,

    #[clap(long, help = CAL_REPO_HELP.as_str(), parse(from_os_str), help_heading = "OVERRIDES")]
    cal_repo: Option<PathBuf>,

    /// The zero-based index of this task when splitting the files between
    /// tasks. Overrides the SGE_TASK_* environment variables.
    #[clap(long, requires = "num_tasks", help_heading = "TASKS")]
    task_id: Option<usize>,

    /// The total number of tasks the files are split between.
    #[clap(long, requires = "task_id", help_heading = "TASKS")]
    num_tasks: Option<usize>,
}

impl SubmitArgs {
    /// Turn the arguments into everything needed to plan the invocations.
    fn parse(
        self,
    ) -> Result<(SubmitParams, Vec<PathBuf>, Option<TaskDistribution>), FirstcalError> {
        debug!("{:#?}", self);

        let SubmitArgs {
            pol,
            files,
            config,
            ex_ants,
            calfile,
            executable,
            observer,
            cal_repo,
            task_id,
            num_tasks,
        } = self;

        let pol = parse_firstcal_pol(&pol)?;
        let mut config = match config {
            Some(file) => SubmitConfig::from_file(&file)?,
            None => SubmitConfig::default(),
        };
        if let Some(ex_ants) = ex_ants {
            *config.ex_ants.for_pol_mut(pol)? = ex_ants;
        }
        if let Some(calfile) = calfile {
            config.calfile = calfile;
        }
        if let Some(executable) = executable {
            config.executable = executable;
        }

        let cal_repo = cal_repo
            .or_else(|| std::env::var_os(CAL_REPO_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        let git = match GitInfo::query(&cal_repo) {
            Ok(git) => git,
            Err(e) => {
                format!(
                    "Couldn't get git information from '{}'; using 'unknown': {e}",
                    cal_repo.display()
                )
                .warn();
                GitInfo::unknown()
            }
        };

        let task = match (task_id, num_tasks) {
            (Some(task_index), Some(num_tasks)) => {
                Some(TaskDistribution::new(task_index, num_tasks)?)
            }
            _ => TaskDistribution::from_env()?,
        };
        if files.is_empty() {
            "No files were supplied; nothing will be run".warn();
        }

        let params = SubmitParams {
            pol,
            config,
            git,
            observer: observer.unwrap_or_else(default_observer),
        };
        Ok((params, files, task))
    }

    /// Run the invocations, returning the exit code of the last one.
    pub(super) fn run(self, dry_run: bool) -> Result<i32, FirstcalError> {
        let (params, files, task) = self.parse()?;

        let mut printer = InfoPrinter::new("Submitting first-cal".into());
        printer.push_block(vec![
            format!("Polarisation: {}", params.pol).into(),
            format!(
                "Excluded antennas: [{}]",
                params.config.ex_ants.for_pol(params.pol)?.iter().join(", ")
            )
            .into(),
        ]);
        printer.push_block(vec![
            format!("Executable: {}", params.config.executable).into(),
            format!("Calfile: {}", params.config.calfile).into(),
            format!("Observer: {}", params.observer).into(),
        ]);
        printer.push_block(vec![
            format!("Cal. repo origin: {}", params.git.origin).into(),
            format!("Cal. repo hash: {}", params.git.hash).into(),
        ]);
        let mut files_block = vec![format!("{} files", files.len()).into()];
        if let Some(t) = task {
            files_block.push(format!("Task {} of {}", t.task_index + 1, t.num_tasks).into());
        }
        printer.push_block(files_block);
        printer.display();
        display_warnings();

        let invocations = plan(&params, &files, task)?;
        Ok(submit::run(&invocations, dry_run))
    }
}
