// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with dispatching first-cal jobs.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Invalid polarisation '{0}'; it must be either xx or yy")]
    InvalidPol(String),

    #[error("Environment variable {var} has value '{value}', which isn't a positive integer")]
    BadTaskVariable { var: &'static str, value: String },

    #[error("Task index {task_index} is not smaller than the number of tasks ({num_tasks})")]
    TaskOutOfRange { task_index: usize, num_tasks: usize },

    #[error("The number of tasks must be at least 1")]
    ZeroTasks,

    #[error("Config file '{0}' doesn't have a recognised extension! Supported formats: {}", *super::CONFIG_FILE_EXTENSIONS)]
    ConfigFileType(PathBuf),

    #[error("Couldn't decode config file '{file}': {err}")]
    ConfigFile { file: PathBuf, err: String },

    #[error("Couldn't run '{cmd}' to get git information: {err}")]
    Git { cmd: String, err: String },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
