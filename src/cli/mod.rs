// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command-line interface code. More specific options for `firstcal`
//! subcommands are contained in modules.
//!
//! All booleans must have `#[serde(default)]` annotated, and anything that
//! isn't a boolean must be optional. This allows all arguments to be optional
//! *and* usable in an arguments file.
//!
//! Only 3 things should be public in this module: `Firstcal`, `Firstcal::run`,
//! and `FirstcalError`.

#[macro_use]
mod common;
mod abscal;
mod error;
mod firstcal;
mod solutions;
mod submit;

pub use error::FirstcalError;

use std::path::PathBuf;

use clap::{AppSettings, Args, Parser, Subcommand};
use log::info;

use crate::PROGRESS_BARS;

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    about = r#"First-order delay calibration and absolute calibration for redundant radio interferometers,
plus a dispatcher for running first-cal jobs over many files"#
)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(disable_help_subcommand = true)]
#[clap(infer_subcommands = true)]
#[clap(propagate_version = true)]
#[clap(infer_long_args = true)]
pub struct Firstcal {
    #[clap(flatten)]
    global_opts: GlobalArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Don't draw progress bars.
    #[clap(long)]
    #[clap(global = true)]
    no_progress_bars: bool,

    /// The verbosity of the program. Increase by specifying multiple times
    /// (e.g. -vv). The default is to print only high-level information.
    #[clap(short, long, parse(from_occurrences))]
    #[clap(global = true)]
    verbosity: u8,

    /// Only verify that arguments were correctly ingested and print out
    /// high-level information. For "submit", the commands are printed but not
    /// run.
    #[clap(long)]
    #[clap(global = true)]
    dry_run: bool,

    /// Save the input arguments into a new TOML file that can be used to
    /// reproduce this run.
    #[clap(long)]
    #[clap(global = true)]
    save_toml: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
#[clap(arg_required_else_help = true)]
enum Command {
    #[clap(alias = "submit-firstcal")]
    #[clap(
        about = r#"Run the first-cal program once per input file, with the antenna exclusions of a polarisation.
The exit code is that of the last command run."#
    )]
    Submit(submit::SubmitArgs),

    #[clap(alias = "delay-cal")]
    #[clap(about = "Solve for per-antenna delays using redundant baselines.")]
    Firstcal(firstcal::FirstcalArgs),

    #[clap(alias = "absolute-cal")]
    #[clap(about = "Calibrate visibilities against model visibilities (amplitude, tip-tilt phase and delay).")]
    Abscal(abscal::AbscalArgs),

    #[clap(alias = "convert-solutions")]
    #[clap(about = "Convert between calibration solution file formats.")]
    SolutionsConvert(solutions::SolutionsConvertArgs),

    #[clap(alias = "combine-solutions")]
    #[clap(about = "Multiply calibration solutions together.")]
    SolutionsCombine(solutions::SolutionsCombineArgs),
}

impl Firstcal {
    /// Run the requested subcommand. The returned integer is the exit code the
    /// process should finish with.
    pub fn run(self) -> Result<i32, FirstcalError> {
        // Set up logging.
        let GlobalArgs {
            verbosity,
            dry_run,
            no_progress_bars,
            save_toml,
        } = self.global_opts;
        setup_logging(verbosity)
            .map_err(|e| FirstcalError::Generic(format!("Failed to initialise logging: {e}")))?;
        // Enable progress bars if the user didn't say "no progress bars".
        if !no_progress_bars {
            PROGRESS_BARS.store(true);
        }

        // Print the version of firstcal and its build-time information.
        let sub_command = match &self.command {
            Command::Submit(_) => "submit",
            Command::Firstcal(_) => "firstcal",
            Command::Abscal(_) => "abscal",
            Command::SolutionsConvert(_) => "solutions-convert",
            Command::SolutionsCombine(_) => "solutions-combine",
        };
        info!("firstcal {} {}", sub_command, env!("CARGO_PKG_VERSION"));
        display_build_info();

        macro_rules! merge_save_run {
            ($args:expr) => {{
                let args = $args.merge()?;
                if let Some(toml) = save_toml {
                    use std::{
                        fs::File,
                        io::{BufWriter, Write},
                    };

                    let mut f = BufWriter::new(File::create(toml)?);
                    let toml_str = toml::to_string(&args).map_err(|e| {
                        FirstcalError::ArgFile(format!("Couldn't serialise arguments: {e}"))
                    })?;
                    f.write_all(toml_str.as_bytes())?;
                }
                args.run(dry_run)?;
            }};
        }

        let mut exit_code = 0;
        match self.command {
            Command::Submit(args) => {
                exit_code = args.run(dry_run)?;
            }

            Command::Firstcal(args) => {
                merge_save_run!(args)
            }

            Command::Abscal(args) => {
                merge_save_run!(args)
            }

            Command::SolutionsConvert(args) => {
                args.run()?;
            }

            Command::SolutionsCombine(args) => {
                args.run()?;
            }
        }

        info!("firstcal {} complete.", sub_command);
        Ok(exit_code)
    }
}

/// Activate a logger. All log messages are put onto `stdout`. `env_logger`
/// automatically only uses colours and fancy symbols if we're on a tty (e.g. a
/// terminal); piped output will be formatted sensibly. Source code lines are
/// displayed in log messages when verbosity >= 3.
fn setup_logging(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        2 => builder.filter_level(log::LevelFilter::Trace),
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
            builder.format(|buf, record| {
                use std::io::Write;

                let timestamp = buf.timestamp();
                let level = record.level();
                let target = record.target();
                let line = record.line().unwrap_or(0);
                let message = record.args();

                writeln!(buf, "[{timestamp} {level} {target}:{line}] {message}")
            })
        }
    };
    builder.try_init()
}

/// Write many info-level log lines of how this executable was compiled.
fn display_build_info() {
    let dirty = match GIT_DIRTY {
        Some(true) => " (dirty)",
        _ => "",
    };
    match GIT_COMMIT_HASH_SHORT {
        Some(hash) => {
            info!("Compiled on git commit hash: {hash}{dirty}");
        }
        None => info!("Compiled on git commit hash: <no git info>"),
    }
    if let Some(hr) = GIT_HEAD_REF {
        info!("            git head ref: {}", hr);
    }
    info!("            {}", BUILT_TIME_UTC);
    info!("         with compiler {}", RUSTC_VERSION);
    info!("");
}
