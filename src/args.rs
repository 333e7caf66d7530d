//! These structs provide the CLI interface for the budget CLI.

use crate::model::Period;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// budget: Turns emailed bank and card statements into a monthly budget spreadsheet.
///
/// A run fetches the statements for a month, extracts their line items, classifies every
/// transaction and, after you confirm, writes them to a Google Sheets workbook. Each stage saves
/// its results before the next one starts, so a run that fails or is interrupted picks up where
/// it left off the next time you run it.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and initialize the configuration file.
    ///
    /// This is the first command you should run. You need two things ready beforehand:
    ///
    /// - OAuth client credentials for the Gmail, Sheets and Drive APIs, downloaded as JSON. Pass
    ///   the file as --client-secret.
    ///
    /// - Either the URL of the workbook to write to (--sheet-url), or the ID of a Drive folder in
    ///   which a workbook per month is created (--drive-folder).
    Init(InitArgs),
    /// Check the stored OAuth token and refresh it.
    Auth,
    /// Fetch, extract, categorize and upload, resuming from the last completed stage.
    Run(RunArgs),
    /// Show where the next run will start without running anything.
    Status,
    /// Delete the saved stage results so that the next run starts from scratch.
    Reset,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where budget data and configuration is held. Defaults to ~/budget
    #[arg(long, env = "BUDGET_HOME", default_value_t = default_budget_home())]
    budget_home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, budget_home: PathBuf) -> Self {
        Self {
            log_level,
            budget_home: budget_home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn budget_home(&self) -> &DisplayPath {
        &self.budget_home
    }
}

/// (Not shown): Args for the `budget init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The path to your downloaded OAuth client credentials. This file will be copied to the
    /// secrets directory in the main data directory.
    #[arg(long)]
    client_secret: Option<PathBuf>,

    #[command(flatten)]
    destination: DestinationArgs,
}

/// Exactly one of these says where the budget is written.
#[derive(Debug, ClapArgs, Clone)]
#[group(required = true, multiple = false)]
pub struct DestinationArgs {
    /// The URL of an existing workbook. It looks like this:
    /// https://docs.google.com/spreadsheets/d/1a7Km9FxQwRbPt82JvN4LzYpH5OcGnWsT6iDuE3VhMjX
    #[arg(long)]
    sheet_url: Option<String>,

    /// The ID of a Google Drive folder. A workbook named like Accounts-2025-March is created in
    /// it for each month.
    #[arg(long)]
    drive_folder: Option<String>,
}

impl InitArgs {
    pub fn new(
        client_secret: Option<PathBuf>,
        sheet_url: Option<String>,
        drive_folder: Option<String>,
    ) -> Self {
        Self {
            client_secret,
            destination: DestinationArgs {
                sheet_url,
                drive_folder,
            },
        }
    }

    pub fn client_secret(&self) -> Option<&Path> {
        self.client_secret.as_deref()
    }

    pub fn sheet_url(&self) -> Option<&str> {
        self.destination.sheet_url.as_deref()
    }

    pub fn drive_folder(&self) -> Option<&str> {
        self.destination.drive_folder.as_deref()
    }
}

/// (Not shown): Args for the `budget run` command.
#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// Answer yes to the upload confirmation.
    #[arg(long)]
    yes: bool,

    /// Show the line items of each statement as it is extracted and ask whether to keep it.
    #[arg(long)]
    preview: bool,

    /// The month to budget, as YYYY-MM. Defaults to the previous month. Ignored when resuming a
    /// run that already started.
    #[arg(long)]
    period: Option<Period>,
}

impl RunArgs {
    pub fn new(yes: bool, preview: bool, period: Option<Period>) -> Self {
        Self {
            yes,
            preview,
            period,
        }
    }

    pub fn yes(&self) -> bool {
        self.yes
    }

    pub fn preview(&self) -> bool {
        self.preview
    }

    pub fn period(&self) -> Option<Period> {
        self.period
    }
}

fn default_budget_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("budget"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --budget-home or BUDGET_HOME instead of relying on the default \
                budget home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("budget")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}
