use crate::commands::Out;
use crate::config::Destination;
use crate::{Config, Result};
use anyhow::{bail, Context};
use std::path::Path;

/// Creates the data directory, its subdirectories and:
/// - Creates an initial `config.json` file for the chosen destination along with default settings
/// - Copies `secret_file`, when given, into its default location in the data dir.
///
/// # Arguments
/// - `budget_home` - The directory that will be the root of data directory, e.g. `$HOME/budget`
/// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON.
/// - `sheet_url` - A fixed workbook to write every month to.
/// - `drive_folder` - A Drive folder in which one workbook per month is created.
///
/// Exactly one of `sheet_url` and `drive_folder` must be given.
pub async fn init(
    budget_home: &Path,
    secret_file: Option<&Path>,
    sheet_url: Option<&str>,
    drive_folder: Option<&str>,
) -> Result<Out<()>> {
    let destination = match (sheet_url, drive_folder) {
        (Some(url), None) => Destination::Sheet {
            sheet_url: url.to_string(),
        },
        (None, Some(id)) => Destination::Folder {
            folder_id: id.to_string(),
        },
        _ => bail!("Provide exactly one of --sheet-url and --drive-folder"),
    };
    let config = Config::create(budget_home, secret_file, destination)
        .await
        .context("Unable to create the data directory and configs")?;
    Ok(format!(
        "Successfully created the budget directory and config at {}",
        config.root().display()
    )
    .into())
}
