//! Rotated JSON snapshots of what is about to be written to the destination sheet.

use crate::{utils, Config, Result};
use anyhow::Context;
use chrono::Local;
use serde::Serialize;
use std::path::PathBuf;

/// Prefix for the snapshot taken before an upload starts writing.
pub const UPLOAD: &str = "upload";

/// Manages backup file creation and rotation.
///
/// Create a new instance via `Config::backup()` or `Backup::new()`.
#[derive(Debug, Clone)]
pub struct Backup {
    backups_dir: PathBuf,
    backup_copies: u32,
}

impl Backup {
    /// Creates a new `Backup` instance from a `Config`.
    pub fn new(config: &Config) -> Self {
        Self {
            backups_dir: config.backups().to_path_buf(),
            backup_copies: config.backup_copies(),
        }
    }

    /// Saves `data` as a pretty-printed JSON backup file.
    ///
    /// The filename format is `{prefix}.YYYY-MM-DD-NNN.json` where NNN is a sequence number.
    /// Automatically rotates old backups, keeping only `backup_copies` files.
    ///
    /// Returns the path to the created backup file.
    pub async fn save_json<T>(&self, prefix: &str, data: &T) -> Result<PathBuf>
    where
        T: Serialize + ?Sized,
    {
        let date = today();
        let seq = self.next_sequence_number(prefix, &date).await?;
        let filename = format!("{prefix}.{date}-{seq:03}.json");
        let path = self.backups_dir.join(&filename);

        let json = serde_json::to_string_pretty(data)
            .with_context(|| format!("Failed to serialize the {prefix} backup"))?;
        utils::write(&path, json).await?;

        self.rotate(prefix).await?;

        Ok(path)
    }

    /// The backups with `prefix`, oldest first. The filename format makes name order the same as
    /// date-then-sequence order.
    async fn existing(&self, prefix: &str) -> Result<Vec<(PathBuf, String)>> {
        let mut files = Vec::new();
        let mut dir = utils::read_dir(&self.backups_dir).await?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_backup_file(&name, prefix) {
                files.push((entry.path(), name));
            }
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }

    /// The sequence number that follows the highest one used today.
    async fn next_sequence_number(&self, prefix: &str, date: &str) -> Result<u32> {
        let max_seq = self
            .existing(prefix)
            .await?
            .iter()
            .filter_map(|(_, name)| parse_sequence_number(name, prefix, date))
            .max()
            .unwrap_or(0);
        Ok(max_seq + 1)
    }

    /// Deletes the oldest backups so that at most `backup_copies` remain.
    async fn rotate(&self, prefix: &str) -> Result<()> {
        let files = self.existing(prefix).await?;
        let to_delete = files.len().saturating_sub(self.backup_copies as usize);
        for (path, _) in files.into_iter().take(to_delete) {
            utils::remove(&path).await?;
        }
        Ok(())
    }
}

/// Returns today's date in YYYY-MM-DD format.
fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Parses the sequence number from a backup filename, `{prefix}.{date}-{NNN}.json`.
/// Returns None if the filename doesn't match the expected pattern.
fn parse_sequence_number(filename: &str, prefix: &str, date: &str) -> Option<u32> {
    filename
        .strip_prefix(&format!("{prefix}.{date}-"))?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// Checks if a filename is a backup file with the given prefix.
fn is_backup_file(filename: &str, prefix: &str) -> bool {
    filename.starts_with(&format!("{prefix}.")) && filename.ends_with(".json")
}
