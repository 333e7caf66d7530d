//! Implements the `SheetWriter` trait with CSV files so that the whole app can run, top-to-bottom,
//! without Google Sheets. Each workbook is a directory and each tab is a CSV file in it.

use crate::api::sheet::{header_for, sheet_row, FIXED_TABS};
use crate::api::SheetWriter;
use crate::error::PipelineError;
use crate::model::Record;
use crate::{utils, Result};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub(crate) struct LocalSheetWriter {
    root: PathBuf,
}

impl LocalSheetWriter {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tab_path(&self, target: &str, tab: &str) -> PathBuf {
        self.root.join(target).join(format!("{tab}.csv"))
    }

    async fn set_up(&self, target: &str, groups: &[String]) -> Result<()> {
        utils::make_dir(self.root.join(target)).await?;
        let tabs = FIXED_TABS
            .iter()
            .map(|t| t.to_string())
            .chain(groups.iter().cloned());
        for tab in tabs {
            let path = self.tab_path(target, &tab);
            if utils::is_file(&path).await? {
                continue;
            }
            let rows: Vec<Vec<String>> = header_for(&tab)
                .map(|h| vec![h.iter().map(|s| s.to_string()).collect()])
                .unwrap_or_default();
            utils::write(&path, to_csv(&rows)?).await?;
            debug!("Created {}", path.display());
        }
        Ok(())
    }

    async fn append(&self, target: &str, group: &str, records: &[Record]) -> Result<()> {
        let path = self.tab_path(target, group);
        let existing = count_rows(&path).await?;
        let first_row = existing.max(1) + 1;
        let rows: Vec<Vec<String>> = records
            .iter()
            .enumerate()
            .map(|(i, r)| sheet_row(r, first_row + i, group))
            .collect();

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Unable to open {}", path.display()))?;
        file.write_all(&to_csv(&rows)?)
            .await
            .with_context(|| format!("Unable to append to {}", path.display()))?;
        file.flush().await?;
        info!(
            "Appended {} row(s) to {}",
            rows.len(),
            path.display()
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl SheetWriter for LocalSheetWriter {
    async fn ensure_structure(&mut self, target: &str, groups: &[String]) -> Result<()> {
        self.set_up(target, groups).await.map_err(|e| {
            PipelineError::SheetWriteFailed {
                group: target.to_string(),
                reason: format!("{e:#}"),
            }
            .into()
        })
    }

    async fn append_rows(&mut self, target: &str, group: &str, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.append(target, group, records).await.map_err(|e| {
            PipelineError::SheetWriteFailed {
                group: group.to_string(),
                reason: format!("{e:#}"),
            }
            .into()
        })
    }

    fn describe(&self, target: &str) -> String {
        format!("local workbook {}", self.root.join(target).display())
    }
}

fn to_csv(rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Unable to finish the CSV data: {e}"))
}

/// Loads the rows of a CSV tab.
pub(crate) async fn load_csv(path: &Path) -> Result<Vec<Vec<String>>> {
    let data = utils::read_bytes(path).await?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data.as_slice());
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(|field| field.to_string()).collect());
    }
    Ok(rows)
}

async fn count_rows(path: &Path) -> Result<usize> {
    if !utils::is_file(path).await? {
        anyhow::bail!("The tab {} does not exist", path.display());
    }
    Ok(load_csv(path).await?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, Category, Direction, RawLineItem, SplitFlag};
    use std::str::FromStr;
    use tempfile::TempDir;

    fn record(description: &str) -> Record {
        Record::from_raw(
            "a.json",
            "Cash",
            RawLineItem {
                date_text: "2025-03-01".to_string(),
                description: description.to_string(),
                amount: Amount::from_str("10").unwrap(),
                direction: Direction::Debit,
            },
        )
        .categorized(Category::uncategorized(), true, SplitFlag::No)
    }

    #[tokio::test]
    async fn test_structure_then_append_twice() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalSheetWriter::new(dir.path());
        let target = "Accounts-2025-March";
        writer
            .ensure_structure(target, &["HDFC Savings".to_string()])
            .await
            .unwrap();
        for tab in FIXED_TABS {
            assert!(utils::is_file(writer.tab_path(target, tab)).await.unwrap());
        }

        writer
            .append_rows(target, "HDFC Savings", &[record("one"), record("two, with comma")])
            .await
            .unwrap();
        writer
            .append_rows(target, "HDFC Savings", &[record("three")])
            .await
            .unwrap();

        let rows = load_csv(&writer.tab_path(target, "HDFC Savings"))
            .await
            .unwrap();
        assert_eq!(4, rows.len());
        assert_eq!("Txn Date", rows[0][0]);
        assert_eq!("two, with comma", rows[2][4]);
        assert_eq!("three", rows[3][4]);
        assert!(rows[3][7].contains("G4"));

        // A second setup leaves existing data alone.
        writer
            .ensure_structure(target, &["HDFC Savings".to_string()])
            .await
            .unwrap();
        let rows = load_csv(&writer.tab_path(target, "HDFC Savings"))
            .await
            .unwrap();
        assert_eq!(4, rows.len());
    }

    #[tokio::test]
    async fn test_append_without_structure_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalSheetWriter::new(dir.path());
        let err = writer
            .append_rows("Accounts-2025-March", "Cash", &[record("x")])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SheetWriteFailed { .. })
        ));
    }
}
