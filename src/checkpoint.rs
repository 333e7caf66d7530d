//! The stage checkpoint store.
//!
//! After a stage completes, every record known at that point is written to one JSON file in
//! `$BUDGET_HOME/.checkpoints`. The presence of these files is what tells the next run where to
//! resume. Files are written to a temp path and renamed into place so that a crash never leaves a
//! truncated checkpoint behind.

use crate::error::PipelineError;
use crate::model::{Period, Record};
use crate::{utils, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bumped whenever the checkpoint layout changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

const UPLOAD_PROGRESS: &str = "upload_progress.json";

/// The two stage boundaries that are checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// Written once fetch and extraction have both completed.
    Extracted,
    /// Written once categorization has completed.
    Categorized,
}

serde_plain::derive_display_from_serialize!(Checkpoint);
serde_plain::derive_fromstr_from_deserialize!(Checkpoint);

impl Checkpoint {
    pub const ALL: [Checkpoint; 2] = [Checkpoint::Extracted, Checkpoint::Categorized];

    fn file_name(self) -> &'static str {
        match self {
            Checkpoint::Extracted => "extracted.json",
            Checkpoint::Categorized => "categorized.json",
        }
    }
}

/// Identifies one pass of the pipeline from fetch to upload. Minted on a fresh fetch and carried
/// forward, unchanged, by every later checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub period: Period,
}

impl RunInfo {
    pub fn new(period: Period) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            period,
        }
    }
}

/// The on-disk form of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    schema_version: u32,
    stage: Checkpoint,
    run: RunInfo,
    saved_at: DateTime<Utc>,
    records: Vec<Record>,
}

impl Snapshot {
    pub fn run(&self) -> RunInfo {
        self.run
    }

    pub fn saved_at(&self) -> DateTime<Utc> {
        self.saved_at
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Which account groups of a run have already been written to the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    run_id: Uuid,
    completed_groups: BTreeSet<String>,
}

impl UploadProgress {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            completed_groups: BTreeSet::new(),
        }
    }

    pub fn is_done(&self, group: &str) -> bool {
        self.completed_groups.contains(group)
    }

    pub fn mark_done(&mut self, group: impl Into<String>) {
        self.completed_groups.insert(group.into());
    }

    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.completed_groups.iter().map(String::as_str)
    }
}

/// Reads and writes checkpoints in a single directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, stage: Checkpoint) -> PathBuf {
        self.dir.join(stage.file_name())
    }

    fn progress_path(&self) -> PathBuf {
        self.dir.join(UPLOAD_PROGRESS)
    }

    /// True when a non-empty checkpoint file exists for `stage`. A zero-length file is what an
    /// interrupted write on some filesystems leaves behind, so it counts as absent.
    pub async fn has(&self, stage: Checkpoint) -> Result<bool> {
        Ok(matches!(utils::file_len(self.path(stage)).await?, Some(len) if len > 0))
    }

    /// Loads the checkpoint for `stage`, checking its schema version, its stage tag and that every
    /// record carries the fields that stage guarantees.
    pub async fn load(&self, stage: Checkpoint) -> Result<Snapshot> {
        let path = self.path(stage);
        let content = utils::read(&path).await?;
        let snapshot = parse_snapshot(stage, &content)?;
        debug!(
            "Loaded {} {stage} record(s) from {}",
            snapshot.records.len(),
            path.display()
        );
        Ok(snapshot)
    }

    /// Atomically writes the checkpoint for `stage`.
    pub async fn save(&self, stage: Checkpoint, run: RunInfo, records: &[Record]) -> Result<()> {
        utils::make_dir(&self.dir).await?;
        let snapshot = Snapshot {
            schema_version: SCHEMA_VERSION,
            stage,
            run,
            saved_at: Utc::now(),
            records: records.to_vec(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .with_context(|| format!("Unable to serialize the {stage} checkpoint"))?;
        let path = self.path(stage);
        utils::write_atomic(&path, json).await?;
        info!(
            "Saved {} record(s) to the {stage} checkpoint at {}",
            records.len(),
            path.display()
        );
        Ok(())
    }

    /// Removes both checkpoints and the upload progress ledger. Failures are logged and otherwise
    /// ignored: a leftover checkpoint only means the next run skips work that was already done.
    pub async fn clear(&self) {
        let paths = Checkpoint::ALL
            .iter()
            .map(|s| self.path(*s))
            .chain(std::iter::once(self.progress_path()));
        for path in paths {
            match utils::file_len(&path).await {
                Ok(None) => continue,
                Ok(Some(_)) => {}
                Err(e) => {
                    warn!("Unable to inspect {}: {e:#}", path.display());
                    continue;
                }
            }
            match utils::remove(&path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) => warn!("Unable to remove checkpoint {}: {e:#}", path.display()),
            }
        }
    }

    /// Loads the upload progress for `run_id`. A ledger left behind by a different run is
    /// discarded.
    pub async fn load_progress(&self, run_id: Uuid) -> Result<UploadProgress> {
        let path = self.progress_path();
        if !matches!(utils::file_len(&path).await?, Some(len) if len > 0) {
            return Ok(UploadProgress::new(run_id));
        }
        let content = utils::read(&path).await?;
        let progress: UploadProgress =
            serde_json::from_str(&content).map_err(|e| PipelineError::CorruptCheckpoint {
                stage: "upload progress".to_string(),
                reason: e.to_string(),
            })?;
        if progress.run_id != run_id {
            warn!(
                "Ignoring upload progress from run {}, the current run is {run_id}",
                progress.run_id
            );
            return Ok(UploadProgress::new(run_id));
        }
        Ok(progress)
    }

    pub async fn save_progress(&self, progress: &UploadProgress) -> Result<()> {
        utils::make_dir(&self.dir).await?;
        let json = serde_json::to_string_pretty(progress)
            .context("Unable to serialize the upload progress")?;
        utils::write_atomic(self.progress_path(), json).await
    }
}

fn parse_snapshot(stage: Checkpoint, content: &str) -> Result<Snapshot> {
    let corrupt = |reason: String| PipelineError::CorruptCheckpoint {
        stage: stage.to_string(),
        reason,
    };

    // Look at the version before the full parse so that a layout change is reported as such
    // instead of as corruption.
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| corrupt(e.to_string()))?;
    let found = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| corrupt("schema_version is missing".to_string()))?;
    if found != u64::from(SCHEMA_VERSION) {
        return Err(PipelineError::CheckpointVersion {
            stage: stage.to_string(),
            found: u32::try_from(found).unwrap_or(u32::MAX),
            expected: SCHEMA_VERSION,
        }
        .into());
    }

    let snapshot: Snapshot = serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
    if snapshot.stage != stage {
        return Err(corrupt(format!("the file is tagged as {}", snapshot.stage)).into());
    }
    if stage == Checkpoint::Categorized {
        for (ix, record) in snapshot.records.iter().enumerate() {
            record
                .check_categorized()
                .map_err(|reason| corrupt(format!("record {ix}: {reason}")))?;
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, Category, Direction, RawLineItem, SplitFlag};
    use std::str::FromStr;
    use tempfile::TempDir;

    fn record(description: &str) -> Record {
        Record::from_raw(
            "statement.pdf",
            "HDFC Savings",
            RawLineItem {
                date_text: "2025-02-03".into(),
                description: description.into(),
                amount: Amount::from_str("12.50").unwrap(),
                direction: Direction::Debit,
            },
        )
    }

    fn run() -> RunInfo {
        RunInfo::new(Period::new(2025, 2).unwrap())
    }

    fn kind(err: &anyhow::Error) -> &PipelineError {
        err.downcast_ref::<PipelineError>().unwrap()
    }

    #[tokio::test]
    async fn test_has_is_false_for_missing_and_empty_files() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(!store.has(Checkpoint::Extracted).await.unwrap());
        utils::write(store.path(Checkpoint::Extracted), "").await.unwrap();
        assert!(!store.has(Checkpoint::Extracted).await.unwrap());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_order_and_run() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested"));
        let run = run();
        let records = vec![record("first"), record("second"), record("third")];
        store
            .save(Checkpoint::Extracted, run, &records)
            .await
            .unwrap();
        assert!(store.has(Checkpoint::Extracted).await.unwrap());
        assert!(!store.has(Checkpoint::Categorized).await.unwrap());

        let snapshot = store.load(Checkpoint::Extracted).await.unwrap();
        assert_eq!(run, snapshot.run());
        assert_eq!(records, snapshot.records());
        assert!(!store.dir().join("extracted.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        utils::write(store.path(Checkpoint::Extracted), "{\"schema_version\": 1, \"stage\"")
            .await
            .unwrap();
        let err = store.load(Checkpoint::Extracted).await.unwrap_err();
        assert!(matches!(kind(&err), PipelineError::CorruptCheckpoint { .. }));
    }

    #[tokio::test]
    async fn test_load_reports_wrong_version() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        utils::write(
            store.path(Checkpoint::Extracted),
            r#"{"schema_version": 7, "whatever": true}"#,
        )
        .await
        .unwrap();
        let err = store.load(Checkpoint::Extracted).await.unwrap_err();
        assert!(matches!(
            kind(&err),
            PipelineError::CheckpointVersion {
                found: 7,
                expected: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_uncategorized_records_in_categorized_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        // Write extracted-only records under the categorized name.
        store
            .save(Checkpoint::Categorized, run(), &[record("a")])
            .await
            .unwrap();
        let err = store.load(Checkpoint::Categorized).await.unwrap_err();
        assert!(matches!(kind(&err), PipelineError::CorruptCheckpoint { .. }));
        assert!(err.to_string().contains("record 0"));
    }

    #[tokio::test]
    async fn test_load_rejects_wrong_stage_tag() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .save(Checkpoint::Extracted, run(), &[record("a")])
            .await
            .unwrap();
        utils::copy(
            store.path(Checkpoint::Extracted),
            store.path(Checkpoint::Categorized),
        )
        .await
        .unwrap();
        let err = store.load(Checkpoint::Categorized).await.unwrap_err();
        assert!(err.to_string().contains("tagged as extracted"));
    }

    #[tokio::test]
    async fn test_clear_removes_everything_and_tolerates_missing_files() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run = run();
        let categorized =
            vec![record("a").categorized(Category::uncategorized(), true, SplitFlag::No)];
        store
            .save(Checkpoint::Extracted, run, &[record("a")])
            .await
            .unwrap();
        store
            .save(Checkpoint::Categorized, run, &categorized)
            .await
            .unwrap();
        let mut progress = UploadProgress::new(run.run_id);
        progress.mark_done("Cash");
        store.save_progress(&progress).await.unwrap();

        store.clear().await;
        assert!(!store.has(Checkpoint::Extracted).await.unwrap());
        assert!(!store.has(Checkpoint::Categorized).await.unwrap());
        assert!(!store.dir().join(UPLOAD_PROGRESS).exists());

        // Nothing left to delete is fine.
        store.clear().await;
    }

    #[tokio::test]
    async fn test_progress_from_another_run_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let mut old = UploadProgress::new(Uuid::new_v4());
        old.mark_done("Cash");
        store.save_progress(&old).await.unwrap();

        let current = Uuid::new_v4();
        let loaded = store.load_progress(current).await.unwrap();
        assert_eq!(current, loaded.run_id);
        assert!(!loaded.is_done("Cash"));

        let again = store.load_progress(old.run_id).await.unwrap();
        assert!(again.is_done("Cash"));
    }
}
