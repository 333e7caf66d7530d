use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::commands::Out;
use crate::model::Period;
use crate::pipeline::{resume_point, ResumePoint};
use crate::{Config, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// What the checkpoint directory says about the next run.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub resume_point: ResumePoint,
    pub checkpoints: Vec<CheckpointStatus>,
    /// Groups already written by an interrupted upload.
    pub completed_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointStatus {
    pub stage: Checkpoint,
    pub run_id: Uuid,
    pub period: Period,
    pub saved_at: DateTime<Utc>,
    pub records: usize,
}

/// Handles the `budget status` command. Reads the checkpoints without changing anything. A corrupt
/// checkpoint is reported as an error, the same way a run would report it.
pub async fn status(config: &Config) -> Result<Out<Status>> {
    let store = config.checkpoint_store();
    let status = read_status(&store).await?;

    let message = match (status.resume_point, status.checkpoints.last()) {
        (ResumePoint::NeedUpload, Some(c)) => format!(
            "The next run uploads {} categorized transaction(s) for {}",
            c.records, c.period
        ),
        (ResumePoint::NeedCategorize, Some(c)) => format!(
            "The next run categorizes {} extracted transaction(s) for {}",
            c.records, c.period
        ),
        _ => "Nothing is saved, the next run starts with a fresh fetch".to_string(),
    };
    Ok(Out::new(message, status))
}

async fn read_status(store: &CheckpointStore) -> Result<Status> {
    let point = resume_point(store).await?;
    let mut checkpoints = Vec::new();
    for stage in Checkpoint::ALL {
        if !store.has(stage).await? {
            continue;
        }
        let snapshot = store.load(stage).await?;
        checkpoints.push(CheckpointStatus {
            stage,
            run_id: snapshot.run().run_id,
            period: snapshot.run().period,
            saved_at: snapshot.saved_at(),
            records: snapshot.records().len(),
        });
    }

    let completed_groups = match checkpoints.iter().find(|c| c.stage == Checkpoint::Categorized) {
        Some(c) => store
            .load_progress(c.run_id)
            .await?
            .completed()
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    Ok(Status {
        resume_point: point,
        checkpoints,
        completed_groups,
    })
}
