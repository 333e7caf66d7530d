//! The resumable statement pipeline.
//!
//! A run moves through `ResumePoint`s. Where it starts is decided once, from the checkpoints on
//! disk: a categorized checkpoint means only the upload is left, an extracted checkpoint means
//! categorization and upload are left, and no checkpoint means a fresh fetch. Each stage's output
//! is saved before the next stage starts, so a failure anywhere leaves the last finished stage as
//! the place the next run resumes from.

mod categorize;
mod extract;
mod upload;

use crate::api::Collaborators;
use crate::backup::Backup;
use crate::checkpoint::{Checkpoint, CheckpointStore, RunInfo};
use crate::config::MailSettings;
use crate::model::{Catalogue, Period, Record};
use crate::{Config, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use extract::AccountResolver;

/// First delay between classification attempts.
const CLASSIFY_BACKOFF: Duration = Duration::from_millis(500);

/// Where a run is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumePoint {
    /// Nothing is checkpointed: fetch and extract statements, then continue.
    NeedFetch,
    /// Extracted records are checkpointed: classify them, then continue.
    NeedCategorize,
    /// Categorized records are checkpointed: confirm and write them.
    NeedUpload,
    /// The upload succeeded and the checkpoints were cleared.
    Done,
}

serde_plain::derive_display_from_serialize!(ResumePoint);

/// How the user asked for this run to behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// The period for a fresh run. A resumed run keeps the period it started with.
    pub period: Period,
    /// Show each statement's line items and ask whether to keep it.
    pub preview: bool,
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every group was written and the checkpoints are gone.
    Uploaded { records: usize, destination: String },
    /// The user said no at the confirmation. The checkpoints are untouched.
    Declined { records: usize },
    /// Extraction found no transactions. Nothing was saved.
    NothingToDo,
}

/// Everything a run needs, passed explicitly to each stage.
pub struct Context {
    store: CheckpointStore,
    backup: Backup,
    catalogue: Catalogue,
    accounts: AccountResolver,
    mail: MailSettings,
    split_keywords: Vec<String>,
    batch_size: usize,
    classify_attempts: u32,
    classify_backoff: Duration,
    extract_concurrency: usize,
    period_filter: bool,
    options: RunOptions,
    collaborators: Collaborators,
}

impl Context {
    pub fn new(config: &Config, collaborators: Collaborators, options: RunOptions) -> Result<Self> {
        Ok(Self {
            store: config.checkpoint_store(),
            backup: config.backup(),
            catalogue: config.catalogue(),
            accounts: AccountResolver::new(config.account_rules(), config.accounts())?,
            mail: config.mail().clone(),
            split_keywords: config
                .split_keywords()
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            batch_size: config.batch_size(),
            classify_attempts: config.classify_attempts(),
            classify_backoff: CLASSIFY_BACKOFF,
            extract_concurrency: config.extract_concurrency(),
            period_filter: config.period_filter(),
            options,
            collaborators,
        })
    }

    #[cfg(test)]
    pub(crate) fn set_classify_backoff(&mut self, backoff: Duration) {
        self.classify_backoff = backoff;
    }
}

/// Decides where a run starts from the checkpoints present in `store`.
pub async fn resume_point(store: &CheckpointStore) -> Result<ResumePoint> {
    if store.has(Checkpoint::Categorized).await? {
        Ok(ResumePoint::NeedUpload)
    } else if store.has(Checkpoint::Extracted).await? {
        Ok(ResumePoint::NeedCategorize)
    } else {
        Ok(ResumePoint::NeedFetch)
    }
}

/// Runs the pipeline from wherever the checkpoints say it left off.
pub async fn run(ctx: &mut Context) -> Result<Outcome> {
    let mut state = resume_point(&ctx.store).await?;
    info!("Starting at {state}");

    // Records carried from the stage that just finished, so a fresh run does not re-read what it
    // just saved.
    let mut carried: Option<(RunInfo, Vec<Record>)> = None;
    let mut outcome = Outcome::NothingToDo;

    loop {
        state = match state {
            ResumePoint::NeedFetch => {
                let run = RunInfo::new(ctx.options.period);
                info!("Fetching statements for {} (run {})", run.period, run.run_id);
                let records = extract::run(ctx, &run).await?;
                if records.is_empty() {
                    info!("No transactions found, nothing to do");
                    return Ok(Outcome::NothingToDo);
                }
                ctx.store
                    .save(Checkpoint::Extracted, run, &records)
                    .await?;
                info!("Extracted {} transaction(s)", records.len());
                carried = Some((run, records));
                ResumePoint::NeedCategorize
            }
            ResumePoint::NeedCategorize => {
                let (run, extracted) = match carried.take() {
                    Some(c) => c,
                    None => load(ctx, Checkpoint::Extracted).await?,
                };
                let records = categorize::run(ctx, &extracted).await?;
                ctx.store
                    .save(Checkpoint::Categorized, run, &records)
                    .await?;
                info!("Categorized {} transaction(s)", records.len());
                carried = Some((run, records));
                ResumePoint::NeedUpload
            }
            ResumePoint::NeedUpload => {
                let (run, records) = match carried.take() {
                    Some(c) => c,
                    None => load(ctx, Checkpoint::Categorized).await?,
                };
                match upload::run(ctx, run, &records).await? {
                    upload::Upload::Declined => {
                        return Ok(Outcome::Declined {
                            records: records.len(),
                        })
                    }
                    upload::Upload::Written { destination } => {
                        outcome = Outcome::Uploaded {
                            records: records.len(),
                            destination,
                        };
                        ResumePoint::Done
                    }
                }
            }
            ResumePoint::Done => break,
        };
    }
    Ok(outcome)
}

async fn load(ctx: &Context, stage: Checkpoint) -> Result<(RunInfo, Vec<Record>)> {
    let snapshot = ctx.store.load(stage).await?;
    let run = snapshot.run();
    info!(
        "Resuming run {} for {} from the {stage} checkpoint saved {}",
        run.run_id,
        run.period,
        snapshot.saved_at().to_rfc3339()
    );
    if run.period != ctx.options.period {
        warn!(
            "Requested period {} ignored, the checkpointed run is for {}",
            ctx.options.period, run.period
        );
    }
    Ok((run, snapshot.into_records()))
}
