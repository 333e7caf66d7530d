//! Categorize: classifies extracted records in batches and fills in the categorization fields.

use crate::api::Classify;
use crate::error::{pipeline_error, PipelineError};
use crate::model::{Catalogue, Classification, ClassifyInput, Record, SplitFlag};
use crate::pipeline::Context;
use crate::Result;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(8);

pub(super) async fn run(ctx: &Context, records: &[Record]) -> Result<Vec<Record>> {
    let batch_size = ctx.batch_size.max(1);
    let batches = records.len().div_ceil(batch_size);
    let mut categorized = Vec::with_capacity(records.len());

    for (number, chunk) in records.chunks(batch_size).enumerate() {
        let offset = number * batch_size;
        let inputs: Vec<ClassifyInput> = chunk
            .iter()
            .enumerate()
            .map(|(i, r)| r.classify_input(offset + i))
            .collect();
        info!(
            "Classifying batch {} of {batches} ({} record(s))",
            number + 1,
            inputs.len()
        );
        let results = classify_with_retry(
            ctx.collaborators.classify.as_ref(),
            &inputs,
            ctx.classify_attempts,
            ctx.classify_backoff,
        )
        .await?;
        for (record, result) in chunk.iter().zip(results) {
            categorized.push(apply(record, result, &ctx.catalogue, &ctx.split_keywords));
        }
    }
    Ok(categorized)
}

/// Calls the classifier until it returns one result per input, up to `attempts` times. The
/// results are matched to inputs by position.
async fn classify_with_retry(
    classifier: &dyn Classify,
    inputs: &[ClassifyInput],
    attempts: u32,
    backoff: Duration,
) -> Result<Vec<Classification>> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = classifier
            .classify(inputs)
            .await
            .and_then(|results| check_correspondence(inputs, results));
        let err = match result {
            Ok(results) => return Ok(results),
            Err(e) => e,
        };

        let retryable = pipeline_error(&err).map_or(true, PipelineError::is_retryable);
        if !retryable || attempt >= attempts {
            return Err(match pipeline_error(&err) {
                Some(PipelineError::ClassificationCountMismatch { .. })
                | Some(PipelineError::ClassificationOrderMismatch { .. })
                | Some(PipelineError::ClassifyUnavailable { .. }) => err,
                _ => PipelineError::ClassifyUnavailable {
                    attempts: attempt,
                    reason: format!("{err:#}"),
                }
                .into(),
            });
        }

        let delay = backoff_delay(backoff, attempt);
        warn!("Classification attempt {attempt} of {attempts} failed, retrying in {delay:?}: {err:#}");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Rejects results that cannot be matched to `inputs` by position: a different count, or an echoed
/// index that names another input.
fn check_correspondence(
    inputs: &[ClassifyInput],
    results: Vec<Classification>,
) -> Result<Vec<Classification>> {
    if results.len() != inputs.len() {
        return Err(PipelineError::ClassificationCountMismatch {
            expected: inputs.len(),
            actual: results.len(),
        }
        .into());
    }
    let misplaced = inputs
        .iter()
        .zip(&results)
        .enumerate()
        .find_map(|(position, (input, result))| match result.index {
            Some(actual) if actual != input.index => Some((position, input.index, actual)),
            _ => None,
        });
    if let Some((position, expected, actual)) = misplaced {
        return Err(PipelineError::ClassificationOrderMismatch {
            position,
            expected,
            actual,
        }
        .into());
    }
    Ok(results)
}

/// `base` doubled for each earlier attempt, capped at eight seconds.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Fills in the categorization fields of `record` from what the classifier said, with defaults
/// for anything it left out.
fn apply(
    record: &Record,
    result: Classification,
    catalogue: &Catalogue,
    split_keywords: &[String],
) -> Record {
    let category = catalogue.normalize(result.category.as_deref());
    let is_expense = result
        .is_expense
        .unwrap_or_else(|| !record.amount().is_negative());
    let mut is_split = match result.is_split.map(SplitFlag::try_from) {
        None => SplitFlag::No,
        Some(Ok(flag)) => flag,
        Some(Err(e)) => {
            warn!("Ignoring classification of '{}': {e}", record.description());
            SplitFlag::No
        }
    };

    let description = record.description().to_lowercase();
    if let Some(keyword) = split_keywords.iter().find(|k| description.contains(k.as_str())) {
        debug!("'{}' matches split keyword '{keyword}'", record.description());
        is_split = SplitFlag::AlreadySplit;
    }
    record.categorized(category, is_expense, is_split)
}
