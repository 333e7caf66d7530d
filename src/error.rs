use serde::Serialize;

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// The failures that the pipeline distinguishes. These are raised wrapped in an `anyhow::Error`;
/// use `err.downcast_ref::<PipelineError>()` to get the variant back.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unable to reach the statement source: {0}")]
    FetchUnavailable(String),

    #[error("Unable to extract line items from '{source_ref}': {reason}")]
    ExtractFailed { source_ref: String, reason: String },

    #[error("The {stage} checkpoint is corrupt: {reason}")]
    CorruptCheckpoint { stage: String, reason: String },

    #[error("The {stage} checkpoint has schema version {found}, expected {expected}")]
    CheckpointVersion {
        stage: String,
        found: u32,
        expected: u32,
    },

    #[error("The classifier is unavailable after {attempts} attempt(s): {reason}")]
    ClassifyUnavailable { attempts: u32, reason: String },

    #[error("The classifier returned {actual} result(s) for a batch of {expected}")]
    ClassificationCountMismatch { expected: usize, actual: usize },

    #[error("The classifier answered for record {actual} at position {position}, expected record {expected}")]
    ClassificationOrderMismatch {
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Record {index} is not ready for upload: {reason}")]
    RecordIncomplete { index: usize, reason: String },

    #[error("Unable to write '{group}' to the sheet: {reason}")]
    SheetWriteFailed { group: String, reason: String },
}

impl PipelineError {
    /// The stage of the pipeline that this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::FetchUnavailable(_) => Stage::Fetch,
            PipelineError::ExtractFailed { .. } => Stage::Extract,
            PipelineError::CorruptCheckpoint { .. } | PipelineError::CheckpointVersion { .. } => {
                Stage::Checkpoint
            }
            PipelineError::ClassifyUnavailable { .. }
            | PipelineError::ClassificationCountMismatch { .. }
            | PipelineError::ClassificationOrderMismatch { .. } => Stage::Categorize,
            PipelineError::RecordIncomplete { .. } | PipelineError::SheetWriteFailed { .. } => {
                Stage::Upload
            }
        }
    }

    /// Whether a categorization batch that failed with this error may be attempted again.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ClassifyUnavailable { .. }
                | PipelineError::ClassificationCountMismatch { .. }
                | PipelineError::ClassificationOrderMismatch { .. }
        )
    }
}

/// Names a pipeline stage in user-facing failure messages.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Extract,
    Categorize,
    Upload,
    Checkpoint,
}

serde_plain::derive_display_from_serialize!(Stage);

/// Looks through the chain of `err` for a `PipelineError`.
pub fn pipeline_error(err: &Error) -> Option<&PipelineError> {
    err.chain().find_map(|e| e.downcast_ref::<PipelineError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_pipeline_error_survives_context() {
        let result: Result<()> = Err(PipelineError::ClassificationCountMismatch {
            expected: 3,
            actual: 2,
        }
        .into());
        let err = result.context("Categorization failed").unwrap_err();
        let found = pipeline_error(&err).unwrap();
        assert!(matches!(
            found,
            PipelineError::ClassificationCountMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(Stage::Categorize, found.stage());
    }

    #[test]
    fn test_retryable() {
        assert!(PipelineError::ClassifyUnavailable {
            attempts: 1,
            reason: "503".into()
        }
        .is_retryable());
        assert!(!PipelineError::RecordIncomplete {
            index: 0,
            reason: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_stage_display() {
        let e = PipelineError::SheetWriteFailed {
            group: "Cash".into(),
            reason: "quota".into(),
        };
        assert_eq!("upload", e.stage().to_string());
        assert_eq!("Unable to write 'Cash' to the sheet: quota", e.to_string());
        assert_eq!("checkpoint", Stage::Checkpoint.to_string());
    }

    #[test]
    fn test_order_mismatch_is_a_retryable_categorize_error() {
        let e = PipelineError::ClassificationOrderMismatch {
            position: 0,
            expected: 4,
            actual: 7,
        };
        assert!(e.is_retryable());
        assert_eq!(Stage::Categorize, e.stage());
    }
}
