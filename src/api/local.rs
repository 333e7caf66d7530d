use crate::api::{Document, DocumentFilter, Fetch};
use crate::error::PipelineError;
use crate::{utils, Result};
use std::path::PathBuf;
use tracing::debug;

/// Serves every regular file in a directory as a document, in file name order.
pub(crate) struct LocalFetch {
    inbox: PathBuf,
}

impl LocalFetch {
    pub(crate) fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
        }
    }
}

#[async_trait::async_trait]
impl Fetch for LocalFetch {
    async fn list_matching_documents(&mut self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        debug!(
            "Listing local statements in {} for {}",
            self.inbox.display(),
            filter.period
        );
        let mut entries = utils::read_dir(&self.inbox)
            .await
            .map_err(|e| PipelineError::FetchUnavailable(format!("{e:#}")))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::FetchUnavailable(e.to_string()))?
        {
            let path = entry.path();
            if utils::is_file(&path)
                .await
                .map_err(|e| PipelineError::FetchUnavailable(format!("{e:#}")))?
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let source_ref = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            documents.push(Document {
                context: source_ref.clone(),
                source_ref,
                bytes: utils::read_bytes(&path).await?,
            });
        }
        Ok(documents)
    }
}
