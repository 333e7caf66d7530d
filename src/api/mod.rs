//! The collaborators that the pipeline calls but does not implement: where statements come from,
//! how line items are read out of them, how they are classified, and where the budget is written.
//!
//! Each capability is a trait. The pipeline only sees `Box<dyn Trait>`, and `Mode` decides whether
//! the Google-backed implementations or the local, file-backed ones are handed to it.

mod classify;
mod confirm;
mod extract;
mod files;
mod gmail;
mod http;
mod llm;
mod local;
mod oauth;
mod sheet;
mod sheet_local;

use crate::config::{ClassifierKind, MailSettings};
use crate::model::{Classification, ClassifyInput, Period, RawLineItem, Record};
use crate::{Config, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub(crate) use classify::{LlmClassifier, RuleClassifier};
pub(crate) use confirm::{FixedConfirm, StdinConfirm};
pub(crate) use extract::{JsonExtractor, PdfExtractor};
pub(crate) use gmail::GmailFetch;
pub(crate) use llm::ChatClient;
pub(crate) use local::LocalFetch;
pub(crate) use oauth::TokenProvider;
pub(crate) use sheet::GoogleSheetWriter;
pub(crate) use sheet_local::LocalSheetWriter;

/// OAuth scopes that the stored token must carry.
const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.file",
];

/// Setting this environment variable to anything non-empty swaps every Google-backed collaborator
/// for a local one.
const TEST_MODE_ENV: &str = "BUDGET_SYNC_IN_TEST_MODE";

/// One statement to be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Identifies the statement, usually its file name.
    pub source_ref: String,
    /// Free text that came with the document, e.g. the email subject. Used for account rules.
    pub context: String,
    pub bytes: Vec<u8>,
}

/// Which documents a fetch should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFilter {
    pub period: Period,
    pub sender: Option<String>,
    pub subjects: Vec<String>,
    pub lookback_days: u32,
    pub max_results: u32,
}

impl DocumentFilter {
    pub fn new(period: Period, mail: &MailSettings) -> Self {
        Self {
            period,
            sender: mail.sender.clone(),
            subjects: mail.subjects.clone(),
            lookback_days: mail.lookback_days,
            max_results: mail.max_results,
        }
    }
}

/// What an extractor read from one statement.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedStatement {
    /// The extractor's guess at the account, if the statement names one.
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub items: Vec<RawLineItem>,
}

/// Lists statements. Failing to reach the source should be reported as
/// `PipelineError::FetchUnavailable`.
#[async_trait::async_trait]
pub trait Fetch: Send {
    async fn list_matching_documents(&mut self, filter: &DocumentFilter) -> Result<Vec<Document>>;
}

/// Reads line items out of one statement. Called concurrently for different documents.
#[async_trait::async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, document: &Document) -> Result<ExtractedStatement>;
}

/// Classifies a batch of records. Must return exactly one result per input, in input order.
#[async_trait::async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, batch: &[ClassifyInput]) -> Result<Vec<Classification>>;
}

/// Writes categorized records to the budget workbook.
#[async_trait::async_trait]
pub trait SheetWriter: Send {
    /// Makes sure the workbook `target` exists with a tab, headers and validation for every group.
    async fn ensure_structure(&mut self, target: &str, groups: &[String]) -> Result<()>;

    /// Appends `records` after the last row of the `group` tab in `target`.
    async fn append_rows(&mut self, target: &str, group: &str, records: &[Record]) -> Result<()>;

    /// A human-readable name for where `target` ends up.
    fn describe(&self, target: &str) -> String;
}

/// Asks the user a yes/no question.
#[async_trait::async_trait]
pub trait Confirm: Send {
    async fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Selects the collaborators handed to the pipeline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Google,
    Local,
}

serde_plain::derive_display_from_serialize!(Mode);

impl Mode {
    /// `Mode::Local` when `BUDGET_SYNC_IN_TEST_MODE` is set and non-empty, otherwise
    /// `Mode::Google`.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(val) if !val.is_empty() => Mode::Local,
            _ => Mode::Google,
        }
    }
}

/// The full set of collaborators for one run.
pub struct Collaborators {
    pub fetch: Box<dyn Fetch>,
    pub extract: Box<dyn Extract>,
    pub classify: Box<dyn Classify>,
    pub sheet: Box<dyn SheetWriter>,
    pub confirm: Box<dyn Confirm>,
}

/// Builds the collaborators for `mode`. In `Mode::Local` nothing touches the network: statements
/// come from the inbox as JSON, classification is rule-based and the workbook is a directory of
/// CSV files.
pub(crate) async fn collaborators(
    config: &Config,
    mode: Mode,
    assume_yes: bool,
) -> Result<Collaborators> {
    debug!("Building {mode} collaborators");
    let confirm: Box<dyn Confirm> = if assume_yes {
        Box::new(FixedConfirm::new(true))
    } else {
        Box::new(StdinConfirm::new())
    };
    match mode {
        Mode::Local => Ok(Collaborators {
            fetch: Box::new(LocalFetch::new(config.inbox())),
            extract: Box::new(JsonExtractor),
            classify: Box::new(RuleClassifier::new(config.category_rules())),
            sheet: Box::new(LocalSheetWriter::new(config.local_sheets())),
            confirm,
        }),
        Mode::Google => {
            let llm = ChatClient::new(config.llm())?;
            let classify: Box<dyn Classify> = match config.classifier() {
                ClassifierKind::Llm => {
                    Box::new(LlmClassifier::new(llm.clone(), config.catalogue()))
                }
                ClassifierKind::Rules => Box::new(RuleClassifier::new(config.category_rules())),
            };
            let fetch = GmailFetch::new(token_provider(config).await?, config.downloads())?;
            let sheet = GoogleSheetWriter::new(config, token_provider(config).await?).await?;
            Ok(Collaborators {
                fetch: Box::new(fetch),
                extract: Box::new(PdfExtractor::new(llm, config.accounts())),
                classify,
                sheet: Box::new(sheet),
                confirm,
            })
        }
    }
}

/// Loads the token provider from the paths in `config`.
pub(crate) async fn token_provider(config: &Config) -> Result<TokenProvider> {
    TokenProvider::load(config.client_secret_path(), config.token_path()).await
}
