//! Configuration file handling.
//!
//! The configuration file is stored at `$BUDGET_HOME/config.json` and holds everything a run needs
//! to know: where statements come from, which accounts and categories exist, how to reach the
//! language model, and where the finished budget is written.

use crate::backup::Backup;
use crate::checkpoint::CheckpointStore;
use crate::model::{Catalogue, DEFAULT_ALIASES, DEFAULT_CATEGORIES};
use crate::{utils, Result};
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "budget";
const CONFIG_VERSION: u8 = 1;
const BACKUP_COPIES: u32 = 5;
const SECRETS: &str = ".secrets";
const BACKUPS: &str = ".backups";
const CHECKPOINTS: &str = ".checkpoints";
const SHEETS: &str = ".sheets";
const DOWNLOADS: &str = "downloads";
const INBOX: &str = "inbox";
const CLIENT_SECRET_JSON: &str = "client_secret.json";
const TOKEN_JSON: &str = "token.json";
const CONFIG_JSON: &str = "config.json";

const DEFAULT_ACCOUNTS: &[&str] = &[
    "Canara Savings",
    "HDFC Savings",
    "ICICI Sapphiro CC",
    "ICICI Amazon CC",
    "HDFC Regalia CC",
    "HDFC Swiggy CC",
    "Cash",
    "Achu",
];

const DEFAULT_SUBJECTS: &[&str] = &[
    "Credit Card Statement",
    "E - Pass Sheet",
    "Combined Account Statement",
    "Combined Email Statement",
];

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$BUDGET_HOME` and from there it loads `$BUDGET_HOME/config.json`. It provides
/// paths to the other items that live in the home directory.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    backups: PathBuf,
    secrets: PathBuf,
    checkpoints: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
}

impl Config {
    /// Creates the home directory, its subdirectories and an initial `config.json`.
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the root of the home directory, e.g. `$HOME/budget`
    /// - `secret_file` - The downloaded OAuth 2.0 client credentials JSON. It is copied to
    ///   `.secrets/client_secret.json`. Not needed when only the local collaborators are used.
    /// - `destination` - Where the finished budget is written.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail.
    pub async fn create(
        dir: impl Into<PathBuf>,
        secret_file: Option<&Path>,
        destination: Destination,
    ) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the budget home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        for sub in [BACKUPS, SECRETS, CHECKPOINTS, DOWNLOADS, INBOX] {
            utils::make_dir(root.join(sub)).await?;
        }

        if let Some(secret_file) = secret_file {
            utils::copy(secret_file, root.join(SECRETS).join(CLIENT_SECRET_JSON)).await?;
        }

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile {
            destination,
            ..ConfigFile::default()
        };
        config_file.validate()?;
        config_file.save(&config_path).await?;

        Ok(Self::assemble(root, config_path, config_file))
    }

    /// This will
    /// - validate that the home directory and its config file exist
    /// - load and validate the config file
    /// - validate that the backups, secrets and checkpoints directories exist
    pub async fn load(budget_home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = budget_home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The budget home directory is missing, run 'budget init' first")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        let config = Self::assemble(root, config_path, config_file);

        for dir in [&config.backups, &config.secrets, &config.checkpoints] {
            if !dir.is_dir() {
                bail!("The directory '{}' is missing", dir.display())
            }
        }
        Ok(config)
    }

    fn assemble(root: PathBuf, config_path: PathBuf, config_file: ConfigFile) -> Self {
        Self {
            backups: root.join(BACKUPS),
            secrets: root.join(SECRETS),
            checkpoints: root.join(CHECKPOINTS),
            root,
            config_path,
            config_file,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn backups(&self) -> &Path {
        &self.backups
    }

    pub fn secrets(&self) -> &Path {
        &self.secrets
    }

    pub fn checkpoints(&self) -> &Path {
        &self.checkpoints
    }

    /// Where fetched statements are saved.
    pub fn downloads(&self) -> PathBuf {
        self.root.join(DOWNLOADS)
    }

    /// Where the local collaborators look for statements.
    pub fn inbox(&self) -> PathBuf {
        self.root.join(INBOX)
    }

    /// Where the local sheet writer keeps its CSV workbooks.
    pub fn local_sheets(&self) -> PathBuf {
        self.root.join(SHEETS)
    }

    pub fn destination(&self) -> &Destination {
        &self.config_file.destination
    }

    pub fn accounts(&self) -> &[String] {
        &self.config_file.accounts
    }

    pub fn account_rules(&self) -> &[AccountRule] {
        &self.config_file.account_rules
    }

    pub fn category_rules(&self) -> &[CategoryRule] {
        &self.config_file.category_rules
    }

    pub fn split_keywords(&self) -> &[String] {
        &self.config_file.split_keywords
    }

    pub fn mail(&self) -> &MailSettings {
        &self.config_file.mail
    }

    pub fn llm(&self) -> &LlmSettings {
        &self.config_file.llm
    }

    pub fn classifier(&self) -> ClassifierKind {
        self.config_file.classifier
    }

    pub fn batch_size(&self) -> usize {
        self.config_file.batch_size
    }

    pub fn classify_attempts(&self) -> u32 {
        self.config_file.classify_attempts
    }

    pub fn extract_concurrency(&self) -> usize {
        self.config_file.extract_concurrency
    }

    pub fn period_filter(&self) -> bool {
        self.config_file.period_filter
    }

    pub fn backup_copies(&self) -> u32 {
        self.config_file.backup_copies
    }

    /// The category catalogue built from `categories` and `category_aliases`.
    pub fn catalogue(&self) -> Catalogue {
        Catalogue::new(
            self.config_file.categories.iter().map(String::as_str),
            self.config_file
                .category_aliases
                .iter()
                .map(|(a, c)| (a.as_str(), c.as_str())),
        )
    }

    /// Creates a new `Backup` instance for managing backup files.
    pub fn backup(&self) -> Backup {
        Backup::new(self)
    }

    /// The checkpoint store for this home directory.
    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.checkpoints)
    }

    /// Returns the stored `client_secret_path` if it is absolute, otherwise resolves the relative
    /// path.
    pub fn client_secret_path(&self) -> PathBuf {
        self.resolve(self.config_file.client_secret_path())
    }

    /// Returns the stored `token_path` if it is absolute, otherwise resolves the relative path.
    pub fn token_path(&self) -> PathBuf {
        self.resolve(self.config_file.token_path())
    }

    fn resolve(&self, p: PathBuf) -> PathBuf {
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }
}

/// Where the finished budget is written.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    /// A new workbook per period, named like `Accounts-2025-March`, inside a Google Drive folder.
    Folder { folder_id: String },
    /// Every period goes into the same workbook.
    Sheet { sheet_url: String },
}

impl Default for Destination {
    fn default() -> Self {
        Destination::Folder {
            folder_id: String::new(),
        }
    }
}

impl Destination {
    /// The spreadsheet ID when the destination is a fixed workbook.
    pub fn spreadsheet_id(&self) -> Result<Option<&str>> {
        match self {
            Destination::Folder { .. } => Ok(None),
            Destination::Sheet { sheet_url } => extract_spreadsheet_id(sheet_url).map(Some),
        }
    }
}

/// Assigns an account to every statement whose source reference matches `pattern`, optionally
/// only when the email subject also contains `subject`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountRule {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub account: String,
}

/// Used by the rule-based classifier: the first rule whose keyword appears in a description wins.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub keyword: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_expense: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_split: Option<u8>,
}

/// How statement emails are found.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    /// Only look at mail from this address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Any of these phrases must appear in the subject.
    pub subjects: Vec<String>,
    pub lookback_days: u32,
    pub max_results: u32,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            sender: None,
            subjects: DEFAULT_SUBJECTS.iter().map(|s| s.to_string()).collect(),
            lookback_days: 30,
            max_results: 100,
        }
    }
}

/// An OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    /// The environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai/".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Llm,
    Rules,
}

serde_plain::derive_display_from_serialize!(ClassifierKind);

/// Represents the serialization and deserialization format of the configuration file.
///
/// Only `app_name` and `config_version` are required, everything else has a default. Example:
/// ```json
/// {
///   "app_name": "budget",
///   "config_version": 1,
///   "destination": { "kind": "folder", "folder_id": "1AbCdEfGhIjKlMnOp" },
///   "account_rules": [
///     { "pattern": "^.+_\\d{8}_.+\\.pdf$", "subject": "hdfc", "account": "HDFC Savings" }
///   ],
///   "classifier": "llm",
///   "batch_size": 25
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "budget"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    #[serde(default)]
    destination: Destination,

    #[serde(default = "default_accounts")]
    accounts: Vec<String>,

    #[serde(default)]
    account_rules: Vec<AccountRule>,

    #[serde(default = "default_categories")]
    categories: Vec<String>,

    #[serde(default = "default_aliases")]
    category_aliases: BTreeMap<String, String>,

    #[serde(default)]
    category_rules: Vec<CategoryRule>,

    #[serde(default = "default_split_keywords")]
    split_keywords: Vec<String>,

    #[serde(default)]
    mail: MailSettings,

    #[serde(default)]
    llm: LlmSettings,

    #[serde(default)]
    classifier: ClassifierKind,

    /// Records per classification request.
    #[serde(default = "default_batch_size")]
    batch_size: usize,

    /// Attempts per classification batch before the stage gives up.
    #[serde(default = "default_classify_attempts")]
    classify_attempts: u32,

    /// Statements extracted at the same time.
    #[serde(default = "default_extract_concurrency")]
    extract_concurrency: usize,

    /// Drop records dated outside the run's period.
    #[serde(default)]
    period_filter: bool,

    /// Number of backup copies to keep
    #[serde(default = "default_backup_copies")]
    backup_copies: u32,

    /// Path to the OAuth 2.0 client credentials file (optional, relative to config.json or
    /// absolute). Defaults to $BUDGET_HOME/.secrets/client_secret.json if not specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret_path: Option<PathBuf>,

    /// Path to the OAuth token file (optional, relative to config.json or absolute).
    /// Defaults to $BUDGET_HOME/.secrets/token.json if not specified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_path: Option<PathBuf>,
}

fn default_accounts() -> Vec<String> {
    DEFAULT_ACCOUNTS.iter().map(|s| s.to_string()).collect()
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect()
}

fn default_aliases() -> BTreeMap<String, String> {
    DEFAULT_ALIASES
        .iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect()
}

fn default_split_keywords() -> Vec<String> {
    vec!["achu".to_string()]
}

fn default_batch_size() -> usize {
    25
}

fn default_classify_attempts() -> u32 {
    3
}

fn default_extract_concurrency() -> usize {
    4
}

fn default_backup_copies() -> u32 {
    BACKUP_COPIES
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            destination: Destination::default(),
            accounts: default_accounts(),
            account_rules: Vec::new(),
            categories: default_categories(),
            category_aliases: default_aliases(),
            category_rules: Vec::new(),
            split_keywords: default_split_keywords(),
            mail: MailSettings::default(),
            llm: LlmSettings::default(),
            classifier: ClassifierKind::default(),
            batch_size: default_batch_size(),
            classify_attempts: default_classify_attempts(),
            extract_concurrency: default_extract_concurrency(),
            period_filter: false,
            backup_copies: BACKUP_COPIES,
            client_secret_path: None,
            token_path: None,
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile asynchronously from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or fails validation.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = utils::read(path).await?;
        let config: ConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file at {}", path.display()))?;
        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            self.app_name
        );
        ensure!(
            self.config_version == CONFIG_VERSION,
            "Unsupported config_version {}, expected {}",
            self.config_version,
            CONFIG_VERSION
        );
        ensure!(self.batch_size > 0, "batch_size must be at least 1");
        ensure!(
            self.classify_attempts > 0,
            "classify_attempts must be at least 1"
        );
        ensure!(
            self.extract_concurrency > 0,
            "extract_concurrency must be at least 1"
        );
        for rule in &self.account_rules {
            regex::Regex::new(&rule.pattern)
                .with_context(|| format!("Bad account rule pattern '{}'", rule.pattern))?;
        }
        for rule in &self.category_rules {
            if let Some(split) = rule.is_split {
                ensure!(
                    split <= 2,
                    "Category rule '{}' has is_split {split}, expected 0, 1 or 2",
                    rule.keyword
                );
            }
        }
        self.destination.spreadsheet_id()?;
        Ok(())
    }

    /// If None, defaults to $BUDGET_HOME/.secrets/client_secret.json
    pub fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON))
    }

    /// If None, defaults to $BUDGET_HOME/.secrets/token.json
    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SECRETS).join(TOKEN_JSON))
    }
}

/// Extracts the spreadsheet ID from a Google Sheets URL
///
/// # Arguments
/// * `url` - The Google Sheets URL (e.g., "https://docs.google.com/spreadsheets/d/SPREADSHEET_ID/...")
fn extract_spreadsheet_id(url: &str) -> Result<&str> {
    // URL format: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID/...
    // or: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID?foo=bar
    let parts: Vec<&str> = url.split('/').collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == "d" && i + 1 < parts.len() {
            let id_part = parts[i + 1];
            let id = id_part
                .split(['?', '#'])
                .next()
                .unwrap_or(id_part);
            if !id.is_empty() {
                return Ok(id);
            }
        }
    }
    bail!(
        "Invalid Google Sheets URL format. Expected: https://docs.google.com/spreadsheets/d/SPREADSHEET_ID"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn folder() -> Destination {
        Destination::Folder {
            folder_id: "folder123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_config_create() {
        let dir = TempDir::new().unwrap();
        let home_dir = dir.path().join("budget_home");
        let secret_source_file = dir.path().join("x.txt");
        let secret_content = "12345";
        utils::write(&secret_source_file, secret_content)
            .await
            .unwrap();

        let config = Config::create(&home_dir, Some(&secret_source_file), folder())
            .await
            .unwrap();

        let found_secret_content = utils::read(&config.client_secret_path()).await.unwrap();
        assert_eq!(secret_content, found_secret_content);
        assert!(config.backups().is_dir());
        assert!(config.secrets().is_dir());
        assert!(config.checkpoints().is_dir());
        assert!(config.inbox().is_dir());
        assert_eq!(&folder(), config.destination());

        let loaded = Config::load(&home_dir).await.unwrap();
        assert_eq!(25, loaded.batch_size());
        assert_eq!(ClassifierKind::Llm, loaded.classifier());
        assert!(loaded.accounts().iter().any(|a| a == "HDFC Savings"));
    }

    #[tokio::test]
    async fn test_config_load_missing_home() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path().join("nope")).await.unwrap_err();
        assert!(err.to_string().contains("budget init"));
    }

    #[tokio::test]
    async fn test_config_file_load_with_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        utils::write(
            &config_path,
            r#"{
                "app_name": "budget",
                "config_version": 1,
                "destination": {
                    "kind": "sheet",
                    "sheet_url": "https://docs.google.com/spreadsheets/d/minimal/edit"
                },
                "classifier": "rules",
                "mail": { "sender": "alerts@bank.example" }
            }"#,
        )
        .await
        .unwrap();

        let config = ConfigFile::load(&config_path).await.unwrap();
        assert_eq!(
            Some("minimal"),
            config.destination.spreadsheet_id().unwrap()
        );
        assert_eq!(ClassifierKind::Rules, config.classifier);
        assert_eq!(Some("alerts@bank.example"), config.mail.sender.as_deref());
        assert_eq!(30, config.mail.lookback_days);
        assert_eq!(4, config.mail.subjects.len());
        assert_eq!(vec!["achu".to_string()], config.split_keywords);
        assert_eq!(
            config.client_secret_path(),
            PathBuf::from(SECRETS).join(CLIENT_SECRET_JSON)
        );
    }

    #[tokio::test]
    async fn test_config_file_load_invalid_app_name() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        utils::write(
            &config_path,
            r#"{ "app_name": "ledger", "config_version": 1 }"#,
        )
        .await
        .unwrap();

        let err = ConfigFile::load(&config_path).await.unwrap_err();
        assert!(format!("{err:#}").contains("Invalid app_name"));
    }

    #[tokio::test]
    async fn test_config_file_rejects_bad_rule_pattern() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        utils::write(
            &config_path,
            r#"{
                "app_name": "budget",
                "config_version": 1,
                "account_rules": [ { "pattern": "([", "account": "Cash" } ]
            }"#,
        )
        .await
        .unwrap();

        let err = ConfigFile::load(&config_path).await.unwrap_err();
        assert!(format!("{err:#}").contains("Bad account rule pattern"));
    }

    #[tokio::test]
    async fn test_config_file_save_and_load() {
        let t = TempDir::new().unwrap();
        let path = t.path().join("file.json");
        let original = ConfigFile {
            batch_size: 10,
            period_filter: true,
            token_path: Some(PathBuf::from("/abs/token.json")),
            ..ConfigFile::default()
        };
        original.save(&path).await.unwrap();
        let read = ConfigFile::load(&path).await.unwrap();
        assert_eq!(original, read);
    }

    #[test]
    fn test_config_file_serialization_omits_none_fields() {
        let json = serde_json::to_string(&ConfigFile::default()).unwrap();
        assert!(!json.contains("client_secret_path"));
        assert!(!json.contains("token_path"));
    }

    #[test]
    fn test_extract_spreadsheet_id() {
        let url = "https://docs.google.com/spreadsheets/d/7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL/edit";
        assert_eq!(
            "7KpXm2RfZwNJgs84QhVYno5DU6iM9Wlr3bCzAv1txRpL",
            extract_spreadsheet_id(url).unwrap()
        );
        let url = "https://docs.google.com/spreadsheets/d/ABC123?foo=bar#gid=0";
        assert_eq!("ABC123", extract_spreadsheet_id(url).unwrap());
        assert!(extract_spreadsheet_id("https://example.com/invalid").is_err());
        assert!(extract_spreadsheet_id("").is_err());
    }

    #[test]
    fn test_catalogue_from_config() {
        let config = Config::assemble(
            PathBuf::from("/x"),
            PathBuf::from("/x/config.json"),
            ConfigFile::default(),
        );
        let catalogue = config.catalogue();
        assert_eq!("Gym", catalogue.normalize(Some("BODY")).name());
    }
}
