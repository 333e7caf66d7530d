//! Serialization and deserialization structures for Google OAuth credential files.
//! - `client_secret.json`: OAuth 2.0 client credentials from Google Cloud Console
//! - `token.json`: the access and refresh tokens this program keeps up to date

use crate::api::OAUTH_SCOPES;
use crate::{utils, Result};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

/// A JSON file held in memory between loading and saving.
#[derive(Default, Debug, Clone)]
pub(super) struct File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    path: PathBuf,
    data: F,
}

impl<F> File<F>
where
    F: Serialize + DeserializeOwned + Clone + Debug,
{
    /// Load data from a file and create a File instance
    pub(super) async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data: F = utils::deserialize(&path).await?;
        Ok(Self { path, data })
    }

    /// Save the current data to the file with owner-only permissions.
    pub(super) async fn save(&self) -> Result<()> {
        let json =
            serde_json::to_string_pretty(&self.data).context("Failed to serialize data to JSON")?;
        utils::write_atomic(&self.path, json).await?;

        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, Permissions::from_mode(0o600))
                .await
                .context("Failed to set file permissions")?;
        }

        Ok(())
    }

    pub(super) fn data(&self) -> &F {
        &self.data
    }

    pub(super) fn data_mut(&mut self) -> &mut F {
        &mut self.data
    }
}

/// Represents the structure of the `client_secret.json` file downloaded from Google Cloud Console.
///
/// Desktop application credentials come wrapped in `installed`, web application credentials in
/// `web`. Either is accepted.
///
/// Example:
/// ```json
/// {
///   "installed": {
///     "client_id": "YOUR_CLIENT_ID.apps.googleusercontent.com",
///     "client_secret": "YOUR_CLIENT_SECRET",
///     "auth_uri": "https://accounts.google.com/o/oauth2/auth",
///     "token_uri": "https://oauth2.googleapis.com/token"
///   }
/// }
/// ```
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SecretFile {
    #[serde(alias = "web")]
    installed: InstalledCredentials,
}

impl SecretFile {
    pub(crate) async fn load(path: &Path) -> Result<SecretFile> {
        utils::deserialize(path)
            .await
            .context("Unable to read the OAuth client secret file")
    }

    pub(super) fn client_id(&self) -> &str {
        &self.installed.client_id
    }

    pub(super) fn client_secret(&self) -> &str {
        &self.installed.client_secret
    }

    pub(super) fn token_uri(&self) -> &str {
        &self.installed.token_uri
    }
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// This is how we save the token information that we receive from Google OAuth.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(super) struct TokenFile {
    scopes: Vec<String>,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenFile {
    /// Loads the token file and checks that it was granted every scope this program uses.
    pub(super) async fn load(p: impl AsRef<Path>) -> Result<File<Self>> {
        let file: File<Self> = File::load(p.as_ref())
            .await
            .context("Unable to deserialize the token JSON file")?;
        file.data().validate_scopes()?;
        Ok(file)
    }

    fn validate_scopes(&self) -> Result<()> {
        let found_scopes: HashSet<&str> = self.scopes.iter().map(|s| s.as_str()).collect();
        for &required_scope in OAUTH_SCOPES {
            if !found_scopes.contains(required_scope) {
                bail!("OAuth scope '{required_scope}' is missing.");
            }
        }
        Ok(())
    }

    pub(super) fn access_token(&self) -> &str {
        &self.access_token
    }

    pub(super) fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub(super) fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check if the token is expired or will expire soon (within 5 minutes)
    pub(super) fn is_expired(&self) -> bool {
        let now = Utc::now();
        let buffer = chrono::Duration::minutes(5);
        self.expires_at <= now + buffer
    }

    /// Update the token with new values
    pub(super) fn update(
        &mut self,
        access_token: String,
        expires_at: DateTime<Utc>,
        refresh_token: Option<String>,
    ) {
        self.access_token = access_token;
        self.expires_at = expires_at;
        if let Some(rt) = refresh_token {
            self.refresh_token = rt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token_json(scopes: &[&str]) -> String {
        serde_json::json!({
            "scopes": scopes,
            "access_token": "abc12",
            "refresh_token": "xyz89",
            "expires_at": "2025-01-01T00:00:00Z"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_client_secret_installed_and_web() {
        let temp_dir = TempDir::new().unwrap();
        let p = temp_dir.path().join("file.json");
        utils::write(
            &p,
            r#"{
                "installed": {
                    "client_id": "ID.apps.googleusercontent.com",
                    "client_secret": "SECRET",
                    "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                    "token_uri": "https://oauth2.googleapis.com/token"
                }
            }"#,
        )
        .await
        .unwrap();
        let secret_file = SecretFile::load(&p).await.unwrap();
        assert_eq!("ID.apps.googleusercontent.com", secret_file.client_id());
        assert_eq!("SECRET", secret_file.client_secret());

        utils::write(
            &p,
            r#"{ "web": { "client_id": "W", "client_secret": "S" } }"#,
        )
        .await
        .unwrap();
        let secret_file = SecretFile::load(&p).await.unwrap();
        assert_eq!("W", secret_file.client_id());
        assert_eq!("https://oauth2.googleapis.com/token", secret_file.token_uri());
    }

    #[tokio::test]
    async fn test_validate_token_file_missing_scope() {
        let tmp = TempDir::new().unwrap();
        let json_path = tmp.path().join("file.json");
        utils::write(
            &json_path,
            token_json(&["https://www.googleapis.com/auth/spreadsheets"]),
        )
        .await
        .unwrap();

        let error_message = TokenFile::load(&json_path).await.unwrap_err().to_string();
        assert!(error_message.contains("https://www.googleapis.com/auth/gmail.readonly"));
    }

    #[tokio::test]
    async fn test_token_file_update_and_save() {
        let tmp = TempDir::new().unwrap();
        let json_path = tmp.path().join("file.json");
        utils::write(&json_path, token_json(OAUTH_SCOPES)).await.unwrap();

        let mut file = TokenFile::load(&json_path).await.unwrap();
        assert!(file.data().is_expired());
        let later = Utc::now() + chrono::Duration::hours(1);
        file.data_mut().update("new".into(), later, None);
        file.save().await.unwrap();

        let reloaded = TokenFile::load(&file.path).await.unwrap();
        assert_eq!("new", reloaded.data().access_token());
        assert_eq!("xyz89", reloaded.data().refresh_token());
        assert!(!reloaded.data().is_expired());
    }
}
