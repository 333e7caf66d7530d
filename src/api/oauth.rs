//! Keeps the Google OAuth access token fresh.
//!
//! Obtaining the first token is done outside of this program; `token.json` must already exist.
//! From then on the refresh token is exchanged for new access tokens whenever the stored one is
//! close to expiry, and the result is written back to `token.json`.

use crate::api::files::{File, SecretFile, TokenFile};
use crate::Result;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use std::path::Path;
use tracing::{debug, info};

/// Provides a valid access token for Google API calls.
pub(crate) struct TokenProvider {
    secret: SecretFile,
    token: File<TokenFile>,
    http: reqwest::Client,
}

impl TokenProvider {
    /// Loads the client secret and the stored token. Does not contact Google.
    pub(crate) async fn load(secret_path: impl AsRef<Path>, token_path: impl AsRef<Path>) -> Result<Self> {
        let secret = SecretFile::load(secret_path.as_ref()).await?;
        let token = TokenFile::load(token_path.as_ref()).await.with_context(|| {
            format!(
                "Unable to load the OAuth token from '{}'",
                token_path.as_ref().display()
            )
        })?;
        // The token endpoint must not be allowed to redirect.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Unable to build the OAuth HTTP client")?;
        Ok(Self {
            secret,
            token,
            http,
        })
    }

    /// The current access token, which may be expired.
    pub(crate) fn token(&self) -> &str {
        self.token.data().access_token()
    }

    pub(crate) fn expires_at(&self) -> DateTime<Utc> {
        self.token.data().expires_at()
    }

    /// Returns an access token, refreshing it first if it is expired or about to be.
    pub(crate) async fn token_with_refresh(&mut self) -> Result<&str> {
        if self.token.data().is_expired() {
            self.refresh().await?;
        }
        Ok(self.token())
    }

    /// Exchanges the refresh token for a new access token and saves it.
    pub(crate) async fn refresh(&mut self) -> Result<()> {
        debug!("Refreshing the OAuth access token");
        let client = BasicClient::new(ClientId::new(self.secret.client_id().to_string()))
            .set_client_secret(ClientSecret::new(self.secret.client_secret().to_string()))
            .set_token_uri(
                TokenUrl::new(self.secret.token_uri().to_string())
                    .context("The client secret has an invalid token_uri")?,
            );

        let refresh_token = RefreshToken::new(self.token.data().refresh_token().to_string());
        let response = client
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(|e| anyhow!("The OAuth token refresh was rejected: {e}"))?;

        let lifetime = response
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .unwrap_or_else(|| chrono::Duration::hours(1));
        self.token.data_mut().update(
            response.access_token().secret().to_string(),
            Utc::now() + lifetime,
            response.refresh_token().map(|rt| rt.secret().to_string()),
        );
        self.token.save().await?;
        info!(
            "OAuth token refreshed, valid until {}",
            self.expires_at().to_rfc3339()
        );
        Ok(())
    }
}
