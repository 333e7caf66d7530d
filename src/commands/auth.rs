//! The `budget auth` command: verifies and refreshes the stored OAuth token.

use crate::api::token_provider;
use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;

/// Handles the `budget auth` command.
///
/// This command NEVER opens a browser or triggers an interactive OAuth flow. It loads the client
/// secret and the cached token, checks that the token carries the scopes this app needs, and
/// exchanges the refresh token for a new access token.
///
/// # Errors
/// Returns an error if credentials are missing, the token has the wrong scopes or the refresh is
/// rejected.
pub async fn auth(config: &Config) -> Result<Out<()>> {
    let mut token_provider = token_provider(config).await.with_context(|| {
        format!(
            "Unable to use the token found at '{}'. Put a token with the Gmail, Sheets and Drive \
            scopes there and try again.",
            config.token_path().display()
        )
    })?;
    token_provider
        .refresh()
        .await
        .context("Unable to refresh the token")?;
    Ok(format!(
        "Your OAuth token is valid until {}",
        token_provider.expires_at().to_rfc3339()
    )
    .into())
}
