use crate::commands::Out;
use crate::{Config, Result};

/// Handles the `budget reset` command. Deletes both checkpoints and the upload progress so that
/// the next run starts with a fresh fetch.
pub async fn reset(config: &Config) -> Result<Out<()>> {
    let store = config.checkpoint_store();
    store.clear().await;
    Ok(format!(
        "Removed the saved stage results in {}, the next run starts with a fresh fetch",
        store.dir().display()
    )
    .into())
}
