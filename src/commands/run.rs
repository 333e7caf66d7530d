use crate::api::{self, Mode};
use crate::commands::Out;
use crate::error::{pipeline_error, Stage};
use crate::model::Period;
use crate::pipeline::{self, Context, Outcome, RunOptions};
use crate::{Config, Result};
use chrono::Local;
use tracing::debug;

/// Handles the `budget run` command.
///
/// Resumes from the last completed stage, or starts a fresh run for `period` (default: the
/// previous month). A declined confirmation is not an error.
///
/// # Arguments
/// - `config` - The loaded configuration
/// - `mode` - Whether to use the Google collaborators or the local ones
/// - `period` - The month to budget for a fresh run
/// - `preview` - Ask before keeping each extracted statement
/// - `assume_yes` - Answer the upload confirmation with yes
pub async fn run(
    config: Config,
    mode: Mode,
    period: Option<Period>,
    preview: bool,
    assume_yes: bool,
) -> Result<Out<Outcome>> {
    let period = period.unwrap_or_else(|| Period::previous_month(Local::now().date_naive()));
    debug!("Running for {period} in {mode} mode");
    let collaborators = api::collaborators(&config, mode, assume_yes).await?;
    let mut ctx = Context::new(&config, collaborators, RunOptions { period, preview })?;

    let outcome = pipeline::run(&mut ctx).await.map_err(|e| {
        let Some(stage) = pipeline_error(&e).map(|p| p.stage()) else {
            return e;
        };
        let hint = match stage {
            Stage::Checkpoint => "Run 'budget reset' to discard the saved stage results",
            _ => "Re-running resumes from the last completed stage",
        };
        e.context(format!("The {stage} stage failed. {hint}"))
    })?;

    let message = match &outcome {
        Outcome::Uploaded {
            records,
            destination,
        } => format!("Wrote {records} transaction(s) to {destination}"),
        Outcome::Declined { records } => format!(
            "Upload cancelled. The {records} categorized transaction(s) are kept and the next run \
            starts at the upload"
        ),
        Outcome::NothingToDo => format!("No transactions found for {period}"),
    };
    Ok(Out::new(message, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::error::PipelineError;
    use crate::test::TestEnv;
    use crate::utils;

    const STATEMENT: &str = r#"{
        "account": "HDFC Regalia CC",
        "items": [
            {"date": "02/03/2025", "description": "SWIGGY BANGALORE", "amount": "₹1,250.00", "direction": "debit"},
            {"date": "05-Mar-2025", "description": "PAYMENT RECEIVED", "amount": "20,000.00 Cr", "direction": "credit"}
        ]
    }"#;

    async fn local_env() -> TestEnv {
        TestEnv::with_settings(serde_json::json!({
            "category_rules": [
                {"keyword": "swiggy", "category": "Food"},
                {"keyword": "payment received", "category": "Payment", "is_expense": false}
            ]
        }))
        .await
    }

    #[tokio::test]
    async fn test_local_run_writes_csv_tabs() {
        let env = local_env().await;
        let config = env.config();
        utils::write(config.inbox().join("march.json"), STATEMENT)
            .await
            .unwrap();
        utils::write(config.inbox().join("broken.json"), "%PDF-1.4")
            .await
            .unwrap();

        let out = run(
            config.clone(),
            Mode::Local,
            Some(Period::new(2025, 3).unwrap()),
            false,
            true,
        )
        .await
        .unwrap();
        assert!(matches!(
            out.structure(),
            Some(Outcome::Uploaded { records: 2, .. })
        ));

        let tab = config
            .local_sheets()
            .join("Accounts-2025-March")
            .join("HDFC Regalia CC.csv");
        let content = utils::read(&tab).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(3, lines.len());
        assert!(lines[1].starts_with("02/03/2025,1,Food,,SWIGGY BANGALORE,1250.00,0"));
        assert!(lines[2].starts_with("05/03/2025,0,Payment,,PAYMENT RECEIVED,-20000.00,0"));
        assert!(config
            .local_sheets()
            .join("Accounts-2025-March")
            .join("Final Recon.csv")
            .is_file());
        assert!(!env.store().has(Checkpoint::Extracted).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_run_with_empty_inbox() {
        let env = local_env().await;
        let out = run(env.config(), Mode::Local, None, false, true)
            .await
            .unwrap();
        assert!(matches!(out.structure(), Some(Outcome::NothingToDo)));
    }

    #[tokio::test]
    async fn test_failure_message_names_the_stage() {
        let env = local_env().await;
        utils::write(
            env.store().path(Checkpoint::Extracted),
            r#"{"schema_version": 1}"#,
        )
        .await
        .unwrap();
        let err = run(env.config(), Mode::Local, None, false, true)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("The checkpoint stage failed"));
        assert!(matches!(
            pipeline_error(&err),
            Some(PipelineError::CorruptCheckpoint { .. })
        ));
    }
}
