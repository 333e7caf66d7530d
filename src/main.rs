use budget_sync::args::{Args, Command};
use budget_sync::{commands, Config, Mode, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().budget_home().path();

    // This allows for running the program without hitting the Google APIs. When
    // BUDGET_SYNC_IN_TEST_MODE is set and non-zero in length, then the mode will be Mode::Local,
    // otherwise it will be Mode::Google.
    let mode = Mode::from_env();

    // Route to appropriate command handler
    let _: () = match args.command() {
        Command::Init(init_args) => commands::init(
            home,
            init_args.client_secret(),
            init_args.sheet_url(),
            init_args.drive_folder(),
        )
        .await?
        .print(),

        Command::Auth => commands::auth(&Config::load(home).await?).await?.print(),

        Command::Run(run_args) => {
            let config = Config::load(home).await?;
            commands::run(
                config,
                mode,
                run_args.period(),
                run_args.preview(),
                run_args.yes(),
            )
            .await?
            .print()
        }

        Command::Status => commands::status(&Config::load(home).await?)
            .await?
            .print(),

        Command::Reset => commands::reset(&Config::load(home).await?).await?.print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                "budget_sync",
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
