use clap::Parser;
use std::process::ExitCode;
use tracing::info;

use crawl_core::app::App;
use crawl_core::cli::Args;
use crawl_core::{config, logging};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let loaded_config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    logging::setup_logging(&loaded_config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting crawl-core"
    );

    let mut app = match App::new(loaded_config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = ?e, "failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    app.start_services();
    app.run().await
}
