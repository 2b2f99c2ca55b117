use std::process::ExitCode;

use kube_event_exporter::cli::Cli;
use kube_event_exporter::config::Config;
use kube_event_exporter::logging::{self, LogConfig};
use kube_event_exporter::shutdown::{self, Shutdown};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = <Cli as clap::Parser>::parse();

    let config = match Config::try_from(cli) {
        Ok(config) => config,
        Err(e) => {
            logging::init(&LogConfig::default());
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log);

    let shutdown = Shutdown::new();
    let token = shutdown.token();
    tokio::spawn(async move {
        let reason = shutdown::wait_for_signal(&shutdown).await;
        tracing::info!(reason = ?reason, "received shutdown signal");
    });

    match kube_event_exporter::run(config, token).await {
        Ok(()) => {
            tracing::info!("exporter exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "exporter stopped with error");
            ExitCode::FAILURE
        }
    }
}
