use clap::Parser;
use pipefetch_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging before anything can fail; fall back to stderr.
    if cli.log_stderr {
        logging::init_logging_stderr();
    } else if let Err(e) = logging::init_logging() {
        eprintln!("pipefetch: log file unavailable ({:#}); logging to stderr", e);
        logging::init_logging_stderr();
    }

    if let Err(err) = cli.run().await {
        tracing::error!(error = %format!("{:#}", err), "pipefetch failed");
        eprintln!("pipefetch error: {:#}", err);
        std::process::exit(1);
    }
}
