//! Rowstream - streaming CSV export service
//!
//! Serves large reports as CSV attachments, producing each batch only when
//! the client is ready to receive it.
//!
//! # Usage
//!
//! ```bash
//! # Serve on the configured address
//! rowstream serve --bind 127.0.0.1:8000
//!
//! # Export to a file instead
//! rowstream export --chunk-size 5000 --total-rows 200000 -o report.csv
//! ```

use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use rowstream::cli::CliInterface;
use rowstream::error::Result;
use rowstream::server;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle one-shot subcommands or serve until Ctrl+C
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand().await? {
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let shutdown_trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                shutdown_trigger.cancel();
            }
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    server::serve(cli.into_config(), shutdown).await
}

/// Initialize logging system based on verbosity level
///
/// `RUST_LOG` directives, when set, refine the level chosen here.
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
