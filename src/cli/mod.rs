//! Command-line interface for rowstream
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading, overriding and validation
//! - The `export`, `config` and `version` subcommands

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ExportError, Result};
use crate::export::{
    CSV_CONTENT_TYPE, ExportCoordinator, ExportLimits, ExportParams, JobIdentity,
    ProgressTracker, SimulatedRowSource, SystemClock,
};
use crate::transport::{FileSink, ResponseMetadata, stream_export};

/// Rowstream - memory-bounded streaming CSV export
#[derive(Parser, Debug)]
#[command(
    name = "rowstream",
    version,
    about = "Stream large CSV exports without buffering them",
    long_about = "Serves large tabular exports as CSV attachments over HTTP, paginating the
source and streaming each batch as soon as the client is ready for it."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Quiet mode (no progress bar)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for rowstream
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve exports over HTTP (default)
    Serve {
        /// Address to bind, overriding the config file
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,

        /// Simulated per-batch latency in milliseconds
        #[arg(long, value_name = "MS")]
        latency_ms: Option<u64>,
    },

    /// Export to a local file
    Export {
        /// Rows per batch
        #[arg(long, value_name = "ROWS")]
        chunk_size: Option<u64>,

        /// Total rows to export
        #[arg(long, value_name = "ROWS")]
        total_rows: Option<u64>,

        /// Output file (defaults to the generated report filename)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,

    /// Show configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Parse arguments and load configuration
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build from already-parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and apply argument overrides
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load_from_file(args.config_file.as_deref())?;

        if let Some(Commands::Serve { bind, latency_ms }) = &args.command {
            if let Some(bind) = bind {
                config.server.bind_addr = bind.clone();
            }
            if let Some(ms) = latency_ms {
                config.export.batch_latency_ms = *ms;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Handle subcommands other than `serve`
    ///
    /// # Returns
    /// * `Result<bool>` - True if a subcommand ran and the process should exit
    pub async fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            None | Some(Commands::Serve { .. }) => Ok(false),
            Some(Commands::Version) => {
                println!("rowstream {}", crate::VERSION);
                Ok(true)
            }
            Some(Commands::Config { show, validate }) => {
                if *validate {
                    // Already validated while loading
                    println!("Configuration is valid");
                }
                if *show || !*validate {
                    print!("{}", self.config.to_toml_string()?);
                }
                Ok(true)
            }
            Some(Commands::Export {
                chunk_size,
                total_rows,
                output,
            }) => {
                self.run_file_export(*chunk_size, *total_rows, output.as_deref())
                    .await?;
                Ok(true)
            }
        }
    }

    /// Stream an export into a local file
    async fn run_file_export(
        &self,
        chunk_size: Option<u64>,
        total_rows: Option<u64>,
        output: Option<&Path>,
    ) -> Result<()> {
        let export = &self.config.export;
        let params = ExportParams::new(
            chunk_size.unwrap_or(export.default_chunk_size),
            total_rows.unwrap_or(export.default_total_rows),
            &ExportLimits::from(export),
        )?;

        let job = JobIdentity::from_timestamp(&export.filename_prefix, Utc::now());
        let path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(job.filename()));
        let meta = ResponseMetadata::new(CSV_CONTENT_TYPE, &job).with_expected_rows(params.total_rows());

        let token = CancellationToken::new();
        let ctrl_c = {
            let token = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            })
        };

        let source = SimulatedRowSource::new(params, StdRng::from_os_rng(), SystemClock)
            .with_latency(self.config.batch_latency())
            .with_max_value(export.max_value);
        let tracker = ProgressTracker::new(Some(params.total_rows()), !self.args.quiet);
        let mut coordinator = ExportCoordinator::new(source, tracker).with_cancellation(token.clone());
        let mut sink = FileSink::create(&path).await.map_err(ExportError::Transport)?;

        let result = stream_export(&mut coordinator, &mut sink, &meta, &token).await;
        ctrl_c.abort();

        match result {
            Ok(stats) => {
                info!(
                    "Exported {} rows ({} bytes) to {} in {} ms",
                    stats.rows,
                    stats.bytes,
                    path.display(),
                    stats.elapsed_ms
                );
                if !self.args.quiet {
                    println!("Exported {} rows to {}", stats.rows, path.display());
                }
                Ok(())
            }
            Err(ExportError::TransportCancelled) => {
                warn!("Export interrupted; {} is incomplete", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
