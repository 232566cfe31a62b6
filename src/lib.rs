//! Rowstream Library
//!
//! Streams large tabular exports as CSV without materializing the result
//! set. Rows are paginated out of a source, encoded one batch at a time and
//! written to the client only as fast as the client reads them.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `error`: Error types and handling
//! - `export`: Row source, transcoder and streaming coordinator
//! - `server`: Minimal HTTP host invoking the pipeline per request
//! - `transport`: Fragment sinks (chunked HTTP response, file)
//!
//! # Example
//!
//! ```no_run
//! use rowstream::{config::Config, server::Server};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(Config::default()).await?;
//!     server.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{ExportError, Result, RowstreamError};
pub use export::{ExportCoordinator, ExportParams, RowSource};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
pub fn version() -> &'static str {
    VERSION
}
