//! Minimal HTTP host for the export pipeline
//!
//! Accepts connections, reads the request head, validates the export
//! parameters and then hands the connection to the pipeline. Each
//! connection runs in its own task with its own row source and
//! coordinator; nothing mutable is shared between exports.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ErrorResponse, ExportError, Result};
use crate::export::{
    CSV_CONTENT_TYPE, ExportCoordinator, ExportParams, JobIdentity, ProgressTracker, RowSource,
    SimulatedRowSource, SystemClock,
};
use crate::transport::{HttpResponseSink, ResponseMetadata, stream_export, write_error_response};

pub mod request;

pub use request::{ExportQuery, RequestLine, RouteError};

/// Upper bound on the size of a request head
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Time allowed for a client to send its request head
const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes read and dropped after rejecting an oversized head
const DRAIN_LIMIT_BYTES: u64 = 1024 * 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bind the configured address and serve exports until `shutdown` fires
pub async fn serve(config: Config, shutdown: CancellationToken) -> Result<()> {
    Server::bind(config).await?.run(shutdown).await
}

/// Bound listener serving exports
pub struct Server {
    listener: TcpListener,
    config: Arc<Config>,
}

impl Server {
    /// Bind the listener configured in `[server] bind_addr`
    pub async fn bind(config: Config) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.bind_addr).await?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled
    ///
    /// In-flight exports observe a child of `shutdown` and stop pulling
    /// rows when it fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Serving exports on http://{}{}",
            self.local_addr()?,
            self.config.server.route
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let config = self.config.clone();
            let token = shutdown.child_token();
            let span = info_span!(
                "request",
                id = %Uuid::new_v4(),
                %peer,
                filename = tracing::field::Empty
            );
            tokio::spawn(handle_connection(stream, config, token, simulated_source).instrument(span));
        }
    }
}

async fn handle_connection<S, F>(
    stream: TcpStream,
    config: Arc<Config>,
    token: CancellationToken,
    make_source: F,
) where
    S: RowSource,
    F: FnOnce(ExportParams, &Config) -> S + Send,
{
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let line = match tokio::time::timeout(HEAD_TIMEOUT, read_head(&mut reader)).await {
        Ok(Ok(line)) => line,
        Ok(Err(HeadError::TooLarge)) => {
            info!("Rejected request head larger than {} bytes", MAX_HEAD_BYTES);
            let body = ErrorResponse::routing(
                "http.head_too_large",
                format!("Request head exceeds {MAX_HEAD_BYTES} bytes"),
            );
            respond_error(&mut write_half, 431, "Request Header Fields Too Large", &body).await;
            discard_pending(&mut reader).await;
            return;
        }
        Ok(Err(HeadError::Closed)) => {
            debug!("Connection closed before the request head was complete");
            return;
        }
        Ok(Err(HeadError::Io(e))) => {
            debug!("Failed to read request head: {}", e);
            return;
        }
        Err(_) => {
            debug!("Timed out waiting for request head");
            return;
        }
    };

    let request = match RequestLine::parse(&line).and_then(|r| {
        r.route(&config.server.route)?;
        Ok(r)
    }) {
        Ok(r) => r,
        Err(e) => {
            reject_route(&mut write_half, e).await;
            return;
        }
    };

    let params = match ExportQuery::parse(request.query.as_deref())
        .and_then(|q| q.into_params(&config.export))
    {
        Ok(p) => p,
        Err(e) => {
            info!("Rejected export request: {}", e);
            respond_error(&mut write_half, 400, "Bad Request", &ErrorResponse::from_export_error(&e))
                .await;
            return;
        }
    };

    let job = JobIdentity::from_timestamp(&config.export.filename_prefix, Utc::now());
    let meta = ResponseMetadata::new(CSV_CONTENT_TYPE, &job).with_expected_rows(params.total_rows());
    tracing::Span::current().record("filename", job.filename());
    info!(
        chunk_size = params.chunk_size(),
        total_rows = params.total_rows(),
        "Export accepted"
    );

    let watcher = tokio::spawn(watch_disconnect(reader, token.clone()));

    let source = make_source(params, config.as_ref());
    let mut coordinator = ExportCoordinator::new(source, ProgressTracker::new(None, false))
        .with_cancellation(token.clone());
    let mut sink = HttpResponseSink::new(write_half);

    match stream_export(&mut coordinator, &mut sink, &meta, &token).await {
        Ok(stats) => info!(
            rows = stats.rows,
            bytes = stats.bytes,
            elapsed_ms = stats.elapsed_ms,
            "Export streamed"
        ),
        Err(ExportError::TransportCancelled) => {
            info!(
                rows = coordinator.stats().rows,
                "Client disconnected, export stopped"
            )
        }
        Err(e) => error!(
            rows = coordinator.stats().rows,
            "Export aborted after headers were sent: {}", e
        ),
    }

    watcher.abort();
}

/// Row source backing exports served over HTTP
fn simulated_source(params: ExportParams, config: &Config) -> SimulatedRowSource<StdRng, SystemClock> {
    SimulatedRowSource::new(params, StdRng::from_os_rng(), SystemClock)
        .with_latency(config.batch_latency())
        .with_max_value(config.export.max_value)
}

enum HeadError {
    /// Peer closed before the blank line ending the head
    Closed,
    /// Head did not fit in `MAX_HEAD_BYTES`
    TooLarge,
    Io(io::Error),
}

impl From<io::Error> for HeadError {
    fn from(err: io::Error) -> Self {
        HeadError::Io(err)
    }
}

/// Read the request line and skip the remaining header lines
///
/// The whole head, request line included, must fit in `MAX_HEAD_BYTES`.
async fn read_head(reader: &mut BufReader<OwnedReadHalf>) -> std::result::Result<String, HeadError> {
    let mut limited = (&mut *reader).take(MAX_HEAD_BYTES as u64);
    let cut_short = |remaining: u64| {
        if remaining == 0 {
            HeadError::TooLarge
        } else {
            HeadError::Closed
        }
    };

    let mut request_line = String::new();
    limited.read_line(&mut request_line).await?;
    if !request_line.ends_with('\n') {
        return Err(cut_short(limited.limit()));
    }

    let mut header = String::new();
    loop {
        header.clear();
        limited.read_line(&mut header).await?;
        if header == "\r\n" || header == "\n" {
            return Ok(request_line);
        }
        if !header.ends_with('\n') {
            return Err(cut_short(limited.limit()));
        }
    }
}

/// Consume what the client is still sending so closing does not reset the
/// connection before it reads the response
async fn discard_pending(reader: &mut BufReader<OwnedReadHalf>) {
    let mut rest = (&mut *reader).take(DRAIN_LIMIT_BYTES);
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, tokio::io::copy(&mut rest, &mut tokio::io::sink())).await;
    if let Ok(Ok(n)) = drained {
        debug!("Discarded {} bytes of rejected request", n);
    }
}

/// Cancel `token` once the client closes its side of the connection
async fn watch_disconnect(mut reader: BufReader<OwnedReadHalf>, token: CancellationToken) {
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    debug!("Client closed the connection");
                    token.cancel();
                    return;
                }
                Ok(_) => {}
            },
        }
    }
}

async fn reject_route(writer: &mut OwnedWriteHalf, err: RouteError) {
    let (status, reason, body) = match err {
        RouteError::Malformed(line) => (
            400,
            "Bad Request",
            ErrorResponse::routing("http.malformed_request", format!("Malformed request line: {line}")),
        ),
        RouteError::MethodNotAllowed(method) => (
            405,
            "Method Not Allowed",
            ErrorResponse::routing("http.method_not_allowed", format!("Method {method} is not allowed")),
        ),
        RouteError::NotFound(path) => (
            404,
            "Not Found",
            ErrorResponse::routing("http.not_found", format!("No route for {path}")),
        ),
    };
    respond_error(writer, status, reason, &body).await;
}

async fn respond_error(writer: &mut OwnedWriteHalf, status: u16, reason: &str, body: &ErrorResponse) {
    if let Err(e) = write_error_response(writer, status, reason, body).await {
        debug!("Failed to write {} response: {}", status, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Batch;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::task::JoinHandle;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.bind_addr = "127.0.0.1:0".to_string();
        config.export.batch_latency_ms = 0;
        config
    }

    async fn start() -> (SocketAddr, CancellationToken) {
        let server = Server::bind(test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));
        (addr, shutdown)
    }

    // Accept a single connection and serve it with the given source
    async fn serve_one<S, F>(config: Config, make_source: F) -> (SocketAddr, JoinHandle<()>)
    where
        S: RowSource + 'static,
        F: FnOnce(ExportParams, &Config) -> S + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, Arc::new(config), CancellationToken::new(), make_source).await;
        });
        (addr, handle)
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap()
    }

    fn url(addr: SocketAddr, target: &str) -> String {
        format!("http://{addr}{target}")
    }

    fn header<'a>(response: &'a reqwest::Response, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    // Source wrapper recording how many batches were pulled and whether it was closed
    struct CountingSource<S> {
        inner: S,
        batches: Arc<AtomicU64>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl<S: RowSource> RowSource for CountingSource<S> {
        type Row = S::Row;

        async fn next_batch(&mut self) -> std::result::Result<Option<Batch<S::Row>>, ExportError> {
            let batch = self.inner.next_batch().await?;
            if batch.is_some() {
                self.batches.fetch_add(1, Ordering::SeqCst);
            }
            Ok(batch)
        }

        async fn close(&mut self) -> std::result::Result<(), ExportError> {
            self.closed.store(true, Ordering::SeqCst);
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_streams_csv_attachment() {
        let (addr, shutdown) = start().await;
        let response = client()
            .get(url(addr, "/export-report?chunk_size=500&total_rows=1200"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(header(&response, "content-type"), "text/csv");
        assert!(header(&response, "content-disposition").starts_with("attachment; filename=report_"));
        assert_eq!(header(&response, "x-expected-rows"), "1200");

        let document = response.text().await.unwrap();
        let mut reader = csv::Reader::from_reader(document.as_bytes());
        let ids: Vec<u64> = reader
            .records()
            .map(|r| r.unwrap()[0].parse().unwrap())
            .collect();
        assert_eq!(ids, (1..=1200).collect::<Vec<_>>());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_chunk_size() {
        let (addr, shutdown) = start().await;
        let response = client()
            .get(url(addr, "/export-report?chunk_size=10&total_rows=5"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 400);
        let value: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert_eq!(value["error"]["type"], "export.invalid_parameters");
        assert_eq!(value["error"]["field"], "chunk_size");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (addr, shutdown) = start().await;
        let response = client().get(url(addr, "/nope")).send().await.unwrap();
        assert_eq!(response.status(), 404);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_oversized_request_line_is_rejected() {
        let (addr, shutdown) = start().await;
        let pad = "a".repeat(MAX_HEAD_BYTES + 4096);
        let target = format!("/export-report?chunk_size=500&total_rows=1&pad={pad}");
        let response = client().get(url(addr, &target)).send().await.unwrap();

        assert_eq!(response.status(), 431);
        let value: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert_eq!(value["error"]["type"], "http.head_too_large");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_client_disconnect_stops_source() {
        let batches = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let mut config = test_config();
        config.export.batch_latency_ms = 1;

        let (addr, handle) = serve_one(config, {
            let batches = batches.clone();
            let closed = closed.clone();
            move |params, config: &Config| CountingSource {
                inner: simulated_source(params, config),
                batches,
                closed,
            }
        })
        .await;

        let client = client();
        let mut response = client
            .get(url(addr, "/export-report?chunk_size=500&total_rows=1000000"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.chunk().await.unwrap().is_some());
        drop(response);
        drop(client);

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();

        let pulled = batches.load(Ordering::SeqCst);
        assert!(pulled >= 1);
        assert!(pulled < 2000, "source kept producing after disconnect: {pulled} batches");
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_source_failure_leaves_body_unterminated() {
        let (addr, handle) = serve_one(test_config(), |params, config: &Config| {
            simulated_source(params, config).with_fault_after(2)
        })
        .await;

        let response = client()
            .get(url(addr, "/export-report?chunk_size=500&total_rows=5000"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.is_err());

        handle.await.unwrap();
    }
}
