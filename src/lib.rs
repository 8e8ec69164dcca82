pub mod api;
pub mod config;
pub mod invocation_log;
pub mod mcp_client;
pub mod text;

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::fmt::MakeWriter;

use api::AppState;
use config::{LogFormat, LoggingConfig};
use invocation_log::{InvocationLogger, SqliteInvocationLogger};
use mcp_client::{DefaultTransportFactory, McpClient};

const LOG_FILE_NAME: &str = "mcp-bridge.log";

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mcp_bridge=info,warn"))
}

/// The bridge's log file and its rotated generations.
struct LogFiles {
    dir: PathBuf,
    keep: u32,
}

impl LogFiles {
    fn current(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    fn generation(&self, n: u32) -> PathBuf {
        self.dir.join(format!("{LOG_FILE_NAME}.{n}"))
    }

    /// Shift the current log to `.1`, `.1` to `.2` and so on. The generation
    /// past `keep` is deleted; with `keep == 0` the current log is.
    fn rotate(&self) -> io::Result<()> {
        if self.keep == 0 {
            return remove_if_present(&self.current());
        }
        remove_if_present(&self.generation(self.keep))?;
        for n in (1..self.keep).rev() {
            rename_if_present(&self.generation(n), &self.generation(n + 1))?;
        }
        rename_if_present(&self.current(), &self.generation(1))
    }

    /// Rotate, then open a fresh current log.
    fn open_fresh(&self) -> io::Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        self.rotate()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current())
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn rename_if_present(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::rename(from, to) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn install_subscriber<W>(format: LogFormat, writer: W, ansi: bool)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_target(true);
    match format {
        LogFormat::Text => builder.with_ansi(ansi).init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Initialize the tracing subscriber from the `logging` config section.
///
/// With a log directory, the previous logs are rotated and events go to a
/// fresh `mcp-bridge.log` there; otherwise to stderr. File writes are
/// unbuffered, so every event is on disk once logged. Returns the log file
/// path, if any.
fn init_tracing(logging: &LoggingConfig) -> Option<PathBuf> {
    if let Some(dir) = &logging.dir {
        let files = LogFiles {
            dir: dir.clone(),
            keep: logging.files_kept,
        };
        match files.open_fresh() {
            Ok(file) => {
                install_subscriber(logging.format, std::sync::Mutex::new(file), false);
                return Some(files.current());
            }
            Err(e) => {
                eprintln!("cannot open log file in {}: {e}; logging to stderr", dir.display());
            }
        }
    }

    install_subscriber(logging.format, io::stderr, true);
    None
}

/// Open the invocation history at the configured path, or the default one.
fn open_invocation_log(path: Option<&str>) -> anyhow::Result<SqliteInvocationLogger> {
    let logger = match path {
        Some(path) => SqliteInvocationLogger::open(path)
            .with_context(|| format!("failed to open invocation log at {path}"))?,
        None => SqliteInvocationLogger::open_default()
            .context("failed to open default invocation log")?,
    };
    Ok(logger)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// Run the bridge: load configuration, serve the REST API until ctrl-c, then
/// close every MCP session.
pub async fn run() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let config_path = config::find_config_path(&cwd)?;
    let bridge_config = config::load_config(&config_path)?;

    // Tracing comes up before anything else logs
    let log_file = init_tracing(&bridge_config.logging.clone().with_env_overrides());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        log_file = ?log_file,
        "=== mcp-bridge starting ==="
    );
    tracing::info!(
        path = %config_path.display(),
        servers = bridge_config.servers.len(),
        "loaded bridge configuration"
    );

    let logger: Arc<dyn InvocationLogger> =
        Arc::new(open_invocation_log(bridge_config.log_db_path.as_deref())?);
    let factory = Arc::new(DefaultTransportFactory::new()?);
    let client = Arc::new(
        McpClient::new(Arc::new(bridge_config.catalog()), factory).with_logger(Arc::clone(&logger)),
    );

    let listener = tokio::net::TcpListener::bind(&bridge_config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", bridge_config.listen_addr))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        servers = client.catalog().len(),
        "mcp-bridge listening"
    );

    let app = api::create_router(AppState {
        client: Arc::clone(&client),
        logger,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    client.shutdown_all().await;
    tracing::info!("mcp-bridge stopped");
    Ok(())
}
