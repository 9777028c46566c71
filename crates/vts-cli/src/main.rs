//! `vts` - talk to VTube Studio from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vts_core::{
    CallError, Config, ConnectionOptions, Directories, FileTokenStore, StatusText, TOKEN_KEY,
    TokenStore, VtsConnection, WebSocketConnector,
};

const CALLER: &str = "vts-cli";

#[derive(Parser)]
#[command(name = "vts")]
#[command(about = "Command line client for the VTube Studio public API")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    vts request APIStateRequest
    vts request HotkeyTriggerRequest '{\"hotkeyID\": \"wave\"}'
    vts watch
    vts token clear

Logging is controlled with RUST_LOG (default: vts=info).")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured WebSocket endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request and print the response
    Request {
        /// API message type (e.g. `StatisticsRequest`)
        message_type: String,
        /// Request data as JSON
        data: Option<String>,
        /// Time to wait for the response
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Time to wait for authentication before sending
        #[arg(long, default_value_t = 30_000)]
        wait_ms: u64,
    },

    /// Print status changes until interrupted
    Watch,

    /// Inspect or clear the stored authentication token
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Print the token stored for the configured scope
    Show,
    /// Forget the token so the next connection asks for a new one
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_file.as_deref())?;

    let dirs = Directories::new();
    let config = load_config(&dirs, cli.config.as_deref(), cli.endpoint)?;

    match cli.command {
        Commands::Request {
            message_type,
            data,
            timeout_ms,
            wait_ms,
        } => {
            let data = data
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("Request data is not valid JSON")?;
            let timeout = timeout_ms.map_or_else(|| config.request_timeout(), Duration::from_millis);
            run_request(
                &dirs,
                &config,
                &message_type,
                data,
                timeout,
                Duration::from_millis(wait_ms),
            )
            .await
        }
        Commands::Watch => run_watch(&dirs, &config).await,
        Commands::Token { command } => run_token(&dirs, &config, &command),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn setup_logging(log_file: Option<&Path>) -> Result<()> {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vts={default_level}")));

    let file_layer = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // Keep the writer thread alive for the whole process
            std::mem::forget(guard);

            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();

    Ok(())
}

fn load_config(dirs: &Directories, path: Option<&Path>, endpoint: Option<String>) -> Result<Config> {
    let path = path.unwrap_or(dirs.config_file.as_path());
    let mut config = Config::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    debug!("Loaded config from {}", path.display());

    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn token_store(dirs: &Directories) -> Result<Arc<FileTokenStore>> {
    dirs.ensure_exists()
        .with_context(|| format!("Failed to create {}", dirs.data.display()))?;
    Ok(Arc::new(FileTokenStore::new(&dirs.token_file)))
}

fn connect(dirs: &Directories, config: &Config) -> Result<VtsConnection> {
    let endpoint = config.endpoint_config()?;
    let options = ConnectionOptions {
        timings: config.timings,
        request_timeout: config.request_timeout(),
    };
    Ok(VtsConnection::spawn(
        endpoint,
        options,
        WebSocketConnector::new(),
        token_store(dirs)?,
    ))
}

async fn run_request(
    dirs: &Directories,
    config: &Config,
    message_type: &str,
    data: Option<Value>,
    timeout: Duration,
    wait: Duration,
) -> Result<()> {
    let connection = connect(dirs, config)?;
    let _status = connection.attach(CALLER).await?;

    if connection.wait_until_ready(wait).await {
        debug!("Authenticated, sending {message_type}");
    } else {
        warn!(
            "Not authenticated after {}ms ({:?}), sending anyway",
            wait.as_millis(),
            connection.status()
        );
    }

    let result = connection
        .call_with_timeout(message_type, data, timeout)
        .await;
    connection.shutdown().await;

    let (output, failure) = match result {
        Ok(response) => (
            json!({ "topic": response.message_type, "payload": response.data }),
            None,
        ),
        Err(CallError::Api(e)) => {
            let reason = e.to_string();
            (
                json!({ "topic": e.original.message_type, "payload": e.original.data }),
                Some(reason),
            )
        }
        Err(CallError::Client(e)) => (
            json!({ "topic": "ClientError", "payload": { "message": e.to_string() } }),
            Some(e.to_string()),
        ),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    if let Some(reason) = failure {
        bail!("{message_type} failed: {reason}");
    }
    Ok(())
}

async fn run_watch(dirs: &Directories, config: &Config) -> Result<()> {
    let connection = connect(dirs, config)?;
    let mut status = connection.attach(CALLER).await?;
    info!("Watching {}", config.endpoint);

    loop {
        tokio::select! {
            next = status.recv() => {
                let Some(next) = next else { break };
                println!("{}", serde_json::to_string(&next)?);
                if next.text == StatusText::InvalidConfig {
                    connection.shutdown().await;
                    bail!("Endpoint rejected: {}", config.endpoint);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
        }
    }

    connection.shutdown().await;
    Ok(())
}

fn run_token(dirs: &Directories, config: &Config, command: &TokenCommand) -> Result<()> {
    let store = token_store(dirs)?;

    match command {
        TokenCommand::Show => {
            let token = store
                .get(TOKEN_KEY, &config.store)
                .with_context(|| format!("Failed to read {}", store.path().display()))?;
            match token {
                Some(token) => println!("{token}"),
                None => eprintln!("No token stored for scope '{}'", config.store),
            }
        }
        TokenCommand::Clear => {
            store
                .set(TOKEN_KEY, None, &config.store)
                .with_context(|| format!("Failed to update {}", store.path().display()))?;
            eprintln!("Token cleared for scope '{}'", config.store);
        }
    }

    Ok(())
}
