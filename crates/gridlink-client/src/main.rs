//! gridlink CLI
//!
//! Thin presentation layer over `GridClient`:
//! - one-shot calls (`ping`, `info`, `dump`, `call <method> [json]`)
//! - `emit` to push an event to the server
//! - `listen` to print pushed events until interrupted
//!
//! Logs go to stderr (`RUST_LOG`), results to stdout as pretty JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

use gridlink_client::{config, ClientConfig, GridClient};
use gridlink_core::error::{LinkError, Result};

#[derive(Debug, Parser)]
#[command(name = "gridlink", version, about = "Talk to the grid server over its Unix socket")]
struct Cli {
    /// YAML config file.
    #[arg(long)]
    config: Option<String>,

    /// Socket path (overrides the config file).
    #[arg(long, env = "GRIDLINK_SOCKET")]
    socket: Option<PathBuf>,

    /// Per-request deadline in milliseconds (overrides the config file).
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the server answers.
    Ping,
    /// Server information.
    Info,
    /// Full window manager state.
    Dump,
    Spaces,
    Windows,
    /// Call any method with optional JSON params.
    Call { method: String, params: Option<String> },
    /// Send an event with optional JSON data.
    Emit { event_type: String, data: Option<String> },
    /// Print pushed events.
    Listen {
        #[arg(long, default_value = "all")]
        event_type: String,
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.kind().as_str());
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut cfg = match &cli.config {
        Some(path) => config::load_from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(socket) = &cli.socket {
        cfg.client.socket_path = socket.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        cfg.client.request_timeout_ms = ms;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn parse_json(label: &str, raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|s| {
        serde_json::from_str(s)
            .map_err(|e| LinkError::Serialization(format!("{label} is not valid json: {e}")))
    })
    .transpose()
}

fn print(v: &Value) {
    match serde_json::to_string_pretty(v) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{v}"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli)?;
    let client = GridClient::new(cfg.client);

    let outcome = match cli.command {
        Command::Ping => client.ping().await.map(|v| print(&v)),
        Command::Info => client.get_server_info().await.map(|v| print(&v)),
        Command::Dump => client.dump().await.map(|v| print(&v)),
        Command::Spaces => client.get_spaces().await.map(|v| print(&v)),
        Command::Windows => client.get_windows().await.map(|v| print(&v)),
        Command::Call { method, params } => {
            let params = parse_json("params", params.as_deref())?;
            client.call_method(&method, params).await.map(|v| print(&v))
        }
        Command::Emit { event_type, data } => {
            let data = parse_json("data", data.as_deref())?;
            client.emit(&event_type, data).await
        }
        Command::Listen {
            event_type,
            duration_secs,
        } => listen(&client, &event_type, duration_secs).await,
    };

    client.close().await;
    outcome
}

async fn listen(client: &GridClient, event_type: &str, duration_secs: Option<u64>) -> Result<()> {
    let (_, mut events) = client.dispatcher().subscribe_channel(256);
    let session = client.session().await?;
    client.subscribe(event_type).await?;

    let stop = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => return Ok(()),
            _ = session.closed() => {
                return Err(LinkError::ConnectionClosed("server closed the connection".into()));
            }
            ev = events.recv() => {
                let Some(ev) = ev else { return Ok(()); };
                println!("[{}] {}", ev.timestamp.to_rfc3339(), ev.event_type);
                if let Some(data) = &ev.data {
                    print(data);
                }
            }
        }
    }
}
