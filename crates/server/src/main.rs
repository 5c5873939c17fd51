//! Contour session server binary.
//!
//! Listens for one tracing client over WebSocket and reads operator commands
//! from stdin.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use contour_server::edge::{Edge, spawn_stdin_reader};
use contour_server::{DEFAULT_HOST, DEFAULT_OUTPUT_DIR, DEFAULT_PORT, Server, ServerConfig};
use contour_trial::TrialWriter;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "contour-server", version, about = "Curve-tracing experiment server")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "CONTOUR_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(long, env = "CONTOUR_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory receiving trial records and plots
    #[arg(long, env = "CONTOUR_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            output_dir: self.output_dir,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = cli.into_config();
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    info!("WebSocket server started at ws://{}", listener.local_addr()?);

    let visualizer = Arc::new(TrialWriter::new(config.output_dir.clone()));
    let edge = Edge::new(Server::new(config), visualizer);
    let accept = tokio::spawn(edge.clone().serve(listener));

    let lines = spawn_stdin_reader().context("failed to start console reader")?;

    tokio::select! {
        _ = edge.run_console(lines) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("interrupted");
        }
    }

    accept.abort();
    info!("server stopped");
    Ok(())
}
