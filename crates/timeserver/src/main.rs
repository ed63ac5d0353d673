use anyhow::{Context, Result};
use clap::Parser;
use loadrig_core::{Config, ServerConfig, ServerState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "timeserver", version)]
#[command(about = "Time server with admission control and simulated response latency")]
struct Args {
    /// Path to a TOML configuration file ([server] table)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Mean simulated response time in milliseconds (0 disables)
    #[arg(long)]
    avg_response_ms: Option<u64>,

    /// Standard deviation of the simulated response time
    #[arg(long)]
    deviation_ms: Option<u64>,

    /// Maximum requests processed at once (0 = unbounded)
    #[arg(long)]
    max_inflight: Option<usize>,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                Config::from_file(path)
                    .with_context(|| format!("Failed to load config from {:?}", path))?
                    .server
            }
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(avg_response_ms) = self.avg_response_ms {
            config.avg_response_ms = avg_response_ms;
        }
        if let Some(deviation_ms) = self.deviation_ms {
            config.deviation_ms = deviation_ms;
        }
        if let Some(max_inflight) = self.max_inflight {
            config.max_inflight = max_inflight;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.server_config()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Port {} occupied", config.port))?;

    loadrig_core::serve(listener, ServerState::from_config(&config), shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "timeserver",
            "--port",
            "9090",
            "--avg-response-ms",
            "40",
            "--deviation-ms",
            "10",
            "--max-inflight",
            "8",
        ]);
        let config = args.server_config().unwrap();
        assert_eq!(
            config,
            ServerConfig {
                port: 9090,
                avg_response_ms: 40,
                deviation_ms: 10,
                max_inflight: 8,
            }
        );
    }

    #[test]
    fn test_defaults_are_unbounded() {
        let config = Args::parse_from(["timeserver"]).server_config().unwrap();
        assert_eq!(config.max_inflight, 0);
        assert_eq!(config.port, 8080);
    }
}
