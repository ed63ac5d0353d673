use anyhow::{Context, Result};
use clap::Parser;
use loadrig_core::{
    Config, Counter, DrainPolicy, HttpProber, LoadConfig, LoadGenerator, MockProber, Prober,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "loadgen")]
#[command(about = "Load generator - fires timed bursts of GET requests and tallies the responses")]
struct Args {
    /// Path to a TOML configuration file ([load] table)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Probe mode: http or mock
    #[arg(long, default_value = "http")]
    mode: String,

    /// Average rate of requests (per second)
    #[arg(long)]
    rate: Option<u64>,

    /// Number of concurrent requests to issue per tick
    #[arg(long)]
    burst: Option<u64>,

    /// Max time to wait for a response
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Number of seconds to run
    #[arg(long)]
    runtime_seconds: Option<u64>,

    /// URL to sample
    #[arg(long)]
    url: Option<String>,

    /// What to do with in-flight requests at the deadline: complete or grace
    #[arg(long)]
    drain: Option<DrainPolicy>,

    /// Log live tallies every N milliseconds (0 disables)
    #[arg(long)]
    print_every_ms: Option<u64>,

    /// Write the final report as JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<LoadConfig> {
        let mut config = match &self.config {
            Some(path) => {
                Config::from_file(path)
                    .with_context(|| format!("Failed to load config from {:?}", path))?
                    .load
            }
            None => LoadConfig::default(),
        };

        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(burst) = self.burst {
            config.burst = burst;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(runtime_seconds) = self.runtime_seconds {
            config.runtime_secs = runtime_seconds;
        }
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(drain) = self.drain {
            config.drain = drain;
        }
        if let Some(print_every_ms) = self.print_every_ms {
            config.print_every_ms = print_every_ms;
        }

        config.validate().context("Invalid load configuration")?;
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
    let config = args.load_config()?;

    let prober: Arc<dyn Prober> = match args.mode.as_str() {
        "mock" => Arc::new(MockProber::status(200, 5)), // 5ms simulated latency
        "http" => Arc::new(
            HttpProber::new(config.target_url()?, config.timeout())
                .context("Failed to create HTTP prober")?,
        ),
        _ => anyhow::bail!("Invalid mode: {}, must be 'mock' or 'http'", args.mode),
    };

    info!("Using prober: {}", prober.name());

    let counter = Counter::new();
    let generator = LoadGenerator::new(config, prober, counter.clone())?;
    let report = generator.run().await?;
    counter.close().await;

    report.print_summary();

    if let Some(path) = &args.output {
        report.write_json(path)?;
        info!("Results written to {:?}", path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "loadgen",
            "--rate",
            "100",
            "--burst",
            "10",
            "--timeout-ms",
            "250",
            "--runtime-seconds",
            "2",
            "--url",
            "http://127.0.0.1:9000/time",
            "--drain",
            "grace",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(config.rate, 100);
        assert_eq!(config.burst, 10);
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.runtime_secs, 2);
        assert_eq!(config.drain, DrainPolicy::Grace);
        assert_eq!(config.print_every_ms, LoadConfig::default().print_every_ms);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let args = Args::parse_from(["loadgen", "--rate", "0"]);
        assert!(args.load_config().is_err());
    }

    #[test]
    fn test_bad_drain_flag_is_a_parse_error() {
        assert!(Args::try_parse_from(["loadgen", "--drain", "never"]).is_err());
    }
}
