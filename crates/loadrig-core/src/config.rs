use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MICROS_PER_SECOND: u64 = 1_000_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

/// What the generator does with attempts still running once the deadline passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainPolicy {
    /// Join every dispatched attempt. Each one is bounded by its own timeout.
    #[default]
    Complete,
    /// Wait at most twice the per-request timeout, then abandon stragglers.
    Grace,
}

impl FromStr for DrainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "complete" => Ok(DrainPolicy::Complete),
            "grace" => Ok(DrainPolicy::Grace),
            other => Err(format!(
                "invalid drain policy: {other}, must be 'complete' or 'grace'"
            )),
        }
    }
}

impl fmt::Display for DrainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainPolicy::Complete => f.write_str("complete"),
            DrainPolicy::Grace => f.write_str("grace"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Target aggregate rate in requests per second
    pub rate: u64,
    /// Requests launched concurrently on every tick
    pub burst: u64,
    /// Per-request deadline in milliseconds
    pub timeout_ms: u64,
    /// Wall-clock length of the run in seconds
    pub runtime_secs: u64,
    /// Endpoint to probe; `http://` is assumed when no scheme is given
    pub url: String,
    pub drain: DrainPolicy,
    /// Log live tallies every N milliseconds (0 disables)
    pub print_every_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            rate: 200,
            burst: 30,
            timeout_ms: 400,
            runtime_secs: 20,
            url: "localhost:8080/time".to_string(),
            drain: DrainPolicy::Complete,
            print_every_ms: 1000,
        }
    }
}

impl LoadConfig {
    /// Rejects settings that would produce a nonsensical schedule.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate == 0 {
            anyhow::bail!("rate must be greater than zero");
        }
        if self.burst == 0 {
            anyhow::bail!("burst must be greater than zero");
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout_ms must be greater than zero");
        }
        if self.runtime_secs == 0 {
            anyhow::bail!("runtime_secs must be greater than zero");
        }
        if self.interval().is_none() {
            anyhow::bail!(
                "burst {} at rate {}/s gives a sub-microsecond tick interval",
                self.burst,
                self.rate
            );
        }
        let now = std::time::Instant::now();
        if now.checked_add(self.runtime()).is_none() {
            anyhow::bail!("runtime_secs {} is too large to schedule", self.runtime_secs);
        }
        if now.checked_add(self.grace_period()).is_none() {
            anyhow::bail!("timeout_ms {} is too large to schedule", self.timeout_ms);
        }
        self.target_url()?;
        Ok(())
    }

    /// Spacing between bursts: `burst / rate` seconds, in whole microseconds.
    ///
    /// `None` when the rate is zero or the interval rounds down to nothing.
    pub fn interval(&self) -> Option<Duration> {
        let micros = MICROS_PER_SECOND.checked_mul(self.burst)?.checked_div(self.rate)?;
        if micros == 0 {
            return None;
        }
        Some(Duration::from_micros(micros))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn runtime(&self) -> Duration {
        Duration::from_secs(self.runtime_secs)
    }

    /// How long `DrainPolicy::Grace` waits past the deadline.
    pub fn grace_period(&self) -> Duration {
        self.timeout().saturating_mul(2)
    }

    pub fn target_url(&self) -> anyhow::Result<url::Url> {
        let raw = self.url.trim();
        if raw.is_empty() {
            anyhow::bail!("url must not be empty");
        }
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let url = url::Url::parse(&with_scheme).with_context(|| format!("Invalid URL: {raw}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("url must be http:// or https:// (got {raw})");
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Mean simulated processing time in milliseconds (0 disables the delay)
    pub avg_response_ms: u64,
    /// Standard deviation of the simulated processing time
    pub deviation_ms: u64,
    /// Ceiling on concurrently processed requests (0 = unbounded)
    pub max_inflight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            avg_response_ms: 0,
            deviation_ms: 0,
            max_inflight: 0,
        }
    }
}
