use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// A single GET against the target: the status code, or why none arrived.
pub trait Prober: Send + Sync {
    fn name(&self) -> &'static str;

    fn probe(&self) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>>;
}

/// Canned prober for tests and dry runs (fixed outcome after a fixed delay)
pub struct MockProber {
    delay: Duration,
    status: Option<u16>,
}

impl MockProber {
    pub fn status(status: u16, delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            status: Some(status),
        }
    }

    /// Every probe fails as if the connection had been refused.
    pub fn failing(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            status: None,
        }
    }
}

impl Prober for MockProber {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn probe(&self) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            match self.status {
                Some(status) => Ok(status),
                None => anyhow::bail!("connection refused (mock)"),
            }
        })
    }
}

/// Real HTTP prober. Redirects are followed; the body is never read.
pub struct HttpProber {
    client: reqwest::Client,
    url: url::Url,
}

impl HttpProber {
    pub fn new(url: url::Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

impl Prober for HttpProber {
    fn name(&self) -> &'static str {
        "http"
    }

    fn probe(&self) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + '_>> {
        Box::pin(async move {
            match self.client.get(self.url.clone()).send().await {
                Ok(response) => Ok(response.status().as_u16()),
                Err(e) => {
                    if e.is_timeout() {
                        debug!("probe timed out");
                    } else if e.is_connect() {
                        debug!(error = %e, "probe could not connect");
                    }
                    Err(e.into())
                }
            }
        })
    }
}
