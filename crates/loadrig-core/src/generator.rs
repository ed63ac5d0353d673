//! Timed bursts of concurrent probes, tallied through a [`Counter`].

use crate::bucket::{Bucket, TOTAL_KEY};
use crate::config::{DrainPolicy, LoadConfig};
use crate::counter::Counter;
use crate::probe::Prober;
use crate::report::RunReport;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct LoadGenerator {
    config: LoadConfig,
    prober: Arc<dyn Prober>,
    counter: Counter,
}

impl LoadGenerator {
    /// Fails when `config` does not describe a usable schedule.
    pub fn new(config: LoadConfig, prober: Arc<dyn Prober>, counter: Counter) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            prober,
            counter,
        })
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Fires bursts until the runtime elapses, drains the attempts still in
    /// flight according to the drain policy, and reads back the tallies.
    pub async fn run(&self) -> Result<RunReport> {
        let interval = self
            .config
            .interval()
            .context("burst interval must be non-zero")?;
        let start = Instant::now();
        let deadline = start
            .checked_add(self.config.runtime())
            .context("runtime is too large to schedule")?;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            "Loading {} with {} x {} every {:?} for {:?}",
            self.config.url,
            self.config.burst,
            self.prober.name(),
            interval,
            self.config.runtime()
        );

        let mut attempts = JoinSet::new();
        let mut bursts = 0u64;
        let mut last_progress = Instant::now();
        let progress_every = Duration::from_millis(self.config.print_every_ms);

        loop {
            self.fire_burst(&mut attempts);
            bursts += 1;

            ticker.tick().await;

            while let Some(joined) = attempts.try_join_next() {
                log_join_error(joined);
            }

            if !progress_every.is_zero() && last_progress.elapsed() >= progress_every {
                self.log_progress(bursts, attempts.len()).await;
                last_progress = Instant::now();
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        info!(
            bursts,
            in_flight = attempts.len(),
            "Deadline reached, draining ({})",
            self.config.drain
        );
        self.drain(&mut attempts).await;

        let report = RunReport::collect(&self.counter, &self.config.url, bursts, start.elapsed())
            .await
            .context("counter closed before the report was read")?;
        if !report.is_balanced() {
            warn!(total = report.total, "bucket counts do not add up to total");
        }
        Ok(report)
    }

    fn fire_burst(&self, attempts: &mut JoinSet<Bucket>) {
        debug!(burst = self.config.burst, "Fire a burst");
        for _ in 0..self.config.burst {
            let prober = Arc::clone(&self.prober);
            let counter = self.counter.clone();
            let timeout = self.config.timeout();
            attempts.spawn(async move { probe_once(prober.as_ref(), &counter, timeout).await });
        }
    }

    async fn drain(&self, attempts: &mut JoinSet<Bucket>) {
        match self.config.drain {
            DrainPolicy::Complete => join_all(attempts).await,
            // Every attempt carries its own timeout, so the grace bound only
            // trips for probers that block their worker thread.
            DrainPolicy::Grace => {
                let grace = self.config.grace_period();
                if tokio::time::timeout(grace, join_all(attempts)).await.is_err() {
                    warn!(
                        abandoned = attempts.len(),
                        "Grace period of {:?} elapsed, abandoning attempts",
                        grace
                    );
                    attempts.abort_all();
                }
            }
        }
    }

    async fn log_progress(&self, bursts: u64, in_flight: usize) {
        let total = self.counter.get(TOTAL_KEY).await.unwrap_or_default();
        let ok = self.counter.get(Bucket::Success.key()).await.unwrap_or_default();
        let errors = self.counter.get(Bucket::Errors.key()).await.unwrap_or_default();
        info!(
            "Progress: bursts={} in_flight={} total={} 200s={} errors={}",
            bursts, in_flight, total, ok, errors
        );
    }
}

/// One probe bounded by `timeout`, recorded in its bucket and in `total`.
pub async fn probe_once(prober: &dyn Prober, counter: &Counter, timeout: Duration) -> Bucket {
    let bucket = match tokio::time::timeout(timeout, prober.probe()).await {
        Ok(Ok(status)) => {
            let bucket = Bucket::from_status(status);
            debug!(status, %bucket, "Response");
            bucket
        }
        Ok(Err(e)) => {
            debug!(error = %e, "No response");
            Bucket::Errors
        }
        Err(_) => {
            debug!(?timeout, "No response before timeout");
            Bucket::Errors
        }
    };
    record(counter, bucket);
    bucket
}

// One message for bucket and total: no reader ever sees one without the other.
fn record(counter: &Counter, bucket: Bucket) {
    if counter.increment_all(&[bucket.key(), TOTAL_KEY], 1).is_err() {
        warn!(%bucket, "counter closed, outcome dropped");
    }
}

async fn join_all(attempts: &mut JoinSet<Bucket>) {
    while let Some(joined) = attempts.join_next().await {
        log_join_error(joined);
    }
}

fn log_join_error(joined: Result<Bucket, JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!("probe task panicked: {}", e);
        }
    }
}
