use crate::bucket::{Bucket, TOTAL_KEY};
use crate::counter::{Counter, CounterError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Final tallies of a run, read back from the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp: String,
    pub url: String,
    pub duration_ms: u64,
    pub bursts: u64,
    pub total: i64,
    /// Keyed `100s`..`500s`, `errors`; every bucket present, zero if unseen
    pub buckets: BTreeMap<String, i64>,
    pub achieved_rps: u64,
}

impl RunReport {
    pub async fn collect(
        counter: &Counter,
        url: &str,
        bursts: u64,
        elapsed: Duration,
    ) -> Result<Self, CounterError> {
        // One snapshot, so late records land in all of the counts or none.
        let snapshot = counter.snapshot().await?;
        let read = |key: &str| snapshot.get(key).copied().unwrap_or(0);
        let total = read(TOTAL_KEY);
        let buckets: BTreeMap<String, i64> = Bucket::ALL
            .iter()
            .map(|bucket| (bucket.key().to_string(), read(bucket.key())))
            .collect();

        let duration_ms = elapsed.as_millis() as u64;
        let achieved_rps = if duration_ms > 0 {
            (total.max(0) as u64 * 1000) / duration_ms
        } else {
            0
        };

        Ok(Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            url: url.to_string(),
            duration_ms,
            bursts,
            total,
            buckets,
            achieved_rps,
        })
    }

    pub fn count(&self, bucket: Bucket) -> i64 {
        self.buckets.get(bucket.key()).copied().unwrap_or(0)
    }

    /// `total` equals the sum over all buckets.
    pub fn is_balanced(&self) -> bool {
        let sum: i64 = Bucket::ALL.iter().map(|b| self.count(*b)).sum();
        sum == self.total
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    pub fn print_summary(&self) {
        println!("\n=== Load Test Summary ===");
        println!("Target: {}", self.url);
        println!("Duration: {}ms", self.duration_ms);
        println!("Bursts: {}", self.bursts);
        println!("Achieved RPS: {}", self.achieved_rps);
        println!("total: \t{}", self.total);
        for bucket in Bucket::ALL {
            println!("{}: \t{}", bucket.key(), self.count(bucket));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_fills_every_bucket() {
        let counter = Counter::new();
        counter.increment("200s", 3).unwrap();
        counter.increment("errors", 1).unwrap();
        counter.increment(TOTAL_KEY, 4).unwrap();

        let report = RunReport::collect(&counter, "http://x/time", 2, Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(report.buckets.len(), Bucket::ALL.len());
        assert_eq!(report.count(Bucket::Success), 3);
        assert_eq!(report.count(Bucket::Errors), 1);
        assert_eq!(report.count(Bucket::Redirection), 0);
        assert_eq!(report.achieved_rps, 2);
        assert!(report.is_balanced());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_collect_is_balanced_while_records_arrive() {
        let counter = Counter::new();
        let writer = {
            let counter = counter.clone();
            tokio::spawn(async move {
                for i in 0..3_000 {
                    let bucket = Bucket::ALL[i % Bucket::ALL.len()];
                    counter.increment_all(&[bucket.key(), TOTAL_KEY], 1).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        while !writer.is_finished() {
            let report = RunReport::collect(&counter, "u", 1, Duration::from_millis(1))
                .await
                .unwrap();
            assert!(report.is_balanced(), "{report:?}");
        }
        writer.await.unwrap();

        let report = RunReport::collect(&counter, "u", 1, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(report.total, 3_000);
        assert_eq!(report.count(Bucket::Errors), 500);
    }

    #[tokio::test]
    async fn test_unbalanced_total_is_detected() {
        let counter = Counter::new();
        counter.increment("200s", 1).unwrap();
        counter.increment(TOTAL_KEY, 2).unwrap();

        let report = RunReport::collect(&counter, "u", 1, Duration::ZERO)
            .await
            .unwrap();
        assert!(!report.is_balanced());
        assert_eq!(report.achieved_rps, 0);
    }

    #[tokio::test]
    async fn test_collect_after_close_fails() {
        let counter = Counter::new();
        counter.close().await;
        let err = RunReport::collect(&counter, "u", 0, Duration::ZERO).await;
        assert_eq!(err.unwrap_err(), CounterError::Closed);
    }

    #[tokio::test]
    async fn test_write_json() {
        let counter = Counter::new();
        counter.increment("400s", 1).unwrap();
        counter.increment(TOTAL_KEY, 1).unwrap();
        let report = RunReport::collect(&counter, "u", 1, Duration::from_millis(10))
            .await
            .unwrap();

        let dir = std::env::temp_dir().join(format!("loadrig-report-{}", std::process::id()));
        let path = dir.join("run.json");
        report.write_json(&path).unwrap();

        let back: RunReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report);
        std::fs::remove_dir_all(dir).ok();
    }
}
