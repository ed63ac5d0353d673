use serde::{Deserialize, Serialize};
use std::fmt;

/// Counter key incremented once for every finished probe.
pub const TOTAL_KEY: &str = "total";

/// Outcome class of a single probe, keyed by the status code's hundreds digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bucket {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    /// Transport failures, timeouts, and status codes outside 100..=599
    Errors,
}

impl Bucket {
    pub const ALL: [Bucket; 6] = [
        Bucket::Informational,
        Bucket::Success,
        Bucket::Redirection,
        Bucket::ClientError,
        Bucket::ServerError,
        Bucket::Errors,
    ];

    pub fn from_status(code: u16) -> Self {
        match code / 100 {
            1 => Bucket::Informational,
            2 => Bucket::Success,
            3 => Bucket::Redirection,
            4 => Bucket::ClientError,
            5 => Bucket::ServerError,
            _ => Bucket::Errors,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Bucket::Informational => "100s",
            Bucket::Success => "200s",
            Bucket::Redirection => "300s",
            Bucket::ClientError => "400s",
            Bucket::ServerError => "500s",
            Bucket::Errors => "errors",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
