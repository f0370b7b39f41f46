//! Probe module for reachability checks.
//!
//! A probe sends one GET to a target and classifies what came back. It never retries
//! and never touches the store; retry and recording belong to the scheduler.

mod http;
#[cfg(test)]
pub mod testing;

pub use http::*;

use crate::db::Outcome;
use thiserror::Error;

/// Transport-level failure categories.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection timeout or refused")]
    Unreachable,
    #[error("request failed: {0}")]
    Request(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// A probe that failed below the HTTP layer.
///
/// Carries whatever was observed before the failure, so a body read that dies after the
/// status line still records latency and status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct TransportFailure {
    pub error: ProbeError,
    pub latency_ms: Option<u64>,
    pub http_code: Option<u16>,
}

impl TransportFailure {
    pub fn new(error: ProbeError) -> Self {
        Self {
            error,
            latency_ms: None,
            http_code: None,
        }
    }

    /// A down outcome keeping whatever latency and status code were observed.
    pub fn into_down(self, detail: impl Into<String>) -> Outcome {
        Outcome::Down {
            detail: detail.into(),
            latency_ms: self.latency_ms,
            http_code: self.http_code,
        }
    }
}

/// Classify a response status: 2xx and 3xx are up, everything else is down.
pub fn classify_status(code: u16, latency_ms: u64) -> Outcome {
    if (200..400).contains(&code) {
        Outcome::Up {
            latency_ms,
            http_code: code,
        }
    } else {
        Outcome::Down {
            latency_ms: Some(latency_ms),
            http_code: Some(code),
            detail: format!("HTTP {}", code),
        }
    }
}
