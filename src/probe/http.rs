//! HTTP check executor.

use std::time::{Duration, Instant};

use super::{classify_status, ProbeError, TransportFailure};
use crate::db::Outcome;

const MAX_REDIRECTS: usize = 10;

/// Executes single GET checks with a shared client.
///
/// The connect timeout is fixed per executor; the overall timeout is per call.
#[derive(Clone)]
pub struct CheckExecutor {
    client: reqwest::Client,
}

impl CheckExecutor {
    pub fn new(connect_timeout: Duration, accept_invalid_certs: bool) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .no_proxy()
            .user_agent(concat!("pulsewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Unknown(e.to_string()))?;

        Ok(Self { client })
    }

    /// Probe `address`.
    ///
    /// `Ok` means a response was classified (including non-2xx/3xx). `Err` means the
    /// request failed below HTTP.
    pub async fn probe(&self, address: &str, timeout: Duration) -> Result<Outcome, TransportFailure> {
        let url = normalize_url(address);
        let start = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportFailure::new(categorize(&e)))?;

        let code = response.status().as_u16();

        // Read the full body so latency covers the complete transfer
        if let Err(e) = response.bytes().await {
            return Err(TransportFailure {
                error: categorize(&e),
                latency_ms: Some(elapsed_ms(start)),
                http_code: Some(code),
            });
        }

        Ok(classify_status(code, elapsed_ms(start)))
    }
}

fn normalize_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

fn categorize(e: &reqwest::Error) -> ProbeError {
    if e.is_timeout() || e.is_connect() {
        ProbeError::Unreachable
    } else if e.is_request() || e.is_redirect() || e.is_body() || e.is_decode() || e.is_builder() {
        ProbeError::Request(e.to_string())
    } else {
        ProbeError::Unknown(e.to_string())
    }
}
