//! HTTP and TCP probes against a worker's `http://localhost:{port}` (§4.2).
//!
//! Busy-ness is queried from the worker itself — the dispatcher never
//! observes the completion boundary of a proxied request body, so the
//! worker's own `/isbusy` counter is the only source of truth (§9,
//! "Busy query, not busy push").

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(1);
const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of probing a worker's `/isbusy` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyState {
    Free,
    Busy,
    Unreachable,
}

#[derive(Clone)]
pub struct ProbeClient {
    http: reqwest::Client,
}

impl ProbeClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .build()
                .expect("reqwest client builder should not fail"),
        }
    }

    /// `GET /healthcheck` — true iff the response is 2xx.
    pub async fn probe_ready(&self, port: u16) -> bool {
        let url = format!("http://localhost:{port}/healthcheck");
        match tokio::time::timeout(READY_TIMEOUT, self.http.get(&url).send()).await {
            Ok(Ok(resp)) => resp.status().is_success(),
            _ => false,
        }
    }

    /// `GET /isbusy` — the body is a decimal integer active-request count.
    /// Must not itself be counted as a request by the worker.
    pub async fn probe_busy(&self, port: u16) -> BusyState {
        let url = format!("http://localhost:{port}/isbusy");
        let response = tokio::time::timeout(BUSY_TIMEOUT, self.http.get(&url).send()).await;
        let body = match response {
            Ok(Ok(resp)) if resp.status().is_success() => match resp.text().await {
                Ok(text) => text,
                Err(_) => return BusyState::Unreachable,
            },
            _ => return BusyState::Unreachable,
        };
        match body.trim().parse::<u64>() {
            Ok(0) => BusyState::Free,
            Ok(_) => BusyState::Busy,
            Err(_) => BusyState::Unreachable,
        }
    }

    /// Raw TCP connect for coarse liveness checks, independent of HTTP.
    pub fn tcp_open(&self, port: u16, timeout: Duration) -> bool {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        TcpStream::connect_timeout(&addr, timeout).is_ok()
    }
}

impl Default for ProbeClient {
    fn default() -> Self {
        Self::new()
    }
}
