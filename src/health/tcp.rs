//! # TCP connect prober.
//!
//! Healthy iff a TCP connection to `host:port` is accepted within the
//! timeout. Refused, unreachable, reset, and timed-out connects are all
//! unhealthy verdicts; the distinction only shows up in the message.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time;

use super::{ProbeReport, Prober};

/// Probes a TCP endpoint by completing a connect.
pub struct TcpProber {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProber {
    /// Creates a prober for `host:port` with the given per-call timeout.
    pub fn new(host: String, port: u16, timeout: Duration) -> Self {
        Self {
            host,
            port,
            timeout,
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self) -> ProbeReport {
        let addr = format!("{}:{}", self.host, self.port);
        match time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => ProbeReport::healthy(format!("connected to {addr}")),
            Ok(Err(err)) => ProbeReport::unhealthy(format!("connect to {addr} failed: {err}")),
            Err(_elapsed) => {
                ProbeReport::unhealthy(format!("connect to {addr} timed out after {:?}", self.timeout))
            }
        }
    }
}
