use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Cloudflare's resolver answers on plain TCP from almost anywhere, which
/// makes it a cheap reachability beacon.
pub const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:80";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Reachability check consulted before every remote call.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Absence of connectivity is a normal outcome, never an error.
    async fn is_connected(&self) -> bool;
}

/// Probe that opens (and immediately drops) a short-timeout TCP connection
/// to a well-known address.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_ADDR, DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_connected(&self) -> bool {
        match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                debug!(addr = %self.addr, error = %err, "connectivity probe failed");
                false
            }
            Err(_elapsed) => {
                debug!(addr = %self.addr, "connectivity probe timed out");
                false
            }
        }
    }
}
