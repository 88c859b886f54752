//! Protocol-level reachability probes for lab presentations.
//!
//! Probes never fail: timeouts, refused connections and protocol mismatches
//! all come back as `false` so the caller can simply count healthy answers.

use std::time::Duration;

use antidote_core::PresentationType;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Identification prefix every SSH server sends first.
const SSH_BANNER_PREFIX: &[u8] = b"SSH-";

/// Longest identification line allowed by RFC 4253.
const MAX_BANNER_LEN: usize = 255;

/// Reachability checks against a single host and port.
#[async_trait]
pub trait HealthProber: Send + Sync {
    /// Check that an interactive shell answers on `host:port`.
    async fn shell_test(&self, host: &str, port: u16) -> bool;

    /// Check that `host:port` accepts TCP connections.
    async fn tcp_test(&self, host: &str, port: u16) -> bool;
}

/// Run the probe that matches a presentation type.
///
/// Shell presentations get the shell test; everything else gets a plain
/// TCP connect.
pub async fn probe(prober: &dyn HealthProber, kind: PresentationType, host: &str, port: u16) -> bool {
    if kind.is_shell() {
        prober.shell_test(host, port).await
    } else {
        prober.tcp_test(host, port).await
    }
}

/// Prober that opens real network connections.
#[derive(Debug, Clone)]
pub struct NetworkProber {
    timeout: Duration,
}

impl NetworkProber {
    /// Create a prober with the given per-probe timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn connect(&self, host: &str, port: u16) -> Option<TcpStream> {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "probe connection failed");
                None
            }
            Err(_) => {
                debug!(host, port, "probe connection timed out");
                None
            }
        }
    }
}

#[async_trait]
impl HealthProber for NetworkProber {
    async fn shell_test(&self, host: &str, port: u16) -> bool {
        let Some(mut stream) = self.connect(host, port).await else {
            return false;
        };

        let mut banner = Vec::with_capacity(64);
        let read = tokio::time::timeout(self.timeout, async {
            let mut buf = [0u8; 64];
            while !banner.contains(&b'\n') && banner.len() < MAX_BANNER_LEN {
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                banner.extend_from_slice(&buf[..n]);
            }
            Ok::<_, std::io::Error>(())
        })
        .await;

        match read {
            Ok(Ok(())) if banner.starts_with(SSH_BANNER_PREFIX) => true,
            Ok(Ok(())) => {
                debug!(host, port, "shell probe got no SSH banner");
                false
            }
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "shell probe read failed");
                false
            }
            Err(_) => {
                debug!(host, port, "shell probe timed out waiting for banner");
                false
            }
        }
    }

    async fn tcp_test(&self, host: &str, port: u16) -> bool {
        self.connect(host, port).await.is_some()
    }
}

/// A prober with scripted answers, for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers `true` for every probe except hosts marked down.
    #[derive(Debug, Default)]
    pub struct StaticProber {
        down: Mutex<HashSet<String>>,
        shell_calls: AtomicUsize,
        tcp_calls: AtomicUsize,
    }

    impl StaticProber {
        /// A prober where every host is up.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make probes against `host` fail.
        pub fn set_down(&self, host: impl Into<String>) {
            self.down.lock().insert(host.into());
        }

        /// Make probes against `host` succeed again.
        pub fn set_up(&self, host: &str) {
            self.down.lock().remove(host);
        }

        /// Number of shell probes run.
        #[must_use]
        pub fn shell_calls(&self) -> usize {
            self.shell_calls.load(Ordering::SeqCst)
        }

        /// Number of TCP probes run.
        #[must_use]
        pub fn tcp_calls(&self) -> usize {
            self.tcp_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProber for StaticProber {
        async fn shell_test(&self, host: &str, _port: u16) -> bool {
            self.shell_calls.fetch_add(1, Ordering::SeqCst);
            !self.down.lock().contains(host)
        }

        async fn tcp_test(&self, host: &str, _port: u16) -> bool {
            self.tcp_calls.fetch_add(1, Ordering::SeqCst);
            !self.down.lock().contains(host)
        }
    }
}
