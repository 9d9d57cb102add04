// src/watchdog.rs

//! Liveness enforcement for running workers.
//!
//! Workers are expected to exit on their own when nobody pings them. Arming
//! a watchdog keeps a healthy worker fed; an orphaned one (owner crashed
//! without releasing it) stops being pinged and goes away.

use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpStream;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, trace};

/// Arms liveness enforcement for a worker that just completed its handshake.
///
/// Best effort: the supervisor logs an `Err` and carries on.
pub trait Watchdog: Send + Sync {
    fn arm(&self, host: &str, port: u16) -> anyhow::Result<()>;
}

/// Watchdog that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn arm(&self, _host: &str, _port: u16) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Pings the worker over TCP at a fixed interval until a ping fails.
#[derive(Debug, Clone)]
pub struct PingWatchdog {
    period: Duration,
    connect_timeout: Duration,
}

impl PingWatchdog {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            connect_timeout: period.min(Duration::from_secs(2)),
        }
    }
}

impl Watchdog for PingWatchdog {
    fn arm(&self, host: &str, port: u16) -> anyhow::Result<()> {
        let rt = tokio::runtime::Handle::try_current()
            .context("ping watchdog needs a running tokio runtime")?;
        let ping_host = host.to_string();
        let period = self.period;
        let connect_timeout = self.connect_timeout;

        rt.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the handshake just proved liveness.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let ping = TcpStream::connect((ping_host.as_str(), port));
                match timeout(connect_timeout, ping).await {
                    Ok(Ok(_)) => trace!(host = %ping_host, port, "worker ping ok"),
                    Ok(Err(e)) => {
                        debug!(
                            host = %ping_host,
                            port,
                            error = %e,
                            "worker ping failed; disarming"
                        );
                        break;
                    }
                    Err(_) => {
                        debug!(host = %ping_host, port, "worker ping timed out; disarming");
                        break;
                    }
                }
            }
        });

        debug!(host, port, period_ms = period.as_millis() as u64, "watchdog armed");
        Ok(())
    }
}
