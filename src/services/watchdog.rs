//! Gateway health watchdog
//!
//! The wallpad broadcasts state many times a second, so silence on the
//! inbound path means the EW11 has wedged. The watchdog wakes on the
//! configured timeout and, when the last received byte is older than that
//! timeout, reboots the gateway over its telnet console. The data channel
//! is left alone; the receiver and transmitter paths handle their own
//! socket errors and reconnects.

use crate::infra::config::Config;
use crate::io::telnet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct Watchdog {
    period: Duration,
    host: String,
    id: String,
    password: String,
    last_received: Arc<Mutex<Option<Instant>>>,
}

impl Watchdog {
    pub fn new(config: &Config, last_received: Arc<Mutex<Option<Instant>>>) -> Self {
        Self {
            period: config.ew11_timeout(),
            host: config.ew11_server().to_string(),
            id: config.ew11_id().to_string(),
            password: config.ew11_password().to_string(),
            last_received,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(period_secs = self.period.as_secs(), "watchdog_started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("watchdog_shutdown");
                        return;
                    }
                    continue;
                }
            }

            // Until the first byte arrives there is nothing to compare against
            let stale = self.last_received.lock().is_some_and(|t| t.elapsed() > self.period);
            if stale {
                warn!(
                    timeout_secs = self.period.as_secs(),
                    host = %self.host,
                    "ew11_stale_restarting"
                );
                match telnet::reboot(&self.host, &self.id, &self.password).await {
                    Ok(()) => info!(host = %self.host, "ew11_restart_sent"),
                    Err(e) => warn!(host = %self.host, error = %e, "ew11_restart_failed"),
                }
            } else {
                debug!("ew11_link_ok");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_predicate() {
        let last_received: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let period = Duration::from_millis(5);

        // Never received: healthy
        assert!(!last_received.lock().is_some_and(|t| t.elapsed() > period));

        // Fresh: healthy against a generous period
        *last_received.lock() = Some(Instant::now());
        assert!(!last_received.lock().is_some_and(|t| t.elapsed() > Duration::from_secs(300)));

        // Older than the period: stale
        std::thread::sleep(Duration::from_millis(10));
        assert!(last_received.lock().is_some_and(|t| t.elapsed() > period));
    }
}
