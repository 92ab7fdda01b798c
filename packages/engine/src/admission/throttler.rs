// packages/engine/src/admission/throttler.rs
//! Per-client fixed-window throttling
//!
//! Each client identity has two counters:
//!
//! - **in flight**: admitted requests that have not finished yet, capped by
//!   `concurrency`
//! - **window requests**: every attempt since the last flush, capped by
//!   `quota`
//!
//! A periodic flush clears the window counters. Rejected attempts still count
//! against the quota.

use crate::utils::config::ThrottleConfig;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
struct ThrottleState {
    clients: HashMap<IpAddr, usize>,
    requests: HashMap<IpAddr, usize>,
}

pub struct Throttler {
    concurrency: usize,
    quota: usize,
    reset_concurrency_on_flush: bool,
    state: Mutex<ThrottleState>,
}

impl Throttler {
    pub fn new(concurrency: usize, quota: usize) -> Self {
        Self {
            concurrency,
            quota,
            reset_concurrency_on_flush: true,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self {
            reset_concurrency_on_flush: config.reset_concurrency_on_flush,
            ..Self::new(config.concurrency, config.quota)
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Count an attempt and admit it if both caps allow
    pub fn add(&self, client: IpAddr) -> Result<()> {
        let mut state = self.state.lock();

        let requests = state.requests.entry(client).or_insert(0);
        *requests += 1;
        let over_quota = *requests > self.quota;

        let in_flight = state.clients.entry(client).or_insert(0);
        if over_quota || *in_flight >= self.concurrency {
            metrics::counter!("sandrun_throttle_rejections_total").increment(1);
            debug!("Throttled request from {}", client);
            return Err(EngineError::ThrottleRejected);
        }

        *in_flight += 1;
        Ok(())
    }

    /// Mark one admitted request from `client` as finished
    pub fn remove(&self, client: IpAddr) {
        let mut state = self.state.lock();
        if let Some(in_flight) = state.clients.get_mut(&client) {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    /// Admit `client`, returning a permit that releases the slot on drop
    pub fn admit(self: &Arc<Self>, client: IpAddr) -> Result<ThrottlePermit> {
        self.add(client)?;
        Ok(ThrottlePermit {
            throttler: Arc::clone(self),
            client,
        })
    }

    /// Start a new window
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.requests.clear();
        if self.reset_concurrency_on_flush {
            state.clients.clear();
        } else {
            state.clients.retain(|_, n| *n > 0);
        }
    }

    pub fn in_flight(&self, client: IpAddr) -> usize {
        self.state.lock().clients.get(&client).copied().unwrap_or(0)
    }

    pub fn window_requests(&self, client: IpAddr) -> usize {
        self.state.lock().requests.get(&client).copied().unwrap_or(0)
    }

    /// Flush every `interval` until cancelled
    pub fn spawn_flush(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let throttler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => throttler.flush(),
                }
            }
        })
    }
}

/// An admitted request's concurrency slot
pub struct ThrottlePermit {
    throttler: Arc<Throttler>,
    client: IpAddr,
}

impl ThrottlePermit {
    pub fn client(&self) -> IpAddr {
        self.client
    }
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        self.throttler.remove(self.client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_concurrency_cap() {
        let throttler = Throttler::new(1, 5);

        assert!(throttler.add(ip(1)).is_ok());
        let err = throttler.add(ip(1)).unwrap_err();
        assert!(matches!(err, EngineError::ThrottleRejected));
        assert_eq!(err.to_string(), "too many requests");

        // Other clients are unaffected
        assert!(throttler.add(ip(2)).is_ok());

        throttler.remove(ip(1));
        assert!(throttler.add(ip(1)).is_ok());
    }

    #[test]
    fn test_concurrent_adds_admit_exactly_one() {
        let throttler = Arc::new(Throttler::new(1, 5));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let throttler = Arc::clone(&throttler);
                std::thread::spawn(move || throttler.add(ip(1)).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_quota_resets_on_flush() {
        let throttler = Throttler::new(10, 5);

        for _ in 0..5 {
            assert!(throttler.add(ip(1)).is_ok());
        }
        assert!(throttler.add(ip(1)).is_err());

        throttler.flush();
        assert!(throttler.add(ip(1)).is_ok());
    }

    #[test]
    fn test_remove_floors_at_zero() {
        let throttler = Throttler::new(1, 5);
        throttler.remove(ip(1));
        throttler.remove(ip(1));
        assert_eq!(throttler.in_flight(ip(1)), 0);

        assert!(throttler.add(ip(1)).is_ok());
        assert_eq!(throttler.in_flight(ip(1)), 1);
    }

    #[test]
    fn test_flush_keeps_in_flight_when_configured() {
        let throttler = Throttler::from_config(&ThrottleConfig {
            concurrency: 1,
            quota: 5,
            reset_concurrency_on_flush: false,
            ..Default::default()
        });

        throttler.add(ip(1)).unwrap();
        throttler.flush();
        assert_eq!(throttler.window_requests(ip(1)), 0);
        assert_eq!(throttler.in_flight(ip(1)), 1);
        assert!(throttler.add(ip(1)).is_err());
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let throttler = Arc::new(Throttler::new(1, 5));

        {
            let permit = throttler.admit(ip(1)).unwrap();
            assert_eq!(permit.client(), ip(1));
            assert!(throttler.admit(ip(1)).is_err());
        }

        assert_eq!(throttler.in_flight(ip(1)), 0);
        assert!(throttler.admit(ip(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let throttler = Arc::new(Throttler::new(10, 1));
        let shutdown = CancellationToken::new();

        throttler.add(ip(1)).unwrap();
        assert!(throttler.add(ip(1)).is_err());

        let task = throttler.spawn_flush(Duration::from_secs(5), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(throttler.add(ip(1)).is_ok());

        shutdown.cancel();
        task.await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_caps_hold(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let throttler = Throttler::new(2, 8);
            let mut admitted = 0usize;

            for add in ops {
                if add {
                    if throttler.add(ip(1)).is_ok() {
                        admitted += 1;
                    }
                } else {
                    throttler.remove(ip(1));
                }
                prop_assert!(throttler.in_flight(ip(1)) <= 2);
            }

            prop_assert!(admitted <= 8);
        }
    }
}
