//! Per-remote-address auth throttle: each failed credential check pushes
//! the address's next-accept time further out along a configured delay
//! curve, capped, and decaying after a success or a cooldown window.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct ThrottleRecord {
    failures: u32,
    next_accept: Instant,
    last_failure: Instant,
}

#[derive(Debug)]
pub struct AuthThrottle {
    curve: Vec<Duration>,
    cooldown: Duration,
    records: Mutex<HashMap<IpAddr, ThrottleRecord>>,
}

impl AuthThrottle {
    /// `curve[i]` is the delay applied after the `i+1`-th consecutive
    /// failure; once exhausted, the last entry repeats as the cap. An empty
    /// curve disables throttling entirely.
    pub fn new(curve: Vec<Duration>, cooldown: Duration) -> Self {
        AuthThrottle {
            curve,
            cooldown,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// How long a credential check against `addr` must still wait, right
    /// now. Zero if the address isn't throttled. Callers should race this
    /// against disconnect cancellation rather than blocking the whole
    /// session task on it.
    pub fn wait_duration(&self, addr: IpAddr) -> Duration {
        let now = Instant::now();
        let records = self.records.lock().expect("throttle poisoned");
        match records.get(&addr) {
            Some(record) if now < record.next_accept => record.next_accept - now,
            _ => Duration::ZERO,
        }
    }

    pub fn record_failure(&self, addr: IpAddr) {
        if self.curve.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut records = self.records.lock().expect("throttle poisoned");
        let record = records.entry(addr).or_insert(ThrottleRecord {
            failures: 0,
            next_accept: now,
            last_failure: now,
        });

        if now.duration_since(record.last_failure) > self.cooldown {
            record.failures = 0;
        }

        record.failures += 1;
        record.last_failure = now;
        let idx = (record.failures as usize).saturating_sub(1);
        let delay = self
            .curve
            .get(idx)
            .copied()
            .unwrap_or_else(|| *self.curve.last().expect("checked non-empty above"));
        record.next_accept = now + delay;
    }

    pub fn record_success(&self, addr: IpAddr) {
        self.records.lock().expect("throttle poisoned").remove(&addr);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn curve() -> Vec<Duration> {
        vec![
            Duration::from_secs(0),
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]
    }

    #[test]
    fn fresh_address_has_no_delay() {
        let throttle = AuthThrottle::new(curve(), Duration::from_secs(60));
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(throttle.wait_duration(addr), Duration::ZERO);
    }

    #[test]
    fn repeated_failures_grow_the_delay() {
        let throttle = AuthThrottle::new(curve(), Duration::from_secs(60));
        let addr: IpAddr = "127.0.0.2".parse().unwrap();
        throttle.record_failure(addr);
        assert_eq!(throttle.wait_duration(addr), Duration::from_secs(0));
        throttle.record_failure(addr);
        assert!(throttle.wait_duration(addr) <= Duration::from_secs(1));
        throttle.record_failure(addr);
        assert!(throttle.wait_duration(addr) <= Duration::from_secs(2));
    }

    #[test]
    fn delay_caps_at_last_curve_entry() {
        let throttle = AuthThrottle::new(curve(), Duration::from_secs(60));
        let addr: IpAddr = "127.0.0.3".parse().unwrap();
        for _ in 0..10 {
            throttle.record_failure(addr);
        }
        assert!(throttle.wait_duration(addr) <= Duration::from_secs(4));
    }

    #[test]
    fn success_resets_the_record() {
        let throttle = AuthThrottle::new(curve(), Duration::from_secs(60));
        let addr: IpAddr = "127.0.0.4".parse().unwrap();
        throttle.record_failure(addr);
        throttle.record_failure(addr);
        throttle.record_success(addr);
        assert_eq!(throttle.wait_duration(addr), Duration::ZERO);
    }

    #[test]
    fn empty_curve_disables_throttling() {
        let throttle = AuthThrottle::new(vec![], Duration::from_secs(60));
        let addr: IpAddr = "127.0.0.5".parse().unwrap();
        throttle.record_failure(addr);
        assert_eq!(throttle.wait_duration(addr), Duration::ZERO);
    }
}
