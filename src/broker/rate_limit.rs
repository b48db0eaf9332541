// =============================================================================
// Broker Rate Limiter — self-imposed inter-call sleep
// =============================================================================
//
// The target broker does not return Binance-style `X-MBX-USED-WEIGHT`
// headers, so there is nothing to parse after the fact. Instead every caller
// sleeps a randomized 50-100ms between calls (§5 "shared-resource policy").
// The `can_send_request`/`record_call` shape is kept identical to the
// teacher's `RateLimitTracker` so call sites read the same way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub calls_last_minute: u64,
    pub last_call_unix_ms: u64,
}

pub struct BrokerRateLimiter {
    sleep_ms_min: u64,
    sleep_ms_max: u64,
    last_call: AtomicU64, // millis since epoch, 0 = never
    calls_last_minute: AtomicU64,
    window_start: std::sync::Mutex<Instant>,
}

impl BrokerRateLimiter {
    pub fn new(sleep_ms_min: u64, sleep_ms_max: u64) -> Self {
        Self {
            sleep_ms_min,
            sleep_ms_max,
            last_call: AtomicU64::new(0),
            calls_last_minute: AtomicU64::new(0),
            window_start: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// A crude sliding-minute counter is always allowed to send in this
    /// design — the broker never gates us hard, so `can_send_request` exists
    /// only as a symmetry point with the teacher's tracker and to expose the
    /// observed call rate on the stats endpoint.
    pub fn can_send_request(&self) -> bool {
        true
    }

    /// Sleep the configured inter-call window, then record the call.
    pub async fn throttle(&self) {
        let span = self.sleep_ms_max.saturating_sub(self.sleep_ms_min);
        let jitter = if span == 0 {
            0
        } else {
            (now_ms() % (span + 1)) as u64
        };
        sleep(Duration::from_millis(self.sleep_ms_min + jitter)).await;
        self.record_call();
    }

    pub fn record_call(&self) {
        self.last_call.store(now_ms(), Ordering::Relaxed);

        let mut window_start = self.window_start.lock().unwrap();
        if window_start.elapsed() >= Duration::from_secs(60) {
            self.calls_last_minute.store(0, Ordering::Relaxed);
            *window_start = Instant::now();
        }
        self.calls_last_minute.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            calls_last_minute: self.calls_last_minute.load(Ordering::Relaxed),
            last_call_unix_ms: self.last_call.load(Ordering::Relaxed),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn throttle_records_a_call() {
        let limiter = BrokerRateLimiter::new(1, 2);
        limiter.throttle().await;
        assert_eq!(limiter.snapshot().calls_last_minute, 1);
    }

    #[test]
    fn can_send_request_is_always_true_for_this_broker() {
        let limiter = BrokerRateLimiter::new(50, 100);
        assert!(limiter.can_send_request());
    }
}
