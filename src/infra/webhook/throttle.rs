//! Keyed throttle for outbound alerts.
//!
//! Wraps a governor keyed rate limiter: at most one alert per key per
//! window. Balance alerts use a single process-wide key today; the keyed
//! interface leaves room for per-account throttling later.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Window applied to low-balance alerts
pub const DEFAULT_ALERT_WINDOW: Duration = Duration::from_secs(30);

/// One-permit-per-window keyed throttle
pub struct AlertThrottle<C: Clock = DefaultClock> {
    limiter: RateLimiter<String, DashMapStateStore<String>, C, NoOpMiddleware<C::Instant>>,
}

impl AlertThrottle<DefaultClock> {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, &DefaultClock::default())
    }
}

impl Default for AlertThrottle<DefaultClock> {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_WINDOW)
    }
}

impl<C: Clock + Clone> AlertThrottle<C> {
    /// Build with an explicit clock; tests inject a fake clock.
    pub fn with_clock(window: Duration, clock: &C) -> Self {
        // A zero window cannot form a quota; treat it as "no throttling".
        let quota = Quota::with_period(window)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
        Self {
            limiter: RateLimiter::new(quota, DashMapStateStore::default(), clock.clone()),
        }
    }

    /// Whether an alert for `key` may be sent now. Consumes the window's
    /// single permit when it returns true.
    pub fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }
}
