//! Request pacing, retry backoff and throttle tracking
//!
//! Each provider client owns a governor limiter sized to the provider's
//! published limit. The identification pipeline owns a [`ThrottleTracker`]
//! that suspends a provider after repeated throttling responses.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::types::ProviderId;

/// Unkeyed in-memory governor limiter
pub type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Limiter allowing one request per `min_interval`
pub fn pacer(min_interval: Duration) -> DirectRateLimiter {
    let quota = Quota::with_period(min_interval).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
    RateLimiter::direct(quota)
}

/// Limiter allowing `per_second` requests per second
pub fn per_second(per_second: u32) -> DirectRateLimiter {
    let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
    RateLimiter::direct(Quota::per_second(rate))
}

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Consecutive throttling responses per provider
///
/// A provider throttled `skip_after` times in a row is suspended for the
/// rest of the run. `skip_after == 0` never suspends.
#[derive(Debug)]
pub struct ThrottleTracker {
    skip_after: u32,
    state: Mutex<ThrottleState>,
}

#[derive(Debug, Default)]
struct ThrottleState {
    streaks: HashMap<ProviderId, u32>,
    suspended: HashSet<ProviderId>,
}

impl ThrottleTracker {
    pub fn new(skip_after: u32) -> Self {
        Self {
            skip_after,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ThrottleState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Record a throttling response; returns the new consecutive count
    pub fn record_throttled(&self, provider: ProviderId) -> u32 {
        let (count, newly_suspended) = self.with_state(|state| {
            let entry = state.streaks.entry(provider).or_insert(0);
            *entry += 1;
            let count = *entry;
            let newly_suspended = self.skip_after > 0 && count >= self.skip_after && state.suspended.insert(provider);
            (count, newly_suspended)
        });
        if newly_suspended {
            warn!(
                provider = %provider,
                consecutive = count,
                "Provider repeatedly throttled; skipping it for the rest of the run"
            );
        }
        count
    }

    /// A non-throttled answer resets the streak; a suspension stays
    pub fn record_ok(&self, provider: ProviderId) {
        self.with_state(|state| {
            state.streaks.remove(&provider);
        });
    }

    pub fn is_suspended(&self, provider: ProviderId) -> bool {
        self.with_state(|state| state.suspended.contains(&provider))
    }
}
