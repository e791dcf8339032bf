//! Rate limiting for scan session upgrades.
//!
//! Each upgrade starts a session that competes for the one scanner, so a
//! misbehaving kiosk page that reconnects in a loop is throttled here.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

const DEFAULT_PER_SECOND: NonZeroU32 = match NonZeroU32::new(2) {
    Some(n) => n,
    None => unreachable!(),
};

const DEFAULT_BURST: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => unreachable!(),
};

/// Returned when an upgrade exceeds the configured rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Rate limit exceeded. Please try again later.")]
pub struct RateLimited;

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, self.to_string()).into_response()
    }
}

/// Direct (unkeyed) limiter shared by all scan upgrades.
#[derive(Clone)]
pub struct UpgradeRateLimiter {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl UpgradeRateLimiter {
    /// Create a limiter allowing `per_second` sustained upgrades with bursts
    /// of `burst_size`. Zero values fall back to 2/s and a burst of 10.
    pub fn new(per_second: u32, burst_size: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(DEFAULT_PER_SECOND);
        let burst_size = NonZeroU32::new(burst_size).unwrap_or(DEFAULT_BURST);

        let quota = Quota::per_second(per_second).allow_burst(burst_size);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn check(&self) -> Result<(), RateLimited> {
        self.limiter.check().map_err(|_| {
            tracing::warn!("Rate limit exceeded for scan endpoint");
            RateLimited
        })
    }
}

impl Default for UpgradeRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PER_SECOND.get(), DEFAULT_BURST.get())
    }
}

impl std::fmt::Debug for UpgradeRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeRateLimiter").finish_non_exhaustive()
    }
}
