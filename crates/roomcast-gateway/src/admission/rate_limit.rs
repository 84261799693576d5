//! Per-IP connection rate limiting

use super::Stage;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use roomcast_common::{AppError, RateLimitConfig};
use roomcast_core::{AdmissionContext, AdmissionError, AdmissionResult, Next};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Checks between sweeps of idle limiter state
const SWEEP_EVERY: u64 = 1024;

/// GCRA limiter keyed by peer IP
pub struct IpRateLimiter {
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    checks: AtomicU64,
}

impl IpRateLimiter {
    /// Allow `per_second` new connections per IP with bursts up to `burst`
    #[must_use]
    pub fn new(per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(per_second);

        Self {
            limiter: RateLimiter::keyed(Quota::per_second(per_second).allow_burst(burst)),
            checks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.per_second, config.burst)
    }

    /// Take one cell for `ip`; false if the IP is over its quota
    pub fn check(&self, ip: IpAddr) -> bool {
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.limiter.retain_recent();
        }
        self.limiter.check_key(&ip).is_ok()
    }
}

impl std::fmt::Debug for IpRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpRateLimiter")
            .field("tracked_ips", &self.limiter.len())
            .finish()
    }
}

/// Reject connections from IPs over their quota
///
/// Connections without a known peer address are admitted.
pub fn rate_limit_stage(limiter: Arc<IpRateLimiter>) -> impl Stage {
    move |ctx: AdmissionContext, next: Next| -> BoxFuture<'static, AdmissionResult> {
        let limiter = limiter.clone();
        async move {
            if let Some(addr) = ctx.remote_addr() {
                if !limiter.check(addr.ip()) {
                    tracing::info!(ip = %addr.ip(), ns = %ctx.namespace, "Connection rate limited");
                    return Err(AdmissionError::rejected(AppError::RateLimited.to_string()));
                }
            }
            next.run().await
        }
        .boxed()
    }
}
