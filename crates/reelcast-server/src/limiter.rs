//! Per-connection byte throttling.
//!
//! Each connection owns a token bucket sized to one second of traffic. Chunks
//! larger than the bucket are admitted in bucket-sized pieces, so a large
//! `chunk_size` never trips governor's insufficient-capacity error.

use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Token bucket measured in bytes.
pub struct ByteRateLimiter {
    limiter: DefaultDirectRateLimiter,
    burst: NonZeroU32,
}

impl ByteRateLimiter {
    /// Refill at `bytes_per_sec` with a burst of the same size.
    ///
    /// A rate of zero is treated as one byte per second.
    pub fn per_second(bytes_per_sec: u32) -> Self {
        let burst = NonZeroU32::new(bytes_per_sec).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(burst).allow_burst(burst);
        Self {
            limiter: RateLimiter::direct(quota),
            burst,
        }
    }

    /// Largest single admission the bucket can grant.
    pub fn burst(&self) -> u32 {
        self.burst.get()
    }

    /// Wait until `bytes` tokens are available and consume them.
    pub async fn acquire(&self, bytes: usize) {
        let mut remaining = bytes;
        while remaining > 0 {
            let step = remaining.min(self.burst.get() as usize);
            // `step` is in 1..=burst, so neither conversion nor the wait can fail.
            if let Some(n) = u32::try_from(step).ok().and_then(NonZeroU32::new) {
                if let Err(e) = self.limiter.until_n_ready(n).await {
                    tracing::warn!("Rate limiter rejected {step} bytes: {e}");
                }
            }
            remaining -= step;
        }
    }
}

impl std::fmt::Debug for ByteRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRateLimiter")
            .field("burst", &self.burst)
            .finish()
    }
}
