//! Per-connection state.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::limiter::ByteRateLimiter;
use crate::prefetch::CacheKey;

/// State owned by the task serving one client socket.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    limiter: ByteRateLimiter,
    created_at: Instant,
    last_active: Instant,
}

impl Connection {
    pub fn new(peer: SocketAddr, bytes_per_sec: u32) -> Self {
        let now = Instant::now();
        Self {
            peer,
            limiter: ByteRateLimiter::per_second(bytes_per_sec),
            created_at: now,
            last_active: now,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Key of this client's prefetch cache entry.
    pub fn cache_key(&self) -> CacheKey {
        self.peer
    }

    pub fn limiter(&self) -> &ByteRateLimiter {
        &self.limiter
    }

    /// Record activity on the socket.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle(&self) -> Duration {
        self.last_active.elapsed()
    }
}
