//! TCP listener with admission control.
//!
//! A slot is acquired from a bounded semaphore before each `accept`, so once
//! `max_connections` handlers are running new clients wait in the kernel
//! backlog instead of being refused.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use reelcast_core::{Error, Result};

/// A bound listener paired with its admission semaphore.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

/// An accepted client and the admission slot it holds.
#[derive(Debug)]
pub struct Admitted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: OwnedSemaphorePermit,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, max_connections: usize) -> Result<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
        let max_connections = max_connections.max(1);
        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Slots not currently held by a connection.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot, then for a client.
    ///
    /// On accept failure the slot is released before the error is returned.
    pub async fn accept(&self) -> io::Result<Admitted> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "admission semaphore closed"))?;
        let (stream, peer) = self.inner.accept().await?;
        Ok(Admitted {
            stream,
            peer,
            permit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn accept_holds_slot_until_permit_dropped() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 1).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let first = listener.accept().await.unwrap();
        assert_eq!(listener.available_slots(), 0);

        let _c2 = TcpStream::connect(addr).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(blocked.is_err(), "second client admitted while saturated");

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("second client never admitted")
            .unwrap();
        assert_eq!(second.peer.ip(), addr.ip());
    }

    #[tokio::test]
    async fn zero_cap_is_raised_to_one() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 0).await.unwrap();
        assert_eq!(listener.max_connections(), 1);
        assert_eq!(listener.available_slots(), 1);
    }
}
