//! Host port pool for sandbox containers.
//!
//! Tracks a fixed inclusive range of TCP ports. A port counts as available
//! only when it is both unreserved in the pool and bindable at the OS level,
//! so ports occupied by unrelated processes are never handed out.

use std::collections::HashSet;
use std::net::TcpListener;
use std::ops::RangeInclusive;

use log::{debug, warn};
use rand::seq::IndexedRandom;
use tokio::sync::Mutex;

/// Pool of reservable host ports.
///
/// Selection and marking-as-reserved happen under one lock, so two
/// concurrent `reserve` calls can never return the same port.
pub struct PortPool {
    range: RangeInclusive<u16>,
    reserved: Mutex<HashSet<u16>>,
}

impl PortPool {
    /// Create a pool over the inclusive range `[start, end]`.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            range: start..=end,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// The configured port range.
    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    /// Reserve a port chosen uniformly at random among all currently
    /// available ports in the range. Returns `None` when the pool is
    /// exhausted.
    pub async fn reserve(&self) -> Option<u16> {
        let mut reserved = self.reserved.lock().await;
        let candidates: Vec<u16> = self
            .range
            .clone()
            .filter(|port| !reserved.contains(port))
            .collect();

        let free = probe_free(candidates).await;
        let port = free.choose(&mut rand::rng()).copied()?;

        reserved.insert(port);
        debug!("reserved port {port} ({} left in pool)", free.len() - 1);
        Some(port)
    }

    /// Reserve one specific port. Used by the bulk-create path, which works
    /// against a pre-declared contiguous block instead of random selection.
    /// Ports outside the configured range are refused.
    pub async fn reserve_exact(&self, port: u16) -> bool {
        if !self.range.contains(&port) {
            return false;
        }
        let mut reserved = self.reserved.lock().await;
        if reserved.contains(&port) {
            return false;
        }
        if !probe_free(vec![port]).await.contains(&port) {
            return false;
        }
        reserved.insert(port);
        debug!("reserved exact port {port}");
        true
    }

    /// Release a port back to the pool. Releasing an already-free port is a
    /// no-op.
    pub async fn release(&self, port: u16) {
        let mut reserved = self.reserved.lock().await;
        if reserved.remove(&port) {
            debug!("released port {port}");
        }
    }

    /// Whether a port is available: unreserved in the pool and bindable at
    /// the OS level. Either check alone is not enough.
    pub async fn is_available(&self, port: u16) -> bool {
        {
            let reserved = self.reserved.lock().await;
            if reserved.contains(&port) {
                return false;
            }
        }
        probe_free(vec![port]).await.contains(&port)
    }

    /// Number of ports in the range that are currently available.
    pub async fn available_count(&self) -> usize {
        let candidates: Vec<u16> = {
            let reserved = self.reserved.lock().await;
            self.range
                .clone()
                .filter(|port| !reserved.contains(port))
                .collect()
        };
        probe_free(candidates).await.len()
    }
}

/// Filter `ports` down to those the OS will let us bind.
///
/// Bind probes are blocking socket calls, so they run on the blocking
/// thread pool rather than stalling the request path.
async fn probe_free(ports: Vec<u16>) -> Vec<u16> {
    match tokio::task::spawn_blocking(move || {
        ports
            .into_iter()
            .filter(|port| os_port_free(*port))
            .collect()
    })
    .await
    {
        Ok(free) => free,
        Err(err) => {
            warn!("port probe task failed: {err}");
            Vec::new()
        }
    }
}

fn os_port_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn reserve_stays_in_range_and_is_unique() {
        let pool = PortPool::new(49310, 49313);
        let mut seen = HashSet::new();
        for _ in 0..4 {
            let port = pool.reserve().await.expect("port available");
            assert!((49310..=49313).contains(&port));
            assert!(seen.insert(port), "port {port} handed out twice");
        }
        assert!(pool.reserve().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_reserves_never_collide() {
        let pool = Arc::new(PortPool::new(49320, 49329));
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.reserve().await })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in tasks {
            if let Some(port) = task.await.expect("task completed") {
                assert!(seen.insert(port), "port {port} handed out twice");
            }
        }
    }

    #[tokio::test]
    async fn release_is_idempotent_and_frees_the_port() {
        let pool = PortPool::new(49330, 49330);
        let port = pool.reserve().await.expect("port available");
        assert!(pool.reserve().await.is_none());

        pool.release(port).await;
        pool.release(port).await; // second release is a no-op
        assert_eq!(pool.reserve().await, Some(port));
    }

    #[tokio::test]
    async fn externally_bound_port_is_not_available() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let pool = PortPool::new(port, port);
        assert!(!pool.is_available(port).await);
        assert!(pool.reserve().await.is_none());
        assert!(!pool.reserve_exact(port).await);
    }

    #[tokio::test]
    async fn reserve_exact_refuses_ports_outside_the_range() {
        let pool = PortPool::new(49342, 49343);
        assert!(!pool.reserve_exact(49341).await);
        assert!(!pool.reserve_exact(49344).await);
        assert!(pool.reserve_exact(49342).await);
    }

    #[tokio::test]
    async fn reserved_port_is_not_available_even_if_os_free() {
        let pool = PortPool::new(49340, 49341);
        let port = pool.reserve().await.expect("port available");
        assert!(!pool.is_available(port).await);
        assert!(!pool.reserve_exact(port).await);
        assert_eq!(pool.available_count().await, 1);
    }
}
