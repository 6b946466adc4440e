//! Server selection for requests that are not routed to a bucket's server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use geode_core::ServerLocation;
use rand::seq::SliceRandom;

/// A strategy for picking the server of an unrouted request.
pub trait LoadBalancer: Send + Sync {
    /// Selects a server from `servers`.
    ///
    /// Returns `None` if the list is empty.
    fn select<'a>(&self, servers: &'a [ServerLocation]) -> Option<&'a ServerLocation>;
}

impl std::fmt::Debug for dyn LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LoadBalancer")
    }
}

/// Cycles through the servers in order.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    index: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    /// Creates a new round-robin load balancer.
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn select<'a>(&self, servers: &'a [ServerLocation]) -> Option<&'a ServerLocation> {
        if servers.is_empty() {
            return None;
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % servers.len();
        Some(&servers[idx])
    }
}

/// Picks a server uniformly at random.
#[derive(Debug, Default)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    /// Creates a new random load balancer.
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn select<'a>(&self, servers: &'a [ServerLocation]) -> Option<&'a ServerLocation> {
        servers.choose(&mut rand::thread_rng())
    }
}

/// Creates a default load balancer (round-robin).
pub fn default_load_balancer() -> Arc<dyn LoadBalancer> {
    Arc::new(RoundRobinLoadBalancer::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(count: usize) -> Vec<ServerLocation> {
        (0..count)
            .map(|i| ServerLocation::new("127.0.0.1", 40404 + i as u16))
            .collect()
    }

    #[test]
    fn test_round_robin_empty_servers() {
        let lb = RoundRobinLoadBalancer::new();
        assert!(lb.select(&[]).is_none());
    }

    #[test]
    fn test_round_robin_cycles_through_servers() {
        let lb = RoundRobinLoadBalancer::new();
        let servers = servers(3);

        for _ in 0..3 {
            for expected in &servers {
                assert_eq!(lb.select(&servers), Some(expected));
            }
        }
    }

    #[test]
    fn test_random_empty_servers() {
        let lb = RandomLoadBalancer::new();
        assert!(lb.select(&[]).is_none());
    }

    #[test]
    fn test_random_stays_in_bounds() {
        let lb = RandomLoadBalancer::new();
        let servers = servers(4);
        for _ in 0..50 {
            let selected = lb.select(&servers).unwrap();
            assert!(servers.contains(selected));
        }
    }

    #[test]
    fn test_default_is_round_robin() {
        let lb = default_load_balancer();
        let servers = servers(2);
        assert_eq!(lb.select(&servers), Some(&servers[0]));
        assert_eq!(lb.select(&servers), Some(&servers[1]));
    }
}
