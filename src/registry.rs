//! Sticky client-to-server assignment.
//!
//! A client IP is bound to a backend server on first contact by a uniform
//! random pick over the configured pool, and keeps that server for the
//! process lifetime. There is no eviction and no re-balancing.
//!
//! The reverse lookup by server MAC deliberately scans the static pool and
//! ignores client bindings: the return data path only needs the server's own
//! identity, never which client it serves.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use pnet::util::MacAddr;
use rand::Rng;

use crate::config::{Config, Server};

/// The sticky assignment registry over a fixed, non-empty server pool.
#[derive(Debug)]
pub struct StickyRegistry {
    servers: Vec<Server>,
    assignments: Mutex<HashMap<Ipv4Addr, usize>>,
}

impl StickyRegistry {
    /// Build a registry over the configured pool. `Config` guarantees the
    /// pool is non-empty.
    ///
    /// # Example
    /// ```
    /// use sticklb::config::Config;
    /// use sticklb::registry::StickyRegistry;
    ///
    /// let config = Config::new("192.168.0.100".parse().unwrap(), Config::generate_pool(2)).unwrap();
    /// let registry = StickyRegistry::new(&config);
    /// assert_eq!(registry.assignment_count(), 0);
    /// ```
    pub fn new(config: &Config) -> StickyRegistry {
        StickyRegistry {
            servers: config.servers.clone(),
            assignments: Mutex::new(HashMap::new()),
        }
    }

    /// Return the server assigned to `client`, picking one uniformly at
    /// random on first contact. Idempotent: once assigned, every later call
    /// for the same client returns the same server, however calls for other
    /// clients interleave. The pick happens under the assignment lock, so two
    /// racing first contacts for one client still agree.
    ///
    /// # Example
    /// ```
    /// use std::net::Ipv4Addr;
    /// use sticklb::config::Config;
    /// use sticklb::registry::StickyRegistry;
    ///
    /// let config = Config::new("192.168.0.100".parse().unwrap(), Config::generate_pool(2)).unwrap();
    /// let registry = StickyRegistry::new(&config);
    ///
    /// let client: Ipv4Addr = "192.168.0.50".parse().unwrap();
    /// let first = registry.assign_or_get(client);
    /// let again = registry.assign_or_get(client);
    /// assert_eq!(first, again);
    /// assert_eq!(registry.assignment_count(), 1);
    /// ```
    pub fn assign_or_get(&self, client: Ipv4Addr) -> Server {
        let mut assignments = self
            .assignments
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let index = *assignments.entry(client).or_insert_with(|| {
            let index = rand::thread_rng().gen_range(0..self.servers.len());
            info!("client {} assigned to server {}", client, self.servers[index].ip);
            index
        });
        self.servers[index]
    }

    /// Reverse lookup against the static pool by hardware address.
    ///
    /// # Example
    /// ```
    /// use sticklb::config::Config;
    /// use sticklb::registry::StickyRegistry;
    ///
    /// let config = Config::new("192.168.0.100".parse().unwrap(), Config::generate_pool(2)).unwrap();
    /// let registry = StickyRegistry::new(&config);
    ///
    /// let s1 = config.servers[0];
    /// assert_eq!(registry.lookup_by_server_mac(s1.mac), Some(s1));
    /// ```
    pub fn lookup_by_server_mac(&self, mac: MacAddr) -> Option<Server> {
        self.servers.iter().find(|s| s.mac == mac).copied()
    }

    /// The configured pool, in load order.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Count of clients with a sticky binding.
    pub fn assignment_count(&self) -> usize {
        self.assignments
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
