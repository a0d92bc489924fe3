//! Static service configuration: the backend server pool and the virtual service address.
//!
//! Everything in here is loaded once at startup and read-only afterwards. The
//! decision engine never mutates a `Server` or the virtual IP; all runtime
//! state lives in the learning table and the sticky registry.

use std::fmt;
use std::net::Ipv4Addr;

use pnet::util::MacAddr;
use thiserror::Error;

/// A backend server of the load-balanced service: its real address, its
/// hardware address and the switch port it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Server {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: u32,
}

/// Opaque identifier of a datapath session. All learning state is scoped by it.
///
/// # Example
/// ```
/// use sticklb::config::SwitchId;
///
/// let switch = SwitchId(42);
/// assert_eq!(switch.to_string(), "0000000000000042");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwitchId(pub u64);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016}", self.0)
    }
}

/// Startup configuration errors. Both are fatal: the core refuses to serve
/// assignments with a broken pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The server pool is empty; there is nothing to balance over.
    #[error("server pool is empty")]
    EmptyServerPool,
    /// The virtual IP must never equal a real server address, otherwise the
    /// NAT rewrite rules would loop traffic back onto the virtual address.
    #[error("virtual ip {0} collides with a configured server address")]
    VirtualIpCollision(Ipv4Addr),
}

/// Validated service configuration: a non-empty server pool plus the single
/// virtual IP published to clients.
#[derive(Debug, Clone)]
pub struct Config {
    pub virtual_ip: Ipv4Addr,
    pub servers: Vec<Server>,
}

impl Config {
    /// Validate and build the service configuration.
    ///
    /// # Example
    /// ```
    /// use std::net::Ipv4Addr;
    /// use sticklb::config::{Config, ConfigError};
    ///
    /// let vip: Ipv4Addr = "192.168.0.100".parse().unwrap();
    ///
    /// let config = Config::new(vip, Config::generate_pool(2)).unwrap();
    /// assert_eq!(config.servers.len(), 2);
    ///
    /// let err = Config::new(vip, Vec::new()).unwrap_err();
    /// assert_eq!(err, ConfigError::EmptyServerPool);
    /// ```
    pub fn new(virtual_ip: Ipv4Addr, servers: Vec<Server>) -> Result<Config, ConfigError> {
        if servers.is_empty() {
            return Err(ConfigError::EmptyServerPool);
        }
        if servers.iter().any(|s| s.ip == virtual_ip) {
            return Err(ConfigError::VirtualIpCollision(virtual_ip));
        }
        Ok(Config {
            virtual_ip,
            servers,
        })
    }

    /// Sequentially generate a demo/test server pool:
    /// * ip - 192.168.0.x starting from x=2
    /// * mac - 00:00:00:00:00:xx starting from xx=02
    /// * attachment port starting from 1
    ///
    /// # Example
    /// ```
    /// use sticklb::config::Config;
    ///
    /// let pool = Config::generate_pool(2);
    /// assert_eq!(pool[0].ip.to_string(), "192.168.0.2");
    /// assert_eq!(pool[1].port, 2);
    /// ```
    pub fn generate_pool(n: usize) -> Vec<Server> {
        (1..=n)
            .map(|i| Server {
                ip: Ipv4Addr::new(192, 168, 0, (i + 1) as u8),
                mac: MacAddr::new(0, 0, 0, 0, 0, (i + 1) as u8),
                port: i as u32,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_ip_must_not_shadow_a_server() {
        let pool = Config::generate_pool(3);
        let collision = pool[1].ip;
        let err = Config::new(collision, pool).unwrap_err();
        assert_eq!(err, ConfigError::VirtualIpCollision(collision));
    }

    #[test]
    fn generated_pool_is_sequential() {
        let pool = Config::generate_pool(4);
        assert_eq!(pool.len(), 4);
        for (i, server) in pool.iter().enumerate() {
            assert_eq!(server.ip, Ipv4Addr::new(192, 168, 0, (i + 2) as u8));
            assert_eq!(server.mac, MacAddr::new(0, 0, 0, 0, 0, (i + 2) as u8));
            assert_eq!(server.port, (i + 1) as u32);
        }
    }
}
