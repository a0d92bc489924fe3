//! # sticklb
//!
//! `sticklb` is the decision core of a software-defined-networking load
//! balancer. Given unmatched frames reported by a forwarding datapath, it
//! decides how to answer ARP for a single virtual service address, which
//! backend server a client is stuck to, and which forwarding/rewriting rules
//! to install so that subsequent traffic is handled at line rate without
//! further controller involvement.
//!
//! The wire encoding of the control protocol and its transport to and from
//! the datapath are external collaborators: the boundary of this crate is the
//! [`controller`] channel pair (or direct calls into [`engine::Engine`]).
//!
//! ## How a decision is made
//!
//! * A new datapath session gets one table-miss rule deferring everything to
//!   the controller.
//! * ARP requests for the virtual IP are answered with the requestor's sticky
//!   server's real hardware address ([`registry`]).
//! * IPv4 traffic to the virtual IP gets a pair of NAT rules: destination
//!   rewrite toward the server, and the exact inverse source rewrite on the
//!   return path ([`flow`]).
//! * Everything else is learn-and-forward L2 switching with per-switch MAC
//!   learning ([`learning`]), flooding unknown destinations.
//!
//! ## Example
//! ```
//! use std::net::Ipv4Addr;
//!
//! use pnet::util::MacAddr;
//! use sticklb::config::{Config, Server, SwitchId};
//! use sticklb::engine::Engine;
//! use sticklb::flow::{Action, PRIORITY_TABLE_MISS};
//!
//! let servers = vec![
//!     Server { ip: "10.0.0.2".parse().unwrap(), mac: MacAddr::new(0, 0, 0, 0, 0, 2), port: 1 },
//!     Server { ip: "10.0.0.3".parse().unwrap(), mac: MacAddr::new(0, 0, 0, 0, 0, 3), port: 2 },
//! ];
//! let config = Config::new("10.0.0.100".parse().unwrap(), servers).unwrap();
//! let engine = Engine::new(&config);
//!
//! // connection setup installs the table-miss fallback
//! let miss = engine.on_switch_connected(SwitchId(1));
//! assert_eq!(miss.priority, PRIORITY_TABLE_MISS);
//! assert_eq!(miss.actions, vec![Action::ToController]);
//!
//! // an unparseable frame is silently dropped
//! let directives = engine.on_packet_in(SwitchId(1), 3, &[0x00, 0x01], None);
//! assert!(directives.is_empty());
//! ```
//!
//! A full synthetic session (ARP resolution followed by the NAT pair
//! install) is driven by the `lbctl` demo under `demos/`.

pub mod config;
pub mod controller;
pub mod engine;
pub mod flow;
pub mod learning;
pub mod packet;
pub mod registry;

#[macro_use]
extern crate log;

/// Crate-wide boxed error alias for fallible setup paths.
pub type Error = Box<dyn std::error::Error + Sync + Send>;
