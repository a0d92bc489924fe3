//! The packet-in decision engine.
//!
//! One decision per unmatched frame: answer virtual-IP ARP from the sticky
//! registry, synthesize the bidirectional NAT pair for virtual-IP IPv4
//! traffic, or fall back to learn-and-forward L2 switching. Every directive
//! is fire-and-forget; nothing here retries or blocks on I/O.

use std::net::Ipv4Addr;

use bytes::Bytes;
use nom::HexDisplay;
use pnet::util::MacAddr;

use crate::config::{Config, SwitchId};
use crate::flow::{self, Directive, FlowInstall};
use crate::learning::MacLearningTable;
use crate::packet::{self, Classified};
use crate::registry::StickyRegistry;

/// The engine owns all runtime state (learning table, sticky registry) and is
/// safe to share across concurrently executing decision invocations; wrap it
/// in an `Arc` and call it from as many tasks as the transport needs.
#[derive(Debug)]
pub struct Engine {
    virtual_ip: Ipv4Addr,
    registry: StickyRegistry,
    learning: MacLearningTable,
}

impl Engine {
    /// Build an engine over a validated configuration.
    ///
    /// # Example
    /// ```
    /// use sticklb::config::{Config, SwitchId};
    /// use sticklb::engine::Engine;
    /// use sticklb::flow::PRIORITY_TABLE_MISS;
    ///
    /// let config = Config::new("192.168.0.100".parse().unwrap(), Config::generate_pool(2)).unwrap();
    /// let engine = Engine::new(&config);
    ///
    /// let miss = engine.on_switch_connected(SwitchId(1));
    /// assert_eq!(miss.priority, PRIORITY_TABLE_MISS);
    /// ```
    pub fn new(config: &Config) -> Engine {
        Engine {
            virtual_ip: config.virtual_ip,
            registry: StickyRegistry::new(config),
            learning: MacLearningTable::new(),
        }
    }

    /// The published virtual service address.
    pub fn virtual_ip(&self) -> Ipv4Addr {
        self.virtual_ip
    }

    /// The sticky assignment registry.
    pub fn registry(&self) -> &StickyRegistry {
        &self.registry
    }

    /// The per-switch MAC learning table.
    pub fn learning(&self) -> &MacLearningTable {
        &self.learning
    }

    /// A new datapath session: install the match-all fallback that defers
    /// unmatched frames to the controller.
    pub fn on_switch_connected(&self, switch: SwitchId) -> FlowInstall {
        info!("switch {} connected", switch);
        flow::table_miss()
    }

    /// Decide on one unmatched frame. Returns zero or more flow installs and
    /// at most one packet-out. Unparseable frames are dropped with no
    /// directive and no error.
    pub fn on_packet_in(
        &self,
        switch: SwitchId,
        in_port: u32,
        frame: &[u8],
        buffer_id: Option<u32>,
    ) -> Vec<Directive> {
        let classified = match packet::classify(frame, self.virtual_ip) {
            Some(classified) => classified,
            None => {
                debug!(
                    "switch {}: dropping unparseable {}-byte frame from port {}",
                    switch,
                    frame.len(),
                    in_port
                );
                return Vec::new();
            }
        };

        match classified {
            Classified::Discovery => {
                trace!("switch {}: ignoring discovery frame", switch);
                Vec::new()
            }
            Classified::VipArpRequest {
                client_ip,
                client_mac,
            } => self.answer_vip_arp(switch, in_port, client_ip, client_mac),
            Classified::VipIpv4 {
                client_mac,
                server_mac,
            } => self.install_sticky_pair(switch, in_port, client_mac, server_mac),
            Classified::Other {
                src_mac,
                dst_mac,
                ethertype,
                ipv4_dst,
            } => self.switch_l2(
                switch, in_port, frame, buffer_id, src_mac, dst_mac, ethertype, ipv4_dst,
            ),
        }
    }

    /// Answer an ARP request for the virtual IP with the sticky server's real
    /// hardware address, unicast back out the ingress port. Terminal: no
    /// learning, no flow install.
    fn answer_vip_arp(
        &self,
        switch: SwitchId,
        in_port: u32,
        client_ip: Ipv4Addr,
        client_mac: MacAddr,
    ) -> Vec<Directive> {
        let server = self.registry.assign_or_get(client_ip);
        info!(
            "switch {}: ARP request for {} from {} ({}) answered with server {} ({})",
            switch, self.virtual_ip, client_ip, client_mac, server.ip, server.mac
        );
        let reply = packet::vip_arp_reply(self.virtual_ip, server.mac, client_ip, client_mac);
        vec![Directive::Out(flow::arp_reply_out(reply, in_port))]
    }

    /// IPv4 traffic addressed to the virtual IP: resolve the owning server by
    /// the frame's destination MAC and install the NAT pair. The triggering
    /// packet is absorbed into this one controller round trip; installation
    /// is an idempotent overwrite at the datapath.
    fn install_sticky_pair(
        &self,
        switch: SwitchId,
        in_port: u32,
        client_mac: MacAddr,
        server_mac: MacAddr,
    ) -> Vec<Directive> {
        let server = match self.registry.lookup_by_server_mac(server_mac) {
            Some(server) => server,
            None => {
                warn!(
                    "switch {}: virtual-IP traffic for unknown server mac {}, dropping",
                    switch, server_mac
                );
                return Vec::new();
            }
        };
        info!(
            "switch {}: installing sticky pair port {} -> server {} ({}, port {})",
            switch, in_port, server.ip, server.mac, server.port
        );
        let [forward, back] = flow::sticky_pair(self.virtual_ip, in_port, client_mac, &server);
        vec![Directive::Install(forward), Directive::Install(back)]
    }

    /// Plain L2 forwarding: learn the source, then either install a unicast
    /// rule toward the learned port or flood. The explicit packet-out is
    /// suppressed when the datapath holds a buffered copy, since the install
    /// itself re-emits the frame.
    #[allow(clippy::too_many_arguments)]
    fn switch_l2(
        &self,
        switch: SwitchId,
        in_port: u32,
        frame: &[u8],
        buffer_id: Option<u32>,
        src_mac: MacAddr,
        dst_mac: MacAddr,
        ethertype: u16,
        ipv4_dst: Option<Ipv4Addr>,
    ) -> Vec<Directive> {
        info!(
            "packet in {} {} {} {} {:?}",
            switch, src_mac, in_port, dst_mac, buffer_id
        );
        self.learning.record(switch, src_mac, in_port);

        match self.learning.lookup(switch, dst_mac) {
            Some(out_port) => {
                let install = flow::learned_unicast(
                    in_port, src_mac, dst_mac, ethertype, ipv4_dst, out_port, buffer_id,
                );
                let mut directives = vec![Directive::Install(install)];
                if buffer_id.is_none() {
                    directives.push(Directive::Out(flow::unicast_out(
                        Some(Bytes::copy_from_slice(frame)),
                        out_port,
                        in_port,
                        None,
                    )));
                }
                directives
            }
            None => {
                trace!(
                    "switch {}: unknown destination {}, flooding:\n{}",
                    switch,
                    dst_mac,
                    frame.to_hex(16)
                );
                let data = match buffer_id {
                    Some(_) => None,
                    None => Some(Bytes::copy_from_slice(frame)),
                };
                vec![Directive::Out(flow::flood(data, in_port, buffer_id))]
            }
        }
    }
}
