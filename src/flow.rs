//! Abstract flow-install and packet-out directives.
//!
//! This module owns the priority tiering policy. Overlapping matches (a
//! learned L2 rule and a sticky NAT rule can both touch virtual-IP traffic)
//! rely on this exact ordering at the datapath, so the tiers are fixed
//! constants rather than caller-supplied values.

use std::net::Ipv4Addr;

use bytes::Bytes;
use pnet::packet::ethernet::EtherTypes;
use pnet::util::MacAddr;

use crate::config::Server;

/// Fallback rule deferring unmatched frames to the controller.
pub const PRIORITY_TABLE_MISS: u16 = 0;
/// Plain learned L2 forwarding rule.
pub const PRIORITY_L2: u16 = 1;
/// Learned rule additionally qualified by the IPv4 destination.
pub const PRIORITY_L2_IPV4: u16 = 2;
/// Sticky load-balancing NAT rule, must shadow any learned rule.
pub const PRIORITY_STICKY: u16 = 10;

/// Reserved output port: flood to all ports except the ingress port.
pub const PORT_FLOOD: u32 = 0xffff_fffb;
/// Reserved output port: deliver to the controller.
pub const PORT_CONTROLLER: u32 = 0xffff_fffd;

/// The IPv4 ethertype as carried in match fields.
pub const ETH_TYPE_IPV4: u16 = EtherTypes::Ipv4.0;

/// Match fields recognized by the transport layer. Unset fields are
/// wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowMatch {
    pub in_port: Option<u32>,
    pub eth_type: Option<u16>,
    pub eth_src: Option<MacAddr>,
    pub eth_dst: Option<MacAddr>,
    pub ipv4_src: Option<Ipv4Addr>,
    pub ipv4_dst: Option<Ipv4Addr>,
}

/// Actions recognized by the transport layer, applied in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Output(u32),
    SetIpv4Src(Ipv4Addr),
    SetIpv4Dst(Ipv4Addr),
    ToController,
}

/// A flow rule to install: match, actions, priority, and optionally the
/// datapath buffer holding the triggering frame, so the install also causes
/// its re-emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInstall {
    pub match_fields: FlowMatch,
    pub actions: Vec<Action>,
    pub priority: u16,
    pub buffer_id: Option<u32>,
}

/// A frame for the datapath to emit immediately. `data` is present exactly
/// when the datapath does not hold a buffered copy (`buffer_id` is `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub actions: Vec<Action>,
    pub data: Option<Bytes>,
    pub in_port: Option<u32>,
    pub buffer_id: Option<u32>,
}

/// One fire-and-forget instruction toward the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Install(FlowInstall),
    Out(PacketOut),
}

/// The match-all, send-to-controller fallback installed on every new
/// datapath session.
pub fn table_miss() -> FlowInstall {
    FlowInstall {
        match_fields: FlowMatch::default(),
        actions: vec![Action::ToController],
        priority: PRIORITY_TABLE_MISS,
        buffer_id: None,
    }
}

/// A unicast forwarding rule for a learned destination. IPv4 frames get the
/// destination-address qualifier and the higher of the two learned tiers.
pub fn learned_unicast(
    in_port: u32,
    src_mac: MacAddr,
    dst_mac: MacAddr,
    ethertype: u16,
    ipv4_dst: Option<Ipv4Addr>,
    out_port: u32,
    buffer_id: Option<u32>,
) -> FlowInstall {
    let priority = if ipv4_dst.is_some() {
        PRIORITY_L2_IPV4
    } else {
        PRIORITY_L2
    };
    FlowInstall {
        match_fields: FlowMatch {
            in_port: Some(in_port),
            eth_type: Some(ethertype),
            eth_src: Some(src_mac),
            eth_dst: Some(dst_mac),
            ipv4_src: None,
            ipv4_dst,
        },
        actions: vec![Action::Output(out_port)],
        priority,
        buffer_id,
    }
}

/// The bidirectional sticky NAT pair for one client/server binding. The
/// forward rule rewrites the virtual destination to the server's real
/// address; the return rule applies the exact inverse rewrite.
pub fn sticky_pair(
    virtual_ip: Ipv4Addr,
    client_port: u32,
    client_mac: MacAddr,
    server: &Server,
) -> [FlowInstall; 2] {
    let forward = FlowInstall {
        match_fields: FlowMatch {
            in_port: Some(client_port),
            eth_type: Some(ETH_TYPE_IPV4),
            ipv4_dst: Some(virtual_ip),
            ..FlowMatch::default()
        },
        actions: vec![
            Action::SetIpv4Dst(server.ip),
            Action::Output(server.port),
        ],
        priority: PRIORITY_STICKY,
        buffer_id: None,
    };
    let back = FlowInstall {
        match_fields: FlowMatch {
            in_port: Some(server.port),
            eth_type: Some(ETH_TYPE_IPV4),
            eth_dst: Some(client_mac),
            ipv4_src: Some(server.ip),
            ..FlowMatch::default()
        },
        actions: vec![
            Action::SetIpv4Src(virtual_ip),
            Action::Output(client_port),
        ],
        priority: PRIORITY_STICKY,
        buffer_id: None,
    };
    [forward, back]
}

/// Flood a frame out every port but the ingress one.
pub fn flood(data: Option<Bytes>, in_port: u32, buffer_id: Option<u32>) -> PacketOut {
    PacketOut {
        actions: vec![Action::Output(PORT_FLOOD)],
        data,
        in_port: Some(in_port),
        buffer_id,
    }
}

/// Emit a frame out a single known port.
pub fn unicast_out(
    data: Option<Bytes>,
    out_port: u32,
    in_port: u32,
    buffer_id: Option<u32>,
) -> PacketOut {
    PacketOut {
        actions: vec![Action::Output(out_port)],
        data,
        in_port: Some(in_port),
        buffer_id,
    }
}

/// Unicast a synthesized ARP reply back out the requestor's port.
pub fn arp_reply_out(data: Bytes, port: u32) -> PacketOut {
    PacketOut {
        actions: vec![Action::Output(port)],
        data: Some(data),
        in_port: None,
        buffer_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_tiers_are_ordered() {
        assert!(PRIORITY_TABLE_MISS < PRIORITY_L2);
        assert!(PRIORITY_L2 < PRIORITY_L2_IPV4);
        assert!(PRIORITY_L2_IPV4 < PRIORITY_STICKY);
    }

    #[test]
    fn table_miss_matches_everything() {
        let miss = table_miss();
        assert_eq!(miss.match_fields, FlowMatch::default());
        assert_eq!(miss.actions, vec![Action::ToController]);
        assert_eq!(miss.priority, PRIORITY_TABLE_MISS);
    }

    #[test]
    fn sticky_pair_rewrites_are_inverses() {
        let virtual_ip: Ipv4Addr = "10.0.0.100".parse().unwrap();
        let client_mac = MacAddr::new(0, 0x11, 0x22, 0x33, 0x44, 0x55);
        let server = Server {
            ip: "10.0.0.2".parse().unwrap(),
            mac: MacAddr::new(0, 0, 0, 0, 0, 2),
            port: 1,
        };

        let [forward, back] = sticky_pair(virtual_ip, 4, client_mac, &server);

        assert_eq!(forward.match_fields.in_port, Some(4));
        assert_eq!(forward.match_fields.ipv4_dst, Some(virtual_ip));
        assert_eq!(
            forward.actions,
            vec![Action::SetIpv4Dst(server.ip), Action::Output(server.port)]
        );

        assert_eq!(back.match_fields.in_port, Some(server.port));
        assert_eq!(back.match_fields.ipv4_src, Some(server.ip));
        assert_eq!(back.match_fields.eth_dst, Some(client_mac));
        assert_eq!(
            back.actions,
            vec![Action::SetIpv4Src(virtual_ip), Action::Output(4)]
        );

        // the two rewrites undo each other and neither leaks the virtual IP
        // toward the server
        assert_eq!(forward.priority, PRIORITY_STICKY);
        assert_eq!(back.priority, PRIORITY_STICKY);
        assert_ne!(forward.match_fields.ipv4_dst, Some(server.ip));
    }

    #[test]
    fn learned_rule_priority_follows_the_ipv4_qualifier() {
        let src = MacAddr::new(0, 1, 2, 3, 4, 5);
        let dst = MacAddr::new(0, 6, 7, 8, 9, 10);

        let plain = learned_unicast(1, src, dst, 0x0806, None, 2, None);
        assert_eq!(plain.priority, PRIORITY_L2);
        assert_eq!(plain.match_fields.ipv4_dst, None);

        let qualified = learned_unicast(
            1,
            src,
            dst,
            ETH_TYPE_IPV4,
            Some("192.168.0.7".parse().unwrap()),
            2,
            Some(99),
        );
        assert_eq!(qualified.priority, PRIORITY_L2_IPV4);
        assert_eq!(qualified.buffer_id, Some(99));
    }
}
