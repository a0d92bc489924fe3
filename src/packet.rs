//! Frame classification and ARP reply synthesis.
//!
//! `classify` turns a raw unmatched frame into the tagged variant the
//! decision engine dispatches on. Anything that does not parse comes back as
//! `None` and is silently dropped by the caller; discovery traffic (LLDP,
//! IPv6) is recognized but deliberately ignored.

use bytes::Bytes;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

/// Ethernet + ARP reply frame size.
const ARP_FRAME_LEN: usize = 42;

/// What an unmatched frame turned out to be, in the order the engine cares:
/// discovery noise, virtual-IP ARP, virtual-IP IPv4, then plain L2 traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// LLDP or IPv6 discovery traffic; dropped without a directive.
    Discovery,
    /// An ARP request whose target protocol address is the virtual IP.
    VipArpRequest {
        client_ip: Ipv4Addr,
        client_mac: MacAddr,
    },
    /// An IPv4 frame destined to the virtual IP. The destination MAC is the
    /// (previously ARP-advertised) server hardware address.
    VipIpv4 {
        client_mac: MacAddr,
        server_mac: MacAddr,
    },
    /// Everything else: plain L2 forwarding, with the IPv4 destination kept
    /// around when present so the learned rule can match on it.
    Other {
        src_mac: MacAddr,
        dst_mac: MacAddr,
        ethertype: u16,
        ipv4_dst: Option<Ipv4Addr>,
    },
}

/// Classify a raw frame against the virtual IP. `None` means the frame was
/// unparseable and must be dropped without a directive.
pub fn classify(frame: &[u8], virtual_ip: Ipv4Addr) -> Option<Classified> {
    let eth = EthernetPacket::new(frame)?;
    let ethertype = eth.get_ethertype();

    if ethertype == EtherTypes::Lldp || ethertype == EtherTypes::Ipv6 {
        return Some(Classified::Discovery);
    }

    if ethertype == EtherTypes::Arp {
        let arp = ArpPacket::new(eth.payload())?;
        if arp.get_operation() == ArpOperations::Request
            && arp.get_target_proto_addr() == virtual_ip
        {
            return Some(Classified::VipArpRequest {
                client_ip: arp.get_sender_proto_addr(),
                client_mac: arp.get_sender_hw_addr(),
            });
        }
        return Some(Classified::Other {
            src_mac: eth.get_source(),
            dst_mac: eth.get_destination(),
            ethertype: ethertype.0,
            ipv4_dst: None,
        });
    }

    if ethertype == EtherTypes::Ipv4 {
        let ip = Ipv4Packet::new(eth.payload())?;
        if ip.get_destination() == virtual_ip {
            return Some(Classified::VipIpv4 {
                client_mac: eth.get_source(),
                server_mac: eth.get_destination(),
            });
        }
        return Some(Classified::Other {
            src_mac: eth.get_source(),
            dst_mac: eth.get_destination(),
            ethertype: ethertype.0,
            ipv4_dst: Some(ip.get_destination()),
        });
    }

    Some(Classified::Other {
        src_mac: eth.get_source(),
        dst_mac: eth.get_destination(),
        ethertype: ethertype.0,
        ipv4_dst: None,
    })
}

/// Synthesize the ARP reply for a virtual-IP request: sender protocol address
/// is the virtual IP, sender hardware address is the assigned server's real
/// MAC, so the return NAT rule can attach at the data plane without a second
/// lookup. Unicast back to the requestor.
pub fn vip_arp_reply(
    virtual_ip: Ipv4Addr,
    server_mac: MacAddr,
    client_ip: Ipv4Addr,
    client_mac: MacAddr,
) -> Bytes {
    let mut buf = vec![0u8; ARP_FRAME_LEN];
    {
        // the fixed-size buffer always fits both headers
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_destination(client_mac);
        eth.set_source(server_mac);
        eth.set_ethertype(EtherTypes::Arp);

        let mut arp = MutableArpPacket::new(eth.payload_mut()).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Reply);
        arp.set_sender_hw_addr(server_mac);
        arp.set_sender_proto_addr(virtual_ip);
        arp.set_target_hw_addr(client_mac);
        arp.set_target_proto_addr(client_ip);
    }
    Bytes::from(buf)
}
