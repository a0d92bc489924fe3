//! End-to-end scenario: two clients resolve the virtual IP and get disjoint
//! sticky NAT rule pairs, driven through the controller channel boundary.

use std::net::Ipv4Addr;
use std::sync::Arc;

use bytes::Bytes;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use tokio::sync::mpsc;

use sticklb::config::{Config, Server, SwitchId};
use sticklb::controller::{self, Event, Outbound};
use sticklb::engine::Engine;
use sticklb::flow::{Action, Directive, FlowInstall, PRIORITY_STICKY, PRIORITY_TABLE_MISS};

const VIP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 100);
const SWITCH: SwitchId = SwitchId(1);

fn pool() -> Vec<Server> {
    vec![
        Server {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            mac: MacAddr::new(0, 0, 0, 0, 0, 2),
            port: 1,
        },
        Server {
            ip: Ipv4Addr::new(10, 0, 0, 3),
            mac: MacAddr::new(0, 0, 0, 0, 0, 3),
            port: 2,
        },
    ]
}

fn arp_request(sender_ip: Ipv4Addr, sender_mac: MacAddr, target_ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = vec![0u8; 42];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(sender_mac);
        eth.set_ethertype(EtherTypes::Arp);

        let mut arp = MutableArpPacket::new(eth.payload_mut()).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(sender_mac);
        arp.set_sender_proto_addr(sender_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target_ip);
    }
    buf
}

fn ipv4_frame(src_mac: MacAddr, dst_mac: MacAddr, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = vec![0u8; 14 + 20];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_destination(dst_mac);
        eth.set_source(src_mac);
        eth.set_ethertype(EtherTypes::Ipv4);

        let mut ip = MutableIpv4Packet::new(eth.payload_mut()).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(20);
        ip.set_ttl(64);
        ip.set_source(src_ip);
        ip.set_destination(dst_ip);
    }
    buf
}

/// Extract the advertised server MAC from an ARP reply packet-out.
fn server_mac_of(reply: &Outbound) -> MacAddr {
    let out = match &reply.directive {
        Directive::Out(out) => out,
        other => panic!("expected an ARP packet-out, got {:?}", other),
    };
    let data = out.data.as_ref().expect("ARP reply carries its frame");
    let eth = EthernetPacket::new(data).unwrap();
    let arp = ArpPacket::new(eth.payload()).unwrap();
    assert_eq!(arp.get_operation(), ArpOperations::Reply);
    assert_eq!(arp.get_sender_proto_addr(), VIP);
    arp.get_sender_hw_addr()
}

fn install_of(outbound: &Outbound) -> &FlowInstall {
    match &outbound.directive {
        Directive::Install(install) => install,
        other => panic!("expected a flow install, got {:?}", other),
    }
}

/// Drive one client through ARP resolution and its first IPv4 packet, and
/// check its NAT pair references exactly its assigned server and its own
/// ingress port.
async fn drive_client(
    events: &mpsc::Sender<Event>,
    out: &mut mpsc::Receiver<Outbound>,
    servers: &[Server],
    client_ip: Ipv4Addr,
    client_mac: MacAddr,
    client_port: u32,
) -> Server {
    events
        .send(Event::PacketIn {
            switch: SWITCH,
            in_port: client_port,
            data: Bytes::from(arp_request(client_ip, client_mac, VIP)),
            buffer_id: None,
        })
        .await
        .unwrap();
    let reply = out.recv().await.unwrap();
    let mac = server_mac_of(&reply);
    let server = *servers.iter().find(|s| s.mac == mac).unwrap();

    events
        .send(Event::PacketIn {
            switch: SWITCH,
            in_port: client_port,
            data: Bytes::from(ipv4_frame(client_mac, server.mac, client_ip, VIP)),
            buffer_id: None,
        })
        .await
        .unwrap();

    let forward = out.recv().await.unwrap();
    let forward = install_of(&forward);
    assert_eq!(forward.priority, PRIORITY_STICKY);
    assert_eq!(forward.match_fields.in_port, Some(client_port));
    assert_eq!(forward.match_fields.ipv4_dst, Some(VIP));
    assert_eq!(
        forward.actions,
        vec![Action::SetIpv4Dst(server.ip), Action::Output(server.port)]
    );

    let back = out.recv().await.unwrap();
    let back = install_of(&back);
    assert_eq!(back.priority, PRIORITY_STICKY);
    assert_eq!(back.match_fields.in_port, Some(server.port));
    assert_eq!(back.match_fields.ipv4_src, Some(server.ip));
    assert_eq!(back.match_fields.eth_dst, Some(client_mac));
    assert_eq!(
        back.actions,
        vec![Action::SetIpv4Src(VIP), Action::Output(client_port)]
    );

    server
}

#[tokio::test]
async fn two_clients_get_disjoint_sticky_rule_pairs() {
    let servers = pool();
    let config = Config::new(VIP, servers.clone()).unwrap();
    let engine = Arc::new(Engine::new(&config));

    let (event_tx, event_rx) = mpsc::channel(16);
    let (out_tx, mut out_rx) = mpsc::channel(16);
    let controller = tokio::spawn(controller::run(Arc::clone(&engine), event_rx, out_tx));

    // connection setup installs the table-miss fallback
    event_tx
        .send(Event::SwitchConnected { switch: SWITCH })
        .await
        .unwrap();
    let miss = out_rx.recv().await.unwrap();
    let miss = install_of(&miss);
    assert_eq!(miss.priority, PRIORITY_TABLE_MISS);
    assert_eq!(miss.actions, vec![Action::ToController]);

    let c1_ip = Ipv4Addr::new(10, 0, 0, 50);
    let c1_mac = MacAddr::new(0, 0, 0, 0, 0, 0x51);
    let c2_ip = Ipv4Addr::new(10, 0, 0, 60);
    let c2_mac = MacAddr::new(0, 0, 0, 0, 0, 0x61);

    let s_c1 = drive_client(&event_tx, &mut out_rx, &servers, c1_ip, c1_mac, 5).await;
    let s_c2 = drive_client(&event_tx, &mut out_rx, &servers, c2_ip, c2_mac, 6).await;

    // re-resolving after another client's traffic yields the same server
    event_tx
        .send(Event::PacketIn {
            switch: SWITCH,
            in_port: 5,
            data: Bytes::from(arp_request(c1_ip, c1_mac, VIP)),
            buffer_id: None,
        })
        .await
        .unwrap();
    let reply = out_rx.recv().await.unwrap();
    assert_eq!(server_mac_of(&reply), s_c1.mac);

    // both bindings are recorded, and each client's pair referenced only its
    // own server; a shared server is legal under random assignment, but the
    // rules never mix ports of different clients
    assert_eq!(engine.registry().assignment_count(), 2);
    assert!(servers.contains(&s_c1));
    assert!(servers.contains(&s_c2));

    drop(event_tx);
    controller.await.unwrap();
}

#[tokio::test]
async fn concurrent_switches_do_not_share_learning_state() {
    let config = Config::new(VIP, pool()).unwrap();
    let engine = Arc::new(Engine::new(&config));

    let mut handles = Vec::new();
    for switch in 1..=8u64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let mac = MacAddr::new(0, 0, 0, 0, 9, switch as u8);
            let peer = MacAddr::new(0, 0, 0, 0, 8, switch as u8);
            let frame = ipv4_frame(
                mac,
                peer,
                Ipv4Addr::new(10, 0, 2, switch as u8),
                Ipv4Addr::new(10, 0, 3, switch as u8),
            );
            for _ in 0..50 {
                engine.on_packet_in(SwitchId(switch), switch as u32, &frame, None);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for switch in 1..=8u64 {
        let mac = MacAddr::new(0, 0, 0, 0, 9, switch as u8);
        assert_eq!(
            engine.learning().lookup(SwitchId(switch), mac),
            Some(switch as u32)
        );
        // and nothing leaked across datapaths
        let other = SwitchId(switch % 8 + 1);
        if other != SwitchId(switch) {
            assert_eq!(engine.learning().lookup(other, mac), None);
        }
    }
}
