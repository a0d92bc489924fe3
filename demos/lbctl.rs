use std::net::Ipv4Addr;
use std::process::exit;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use env_logger::Env;
use eui48::MacAddress;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use structopt::StructOpt;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

#[macro_use]
extern crate log;

use sticklb::config::{Config, Server, SwitchId};
use sticklb::controller::{self, Event, Outbound};
use sticklb::engine::Engine;
use sticklb::flow::Directive;

#[derive(StructOpt, Debug)]
#[structopt(name = "lbctl")]
/// Dry run of the sticky load balancing decision core against synthetic clients
struct Opt {
    #[structopt(
        short,
        long,
        parse(try_from_str),
        default_value = "192.168.0.100",
        env = "LBCTL_VIRTUAL_IP"
    )]
    /// virtual service address published to clients
    virtual_ip: Ipv4Addr,
    #[structopt(short, long, default_value = "2", env = "LBCTL_POOL_SIZE")]
    /// size of the generated backend pool (ignored when --server is given)
    pool_size: usize,
    #[structopt(short, long, parse(try_from_str = parse_server))]
    /// explicit backend server as ip,mac,port (repeatable)
    server: Vec<Server>,
    #[structopt(short, long, default_value = "2", env = "LBCTL_CLIENTS")]
    /// number of synthetic clients to drive through the engine
    clients: usize,
}

fn parse_server(spec: &str) -> Result<Server, String> {
    let mut parts = spec.split(',');
    let ip = parts.next().ok_or_else(|| "missing ip".to_string())?.trim();
    let mac = parts.next().ok_or_else(|| "missing mac".to_string())?.trim();
    let port = parts.next().ok_or_else(|| "missing port".to_string())?.trim();
    if parts.next().is_some() {
        return Err(format!("trailing fields in `{}`", spec));
    }

    let ip = Ipv4Addr::from_str(ip).map_err(|e| e.to_string())?;
    let mac = MacAddress::from_str(mac).map_err(|e| e.to_string())?;
    let b = mac.to_array();
    let port = port.parse::<u32>().map_err(|e| e.to_string())?;
    Ok(Server {
        ip,
        mac: MacAddr::new(b[0], b[1], b[2], b[3], b[4], b[5]),
        port,
    })
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

fn log_outbound(outbound: Outbound) {
    match outbound.directive {
        Directive::Install(install) => {
            info!("switch {}: flow install {:?}", outbound.switch, install)
        }
        Directive::Out(out) => info!("switch {}: packet out {:?}", outbound.switch, out),
    }
}

/// Walk every synthetic client through ARP resolution and the first IPv4
/// packet toward the virtual IP, logging each directive the core emits.
async fn session(opt: Opt) -> Result<(), sticklb::Error> {
    let servers = if opt.server.is_empty() {
        Config::generate_pool(opt.pool_size)
    } else {
        opt.server.clone()
    };
    let config = Config::new(opt.virtual_ip, servers)?;

    let engine = Arc::new(Engine::new(&config));
    let (event_tx, event_rx) = mpsc::channel(32);
    let (out_tx, mut out_rx) = mpsc::channel(32);
    let controller = tokio::spawn(controller::run(Arc::clone(&engine), event_rx, out_tx));

    let switch = SwitchId(1);
    event_tx.send(Event::SwitchConnected { switch }).await?;
    log_outbound(out_rx.recv().await.ok_or("controller went away")?);

    for i in 0..opt.clients {
        let client_ip = Ipv4Addr::new(10, 0, 1, (i % 254 + 1) as u8);
        let client_mac = MacAddr::new(0, 0, 0, 0, 1, (i % 254 + 1) as u8);
        let client_port = 100 + i as u32;

        event_tx
            .send(Event::PacketIn {
                switch,
                in_port: client_port,
                data: Bytes::from(arp_request(client_ip, client_mac, opt.virtual_ip)),
                buffer_id: None,
            })
            .await?;

        let reply = out_rx.recv().await.ok_or("controller went away")?;
        let server_mac = match &reply.directive {
            Directive::Out(out) => {
                let data = out.data.as_ref().ok_or("arp reply without data")?;
                debug!("arp reply frame: {}", hex::encode(data));
                let eth = EthernetPacket::new(data).ok_or("truncated arp reply")?;
                let arp = ArpPacket::new(eth.payload()).ok_or("truncated arp reply")?;
                info!(
                    "client {} resolved {} to {}",
                    client_ip,
                    opt.virtual_ip,
                    arp.get_sender_hw_addr()
                );
                arp.get_sender_hw_addr()
            }
            other => return Err(format!("expected an ARP packet-out, got {:?}", other).into()),
        };

        event_tx
            .send(Event::PacketIn {
                switch,
                in_port: client_port,
                data: Bytes::from(ipv4_frame(client_mac, server_mac, client_ip, opt.virtual_ip)),
                buffer_id: None,
            })
            .await?;

        // forward and return NAT rules
        for _ in 0..2 {
            log_outbound(out_rx.recv().await.ok_or("controller went away")?);
        }
    }

    drop(event_tx);
    controller.await?;

    info!(
        "{} sticky assignments over {} servers",
        engine.registry().assignment_count(),
        engine.registry().servers().len()
    );
    Ok(())
}

fn main() {
    let env = Env::default()
        .filter_or("LBCTL_LOG_LEVEL", "info")
        .write_style_or("LBCTL_LOG_STYLE", "always");

    env_logger::init_from_env(env);

    let opt = Opt::from_args();
    debug!("args: {:?}", opt);

    let runtime = Runtime::new().unwrap();
    if let Err(e) = runtime.block_on(session(opt)) {
        error!("{:?}", e);
        exit(1);
    }
    runtime.shutdown_timeout(Duration::from_secs(0));
}
