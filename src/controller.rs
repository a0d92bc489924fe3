//! Event-driven front end bridging a transport to the decision engine.
//!
//! The transport layer (OpenFlow codec, socket handling, reconnects) lives
//! outside this crate; the boundary is a channel pair. Directives are
//! fire-and-forget: once sent they are final, and a closed outbound channel
//! just means nobody is listening anymore.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::SwitchId;
use crate::engine::Engine;
use crate::flow::Directive;

/// Events delivered by the transport layer.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new datapath session, delivered once per connection.
    SwitchConnected { switch: SwitchId },
    /// An unmatched frame deferred to the controller. `buffer_id` references
    /// a datapath-held copy of the frame when one exists.
    PacketIn {
        switch: SwitchId,
        in_port: u32,
        data: Bytes,
        buffer_id: Option<u32>,
    },
}

/// One directive addressed to a specific datapath session.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub switch: SwitchId,
    pub directive: Directive,
}

/// Consume transport events until the event channel closes, pushing every
/// resulting directive to `out`. Events are handled in delivery order; the
/// engine itself is safe for transports that prefer to call it concurrently
/// from several tasks instead.
pub async fn run(engine: Arc<Engine>, mut events: mpsc::Receiver<Event>, out: mpsc::Sender<Outbound>) {
    info!("controller starts!");

    while let Some(event) = events.recv().await {
        match event {
            Event::SwitchConnected { switch } => {
                let install = engine.on_switch_connected(switch);
                let _ = out
                    .send(Outbound {
                        switch,
                        directive: Directive::Install(install),
                    })
                    .await;
            }
            Event::PacketIn {
                switch,
                in_port,
                data,
                buffer_id,
            } => {
                for directive in engine.on_packet_in(switch, in_port, &data, buffer_id) {
                    let _ = out.send(Outbound { switch, directive }).await;
                }
            }
        }
    }

    info!("event channel closed - controller stops");
}
