//! Transport boundaries: the USB MIDI endpoint and the serial chain links
//!
//! The node only ever talks to these traits. Every receive is a non-blocking
//! try-receive; every send is fire-and-forget with no queuing on our side.

pub mod loopback;
pub mod midi_port;

use crate::midi::MidiEvent;
use thiserror::Error;

pub use loopback::{LinkEnd, UsbHost, VirtualUsb};
pub use midi_port::MidirUsb;

/// Errors surfaced by transport implementations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("peer is gone")]
    Disconnected,

    #[error("transport rejected packet: {0}")]
    Rejected(String),
}

/// Packet exchanged over a Plug/Socket serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPacket {
    /// MIDI event; its port field is the chain address
    Midi(MidiEvent),
    /// Link-level control traffic (keepalive, handshake, ...)
    Control(u8),
}

/// USB MIDI endpoint facing the host computer
pub trait UsbEndpoint {
    /// Next pending event from the host, if any
    fn try_recv(&mut self) -> Option<MidiEvent>;

    /// Transmit an event to the host
    fn send(&mut self, event: MidiEvent) -> Result<(), LinkError>;

    /// Whether a host session is currently open
    fn is_connected(&self) -> bool;
}

/// One end of a point-to-point serial link
pub trait LinkPort {
    /// Next pending packet from the peer, if any
    fn try_recv(&mut self) -> Option<LinkPacket>;

    fn send(&mut self, packet: LinkPacket) -> Result<(), LinkError>;

    /// No packet pending and no peer connected on the other end
    fn is_idle(&self) -> bool;
}
