//! Link routing engine - decides where every MIDI packet goes
//!
//! Packets arrive from three sources and leave towards the local device, the
//! USB host, the parent (Plug) or the children (Socket):
//!
//! ```text
//!                 USB host
//!                    ▲ │
//!        socket +1   │ │ port 0 → device, port 1-15 → socket as N-1
//!                    │ ▼
//!   Plug ──────▶ [ LinkRouter ] ◀────── Socket
//!  (parent)    always local    children, 0xF dropped
//! ```
//!
//! The engine holds no per-packet state between calls; each call routes one
//! packet to completion.

mod dispatch;


use crate::address::PortAddress;
use crate::device::DeviceCapabilities;
use crate::midi::MidiEvent;
use crate::transport::{LinkPacket, LinkPort, UsbEndpoint};
use serde::Serialize;
use std::fmt;
use tracing::{debug, trace};

/// Where a packet came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Usb,
    Plug,
    Socket,
    Sensor,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Usb => write!(f, "usb"),
            Source::Plug => write!(f, "plug"),
            Source::Socket => write!(f, "socket"),
            Source::Sensor => write!(f, "sensor"),
        }
    }
}

/// Why a packet was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Address 0xF never travels upstream
    Terminator,
    /// No USB session to relay to
    NoUsb,
    /// Re-encoding would leave the address space
    AddressOverflow,
    /// Link-level packet the engine does not route
    NotMidi,
    /// The transport refused the packet
    SendFailed,
}

/// Routing decision for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the local device's command dispatcher
    Local,
    /// Sent to the USB host on the given port
    Usb(PortAddress),
    /// Sent to the parent over the Plug link
    Upstream(PortAddress),
    /// Sent to the children over the Socket link
    Downstream(PortAddress),
    Dropped(DropReason),
}

/// Engine state; `Dispatching` only while a packet is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterState {
    #[default]
    Idle,
    Dispatching,
}

/// Per-destination counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RouteStats {
    pub local: u64,
    pub usb: u64,
    pub upstream: u64,
    pub downstream: u64,
    pub dropped: u64,
}

impl RouteStats {
    fn record(&mut self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Local => self.local += 1,
            RouteOutcome::Usb(_) => self.usb += 1,
            RouteOutcome::Upstream(_) => self.upstream += 1,
            RouteOutcome::Downstream(_) => self.downstream += 1,
            RouteOutcome::Dropped(_) => self.dropped += 1,
        }
    }
}

/// Chain relay state machine
#[derive(Debug, Default)]
pub struct LinkRouter {
    state: RouterState,
    stats: RouteStats,
}

impl LinkRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn stats(&self) -> RouteStats {
        self.stats
    }

    /// Event from the USB host.
    ///
    /// Port 0 addresses this device; any other port, the terminator
    /// included, is consumed by one unit and passed down the chain.
    pub fn route_usb(
        &mut self,
        event: MidiEvent,
        device: &mut dyn DeviceCapabilities,
        socket: &mut dyn LinkPort,
    ) -> RouteOutcome {
        self.begin();

        // Only the local port has nothing left to consume
        let outcome = match event.port.downstream() {
            None => {
                dispatch::to_device(device, &event);
                RouteOutcome::Local
            }
            Some(port) => match socket.send(LinkPacket::Midi(event.with_port(port))) {
                Ok(()) => RouteOutcome::Downstream(port),
                Err(e) => {
                    debug!("Socket send failed: {}", e);
                    RouteOutcome::Dropped(DropReason::SendFailed)
                }
            },
        };

        self.finish(Source::Usb, &event, outcome)
    }

    /// Packet from the parent: this device is always local to its parent
    pub fn route_plug(
        &mut self,
        packet: LinkPacket,
        device: &mut dyn DeviceCapabilities,
    ) -> RouteOutcome {
        self.begin();

        let LinkPacket::Midi(event) = packet else {
            trace!(?packet, "plug control packet ignored");
            return self.finish_unrouted(Source::Plug);
        };

        dispatch::to_device(device, &event);
        self.finish(Source::Plug, &event, RouteOutcome::Local)
    }

    /// Packet bubbling up from a child.
    ///
    /// Relayed to USB with its address re-encoded one port higher, or dropped
    /// when it carries the terminator or no USB session is open. Nothing is
    /// buffered.
    pub fn route_socket(&mut self, packet: LinkPacket, usb: &mut dyn UsbEndpoint) -> RouteOutcome {
        self.begin();

        let LinkPacket::Midi(event) = packet else {
            trace!(?packet, "socket control packet ignored");
            return self.finish_unrouted(Source::Socket);
        };

        let outcome = if event.port.is_terminator() {
            RouteOutcome::Dropped(DropReason::Terminator)
        } else if !usb.is_connected() {
            RouteOutcome::Dropped(DropReason::NoUsb)
        } else {
            match event.port.upstream() {
                None => RouteOutcome::Dropped(DropReason::AddressOverflow),
                Some(port) => match usb.send(event.with_port(port)) {
                    Ok(()) => RouteOutcome::Usb(port),
                    Err(e) => {
                        debug!("USB send failed: {}", e);
                        RouteOutcome::Dropped(DropReason::SendFailed)
                    }
                },
            }
        };

        self.finish(Source::Socket, &event, outcome)
    }

    /// Event produced by this device's sensor.
    ///
    /// Goes straight to USB when a session is open, otherwise up the Plug
    /// link as address 0 so the parent re-encodes it.
    pub fn route_local(
        &mut self,
        event: MidiEvent,
        device: &mut dyn DeviceCapabilities,
        usb: &mut dyn UsbEndpoint,
        plug: &mut dyn LinkPort,
    ) -> RouteOutcome {
        self.begin();

        let event = event.with_port(PortAddress::LOCAL);
        let sent = if usb.is_connected() {
            usb.send(event).map(|()| RouteOutcome::Usb(PortAddress::LOCAL))
        } else {
            plug.send(LinkPacket::Midi(event))
                .map(|()| RouteOutcome::Upstream(PortAddress::LOCAL))
        };

        let outcome = match sent {
            Ok(outcome) => {
                device.on_send(&event);
                outcome
            }
            Err(e) => {
                debug!("Local event not sent: {}", e);
                RouteOutcome::Dropped(DropReason::SendFailed)
            }
        };

        self.finish(Source::Sensor, &event, outcome)
    }

    fn begin(&mut self) {
        self.state = RouterState::Dispatching;
    }

    fn finish(&mut self, source: Source, event: &MidiEvent, outcome: RouteOutcome) -> RouteOutcome {
        self.stats.record(&outcome);
        self.state = RouterState::Idle;
        debug!(%source, event = %event, ?outcome, "routed");
        outcome
    }

    fn finish_unrouted(&mut self, source: Source) -> RouteOutcome {
        let outcome = RouteOutcome::Dropped(DropReason::NotMidi);
        self.stats.record(&outcome);
        self.state = RouterState::Idle;
        trace!(%source, "non-MIDI packet");
        outcome
    }
}
