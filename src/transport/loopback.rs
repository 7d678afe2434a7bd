//! In-memory transports for running a chain on one host
//!
//! Links are pairs of unbounded tokio channels; both ends only use
//! `try_recv`/`send`, so no runtime is required to drive them.

use super::{LinkError, LinkPacket, LinkPort, UsbEndpoint};
use crate::midi::MidiEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::trace;

/// One end of an in-memory serial link
#[derive(Debug)]
pub struct LinkEnd {
    name: &'static str,
    tx: UnboundedSender<LinkPacket>,
    rx: UnboundedReceiver<LinkPacket>,
}

impl LinkEnd {
    /// Create a connected pair: `(socket, plug)`.
    ///
    /// The first end belongs to the parent's Socket, the second to the
    /// child's Plug.
    pub fn pair() -> (LinkEnd, LinkEnd) {
        let (down_tx, down_rx) = mpsc::unbounded_channel();
        let (up_tx, up_rx) = mpsc::unbounded_channel();
        (
            LinkEnd { name: "socket", tx: down_tx, rx: up_rx },
            LinkEnd { name: "plug", tx: up_tx, rx: down_rx },
        )
    }

    /// A link with nothing on the other side
    pub fn unplugged() -> LinkEnd {
        let (socket, _plug) = Self::pair();
        socket
    }

    /// Whether the other end of the link still exists
    pub fn is_peer_present(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl LinkPort for LinkEnd {
    fn try_recv(&mut self) -> Option<LinkPacket> {
        match self.rx.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    fn send(&mut self, packet: LinkPacket) -> Result<(), LinkError> {
        trace!(link = self.name, ?packet, "link send");
        self.tx.send(packet).map_err(|_| LinkError::Disconnected)
    }

    fn is_idle(&self) -> bool {
        self.rx.is_empty() && !self.is_peer_present()
    }
}

/// Device side of a virtual USB MIDI connection
#[derive(Debug)]
pub struct VirtualUsb {
    connected: Arc<AtomicBool>,
    from_host: UnboundedReceiver<MidiEvent>,
    to_host: UnboundedSender<MidiEvent>,
}

/// Host side of a virtual USB MIDI connection
#[derive(Debug)]
pub struct UsbHost {
    connected: Arc<AtomicBool>,
    to_device: UnboundedSender<MidiEvent>,
    from_device: UnboundedReceiver<MidiEvent>,
}

impl VirtualUsb {
    /// Create a connected endpoint and the host handle driving it
    pub fn new() -> (VirtualUsb, UsbHost) {
        let connected = Arc::new(AtomicBool::new(true));
        let (to_device, from_host) = mpsc::unbounded_channel();
        let (to_host, from_device) = mpsc::unbounded_channel();
        (
            VirtualUsb {
                connected: connected.clone(),
                from_host,
                to_host,
            },
            UsbHost {
                connected,
                to_device,
                from_device,
            },
        )
    }

    /// An endpoint with no host plugged in
    pub fn detached() -> VirtualUsb {
        let (usb, host) = Self::new();
        host.set_connected(false);
        usb
    }
}

impl UsbEndpoint for VirtualUsb {
    fn try_recv(&mut self) -> Option<MidiEvent> {
        self.from_host.try_recv().ok()
    }

    fn send(&mut self, event: MidiEvent) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }
        self.to_host.send(event).map_err(|_| LinkError::Disconnected)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl UsbHost {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Queue an event for the device
    pub fn send(&self, event: MidiEvent) {
        // The device end lives as long as the node under test
        let _ = self.to_device.send(event);
    }

    /// Next event the device sent to the host
    pub fn recv(&mut self) -> Option<MidiEvent> {
        self.from_device.try_recv().ok()
    }

    /// Everything the device sent so far
    pub fn drain(&mut self) -> Vec<MidiEvent> {
        std::iter::from_fn(|| self.recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PortAddress;

    #[test]
    fn test_link_pair_is_bidirectional() {
        let (mut socket, mut plug) = LinkEnd::pair();
        let event = MidiEvent::control_change(PortAddress::LOCAL, 0, 1, 2);

        plug.send(LinkPacket::Midi(event)).unwrap();
        assert_eq!(socket.try_recv(), Some(LinkPacket::Midi(event)));

        socket.send(LinkPacket::Control(7)).unwrap();
        assert_eq!(plug.try_recv(), Some(LinkPacket::Control(7)));
        assert_eq!(plug.try_recv(), None);
    }

    #[test]
    fn test_connected_peer_keeps_link_busy() {
        let (socket, plug) = LinkEnd::pair();

        assert!(socket.is_peer_present());
        assert!(!socket.is_idle());

        drop(plug);
        assert!(!socket.is_peer_present());
        assert!(socket.is_idle());
    }

    #[test]
    fn test_packets_left_by_departed_peer_keep_link_busy() {
        let (mut socket, mut plug) = LinkEnd::pair();
        plug.send(LinkPacket::Control(3)).unwrap();
        drop(plug);

        assert!(!socket.is_idle());
        assert_eq!(socket.try_recv(), Some(LinkPacket::Control(3)));
        assert!(socket.is_idle());
    }

    #[test]
    fn test_unplugged_link_reports_disconnect() {
        let mut link = LinkEnd::unplugged();
        assert_eq!(link.try_recv(), None);
        assert_eq!(link.send(LinkPacket::Control(1)), Err(LinkError::Disconnected));
    }

    #[test]
    fn test_virtual_usb_respects_connection_state() {
        let (mut usb, mut host) = VirtualUsb::new();
        let event = MidiEvent::control_change(PortAddress::LOCAL, 0, 1, 2);

        assert!(usb.is_connected());
        usb.send(event).unwrap();
        assert_eq!(host.drain(), vec![event]);

        host.set_connected(false);
        assert_eq!(usb.send(event), Err(LinkError::Disconnected));
        assert!(host.recv().is_none());

        host.send(event);
        assert_eq!(usb.try_recv(), Some(event));
    }
}
