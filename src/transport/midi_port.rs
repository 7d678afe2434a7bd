//! USB endpoint backed by host MIDI ports (midir)
//!
//! Lets a node running on a workstation talk to real MIDI software. Matching
//! ports are sorted by name and the Nth one carries USB cable N, in both
//! directions, so the host can address each device of the chain through its
//! own port pair.

use super::{LinkError, UsbEndpoint};
use crate::address::PortAddress;
use crate::midi::{format_hex, MidiEvent, MidiMessage};
use anyhow::{anyhow, Result};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

const CLIENT_NAME: &str = "midi-chain-node";

/// Cable numbers fit the 4-bit port field
const MAX_CABLES: usize = 16;

/// USB endpoint emulated on top of OS MIDI ports
pub struct MidirUsb {
    outputs: Vec<(String, MidiOutputConnection)>,
    _inputs: Vec<MidiInputConnection<()>>,
    inbound: UnboundedReceiver<MidiEvent>,
}

impl MidirUsb {
    /// Open every output and input port whose name contains `pattern`.
    ///
    /// At least one output must match; inputs are optional.
    pub fn connect(pattern: &str) -> Result<Self> {
        let probe = MidiOutput::new(CLIENT_NAME)?;
        let names = cable_ports(
            probe.ports().iter().filter_map(|port| probe.port_name(port).ok()),
            pattern,
        );

        if names.is_empty() {
            return Err(anyhow!("No MIDI output port matches '{}'", pattern));
        }

        let mut outputs = Vec::with_capacity(names.len());
        for name in names {
            let midi_out = MidiOutput::new(CLIENT_NAME)?;
            let port = midi_out
                .ports()
                .into_iter()
                .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("Output port '{}' disappeared", name))?;
            let connection = midi_out
                .connect(&port, CLIENT_NAME)
                .map_err(|e| anyhow!("Failed to open output '{}': {}", name, e))?;
            info!("🎹 USB cable {} → '{}'", outputs.len(), name);
            outputs.push((name, connection));
        }

        let (tx, inbound) = mpsc::unbounded_channel();
        let inputs = Self::open_inputs(pattern, &tx).unwrap_or_else(|e| {
            warn!("No MIDI input for '{}': {}", pattern, e);
            Vec::new()
        });

        Ok(Self {
            outputs,
            _inputs: inputs,
            inbound,
        })
    }

    fn open_inputs(
        pattern: &str,
        tx: &UnboundedSender<MidiEvent>,
    ) -> Result<Vec<MidiInputConnection<()>>> {
        let probe = MidiInput::new(CLIENT_NAME)?;
        let names = cable_ports(
            probe.ports().iter().filter_map(|port| probe.port_name(port).ok()),
            pattern,
        );

        let mut connections = Vec::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            let cable = cable_address(index);
            let midi_in = MidiInput::new(CLIENT_NAME)?;
            let Some(port) = midi_in
                .ports()
                .into_iter()
                .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
            else {
                warn!("Input port '{}' disappeared", name);
                continue;
            };

            let tx = tx.clone();
            let connection = midi_in
                .connect(
                    &port,
                    CLIENT_NAME,
                    move |_timestamp, data, _| {
                        debug!("🔙 USB RX <- {} {}", cable, format_hex(data));
                        if let Some(event) = inbound_event(cable, data) {
                            let _ = tx.send(event);
                        }
                    },
                    (),
                )
                .map_err(|e| anyhow!("Failed to open input '{}': {}", name, e))?;
            info!("🎹 USB cable {} ← '{}'", index, name);
            connections.push(connection);
        }

        Ok(connections)
    }
}

impl UsbEndpoint for MidirUsb {
    fn try_recv(&mut self) -> Option<MidiEvent> {
        self.inbound.try_recv().ok()
    }

    fn send(&mut self, event: MidiEvent) -> Result<(), LinkError> {
        let cable = usize::from(event.port.value());
        let Some((name, connection)) = self.outputs.get_mut(cable) else {
            return Err(LinkError::Rejected(format!("no output port for cable {}", cable)));
        };
        connection
            .send(event.midi_bytes())
            .map_err(|e| LinkError::Rejected(format!("{}: {}", name, e)))
    }

    fn is_connected(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// Port names carrying cables 0.., in name order
fn cable_ports(names: impl Iterator<Item = String>, pattern: &str) -> Vec<String> {
    let mut names: Vec<String> = names.filter(|name| name.contains(pattern)).collect();
    names.sort();
    names.truncate(MAX_CABLES);
    names
}

fn cable_address(index: usize) -> PortAddress {
    PortAddress::from_nibble(index.min(MAX_CABLES - 1) as u8)
}

/// Event for a message the host sent on `cable`
fn inbound_event(cable: PortAddress, data: &[u8]) -> Option<MidiEvent> {
    MidiMessage::parse(data).map(|message| MidiEvent::new(cable, message))
}

/// Print available MIDI ports
pub fn list_ports() -> Result<()> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;
    let midi_out = MidiOutput::new(CLIENT_NAME)?;

    println!("\n=== Available MIDI Ports ===");

    println!("\nInput Ports:");
    let inputs = midi_in.ports();
    if inputs.is_empty() {
        println!("  No input ports found");
    }
    for port in &inputs {
        println!("  {}", midi_in.port_name(port).unwrap_or_else(|_| "<unknown>".into()));
    }

    println!("\nOutput Ports:");
    let outputs = midi_out.ports();
    if outputs.is_empty() {
        println!("  No output ports found");
    }
    for port in &outputs {
        println!("  {}", midi_out.port_name(port).unwrap_or_else(|_| "<unknown>".into()));
    }

    Ok(())
}
