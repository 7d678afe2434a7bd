//! MIDI Chain Node
//!
//! Firmware core of a daisy-chained proximity sensor: reports distance as MIDI
//! control changes and relays MIDI for the devices chained behind it over
//! Plug (upstream) and Socket (downstream) serial links, multiplexing the
//! whole chain onto one USB MIDI connection.

pub mod address;
pub mod config;
pub mod device;
pub mod midi;
pub mod node;
pub mod router;
pub mod sensor;
pub mod transport;

pub use address::PortAddress;
pub use config::Configuration;
pub use midi::{MidiEvent, MidiMessage};
pub use node::{Node, NodeMode};
pub use router::{LinkRouter, RouteOutcome};
