//! MIDI utilities and message types
//!
//! Provides MIDI message parsing/encoding and the fixed-size USB-MIDI event
//! packet that travels through the chain.

use crate::address::PortAddress;
use std::fmt;

/// Channel-mode controller numbers handled by the device
pub mod cc {
    /// All Sound Off
    pub const ALL_SOUND_OFF: u8 = 120;
    /// Local Control on/off (value >= 64 means on)
    pub const LOCAL_CONTROL: u8 = 122;
    /// All Notes Off
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// MIDI message types relevant to a sensor node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Timing Clock
    TimingClock,

    /// Start
    Start,

    /// Continue
    Continue,

    /// Stop
    Stop,

    /// Active Sensing
    ActiveSensing,

    /// System Reset
    SystemReset,
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;

        // Running status is never used on the chain
        if status < 0x80 {
            return None;
        }

        if status < 0xF0 {
            let channel = status & 0x0F;
            if data.len() < 3 {
                return None;
            }
            let data1 = data[1] & 0x7F;
            let data2 = data[2] & 0x7F;

            match status & 0xF0 {
                0x80 => Some(MidiMessage::NoteOff { channel, note: data1, velocity: data2 }),
                0x90 if data2 == 0 => Some(MidiMessage::NoteOff { channel, note: data1, velocity: 0 }),
                0x90 => Some(MidiMessage::NoteOn { channel, note: data1, velocity: data2 }),
                0xB0 => Some(MidiMessage::ControlChange { channel, cc: data1, value: data2 }),
                _ => None,
            }
        } else {
            match status {
                0xF8 => Some(MidiMessage::TimingClock),
                0xFA => Some(MidiMessage::Start),
                0xFB => Some(MidiMessage::Continue),
                0xFC => Some(MidiMessage::Stop),
                0xFE => Some(MidiMessage::ActiveSensing),
                0xFF => Some(MidiMessage::SystemReset),
                _ => None,
            }
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::TimingClock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Continue => vec![0xFB],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::ActiveSensing => vec![0xFE],
            MidiMessage::SystemReset => vec![0xFF],
        }
    }

    /// USB-MIDI code index number for this message
    pub fn code_index(&self) -> u8 {
        match self {
            MidiMessage::NoteOff { .. } => 0x8,
            MidiMessage::NoteOn { .. } => 0x9,
            MidiMessage::ControlChange { .. } => 0xB,
            _ => 0xF,
        }
    }

    /// Get the channel for channel messages (0-15), None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::ControlChange { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

/// One USB-MIDI event packet: a port (cable) nibble, a code index nibble and
/// up to three MIDI bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub port: PortAddress,
    pub code_index: u8,
    pub data: [u8; 3],
}

impl MidiEvent {
    /// Wrap a message into an event for the given port
    pub fn new(port: PortAddress, message: MidiMessage) -> Self {
        let mut data = [0u8; 3];
        for (slot, byte) in data.iter_mut().zip(message.encode()) {
            *slot = byte;
        }
        Self {
            port,
            code_index: message.code_index(),
            data,
        }
    }

    pub fn control_change(port: PortAddress, channel: u8, cc: u8, value: u8) -> Self {
        Self::new(port, MidiMessage::ControlChange { channel, cc, value })
    }

    /// Same payload, different port
    pub fn with_port(self, port: PortAddress) -> Self {
        Self { port, ..self }
    }

    /// Decode the MIDI payload
    pub fn message(&self) -> Option<MidiMessage> {
        MidiMessage::parse(&self.data)
    }

    /// Raw 4-byte USB-MIDI representation
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.port.value() << 4) | (self.code_index & 0x0F),
            self.data[0],
            self.data[1],
            self.data[2],
        ]
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            port: PortAddress::from_nibble(bytes[0] >> 4),
            code_index: bytes[0] & 0x0F,
            data: [bytes[1], bytes[2], bytes[3]],
        }
    }

    /// Bytes of the MIDI message itself, without padding
    pub fn midi_bytes(&self) -> &[u8] {
        let len = match self.code_index {
            0x8..=0xE => 3,
            _ => 1,
        };
        &self.data[..len]
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{} {}", self.port, message),
            None => write!(f, "{} [{}]", self.port, format_hex(&self.data)),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
