//! Local command dispatch
//!
//! Decodes a MIDI event addressed to this device and invokes the matching
//! device capability.

use crate::device::DeviceCapabilities;
use crate::midi::{MidiEvent, MidiMessage};
use tracing::trace;

pub(super) fn to_device(device: &mut dyn DeviceCapabilities, event: &MidiEvent) {
    match event.message() {
        Some(MidiMessage::ControlChange { channel, cc, value }) => {
            device.on_control_change(channel, cc, value);
        }
        Some(MidiMessage::SystemReset) => device.on_system_reset(),
        Some(other) => trace!(message = %other, "message ignored by device"),
        None => trace!(bytes = ?event.data, "undecodable event ignored"),
    }
}
