//! The local proximity device and its command capabilities
//!
//! The routing engine never reaches into the device directly; it goes through
//! [`DeviceCapabilities`], the set of hooks a node device must provide.

use crate::config::Configuration;
use crate::midi::{cc, MidiEvent};
use crate::sensor::{SensorAdapter, SensorDriver};
use serde_json::Value;
use tracing::{debug, info, trace};

/// Hooks the routing engine invokes on the local device
pub trait DeviceCapabilities {
    /// A locally produced event is leaving the device
    fn on_send(&mut self, event: &MidiEvent);

    /// Control change addressed to this device
    fn on_control_change(&mut self, channel: u8, controller: u8, value: u8);

    /// MIDI System Reset addressed to this device
    fn on_system_reset(&mut self);

    /// Replace the configuration from a JSON document
    fn on_import(&mut self, raw: &Value) -> Configuration;

    /// Current configuration as a JSON document
    fn on_export(&self) -> Value;
}

/// Proximity sensor device: configuration, sensor and LED
pub struct ProximityDevice {
    config: Configuration,
    enabled: bool,
    adapter: SensorAdapter,
    sensor: Box<dyn SensorDriver>,
    sent: u64,
}

impl ProximityDevice {
    pub fn new(
        config: Configuration,
        adapter: SensorAdapter,
        mut sensor: Box<dyn SensorDriver>,
    ) -> Self {
        sensor.configure(&config.range);
        sensor.set_enabled(true);
        Self {
            config,
            enabled: true,
            adapter,
            sensor,
            sent: 0,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Events this device has produced and handed to a transport
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    /// Clear the visual output and disable the sensor
    pub fn reset(&mut self) {
        if self.enabled {
            info!("🔄 Device reset");
        }
        self.adapter.clear();
        self.sensor.set_enabled(false);
        self.enabled = false;
    }

    /// This device holds no sustained notes, so note-off is a full reset
    pub fn all_notes_off(&mut self) {
        self.reset();
    }

    /// Leave the reset state and resume sensing
    pub fn enable(&mut self) {
        if !self.enabled {
            info!("▶️  Device enabled");
        }
        self.sensor.set_enabled(true);
        self.enabled = true;
    }

    /// Poll the sensor once and project any reading onto MIDI
    pub fn poll_sensor(&mut self) -> Option<MidiEvent> {
        let reading = self.sensor.poll()?;
        self.adapter.on_reading(&reading, &self.config, self.enabled)
    }
}

impl DeviceCapabilities for ProximityDevice {
    fn on_send(&mut self, event: &MidiEvent) {
        self.sent += 1;
        trace!(event = %event, total = self.sent, "local event sent");
    }

    fn on_control_change(&mut self, channel: u8, controller: u8, value: u8) {
        if channel != self.config.channel {
            trace!(channel, controller, "control change for another channel ignored");
            return;
        }

        match controller {
            cc::ALL_NOTES_OFF | cc::ALL_SOUND_OFF => self.all_notes_off(),
            cc::LOCAL_CONTROL if value >= 64 => self.enable(),
            cc::LOCAL_CONTROL => self.reset(),
            _ => debug!(controller, value, "unhandled control change"),
        }
    }

    fn on_system_reset(&mut self) {
        self.reset();
    }

    fn on_import(&mut self, raw: &Value) -> Configuration {
        let next = self.config.import(raw);
        if next.range != self.config.range {
            self.sensor.configure(&next.range);
        }
        self.config = next;
        info!(
            "⚙️  Configuration applied (channel {}, controller {})",
            next.display_channel(),
            next.controller
        );
        next
    }

    fn on_export(&self) -> Value {
        self.config.export()
    }
}
