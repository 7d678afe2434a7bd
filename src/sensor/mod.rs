//! Sensor adapter - projects distance readings onto MIDI
//!
//! Ranging, filtering and quantization all happen inside the sensor driver.
//! The adapter only maps an already-quantized step onto the configured
//! controller, and the normalized distance onto LED brightness.

pub mod sweep;

use crate::address::PortAddress;
use crate::config::{Configuration, RangeConfig};
use crate::midi::MidiEvent;
use tracing::trace;

pub use sweep::SweepSensor;

/// One reading delivered by the sensor driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    /// Quantized step (0..step_count)
    pub step_index: u16,
    /// Distance normalized into 0.0-1.0 across the configured range
    pub normalized: f32,
    pub distance_mm: u16,
    /// Samples the driver aggregated into this reading
    pub sample_count: u32,
}

/// Distance sensor driver
pub trait SensorDriver {
    /// Next reading, if the driver produced one since the last poll
    fn poll(&mut self) -> Option<SensorReading>;

    fn set_enabled(&mut self, enabled: bool);

    /// Apply a new distance window and filter coefficients
    fn configure(&mut self, range: &RangeConfig);
}

/// Visual output (LED)
pub trait Indicator {
    /// Brightness in 0.0-1.0
    fn set_brightness(&mut self, level: f32);

    fn clear(&mut self);
}

/// Indicator that only records the last level; used when no LED is fitted
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NullIndicator {
    pub level: f32,
}

impl Indicator for NullIndicator {
    fn set_brightness(&mut self, level: f32) {
        self.level = level;
    }

    fn clear(&mut self) {
        self.level = 0.0;
    }
}

/// Maps sensor readings onto control-change events
pub struct SensorAdapter {
    indicator: Box<dyn Indicator>,
}

impl SensorAdapter {
    pub fn new(indicator: Box<dyn Indicator>) -> Self {
        Self { indicator }
    }

    /// Project a reading into the MIDI domain.
    ///
    /// Returns `None` while the device is disabled; no brightness update
    /// happens in that case either.
    pub fn on_reading(
        &mut self,
        reading: &SensorReading,
        config: &Configuration,
        enabled: bool,
    ) -> Option<MidiEvent> {
        if !enabled {
            return None;
        }

        self.indicator.set_brightness(reading.normalized.clamp(0.0, 1.0));

        let value = reading.step_index.min(127) as u8;
        trace!(
            step = reading.step_index,
            distance_mm = reading.distance_mm,
            samples = reading.sample_count,
            value,
            "sensor reading"
        );

        Some(MidiEvent::control_change(
            PortAddress::LOCAL,
            config.channel,
            config.controller,
            value,
        ))
    }

    /// Turn the visual output off
    pub fn clear(&mut self) {
        self.indicator.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiMessage;
    use std::cell::Cell;
    use std::rc::Rc;

    struct SharedIndicator(Rc<Cell<f32>>);

    impl Indicator for SharedIndicator {
        fn set_brightness(&mut self, level: f32) {
            self.0.set(level);
        }

        fn clear(&mut self) {
            self.0.set(0.0);
        }
    }

    fn reading(step_index: u16, normalized: f32) -> SensorReading {
        SensorReading {
            step_index,
            normalized,
            distance_mm: 250,
            sample_count: 8,
        }
    }

    #[test]
    fn test_step_maps_to_controller_value() {
        let config = Configuration {
            channel: 4,
            controller: 12,
            ..Configuration::default()
        };
        let mut adapter = SensorAdapter::new(Box::new(NullIndicator::default()));

        let event = adapter.on_reading(&reading(42, 0.3), &config, true).unwrap();

        assert_eq!(event.port, PortAddress::LOCAL);
        assert_eq!(
            event.message(),
            Some(MidiMessage::ControlChange { channel: 4, cc: 12, value: 42 })
        );
    }

    #[test]
    fn test_step_above_seven_bits_is_clamped() {
        let mut adapter = SensorAdapter::new(Box::new(NullIndicator::default()));
        let event = adapter
            .on_reading(&reading(500, 1.0), &Configuration::default(), true)
            .unwrap();

        assert_eq!(event.data[2], 127);
    }

    #[test]
    fn test_brightness_follows_normalized_distance() {
        let level = Rc::new(Cell::new(0.0));
        let mut adapter = SensorAdapter::new(Box::new(SharedIndicator(level.clone())));

        adapter.on_reading(&reading(1, 0.75), &Configuration::default(), true);
        assert_eq!(level.get(), 0.75);

        adapter.on_reading(&reading(1, 3.0), &Configuration::default(), true);
        assert_eq!(level.get(), 1.0);

        adapter.clear();
        assert_eq!(level.get(), 0.0);
    }

    #[test]
    fn test_disabled_adapter_emits_nothing() {
        let level = Rc::new(Cell::new(0.0));
        let mut adapter = SensorAdapter::new(Box::new(SharedIndicator(level.clone())));

        assert!(adapter
            .on_reading(&reading(42, 0.5), &Configuration::default(), false)
            .is_none());
        assert_eq!(level.get(), 0.0);
    }
}
