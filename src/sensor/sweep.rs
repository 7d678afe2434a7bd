//! Simulated distance sensor
//!
//! Sweeps a target back and forth across the configured window, smooths it
//! with the configured coefficient and reports a reading whenever the
//! quantized step changes.

use super::{SensorDriver, SensorReading};
use crate::config::RangeConfig;

pub struct SweepSensor {
    range: RangeConfig,
    enabled: bool,
    /// Raw target position, in mm
    position: f32,
    /// Movement per poll, in mm (sign gives direction)
    velocity: f32,
    smoothed: f32,
    samples: u32,
    last_step: Option<u16>,
}

impl SweepSensor {
    pub fn new(range: RangeConfig, speed_mm: f32) -> Self {
        let start = f32::from(range.min);
        Self {
            range,
            enabled: true,
            position: start,
            velocity: speed_mm.abs().max(1.0),
            smoothed: start,
            samples: 0,
            last_step: None,
        }
    }

    fn advance(&mut self) {
        let min = f32::from(self.range.min);
        let max = f32::from(self.range.max);

        self.position += self.velocity;
        if self.position >= max {
            self.position = max;
            self.velocity = -self.velocity.abs();
        } else if self.position <= min {
            self.position = min;
            self.velocity = self.velocity.abs();
        }

        let alpha = self.range.smoothing_alpha.clamp(0.0, 1.0);
        self.smoothed += alpha.max(f32::EPSILON) * (self.position - self.smoothed);
        self.samples += 1;
    }

    fn quantize(&self) -> (u16, f32) {
        let min = f32::from(self.range.min);
        let span = f32::from(self.range.max) - min;
        let normalized = ((self.smoothed - min) / span).clamp(0.0, 1.0);
        let top = self.range.step_count.saturating_sub(1);
        let step = (normalized * f32::from(top)).round() as u16;
        (step.min(top), normalized)
    }
}

impl SensorDriver for SweepSensor {
    fn poll(&mut self) -> Option<SensorReading> {
        if !self.enabled {
            return None;
        }

        self.advance();
        let (step, normalized) = self.quantize();
        if self.last_step == Some(step) {
            return None;
        }
        self.last_step = Some(step);

        let reading = SensorReading {
            step_index: step,
            normalized,
            distance_mm: self.smoothed.round() as u16,
            sample_count: self.samples,
        };
        self.samples = 0;
        Some(reading)
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.last_step = None;
        }
    }

    fn configure(&mut self, range: &RangeConfig) {
        self.range = *range;
        let min = f32::from(range.min);
        let max = f32::from(range.max);
        self.position = self.position.clamp(min, max);
        self.smoothed = self.smoothed.clamp(min, max);
        self.last_step = None;
    }
}
