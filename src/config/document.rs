//! JSON import/export of the configuration
//!
//! Import never fails: values out of range are clamped or replaced by their
//! documented default, fields that are missing or of the wrong JSON type keep
//! their prior value.

use super::{Configuration, RangeConfig, MAX_STEP_COUNT};
use serde_json::{json, Map, Value};
use tracing::debug;

impl Configuration {
    /// Apply a JSON document on top of this configuration and return the
    /// validated result.
    pub fn import(&self, raw: &Value) -> Configuration {
        let mut next = *self;

        let Some(root) = raw.as_object() else {
            debug!("Ignoring non-object configuration document");
            return next;
        };

        if let Some(channel) = section(root, "midi").and_then(|midi| integer(midi, "channel")) {
            next.channel = (channel.clamp(1, 16) - 1) as u8;
        }

        if let Some(controller) = integer(root, "controller") {
            next.controller = controller.clamp(0, 127) as u8;
        }

        if let Some(range) = section(root, "range") {
            let (min, max, detect) = RangeConfig::validated_triple(
                integer(range, "min").unwrap_or(i64::from(self.range.min)),
                integer(range, "max").unwrap_or(i64::from(self.range.max)),
                integer(range, "detect").unwrap_or(i64::from(self.range.detect_limit)),
            );
            next.range.min = min;
            next.range.max = max;
            next.range.detect_limit = detect;

            if let Some(steps) = integer(range, "steps") {
                next.range.step_count = steps.clamp(1, i64::from(MAX_STEP_COUNT)) as u16;
            }
        }

        if let Some(filter) = section(root, "filter") {
            if let Some(alpha) = filter.get("alpha").and_then(Value::as_f64).filter(|a| a.is_finite()) {
                next.range.smoothing_alpha = alpha.clamp(0.0, 1.0) as f32;
            }
            if let Some(lag) = integer(filter, "lag") {
                next.range.lag = lag.clamp(0, i64::from(u16::MAX)) as u16;
            }
        }

        debug!(
            channel = next.display_channel(),
            controller = next.controller,
            min = next.range.min,
            max = next.range.max,
            detect = next.range.detect_limit,
            "Configuration imported"
        );

        next
    }

    /// Describe this configuration as a JSON document, with `#`-prefixed
    /// descriptions next to each value.
    pub fn export(&self) -> Value {
        json!({
            "midi": {
                "#channel": "MIDI channel the sensor reports on (1-16)",
                "channel": self.display_channel(),
            },
            "#controller": "Controller number carrying the distance (0-127)",
            "controller": self.controller,
            "range": {
                "#min": "Closest reported distance in mm (1-2999)",
                "min": self.range.min,
                "#max": "Farthest reported distance in mm (above min, up to 3000)",
                "max": self.range.max,
                "#detect": "Detection limit in mm (at least max, up to 3000)",
                "detect": self.range.detect_limit,
                "#steps": "Number of quantization steps (1-128)",
                "steps": self.range.step_count,
            },
            "filter": {
                "#alpha": "Sensor smoothing coefficient (0.0-1.0)",
                "alpha": self.range.smoothing_alpha,
                "#lag": "Sensor lag in samples",
                "lag": self.range.lag,
            },
        })
    }
}

fn section<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    object.get(key).and_then(Value::as_object)
}

/// Read a JSON number as a saturated integer
fn integer(object: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = object.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|_| i64::MAX))
        .or_else(|| value.as_f64().map(|f| f as i64))
}
