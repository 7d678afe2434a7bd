//! Node configuration
//!
//! The configuration is a single owned value. It is only ever replaced as a
//! whole by [`Configuration::import`], which validates untrusted input so that
//! downstream code never observes an inconsistent range.

mod document;
pub mod record;

pub use record::{ConfigRecord, FileStore, MemoryStore, RecordError, RecordStore};

/// Largest distance (millimetres) any range field may take
pub const RANGE_LIMIT_MM: u16 = 3000;
/// Fallback for an invalid `range.min`
pub const DEFAULT_MIN_MM: u16 = 10;
/// Fallback for an invalid `range.max`
pub const DEFAULT_MAX_MM: u16 = 500;
/// Fallback for an invalid `range.detect`
pub const DEFAULT_DETECT_MM: u16 = 600;
/// Quantization steps; a step index maps 1:1 onto a 7-bit controller value
pub const MAX_STEP_COUNT: u16 = 128;

const DEFAULT_STEP_COUNT: u16 = 128;
const DEFAULT_SMOOTHING_ALPHA: f32 = 0.25;
const DEFAULT_LAG: u16 = 4;

/// Distance window and sensor filter coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeConfig {
    /// Quantization resolution (1-128)
    pub step_count: u16,
    /// Closest distance reported, in mm
    pub min: u16,
    /// Farthest distance reported, in mm
    pub max: u16,
    /// Distance beyond which nothing is considered detected, in mm
    pub detect_limit: u16,
    /// Sensor-internal smoothing coefficient (0.0-1.0)
    pub smoothing_alpha: f32,
    /// Sensor-internal lag, in samples
    pub lag: u16,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            step_count: DEFAULT_STEP_COUNT,
            min: DEFAULT_MIN_MM,
            max: DEFAULT_MAX_MM,
            detect_limit: DEFAULT_DETECT_MM,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            lag: DEFAULT_LAG,
        }
    }
}

impl RangeConfig {
    /// Validate a candidate distance triple.
    ///
    /// Each field is checked against the already-validated fields before it,
    /// so the result always satisfies `min < max <= detect_limit`.
    pub fn validated_triple(min: i64, max: i64, detect: i64) -> (u16, u16, u16) {
        let limit = i64::from(RANGE_LIMIT_MM);

        // min == limit leaves no room for max
        let min = if (1..limit).contains(&min) {
            min as u16
        } else {
            DEFAULT_MIN_MM
        };

        let max = if max > i64::from(min) && max <= limit {
            max as u16
        } else if DEFAULT_MAX_MM > min {
            DEFAULT_MAX_MM
        } else {
            RANGE_LIMIT_MM
        };

        let detect = if detect >= i64::from(max) && detect <= limit {
            detect as u16
        } else {
            DEFAULT_DETECT_MM.max(max)
        };

        (min, max, detect)
    }

    /// Whether the range satisfies every invariant
    pub fn is_consistent(&self) -> bool {
        self.min >= 1
            && self.min < self.max
            && self.max <= self.detect_limit
            && self.detect_limit <= RANGE_LIMIT_MM
            && (1..=MAX_STEP_COUNT).contains(&self.step_count)
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Configuration {
    /// Zero-based MIDI channel (0-15)
    pub channel: u8,
    /// Controller number the sensor reports on (0-127)
    pub controller: u8,
    pub range: RangeConfig,
}

impl Configuration {
    /// One-based channel as shown to users
    pub fn display_channel(&self) -> u8 {
        self.channel.saturating_add(1)
    }
}
