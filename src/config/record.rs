//! Persisted configuration record
//!
//! The configuration is stored as a small versioned blob:
//!
//! ```text
//! magic: u32 LE | version: u16 LE | length: u16 LE | payload (length bytes)
//! payload: channel u8 | controller u8 | steps u16 | min u16 | max u16 |
//!          detect u16 | alpha f32 | lag u16
//! ```
//!
//! The magic is derived from the product identifier so that a record written
//! by a different product is never mistaken for ours.

use super::{Configuration, RangeConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const HEADER_LEN: usize = 8;
const PAYLOAD_LEN: usize = 16;

/// Errors raised while decoding a stored record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record magic {found:#010x} does not match {expected:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("record version {found} is not supported (expected {expected})")]
    UnsupportedVersion { expected: u16, found: u16 },

    #[error("record size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch { expected: usize, got: usize },
}

/// Codec for the persisted configuration blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRecord {
    magic: u32,
}

impl ConfigRecord {
    /// Current record layout version
    pub const VERSION: u16 = 1;

    pub fn new(product_id: &str) -> Self {
        Self {
            magic: magic_for(product_id),
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn encode(&self, config: &Configuration) -> Vec<u8> {
        let range = &config.range;
        let mut out = Vec::with_capacity(HEADER_LEN + PAYLOAD_LEN);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&Self::VERSION.to_le_bytes());
        out.extend_from_slice(&(PAYLOAD_LEN as u16).to_le_bytes());
        out.push(config.channel);
        out.push(config.controller);
        out.extend_from_slice(&range.step_count.to_le_bytes());
        out.extend_from_slice(&range.min.to_le_bytes());
        out.extend_from_slice(&range.max.to_le_bytes());
        out.extend_from_slice(&range.detect_limit.to_le_bytes());
        out.extend_from_slice(&range.smoothing_alpha.to_le_bytes());
        out.extend_from_slice(&range.lag.to_le_bytes());
        out
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Configuration, RecordError> {
        let expected_len = HEADER_LEN + PAYLOAD_LEN;
        if bytes.len() < HEADER_LEN {
            return Err(RecordError::SizeMismatch {
                expected: expected_len,
                got: bytes.len(),
            });
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != self.magic {
            return Err(RecordError::BadMagic {
                expected: self.magic,
                found: magic,
            });
        }

        let version = u16_at(bytes, 4);
        if version != Self::VERSION {
            return Err(RecordError::UnsupportedVersion {
                expected: Self::VERSION,
                found: version,
            });
        }

        let declared = usize::from(u16_at(bytes, 6));
        if declared != PAYLOAD_LEN || bytes.len() != expected_len {
            return Err(RecordError::SizeMismatch {
                expected: expected_len,
                got: bytes.len().max(HEADER_LEN + declared),
            });
        }

        let p = &bytes[HEADER_LEN..];
        let stored = Configuration {
            channel: p[0],
            controller: p[1],
            range: RangeConfig {
                step_count: u16_at(p, 2),
                min: u16_at(p, 4),
                max: u16_at(p, 6),
                detect_limit: u16_at(p, 8),
                smoothing_alpha: f32::from_le_bytes([p[10], p[11], p[12], p[13]]),
                lag: u16_at(p, 14),
            },
        };

        // Stored bytes are untrusted too: run them through the importer
        Ok(Configuration::default().import(&stored.export()))
    }
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// FNV-1a hash of the product identifier
fn magic_for(product_id: &str) -> u32 {
    product_id
        .bytes()
        .fold(0x811C_9DC5u32, |hash, byte| (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193))
}

/// Opaque durable storage for the configuration blob
pub trait RecordStore {
    /// Read the stored blob, `None` if nothing was ever saved
    fn load(&mut self) -> Result<Option<Vec<u8>>>;

    fn save(&mut self, blob: &[u8]) -> Result<()>;
}

/// Record store backed by a file on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for FileStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config record: {}", self.path.display())),
        }
    }

    fn save(&mut self, blob: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(&self.path, blob)
            .with_context(|| format!("Failed to write config record: {}", self.path.display()))
    }
}

/// In-memory record store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blob: Option<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }
}

impl RecordStore for MemoryStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.blob.clone())
    }

    fn save(&mut self, blob: &[u8]) -> Result<()> {
        self.blob = Some(blob.to_vec());
        Ok(())
    }
}

impl ConfigRecord {
    /// Load the configuration from a store, falling back to defaults when the
    /// store is empty or holds a record we cannot use.
    pub fn load_or_default(&self, store: &mut dyn RecordStore) -> Result<Configuration> {
        let Some(bytes) = store.load()? else {
            debug!("No stored configuration, using defaults");
            return Ok(Configuration::default());
        };

        match self.decode(&bytes) {
            Ok(config) => {
                debug!("Stored configuration loaded ({} bytes)", bytes.len());
                Ok(config)
            }
            Err(e) => {
                warn!("Ignoring stored configuration: {}", e);
                Ok(Configuration::default())
            }
        }
    }

    pub fn store(&self, store: &mut dyn RecordStore, config: &Configuration) -> Result<()> {
        store.save(&self.encode(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_config() -> Configuration {
        Configuration::default().import(&json!({
            "midi": { "channel": 5 },
            "controller": 12,
            "range": { "min": 40, "max": 900, "detect": 1000, "steps": 64 },
            "filter": { "alpha": 0.5, "lag": 3 }
        }))
    }

    #[test]
    fn test_encode_decode() {
        let record = ConfigRecord::new("proximity-node");
        let bytes = record.encode(&sample_config());

        assert_eq!(bytes.len(), HEADER_LEN + PAYLOAD_LEN);
        assert_eq!(record.decode(&bytes).unwrap(), sample_config());
    }

    #[test]
    fn test_magic_depends_on_product() {
        let ours = ConfigRecord::new("proximity-node");
        let theirs = ConfigRecord::new("light-node");
        assert_ne!(ours.magic(), theirs.magic());

        let bytes = theirs.encode(&sample_config());
        assert!(matches!(ours.decode(&bytes), Err(RecordError::BadMagic { .. })));
    }

    #[test]
    fn test_version_and_size_are_checked() {
        let record = ConfigRecord::new("proximity-node");
        let mut bytes = record.encode(&sample_config());

        let mut truncated = bytes.clone();
        truncated.pop();
        assert!(matches!(record.decode(&truncated), Err(RecordError::SizeMismatch { .. })));
        assert!(matches!(record.decode(&bytes[..3]), Err(RecordError::SizeMismatch { .. })));

        bytes[4] = 9;
        assert_eq!(
            record.decode(&bytes),
            Err(RecordError::UnsupportedVersion { expected: 1, found: 9 })
        );
    }

    #[test]
    fn test_corrupt_payload_is_revalidated() {
        let record = ConfigRecord::new("proximity-node");
        let mut bytes = record.encode(&sample_config());

        // max below min
        bytes[HEADER_LEN + 6] = 5;
        bytes[HEADER_LEN + 7] = 0;

        let config = record.decode(&bytes).unwrap();
        assert!(config.range.is_consistent());
        assert_eq!(config.range.max, 500);
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let record = ConfigRecord::new("proximity-node");
        let mut store = MemoryStore::new();

        assert_eq!(record.load_or_default(&mut store).unwrap(), Configuration::default());

        store.save(b"garbage").unwrap();
        assert_eq!(record.load_or_default(&mut store).unwrap(), Configuration::default());

        record.store(&mut store, &sample_config()).unwrap();
        assert_eq!(record.load_or_default(&mut store).unwrap(), sample_config());
    }

    #[test]
    fn test_file_store() {
        let dir = tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("state").join("node.cfg"));
        let record = ConfigRecord::new("proximity-node");

        assert!(store.load().unwrap().is_none());

        record.store(&mut store, &sample_config()).unwrap();
        assert!(store.path().exists());
        assert_eq!(record.load_or_default(&mut store).unwrap(), sample_config());
    }
}
