//! Run fingerprinting: deterministic identification of configurations and
//! bar streams.
//!
//! - `ConfigHash`: blake3 of the canonical JSON encoding of a config.
//! - `DatasetHash`: blake3 over every bar field, in the order bars were consumed.
//! - `RunFingerprint`: both hashes plus a combined run id.
//!
//! Identical inputs always produce identical fingerprints, which is what the
//! determinism tests compare.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::Bar;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub String);

impl ConfigHash {
    /// Hash the canonical JSON of any serialisable config.
    ///
    /// Struct fields serialise in declaration order, so the encoding is stable.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, ConfigError> {
        let json = serde_json::to_vec(value).map_err(|e| ConfigError::Encode(e.to_string()))?;
        Ok(Self(blake3::hash(&json).to_hex().to_string()))
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    pub fn of_bars(bars: &[Bar]) -> Self {
        let mut hasher = DatasetHasher::new();
        for bar in bars {
            hasher.push(0, bar);
        }
        hasher.finish()
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental dataset hash, fed one bar at a time as the engine consumes
/// them. Stream 0 is the primary timeframe; secondary timeframes use their
/// 1-based position.
#[derive(Debug, Clone, Default)]
pub struct DatasetHasher {
    hasher: blake3::Hasher,
    count: u64,
}

impl DatasetHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stream: u32, bar: &Bar) {
        self.hasher.update(&stream.to_le_bytes());
        hash_bar(&mut self.hasher, bar);
        self.count += 1;
    }

    /// Digest of everything pushed so far. The hasher stays usable.
    pub fn finish(&self) -> DatasetHash {
        let mut hasher = self.hasher.clone();
        hasher.update(&self.count.to_le_bytes());
        DatasetHash(hasher.finalize().to_hex().to_string())
    }
}

fn hash_bar(hasher: &mut blake3::Hasher, bar: &Bar) {
    hasher.update(&bar.timestamp.timestamp_millis().to_le_bytes());
    for v in [bar.open, bar.high, bar.low, bar.close, bar.volume] {
        hasher.update(&v.to_bits().to_le_bytes());
    }
    for (name, value) in bar.indicators.iter() {
        hasher.update(name.as_bytes());
        hasher.update(&value.to_bits().to_le_bytes());
    }
}

/// Identity of one run: what was configured and what it ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub config_hash: ConfigHash,
    pub dataset_hash: DatasetHash,
    pub run_id: String,
}

impl RunFingerprint {
    pub fn new(config_hash: ConfigHash, dataset_hash: DatasetHash) -> Self {
        let canonical = format!("{}:{}", config_hash, dataset_hash);
        let run_id = blake3::hash(canonical.as_bytes()).to_hex().to_string();
        Self {
            config_hash,
            dataset_hash,
            run_id,
        }
    }
}
