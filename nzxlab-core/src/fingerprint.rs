//! Run fingerprinting: which data and which settings produced a fitted model.
//!
//! Hashes are BLAKE3 over canonical JSON. Two learn runs with equal
//! fingerprints train on the same rows with the same forest and split.

use crate::dataset::LabeledDataset;
use crate::model::ForestConfig;
use serde::{Deserialize, Serialize};

/// Hex BLAKE3 hash of a value's JSON form.
fn json_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(blake3::hash(&json).to_hex().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub dataset_hash: String,
    pub config_hash: String,
    pub split_seed: u64,
    pub rows: usize,
    pub features: usize,
}

impl RunFingerprint {
    pub fn new(
        dataset: &LabeledDataset,
        forest: &ForestConfig,
        split_seed: u64,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            dataset_hash: json_hash(dataset)?,
            config_hash: json_hash(forest)?,
            split_seed,
            rows: dataset.len(),
            features: dataset.feature_names.len(),
        })
    }

    /// First 12 hex characters of the dataset and config hashes.
    pub fn short(&self) -> String {
        format!(
            "{}-{}",
            &self.dataset_hash[..12.min(self.dataset_hash.len())],
            &self.config_hash[..12.min(self.config_hash.len())]
        )
    }
}
