//! Learn-stage report: classifier scores, importances and provenance.
//!
//! Persisted as `learn_report.json` with a `schema_version`. Unknown
//! versions are rejected on load.

use std::path::Path;

use anyhow::{bail, Context, Result};
use nzxlab_core::fingerprint::RunFingerprint;
use nzxlab_core::model::ClassificationMetrics;
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnReport {
    pub schema_version: u32,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Share of all labeled rows that beat the benchmark.
    pub positive_rate: f64,
    pub metrics: ClassificationMetrics,
    /// Highest importances first.
    pub top_features: Vec<(String, f64)>,
    pub split_seed: u64,
    pub fingerprint: RunFingerprint,
}

/// Two decimals with a leading space for non-negative values (`" 0.83"`).
fn score(value: f64) -> String {
    if value.is_sign_negative() && value != 0.0 {
        format!("{value:.2}")
    } else {
        format!(" {value:.2}")
    }
}

impl LearnReport {
    /// Console form of the report.
    pub fn render(&self) -> String {
        let m = &self.metrics;
        let c = &m.confusion;
        let mut out = String::with_capacity(512);

        out.push_str("Classifier performance\n ====================\n");
        out.push_str(&format!("Accuracy score: {}\n", score(m.accuracy)));
        out.push_str(&format!("Precision score: {}\n", score(m.precision)));
        out.push_str(&format!("Recall score: {}\n", score(m.recall)));
        out.push_str(&format!("F1 score: {}\n", score(m.f1)));
        out.push('\n');

        out.push_str(&format!(
            "Rows: {} train / {} test, {:.1}% beat the index\n",
            self.train_rows,
            self.test_rows,
            self.positive_rate * 100.0
        ));
        out.push_str(&format!(
            "Confusion: TP {}  FP {}  TN {}  FN {}\n",
            c.true_positive, c.false_positive, c.true_negative, c.false_negative
        ));

        if !self.top_features.is_empty() {
            out.push_str("\nTop features:\n");
            let width = self
                .top_features
                .iter()
                .map(|(name, _)| name.chars().count())
                .max()
                .unwrap_or(0);
            for (name, importance) in &self.top_features {
                out.push_str(&format!("  {name:<width$}  {importance:.4}\n"));
            }
        }

        out.push_str(&format!(
            "\nRun {} (split seed {})\n",
            self.fingerprint.short(),
            self.split_seed
        ));
        out
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize LearnReport to JSON")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let report: Self =
            serde_json::from_str(json).context("failed to deserialize LearnReport from JSON")?;
        if report.schema_version > SCHEMA_VERSION {
            bail!(
                "unsupported schema version {} (max supported: {})",
                report.schema_version,
                SCHEMA_VERSION
            );
        }
        Ok(report)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzxlab_core::model::ConfusionMatrix;

    fn report() -> LearnReport {
        LearnReport {
            schema_version: SCHEMA_VERSION,
            train_rows: 80,
            test_rows: 20,
            positive_rate: 0.45,
            metrics: ClassificationMetrics {
                accuracy: 0.834,
                precision: 0.8,
                recall: 0.5,
                f1: 0.615,
                confusion: ConfusionMatrix {
                    true_positive: 4,
                    false_positive: 1,
                    true_negative: 12,
                    false_negative: 3,
                },
            },
            top_features: vec![
                ("Total Revenue".into(), 0.31),
                ("Prev250dayReturn^GSPC".into(), 0.12),
            ],
            split_seed: 42,
            fingerprint: RunFingerprint {
                dataset_hash: "a".repeat(64),
                config_hash: "b".repeat(64),
                split_seed: 42,
                rows: 100,
                features: 2,
            },
        }
    }

    #[test]
    fn render_opens_with_score_block() {
        let text = report().render();
        assert!(text.starts_with(
            "Classifier performance\n ====================\n\
             Accuracy score:  0.83\nPrecision score:  0.80\n"
        ));
        assert!(text.contains("TP 4  FP 1  TN 12  FN 3"));
        assert!(text.contains("Total Revenue"));
        assert!(text.contains("aaaaaaaaaaaa-bbbbbbbbbbbb"));
    }

    #[test]
    fn score_keeps_sign_column() {
        assert_eq!(score(0.5), " 0.50");
        assert_eq!(score(0.0), " 0.00");
        assert_eq!(score(-0.25), "-0.25");
    }

    #[test]
    fn json_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/learn_report.json");
        report().save(&path).unwrap();
        assert_eq!(LearnReport::load(&path).unwrap(), report());
    }

    #[test]
    fn rejects_future_schema() {
        let mut r = report();
        r.schema_version = SCHEMA_VERSION + 1;
        let json = serde_json::to_string(&r).unwrap();
        assert!(LearnReport::from_json(&json).is_err());
    }
}
