//! Random forest: bootstrap-bagged CART trees trained in parallel.

use super::tree::{DecisionTree, MaxFeatures, TreeConfig};
use super::{check_matrix, ModelError};
use crate::rng::{SeedHierarchy, TREE_STREAM};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    /// Master seed; every tree derives its own stream from it.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            seed: 0,
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_trees == 0 {
            return Err(ModelError::InvalidConfig("n_trees must be at least 1".into()));
        }
        if self.min_samples_split < 2 {
            return Err(ModelError::InvalidConfig(
                "min_samples_split must be at least 2".into(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ModelError::InvalidConfig(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(ModelError::InvalidConfig("max_depth must be at least 1".into()));
        }
        Ok(())
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    trees: Vec<DecisionTree>,
    feature_names: Vec<String>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            feature_names: Vec::new(),
            importances: Vec::new(),
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Fit on a row-major feature matrix.
    ///
    /// `feature_names` may be empty; otherwise it must name every column.
    /// The result depends only on the data and `config.seed`, never on the
    /// number of worker threads.
    pub fn fit(
        &mut self,
        features: &[Vec<f64>],
        labels: &[bool],
        feature_names: &[String],
    ) -> Result<(), ModelError> {
        self.config.validate()?;
        let n_features = check_matrix(features, labels)?;
        if !feature_names.is_empty() && feature_names.len() != n_features {
            return Err(ModelError::InvalidConfig(format!(
                "{} feature names for {n_features} features",
                feature_names.len()
            )));
        }

        let n = features.len();
        let seeds = SeedHierarchy::new(self.config.seed);
        let tree_config = self.config.tree_config();
        let bootstrap = self.config.bootstrap;

        let trees: Vec<DecisionTree> = (0..self.config.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = seeds.rng_for(TREE_STREAM, t as u64);
                let rows: Vec<usize> = if bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let mut tree = DecisionTree::new(tree_config.clone());
                tree.fit_rows(features, labels, rows, n_features, &mut rng);
                tree
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            for (total, imp) in importances.iter_mut().zip(tree.feature_importances()) {
                *total += imp;
            }
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            for imp in &mut importances {
                *imp /= sum;
            }
        }

        tracing::debug!(
            trees = trees.len(),
            rows = n,
            features = n_features,
            "fitted random forest"
        );

        self.trees = trees;
        self.importances = importances;
        self.feature_names = if feature_names.is_empty() {
            (0..n_features).map(|i| format!("feature_{i}")).collect()
        } else {
            feature_names.to_vec()
        };
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Share of trees voting `true`, per row.
    pub fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        let first = self.trees.first().ok_or(ModelError::NotFitted)?;
        first.check_rows(features)?;
        let n_trees = self.trees.len() as f64;
        Ok(features
            .iter()
            .map(|row| {
                let votes = self
                    .trees
                    .iter()
                    .filter(|t| t.proba_row(row) > 0.5)
                    .count();
                votes as f64 / n_trees
            })
            .collect())
    }

    /// Majority vote; a tied vote predicts `false`.
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<bool>, ModelError> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| p > 0.5)
            .collect())
    }

    /// Mean normalized impurity decrease per feature, summing to 1 unless
    /// no tree ever split.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// `(name, importance)` sorted by importance, highest first.
    pub fn ranked_importances(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.importances.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Label depends on feature 0 only; feature 1 is noise.
    fn separable(n: usize) -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(11);
        let x: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64, rng.gen_range(0.0..1.0)])
            .collect();
        let y = (0..n).map(|i| i >= n / 2).collect();
        (x, y)
    }

    fn names() -> Vec<String> {
        vec!["signal".into(), "noise".into()]
    }

    #[test]
    fn learns_separable_data() {
        let (x, y) = separable(60);
        let mut forest = RandomForest::new(ForestConfig {
            n_trees: 25,
            ..Default::default()
        });
        forest.fit(&x, &y, &names()).unwrap();

        assert_eq!(forest.n_trees(), 25);
        let predicted = forest.predict(&x).unwrap();
        let correct = predicted.iter().zip(&y).filter(|(p, a)| p == a).count();
        assert!(correct >= 57, "only {correct}/60 correct");

        let ranked = forest.ranked_importances();
        assert_eq!(ranked[0].0, "signal");
        let total: f64 = forest.feature_importances().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = separable(40);
        let fit = |seed| {
            let mut f = RandomForest::new(ForestConfig {
                n_trees: 10,
                seed,
                ..Default::default()
            });
            f.fit(&x, &y, &[]).unwrap();
            f.predict_proba(&x).unwrap()
        };
        assert_eq!(fit(3), fit(3));
    }

    #[test]
    fn default_names_and_validation() {
        let (x, y) = separable(10);
        let mut forest = RandomForest::new(ForestConfig {
            n_trees: 3,
            ..Default::default()
        });
        forest.fit(&x, &y, &[]).unwrap();
        assert_eq!(forest.feature_names(), &["feature_0", "feature_1"]);

        assert!(matches!(
            forest.fit(&x, &y, &["only_one".to_string()]),
            Err(ModelError::InvalidConfig(_))
        ));

        let mut empty = RandomForest::new(ForestConfig {
            n_trees: 0,
            ..Default::default()
        });
        assert!(matches!(
            empty.fit(&x, &y, &[]),
            Err(ModelError::InvalidConfig(_))
        ));
        assert_eq!(empty.predict(&x), Err(ModelError::NotFitted));
    }

    #[test]
    fn single_class_predicts_constant() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let mut forest = RandomForest::new(ForestConfig {
            n_trees: 5,
            ..Default::default()
        });
        forest.fit(&x, &[false, false, false], &[]).unwrap();
        assert_eq!(forest.predict(&x).unwrap(), vec![false; 3]);
        assert_eq!(forest.feature_importances(), &[0.0]);
    }
}
