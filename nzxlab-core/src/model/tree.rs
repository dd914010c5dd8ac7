//! CART classification tree on Gini impurity.
//!
//! Nodes live in an arena and are grown from an explicit work stack, so fully
//! grown trees on thousands of rows never recurse deeply. Thresholds are the
//! midpoints between consecutive distinct feature values; a row goes left
//! when its value is `<=` the threshold.

use super::{check_matrix, ModelError};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How many features each split considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `floor(sqrt(n))`, at least 1.
    Sqrt,
    All,
    Count(usize),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        if n_features == 0 {
            return 0;
        }
        match *self {
            MaxFeatures::Sqrt => ((n_features as f64).sqrt() as usize).max(1),
            MaxFeatures::All => n_features,
            MaxFeatures::Count(k) => k.clamp(1, n_features),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Share of training rows in this leaf labelled `true`.
        positive: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

struct Candidate {
    feature: usize,
    threshold: f64,
    /// Drop in sample-weighted impurity.
    decrease: f64,
}

struct Pending {
    node: usize,
    indices: Vec<usize>,
    depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    config: TreeConfig,
    nodes: Vec<Node>,
    n_features: usize,
    importances: Vec<f64>,
}

fn gini(positives: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

impl DecisionTree {
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            n_features: 0,
            importances: Vec::new(),
        }
    }

    pub fn fit<R: Rng>(
        &mut self,
        features: &[Vec<f64>],
        labels: &[bool],
        rng: &mut R,
    ) -> Result<(), ModelError> {
        let n_features = check_matrix(features, labels)?;
        self.fit_rows(features, labels, (0..features.len()).collect(), n_features, rng);
        Ok(())
    }

    /// Grow the tree on `indices` (repeats allowed, as in a bootstrap sample).
    /// The matrix must already be validated.
    pub(crate) fn fit_rows<R: Rng>(
        &mut self,
        features: &[Vec<f64>],
        labels: &[bool],
        indices: Vec<usize>,
        n_features: usize,
        rng: &mut R,
    ) {
        self.n_features = n_features;
        self.importances = vec![0.0; n_features];
        self.nodes = vec![Node::Leaf {
            positive: 0.0,
            samples: 0,
        }];

        let mut stack = vec![Pending {
            node: 0,
            indices,
            depth: 0,
        }];

        while let Some(task) = stack.pop() {
            let n = task.indices.len();
            let positives = task.indices.iter().filter(|&&i| labels[i]).count();
            let leaf = Node::Leaf {
                positive: if n == 0 { 0.0 } else { positives as f64 / n as f64 },
                samples: n,
            };

            let splittable = self.config.max_depth.map_or(true, |d| task.depth < d)
                && n >= self.config.min_samples_split
                && positives > 0
                && positives < n;
            let best = if splittable {
                self.best_split(features, labels, &task.indices, positives, rng)
            } else {
                None
            };

            let Some(best) = best else {
                self.nodes[task.node] = leaf;
                continue;
            };

            self.importances[best.feature] += best.decrease;
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = task
                .indices
                .iter()
                .partition(|&&i| features[i][best.feature] <= best.threshold);

            let left = self.nodes.len();
            let right = left + 1;
            self.nodes.push(leaf.clone());
            self.nodes.push(leaf);
            self.nodes[task.node] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left,
                right,
            };
            stack.push(Pending {
                node: right,
                indices: right_rows,
                depth: task.depth + 1,
            });
            stack.push(Pending {
                node: left,
                indices: left_rows,
                depth: task.depth + 1,
            });
        }

        let total: f64 = self.importances.iter().sum();
        if total > 0.0 {
            for imp in &mut self.importances {
                *imp /= total;
            }
        }
    }

    fn best_split<R: Rng>(
        &self,
        features: &[Vec<f64>],
        labels: &[bool],
        indices: &[usize],
        positives: usize,
        rng: &mut R,
    ) -> Option<Candidate> {
        let n = indices.len();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let parent = gini(positives, n) * n as f64;

        let mut candidates: Vec<usize> = (0..self.n_features).collect();
        candidates.shuffle(rng);
        candidates.truncate(self.config.max_features.resolve(self.n_features));

        let mut best: Option<Candidate> = None;
        let mut sorted: Vec<(f64, bool)> = Vec::with_capacity(n);

        for feature in candidates {
            sorted.clear();
            sorted.extend(indices.iter().map(|&i| (features[i][feature], labels[i])));
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for i in 0..n - 1 {
                if sorted[i].1 {
                    left_pos += 1;
                }
                let (lo, hi) = (sorted[i].0, sorted[i + 1].0);
                if lo >= hi {
                    continue;
                }
                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let child = gini(left_pos, left_n) * left_n as f64
                    + gini(positives - left_pos, right_n) * right_n as f64;
                let decrease = parent - child;
                if best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(Candidate {
                        feature,
                        threshold,
                        decrease,
                    });
                }
            }
        }
        best
    }

    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Probability of `true` for one row. Rows must have the fitted width.
    pub(crate) fn proba_row(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes.get(at) {
                Some(Node::Leaf { positive, .. }) => return *positive,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub(crate) fn check_rows(&self, features: &[Vec<f64>]) -> Result<(), ModelError> {
        if !self.is_fitted() {
            return Err(ModelError::NotFitted);
        }
        for (row, f) in features.iter().enumerate() {
            if f.len() != self.n_features {
                return Err(ModelError::RaggedFeatures {
                    row,
                    expected: self.n_features,
                    found: f.len(),
                });
            }
        }
        Ok(())
    }

    pub fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        self.check_rows(features)?;
        Ok(features.iter().map(|row| self.proba_row(row)).collect())
    }

    /// Ties go to `false`.
    pub fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<bool>, ModelError> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| p > 0.5)
            .collect())
    }

    /// Normalized impurity decrease per feature; all zero for a single-leaf tree.
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Depth of the deepest leaf; a single leaf has depth 0.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((at, depth)) = stack.pop() {
            match self.nodes.get(at) {
                Some(Node::Split { left, right, .. }) => {
                    stack.push((*left, depth + 1));
                    stack.push((*right, depth + 1));
                }
                Some(Node::Leaf { .. }) => deepest = deepest.max(depth),
                None => {}
            }
        }
        deepest
    }
}
