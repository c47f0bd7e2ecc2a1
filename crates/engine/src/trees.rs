//! Regression tree ensembles
//!
//! CART regression trees with two ensembles on top: bootstrap-aggregated
//! forests for the stat projector and gradient boosting for the calibrator.
//! Training takes an explicit seed; inference is a pure walk of the fitted
//! trees, so identical artifacts give identical outputs.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_leaf: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    /// Fit on the rows named by `idx` (duplicates allowed, as in a bootstrap)
    pub fn fit(x: &[Vec<f64>], y: &[f64], idx: &[usize], params: TreeParams) -> Self {
        let mut idx = idx.to_vec();
        Self {
            root: build_node(x, y, &mut idx, params, 0),
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = row.get(*feature).copied().unwrap_or(0.0);
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn leaf_value(y: &[f64], idx: &[usize]) -> f64 {
    if idx.is_empty() {
        return 0.0;
    }
    idx.iter().map(|&i| y[i]).sum::<f64>() / idx.len() as f64
}

fn build_node(
    x: &[Vec<f64>],
    y: &[f64],
    idx: &mut [usize],
    params: TreeParams,
    depth: usize,
) -> Node {
    let value = leaf_value(y, idx);
    if depth >= params.max_depth || idx.len() < 2 * params.min_leaf.max(1) {
        return Node::Leaf { value };
    }

    let Some((feature, threshold)) = best_split(x, y, idx, params.min_leaf.max(1)) else {
        return Node::Leaf { value };
    };

    // stable: rows keep their relative order on each side
    idx.sort_by_key(|&i| x[i][feature] > threshold);
    let split_at = idx.partition_point(|&i| x[i][feature] <= threshold);
    let (left, right) = idx.split_at_mut(split_at);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_node(x, y, left, params, depth + 1)),
        right: Box::new(build_node(x, y, right, params, depth + 1)),
    }
}

/// Best (feature, threshold) by squared-error reduction, or None if no split helps
fn best_split(x: &[Vec<f64>], y: &[f64], idx: &[usize], min_leaf: usize) -> Option<(usize, f64)> {
    let n = idx.len();
    let n_features = x.get(idx[0]).map(|r| r.len()).unwrap_or(0);
    let total: f64 = idx.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = idx.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total * total / n as f64;

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = idx.to_vec();

    for feature in 0..n_features {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..n - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let left_n = k + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let here = x[order[k]][feature];
            let next = x[order[k + 1]][feature];
            if here == next {
                continue;
            }

            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n as f64)
                + (right_sq - right_sum * right_sum / right_n as f64);

            if sse < parent_sse - 1e-12 && best.map_or(true, |(_, _, b)| sse < b) {
                best = Some((feature, (here + next) / 2.0, sse));
            }
        }
    }

    best.map(|(f, t, _)| (f, t))
}

// ============================================================================
// Bagged ensemble
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggingParams {
    pub n_trees: usize,
    pub tree: TreeParams,
    pub seed: u64,
}

impl Default for BaggingParams {
    fn default() -> Self {
        Self {
            n_trees: 40,
            tree: TreeParams::default(),
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggedEnsemble {
    trees: Vec<RegressionTree>,
    /// Out-of-bag mean squared error, the irreducible part of the variance
    residual_variance: f64,
}

impl BaggedEnsemble {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &BaggingParams) -> Self {
        let n = y.len();
        if n == 0 {
            return Self {
                trees: Vec::new(),
                residual_variance: 0.0,
            };
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);
        let mut oob_sum = vec![0.0; n];
        let mut oob_count = vec![0usize; n];

        for _ in 0..params.n_trees.max(1) {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut in_bag = vec![false; n];
            for &i in &sample {
                in_bag[i] = true;
            }
            let tree = RegressionTree::fit(x, y, &sample, params.tree);
            for i in (0..n).filter(|&i| !in_bag[i]) {
                oob_sum[i] += tree.predict(&x[i]);
                oob_count[i] += 1;
            }
            trees.push(tree);
        }

        let mut ensemble = Self {
            trees,
            residual_variance: 0.0,
        };

        let (sse, m) = (0..n)
            .filter(|&i| oob_count[i] > 0)
            .map(|i| (y[i] - oob_sum[i] / oob_count[i] as f64).powi(2))
            .fold((0.0, 0usize), |(s, m), e| (s + e, m + 1));
        ensemble.residual_variance = if m > 0 {
            sse / m as f64
        } else {
            (0..n)
                .map(|i| (y[i] - ensemble.predict(&x[i]).0).powi(2))
                .sum::<f64>()
                / n as f64
        };
        ensemble
    }

    /// (mean, variance) where variance = spread across trees + out-of-bag error
    pub fn predict(&self, row: &[f64]) -> (f64, f64) {
        if self.trees.is_empty() {
            return (f64::NAN, f64::NAN);
        }
        let preds: Vec<f64> = self.trees.iter().map(|t| t.predict(row)).collect();
        let n = preds.len() as f64;
        let mean = preds.iter().sum::<f64>() / n;
        let spread = preds.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        (mean, spread + self.residual_variance)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

// ============================================================================
// Gradient boosting
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosted {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosted {
    /// Least-squares boosting: each tree fits the current residuals
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &BoostingParams) -> Self {
        let n = y.len();
        let base = if n == 0 {
            0.0
        } else {
            y.iter().sum::<f64>() / n as f64
        };
        let idx: Vec<usize> = (0..n).collect();
        let mut fitted = vec![base; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = (0..n).map(|i| y[i] - fitted[i]).collect();
            let tree = RegressionTree::fit(x, &residuals, &idx, params.tree);
            for (i, f) in fitted.iter_mut().enumerate() {
                *f += params.learning_rate * tree.predict(&x[i]);
            }
            trees.push(tree);
        }

        Self {
            base,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.base
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, 1.0]).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 2.0 } else { 10.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_tree_learns_step() {
        let (x, y) = step_data();
        let idx: Vec<usize> = (0..x.len()).collect();
        let tree = RegressionTree::fit(&x, &y, &idx, TreeParams::default());
        assert!((tree.predict(&[3.0, 1.0]) - 2.0).abs() < 1e-9);
        assert!((tree.predict(&[35.0, 1.0]) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_target_is_a_leaf() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y = vec![4.0; 20];
        let idx: Vec<usize> = (0..20).collect();
        let tree = RegressionTree::fit(&x, &y, &idx, TreeParams::default());
        assert!(matches!(tree.root, Node::Leaf { .. }));
        assert_eq!(tree.predict(&[100.0]), 4.0);
    }

    #[test]
    fn test_bagging_is_deterministic_for_seed() {
        let (x, y) = step_data();
        let params = BaggingParams::default();
        let a = BaggedEnsemble::fit(&x, &y, &params);
        let b = BaggedEnsemble::fit(&x, &y, &params);
        assert_eq!(a.predict(&[12.0, 1.0]), b.predict(&[12.0, 1.0]));
        let (mean, var) = a.predict(&[35.0, 1.0]);
        assert!(mean > 8.0);
        assert!(var >= 0.0);
    }

    #[test]
    fn test_empty_ensemble_predicts_nan() {
        let e = BaggedEnsemble::fit(&[], &[], &BaggingParams::default());
        assert!(e.predict(&[1.0]).0.is_nan());
    }

    #[test]
    fn test_boosting_reduces_error() {
        let (x, y) = step_data();
        let params = BoostingParams {
            n_estimators: 50,
            learning_rate: 0.1,
            tree: TreeParams {
                max_depth: 2,
                min_leaf: 2,
            },
        };
        let model = GradientBoosted::fit(&x, &y, &params);
        assert!((model.predict(&[35.0, 1.0]) - 10.0).abs() < 0.1);
        assert!((model.predict(&[2.0, 1.0]) - 2.0).abs() < 0.1);
    }
}
