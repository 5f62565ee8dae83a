use anyhow::{anyhow, bail, Result};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::tree::{DecisionTree, TreeParams};
use crate::config::ModelSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split, floor(sqrt(n_features)) when unset
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 4,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl From<&ModelSettings> for ForestParams {
    fn from(settings: &ModelSettings) -> Self {
        Self {
            max_depth: settings.max_depth,
            min_samples_split: settings.min_samples_split,
            min_samples_leaf: settings.min_samples_leaf,
            max_features: settings.max_features,
            bootstrap: settings.bootstrap,
            seed: settings.seed,
        }
    }
}

/// Random forest classifier that supports warm starts: raising the tree
/// count and fitting again grows only the missing trees and keeps every
/// fitted tree untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_trees: usize,
    n_features: Option<usize>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(params: ForestParams, n_trees: usize) -> Self {
        Self {
            params,
            n_trees,
            n_features: None,
            trees: Vec::new(),
        }
    }

    /// Target tree count for the next fit
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    pub fn n_fitted(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn set_n_trees(&mut self, n_trees: usize) -> Result<()> {
        if n_trees < self.trees.len() {
            bail!(
                "tree count {} is below the {} trees already fitted",
                n_trees,
                self.trees.len()
            );
        }
        self.n_trees = n_trees;
        Ok(())
    }

    /// Same configuration and tree count, no fitted trees
    pub fn unfitted_clone(&self) -> Self {
        Self::new(self.params.clone(), self.n_trees)
    }

    /// Grow trees `n_fitted()..n_trees()` on `x`/`y`. Returns how many trees
    /// were added.
    pub fn fit(&mut self, x: ArrayView2<f64>, y: &[u8]) -> Result<usize> {
        let n_samples = x.nrows();
        if n_samples == 0 {
            bail!("cannot fit a forest on zero samples");
        }
        if n_samples != y.len() {
            bail!("{} feature rows but {} labels", n_samples, y.len());
        }
        if let Some(expected) = self.n_features {
            if expected != x.ncols() {
                bail!("forest was fitted on {} features, got {}", expected, x.ncols());
            }
        }

        let first = self.trees.len();
        if first >= self.n_trees {
            warn!("Fit requested without raising the tree count; no new trees grown");
            return Ok(0);
        }

        let n_features = x.ncols();
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self
                .params
                .max_features
                .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
                .clamp(1, n_features.max(1)),
        };
        let bootstrap = self.params.bootstrap;
        let seed = self.params.seed;

        // Tree i always draws from seed + i, whatever thread grows it
        let grown: Vec<DecisionTree> = (first..self.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64));
                let sample: Vec<usize> = if bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                DecisionTree::fit(&tree_params, x, y, sample, &mut rng)
            })
            .collect();

        let added = grown.len();
        self.trees.extend(grown);
        self.n_features = Some(n_features);

        debug!(
            "Grew trees {}..{} on {} samples ({} features, {} per split)",
            first,
            self.n_trees,
            n_samples,
            n_features,
            tree_params.max_features
        );
        Ok(added)
    }

    fn check_input(&self, x: &ArrayView2<f64>) -> Result<()> {
        let n_features = self
            .n_features
            .filter(|_| self.is_fitted())
            .ok_or_else(|| anyhow!("forest has no fitted trees"))?;
        if x.ncols() != n_features {
            bail!("forest expects {} features, got {}", n_features, x.ncols());
        }
        Ok(())
    }

    fn proba_one(&self, row: ArrayView1<f64>) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict_proba_one(row)).sum();
        sum / self.trees.len() as f64
    }

    /// Mean class-1 probability over all trees, one value per row
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Vec<f64>> {
        self.check_input(&x)?;
        Ok(x.axis_iter(Axis(0)).map(|row| self.proba_one(row)).collect())
    }

    /// Class labels; ties resolve to 0
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| if p > 0.5 { 1 } else { 0 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Two noisy, linearly separable clusters
    fn dataset(n: usize, offset: u64) -> (Array2<f64>, Vec<u8>) {
        let mut rng = ChaCha8Rng::seed_from_u64(offset);
        let mut x = Array2::<f64>::zeros((n, 4));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let label = (i % 2) as u8;
            let shift = if label == 1 { 1.0 } else { -1.0 };
            x[[i, 0]] = shift + rng.gen_range(-0.5..0.5);
            x[[i, 1]] = shift * 0.5 + rng.gen_range(-0.5..0.5);
            x[[i, 2]] = rng.gen_range(-1.0..1.0);
            x[[i, 3]] = rng.gen_range(-1.0..1.0);
            y.push(label);
        }
        (x, y)
    }

    #[test]
    fn test_fit_and_predict() {
        let (x, y) = dataset(200, 1);
        let mut forest = RandomForest::new(ForestParams::default(), 20);
        assert_eq!(forest.fit(x.view(), &y).unwrap(), 20);

        let predictions = forest.predict(x.view()).unwrap();
        let correct = predictions.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct as f64 / y.len() as f64 > 0.9);

        let proba = forest.predict_proba(x.view()).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_warm_start_keeps_existing_trees() {
        let (x1, y1) = dataset(120, 2);
        let (x2, y2) = dataset(120, 3);

        let mut forest = RandomForest::new(ForestParams::default(), 10);
        forest.fit(x1.view(), &y1).unwrap();
        let before = serde_json::to_value(&forest.trees).unwrap();

        forest.set_n_trees(15).unwrap();
        assert_eq!(forest.fit(x2.view(), &y2).unwrap(), 5);
        assert_eq!(forest.n_fitted(), 15);

        let after = serde_json::to_value(&forest.trees[..10]).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_fit_without_growth_is_noop() {
        let (x, y) = dataset(60, 4);
        let mut forest = RandomForest::new(ForestParams::default(), 5);
        forest.fit(x.view(), &y).unwrap();
        assert_eq!(forest.fit(x.view(), &y).unwrap(), 0);
        assert_eq!(forest.n_fitted(), 5);
        assert!(forest.set_n_trees(3).is_err());
    }

    #[test]
    fn test_seeded_fits_are_reproducible() {
        let (x, y) = dataset(80, 5);
        let mut a = RandomForest::new(ForestParams::default(), 8);
        let mut b = RandomForest::new(ForestParams::default(), 8);
        a.fit(x.view(), &y).unwrap();
        b.fit(x.view(), &y).unwrap();
        assert_eq!(a.predict_proba(x.view()).unwrap(), b.predict_proba(x.view()).unwrap());
    }

    #[test]
    fn test_input_validation() {
        let (x, y) = dataset(40, 6);
        let forest = RandomForest::new(ForestParams::default(), 5);
        assert!(forest.predict(x.view()).is_err());

        let mut forest = forest.unfitted_clone();
        assert!(forest.fit(x.view(), &y[..10]).is_err());
        forest.fit(x.view(), &y).unwrap();

        let narrow = Array2::<f64>::zeros((3, 2));
        assert!(forest.predict(narrow.view()).is_err());
        assert!(forest.fit(narrow.view(), &[0, 1, 0]).is_err());
    }
}
