use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Growth limits shared by every tree of a forest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Candidate features drawn at each split
    pub max_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        /// Fraction of class 1 among the samples that reached this leaf
        proba: f64,
        n_samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Binary CART classifier with Gini impurity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Node,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl DecisionTree {
    /// Grow a tree on the rows listed in `sample` (repeats allowed, as drawn
    /// by a bootstrap).
    pub fn fit(
        params: &TreeParams,
        x: ArrayView2<f64>,
        y: &[u8],
        sample: Vec<usize>,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let builder = Builder { params, x, y };
        let root = builder.build(sample, 0, rng);
        Self { root }
    }

    /// Probability of class 1 for one feature vector
    pub fn predict_proba_one(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { proba, .. } => return *proba,
                Node::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        fn depth(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        depth(&self.root)
    }

    #[cfg(test)]
    pub fn n_leaves(&self) -> usize {
        fn leaves(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 1,
                Node::Split { left, right, .. } => leaves(left) + leaves(right),
            }
        }
        leaves(&self.root)
    }
}

fn gini(n: usize, positives: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = positives as f64 / n as f64;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

struct Builder<'p, 'a, 'y> {
    params: &'p TreeParams,
    x: ArrayView2<'a, f64>,
    y: &'y [u8],
}

impl<'p, 'a, 'y> Builder<'p, 'a, 'y> {
    fn build(&self, sample: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> Node {
        let n = sample.len();
        let positives = sample.iter().filter(|&&i| self.y[i] == 1).count();
        let leaf = || Node::Leaf {
            proba: if n == 0 { 0.0 } else { positives as f64 / n as f64 },
            n_samples: n,
        };

        if depth >= self.params.max_depth
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || positives == 0
            || positives == n
        {
            return leaf();
        }

        let Some(split) = self.best_split(&sample, positives, rng) else {
            return leaf();
        };

        let (left, right): (Vec<usize>, Vec<usize>) = sample
            .into_iter()
            .partition(|&i| self.x[[i, split.feature]] <= split.threshold);

        Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.build(left, depth + 1, rng)),
            right: Box::new(self.build(right, depth + 1, rng)),
        }
    }

    /// Sweep each candidate feature in sorted order, scoring every boundary
    /// between distinct values that leaves enough samples on both sides.
    fn best_split(&self, sample: &[usize], positives: usize, rng: &mut ChaCha8Rng) -> Option<Split> {
        let n = sample.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent = gini(n, positives);

        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);
        features.truncate(self.params.max_features.max(1));

        let mut best: Option<Split> = None;
        let mut column: Vec<(f64, u8)> = Vec::with_capacity(n);

        for feature in features {
            column.clear();
            column.extend(sample.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for i in 1..n {
                left_pos += column[i - 1].1 as usize;
                let (lo, hi) = (column[i - 1].0, column[i].0);
                if lo == hi || i < min_leaf || n - i < min_leaf {
                    continue;
                }

                let weighted = (i as f64 * gini(i, left_pos)
                    + (n - i) as f64 * gini(n - i, positives - left_pos))
                    / n as f64;
                let gain = parent - weighted;

                if gain > best.as_ref().map_or(1e-12, |b| b.gain) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some(Split { feature, threshold, gain });
                }
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: 2,
        }
    }

    #[test]
    fn test_separable_data_is_learned() {
        let x = array![[0.1, 5.0], [0.2, 3.0], [0.3, 4.0], [0.7, 3.5], [0.8, 4.5], [0.9, 5.5]];
        let y = vec![0, 0, 0, 1, 1, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let tree = DecisionTree::fit(&params(), x.view(), &y, (0..6).collect(), &mut rng);

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_leaves(), 2);
        for (i, label) in y.iter().enumerate() {
            assert_eq!(tree.predict_proba_one(x.row(i)), *label as f64);
        }
        assert_eq!(tree.predict_proba_one(array![0.45, 0.0].view()), 0.0);
        assert_eq!(tree.predict_proba_one(array![0.55, 0.0].view()), 1.0);
    }

    #[test]
    fn test_min_samples_leaf_is_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = vec![1, 0, 0, 0, 0, 0, 0, 0];
        let p = TreeParams { min_samples_leaf: 3, max_features: 1, ..params() };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let tree = DecisionTree::fit(&p, x.view(), &y, (0..8).collect(), &mut rng);

        fn check(node: &Node, min: usize) {
            match node {
                Node::Leaf { n_samples, .. } => assert!(*n_samples >= min),
                Node::Split { left, right, .. } => {
                    check(left, min);
                    check(right, min);
                }
            }
        }
        check(&tree.root, 3);
    }

    #[test]
    fn test_depth_limit_and_pure_nodes() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let pure = DecisionTree::fit(&params(), x.view(), &[1, 1, 1, 1], (0..4).collect(), &mut rng);
        assert_eq!(pure.n_leaves(), 1);

        let p = TreeParams { max_depth: 1, max_features: 1, ..params() };
        let shallow = DecisionTree::fit(&p, x.view(), &[0, 1, 0, 1], (0..4).collect(), &mut rng);
        assert!(shallow.depth() <= 1);
    }

    #[test]
    fn test_constant_feature_yields_leaf() {
        let x = array![[1.0], [1.0], [1.0], [1.0]];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let tree = DecisionTree::fit(&params(), x.view(), &[0, 1, 0, 1], (0..4).collect(), &mut rng);
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.predict_proba_one(array![1.0].view()), 0.5);
    }

    static SHARED_PARAMS: TreeParams = TreeParams {
        max_depth: 3,
        min_samples_split: 2,
        min_samples_leaf: 1,
        max_features: 1,
    };

    fn grow_on_owned(values: Vec<f64>, labels: Vec<u8>) -> DecisionTree {
        // params, features and labels each come from a different scope
        let n = values.len();
        let x = ndarray::Array2::from_shape_vec((n, 1), values).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        DecisionTree::fit(&SHARED_PARAMS, x.view(), &labels, (0..n).collect(), &mut rng)
    }

    #[test]
    fn test_fit_with_independent_borrows() {
        let tree = grow_on_owned(vec![1.0, 2.0, 8.0, 9.0], vec![0, 0, 1, 1]);
        assert_eq!(tree.predict_proba_one(array![1.5].view()), 0.0);
        assert_eq!(tree.predict_proba_one(array![8.5].view()), 1.0);
    }
}
