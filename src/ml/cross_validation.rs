use anyhow::Result;
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::forest::RandomForest;

/// Train/test index split for one fold
#[derive(Debug, Clone, PartialEq)]
pub struct CvSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Per-fold accuracy of one cross-validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvScores {
    pub folds: Vec<f64>,
}

impl CvScores {
    pub fn mean(&self) -> f64 {
        if self.folds.is_empty() {
            return 0.0;
        }
        self.folds.iter().sum::<f64>() / self.folds.len() as f64
    }

    pub fn std(&self) -> f64 {
        if self.folds.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.folds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / self.folds.len() as f64;
        variance.sqrt()
    }
}

/// Unshuffled stratified k-fold.
///
/// Class counts per fold come from dealing the class-sorted labels round
/// robin over the folds; each class then hands its samples, in order, to
/// fold 0, 1, ... in contiguous chunks of those sizes. Returns `None` when
/// there are fewer samples than folds.
pub fn stratified_k_fold(y: &[u8], n_folds: usize) -> Option<Vec<CvSplit>> {
    if n_folds < 2 || y.len() < n_folds {
        return None;
    }

    let mut classes: Vec<u8> = y.to_vec();
    classes.sort_unstable();
    classes.dedup();

    let mut sorted = y.to_vec();
    sorted.sort_unstable();

    let mut fold_of = vec![0usize; y.len()];
    for class in &classes {
        let mut allocation = vec![0usize; n_folds];
        for (position, label) in sorted.iter().enumerate() {
            if label == class {
                allocation[position % n_folds] += 1;
            }
        }

        let members = y.iter().enumerate().filter(|(_, l)| *l == class).map(|(i, _)| i);
        let targets = allocation.iter().enumerate().flat_map(|(fold, &count)| std::iter::repeat(fold).take(count));
        for (sample, fold) in members.zip(targets) {
            fold_of[sample] = fold;
        }
    }

    let splits = (0..n_folds)
        .map(|fold| {
            let (test_indices, train_indices): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&i| fold_of[i] == fold);
            CvSplit { train_indices, test_indices }
        })
        .collect();

    Some(splits)
}

/// Fit a fresh copy of `template` on each training fold and score accuracy
/// on the held-out fold. The template itself is not modified.
pub fn cross_val_accuracy(
    template: &RandomForest,
    x: ArrayView2<f64>,
    y: &[u8],
    n_folds: usize,
) -> Result<Option<CvScores>> {
    let Some(splits) = stratified_k_fold(y, n_folds) else {
        return Ok(None);
    };

    let mut folds = Vec::with_capacity(splits.len());
    for split in &splits {
        if split.train_indices.is_empty() || split.test_indices.is_empty() {
            continue;
        }
        let x_train = x.select(Axis(0), &split.train_indices);
        let y_train: Vec<u8> = split.train_indices.iter().map(|&i| y[i]).collect();
        let x_test = x.select(Axis(0), &split.test_indices);

        let mut model = template.unfitted_clone();
        model.fit(x_train.view(), &y_train)?;
        let predictions = model.predict(x_test.view())?;

        let correct = predictions
            .iter()
            .zip(split.test_indices.iter())
            .filter(|(p, i)| **p == y[**i])
            .count();
        folds.push(correct as f64 / split.test_indices.len() as f64);
    }

    Ok(Some(CvScores { folds }))
}
