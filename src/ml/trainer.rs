use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::{info, warn};

use super::cross_validation::{cross_val_accuracy, CvScores};
use super::features::{feature_matrix, targets, FeatureRow};
use super::forest::{ForestParams, RandomForest};
use super::periods::Period;
use crate::config::TrainingSettings;
use crate::error::PipelineError;

/// Lifecycle of the single forest grown across periods
#[derive(Debug, Clone)]
pub enum ModelState {
    Uninitialized,
    Warm(RandomForest),
}

#[derive(Debug, Clone)]
pub enum PeriodOutcome {
    /// No usable rows; the model was left untouched
    Skipped,
    Trained(TrainingStep),
}

#[derive(Debug, Clone)]
pub struct TrainingStep {
    pub rows: usize,
    pub trees_added: usize,
    pub n_trees: usize,
    pub cv: Option<CvScores>,
}

/// Grows one random forest period by period. Each trained period raises
/// the tree count and fits only the new trees on that period's rows.
pub struct IncrementalTrainer {
    params: ForestParams,
    initial_trees: usize,
    trees_per_period: usize,
    cv_folds: usize,
    state: ModelState,
    last_end: Option<NaiveDateTime>,
}

impl IncrementalTrainer {
    pub fn new(params: ForestParams, settings: &TrainingSettings) -> Self {
        Self {
            params,
            initial_trees: settings.initial_trees,
            trees_per_period: settings.trees_per_period,
            cv_folds: settings.cv_folds,
            state: ModelState::Uninitialized,
            last_end: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn model(&self) -> Option<&RandomForest> {
        match &self.state {
            ModelState::Warm(model) => Some(model),
            ModelState::Uninitialized => None,
        }
    }

    pub fn into_model(self) -> Option<RandomForest> {
        match self.state {
            ModelState::Warm(model) => Some(model),
            ModelState::Uninitialized => None,
        }
    }

    /// Train on one period's rows.
    ///
    /// Periods must arrive in chronological order; a period may start at
    /// the previous period's end but not before it.
    pub fn train_period(&mut self, period: &Period, rows: &[FeatureRow]) -> Result<PeriodOutcome> {
        if let Some(last_end) = self.last_end {
            if period.start < last_end {
                return Err(PipelineError::OutOfOrderPeriod {
                    start: period.start,
                    last_end,
                }
                .into());
            }
        }

        if rows.is_empty() {
            warn!("Period {} has no usable rows, skipping", period);
            return Ok(PeriodOutcome::Skipped);
        }

        let mut model = match std::mem::replace(&mut self.state, ModelState::Uninitialized) {
            ModelState::Warm(model) => model,
            ModelState::Uninitialized => {
                info!(
                    "Creating forest: {} initial trees, max_depth={}, min_samples_split={}, min_samples_leaf={}, seed={}",
                    self.initial_trees,
                    self.params.max_depth,
                    self.params.min_samples_split,
                    self.params.min_samples_leaf,
                    self.params.seed
                );
                RandomForest::new(self.params.clone(), self.initial_trees)
            }
        };

        let x = feature_matrix(rows);
        let y = targets(rows);

        let previous = model.n_trees();
        let fitted = model
            .set_n_trees(previous + self.trees_per_period)
            .and_then(|_| model.fit(x.view(), &y));
        if fitted.is_err() {
            model.set_n_trees(previous)?;
        }
        let n_trees = model.n_fitted();
        let cv_template = model.unfitted_clone();
        // a failed fit leaves the previously fitted trees in place
        if model.is_fitted() {
            self.state = ModelState::Warm(model);
        }
        let trees_added = fitted?;
        self.last_end = Some(period.end);

        let cv = cross_val_accuracy(&cv_template, x.view(), &y, self.cv_folds)?;
        match &cv {
            Some(scores) => info!(
                "Cross-validation accuracy: {:.4} (+/- {:.4}) over {} folds",
                scores.mean(),
                scores.std(),
                scores.folds.len()
            ),
            None => warn!(
                "Period {} has {} rows, fewer than {} folds; cross-validation skipped",
                period,
                rows.len(),
                self.cv_folds
            ),
        }

        Ok(PeriodOutcome::Trained(TrainingStep {
            rows: rows.len(),
            trees_added,
            n_trees,
            cv,
        }))
    }
}
