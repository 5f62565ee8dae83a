use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::database::{Database, TrainingRunRecord};
use crate::error::PipelineError;
use crate::ml::evaluator::evaluate;
use crate::ml::{
    engineer, partition_dates, FeatureRow, ForestParams, IncrementalTrainer, ModelArtifact, PeriodOutcome,
    PeriodSummary, RandomForest,
};

#[derive(Debug, Clone)]
pub struct WalkForwardReport {
    pub run_id: Uuid,
    pub periods: Vec<PeriodSummary>,
    pub n_trees: usize,
    pub mean_cv_accuracy: Option<f64>,
    pub artifact_path: PathBuf,
}

impl WalkForwardReport {
    pub fn periods_trained(&self) -> usize {
        self.periods.iter().filter(|p| !p.skipped).count()
    }

    pub fn periods_skipped(&self) -> usize {
        self.periods.iter().filter(|p| p.skipped).count()
    }
}

/// Partition the feature rows' date range and grow one forest across the
/// periods in order, evaluating in-sample after each trained period.
pub fn train_walk_forward(rows: &[FeatureRow], config: &PipelineConfig) -> Result<(RandomForest, Vec<PeriodSummary>)> {
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Err(PipelineError::InsufficientData("no feature rows to train on".to_string()).into());
    };

    let periods = partition_dates(first.date, last.date);
    info!(
        "Walk-forward over {} rows from {} to {} in {} periods",
        rows.len(),
        first.date,
        last.date,
        periods.len()
    );

    let mut trainer = IncrementalTrainer::new(ForestParams::from(&config.model), &config.training);
    let mut summaries = Vec::with_capacity(periods.len());

    for period in &periods {
        let period_rows: Vec<FeatureRow> = rows.iter().filter(|r| period.contains(r.date)).cloned().collect();
        info!("Training period {} ({} rows)", period, period_rows.len());

        let mut summary = PeriodSummary {
            index: period.index,
            start: period.start,
            end: period.end,
            rows: period_rows.len(),
            skipped: true,
            n_trees: trainer.model().map_or(0, |m| m.n_fitted()),
            cv_mean_accuracy: None,
            in_sample_accuracy: None,
        };

        if let PeriodOutcome::Trained(step) = trainer.train_period(period, &period_rows)? {
            info!("Added {} trees on {} rows ({} total)", step.trees_added, step.rows, step.n_trees);
            summary.skipped = false;
            summary.n_trees = step.n_trees;
            summary.cv_mean_accuracy = step.cv.as_ref().map(|cv| cv.mean());

            if let Some(model) = trainer.model() {
                let evaluation = evaluate(model, &period_rows)?;
                evaluation.log();
                summary.in_sample_accuracy = Some(evaluation.accuracy);
            }
        }

        summaries.push(summary);
    }

    let model = trainer
        .into_model()
        .ok_or_else(|| PipelineError::InsufficientData("no period had usable rows".to_string()))?;
    Ok((model, summaries))
}

/// Mean of the per-period cross-validation accuracies that were computed
pub fn mean_cv_accuracy(periods: &[PeriodSummary]) -> Option<f64> {
    let scores: Vec<f64> = periods.iter().filter_map(|p| p.cv_mean_accuracy).collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Load stored bars, train across all periods, persist the final model and
/// record the run.
pub async fn run_walk_forward(
    db: &Database,
    config: &PipelineConfig,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<WalkForwardReport> {
    let summary = db.bar_summary().await?;
    let start = start.or(config.training.start).or(summary.as_ref().map(|s| s.first_date));
    let end = end.or(config.training.end).or(summary.as_ref().map(|s| s.last_date));
    let (Some(start), Some(end)) = (start, end) else {
        return Err(PipelineError::InsufficientData("feature table is empty; run ingest first".to_string()).into());
    };

    let bars = db.get_bars(start, end).await?;
    info!("Loaded {} stored bars between {} and {}", bars.len(), start, end);
    let rows = engineer(&bars);

    let (model, periods) = train_walk_forward(&rows, config)?;

    let run_id = Uuid::new_v4();
    let artifact_path = PathBuf::from(&config.storage.artifact_path);
    let n_trees = model.n_fitted();
    let mean_cv = mean_cv_accuracy(&periods);

    let artifact = ModelArtifact::new(run_id, model, periods);
    artifact.save(&artifact_path)?;

    db.record_training_run(&TrainingRunRecord {
        run_id,
        trained_at: Utc::now(),
        periods_trained: artifact.periods.iter().filter(|p| !p.skipped).count(),
        periods_skipped: artifact.periods.iter().filter(|p| p.skipped).count(),
        n_trees,
        mean_cv_accuracy: mean_cv,
        artifact_path: config.storage.artifact_path.clone(),
    })
    .await?;

    Ok(WalkForwardReport {
        run_id,
        periods: artifact.periods,
        n_trees,
        mean_cv_accuracy: mean_cv,
        artifact_path,
    })
}
