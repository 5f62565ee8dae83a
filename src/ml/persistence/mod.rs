use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use super::features::FEATURE_NAMES;
use super::forest::RandomForest;
use crate::error::PipelineError;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// What happened to one period of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub index: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub rows: usize,
    pub skipped: bool,
    pub n_trees: usize,
    pub cv_mean_accuracy: Option<f64>,
    pub in_sample_accuracy: Option<f64>,
}

/// Final model of a training run together with the run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub periods: Vec<PeriodSummary>,
    pub model: RandomForest,
}

impl ModelArtifact {
    pub fn new(run_id: Uuid, model: RandomForest, periods: Vec<PeriodSummary>) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            run_id,
            trained_at: Utc::now(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            periods,
            model,
        }
    }

    /// Write to a sibling temp file and rename over `path`, replacing any
    /// previous artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create model directory {}", dir.display()))?;
        }

        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(self)?;
        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("Failed to move model into {}", path.display()))?;

        info!(
            "Saved model ({} trees, run {}) to {}",
            self.model.n_fitted(),
            self.run_id,
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let unavailable = |reason: String| PipelineError::ModelUnavailable {
            path: path.display().to_string(),
            reason,
        };

        let bytes = std::fs::read(path).map_err(|e| unavailable(e.to_string()))?;
        let artifact: ModelArtifact =
            serde_json::from_slice(&bytes).map_err(|e| unavailable(format!("corrupt artifact: {}", e)))?;

        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(unavailable(format!(
                "unsupported format version {} (expected {})",
                artifact.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        if !artifact.model.is_fitted() {
            return Err(unavailable("artifact holds no fitted trees".to_string()));
        }
        if artifact.model.n_features() != Some(FEATURE_NAMES.len()) {
            return Err(unavailable(format!(
                "model expects {:?} features, pipeline produces {}",
                artifact.model.n_features(),
                FEATURE_NAMES.len()
            )));
        }

        info!(
            "Loaded model ({} trees, run {}, trained {}) from {}",
            artifact.model.n_fitted(),
            artifact.run_id,
            artifact.trained_at.format("%Y-%m-%d %H:%M:%S"),
            path.display()
        );
        Ok(artifact)
    }
}
