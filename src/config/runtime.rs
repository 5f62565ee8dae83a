use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageSettings,
    pub data: DataSettings,
    pub training: TrainingSettings,
    pub model: ModelSettings,
    pub forecast: ForecastSettings,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Storage validation
        if !self.storage.database_url.starts_with("sqlite:") {
            errors.push("storage.database_url must be a sqlite: URL".to_string());
        }
        if self.storage.artifact_path.trim().is_empty() {
            errors.push("storage.artifact_path must not be empty".to_string());
        }

        // Data validation
        if self.data.symbol.trim().is_empty() {
            errors.push("data.symbol must not be empty".to_string());
        }

        // Training validation
        if self.training.initial_trees == 0 {
            errors.push("training.initial_trees must be > 0".to_string());
        }
        if self.training.trees_per_period == 0 {
            errors.push("training.trees_per_period must be > 0".to_string());
        }
        if self.training.cv_folds < 2 {
            errors.push("training.cv_folds must be >= 2".to_string());
        }
        if let (Some(start), Some(end)) = (self.training.start, self.training.end) {
            if start > end {
                errors.push("training.start must not be after training.end".to_string());
            }
        }

        // Model validation
        if self.model.max_depth == 0 {
            errors.push("model.max_depth must be > 0".to_string());
        }
        if self.model.min_samples_split < 2 {
            errors.push("model.min_samples_split must be >= 2".to_string());
        }
        if self.model.min_samples_leaf == 0 {
            errors.push("model.min_samples_leaf must be > 0".to_string());
        }
        if self.model.max_features == Some(0) {
            errors.push("model.max_features must be > 0 when set".to_string());
        }

        // Forecast validation
        if self.forecast.window_start > self.forecast.cutoff {
            errors.push("forecast.window_start must not be after forecast.cutoff".to_string());
        }
        if let Some(target) = self.forecast.target_date {
            if target <= self.forecast.cutoff {
                errors.push("forecast.target_date must be after forecast.cutoff".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: String,
    pub artifact_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./forex_data.db".to_string(),
            artifact_path: "models/random_forest_final.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub symbol: String,
    pub history_start: NaiveDate,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            symbol: "EURUSD=X".to_string(),
            history_start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
        }
    }
}

/// Walk-forward schedule. `start`/`end` default to the stored date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub initial_trees: usize,
    pub trees_per_period: usize,
    pub cv_folds: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            initial_trees: 100,
            trees_per_period: 50,
            cv_folds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` means floor(sqrt(n_features))
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ModelSettings {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub window_start: NaiveDate,
    pub cutoff: NaiveDate,
    /// Defaults to the first weekday after `cutoff`
    pub target_date: Option<NaiveDate>,
    pub output: String,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            window_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default(),
            cutoff: NaiveDate::from_ymd_opt(2025, 1, 19).unwrap_or_default(),
            target_date: None,
            output: "forecast_eur_usd.csv".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.training.initial_trees, 100);
        assert_eq!(config.training.trees_per_period, 50);
        assert_eq!(config.model.seed, 42);
        assert_eq!(config.forecast.cutoff, NaiveDate::from_ymd_opt(2025, 1, 19).unwrap());
    }

    #[test]
    fn test_validate_collects_every_error() {
        let mut config = PipelineConfig::default();
        config.training.cv_folds = 1;
        config.model.min_samples_leaf = 0;
        config.forecast.window_start = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("cv_folds")));
        assert!(errors.iter().any(|e| e.contains("min_samples_leaf")));
        assert!(errors.iter().any(|e| e.contains("window_start")));
    }

    #[test]
    fn test_target_date_must_follow_cutoff() {
        let mut config = PipelineConfig::default();
        config.forecast.target_date = Some(config.forecast.cutoff);
        assert!(config.validate().is_err());
    }
}
