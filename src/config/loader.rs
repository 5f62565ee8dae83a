use std::path::Path;

use anyhow::{Context, Result};
use ::config::{Config, Environment, File, Map};
use tracing::{debug, info};

use super::runtime::PipelineConfig;
use crate::error::PipelineError;

const ENV_PREFIX: &str = "FXCAST";

impl PipelineConfig {
    /// Load defaults, then `path` if it exists, then `FXCAST__SECTION__KEY`
    /// environment variables (after reading any `.env` file).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", env_file.display());
        }
        Self::load_with_env(path, None)
    }

    fn load_with_env<P: AsRef<Path>>(path: P, env: Option<Map<String, String>>) -> Result<Self> {
        let path = path.as_ref();
        let defaults = Config::try_from(&PipelineConfig::default())?;

        let builder = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            );

        let config: PipelineConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.validate().map_err(PipelineError::InvalidConfig)?;

        if path.exists() {
            info!("Configuration loaded from {}", path.display());
        } else {
            debug!("No configuration file at {}, using defaults", path.display());
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_with_env(dir.path().join("absent.toml"), Some(Map::new())).unwrap();
        assert_eq!(config.data.symbol, "EURUSD=X");
        assert_eq!(config.training.cv_folds, 5);
        assert!(config.training.start.is_none());
    }

    #[test]
    fn test_file_then_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[training]\nstart = \"2010-01-01\"\ncv_folds = 3\n\n[model]\nmax_depth = 6").unwrap();

        let mut env = Map::new();
        env.insert("FXCAST__MODEL__MAX_DEPTH".to_string(), "8".to_string());

        let config = PipelineConfig::load_with_env(&path, Some(env)).unwrap();
        assert_eq!(config.training.start, NaiveDate::from_ymd_opt(2010, 1, 1));
        assert_eq!(config.training.cv_folds, 3);
        assert_eq!(config.training.initial_trees, 100);
        assert_eq!(config.model.max_depth, 8);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[training]\ncv_folds = 1\n").unwrap();

        let err = PipelineConfig::load_with_env(&path, Some(Map::new())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_toml_output_round_trips() {
        let config = PipelineConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[forecast]"));
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.storage.artifact_path, config.storage.artifact_path);
    }
}
