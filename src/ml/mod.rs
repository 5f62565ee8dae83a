pub mod features;
pub mod periods;
pub mod forest;
pub mod cross_validation;
pub mod trainer;
pub mod evaluator;
pub mod persistence;
pub mod forecast;

pub use features::{engineer, FeatureRow};
pub use forecast::Forecast;
pub use forest::{ForestParams, RandomForest};
pub use periods::partition_dates;
pub use persistence::{ModelArtifact, PeriodSummary};
pub use trainer::{IncrementalTrainer, PeriodOutcome};
