use chrono::NaiveDateTime;
use thiserror::Error;

/// Pipeline conditions callers may want to match on. Everything else travels
/// as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model unavailable at {path}: {reason}")]
    ModelUnavailable { path: String, reason: String },

    #[error("period starting {start} precedes the end of the last trained period ({last_end})")]
    OutOfOrderPeriod {
        start: NaiveDateTime,
        last_end: NaiveDateTime,
    },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid configuration: {}", .0.join(", "))]
    InvalidConfig(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = PipelineError::InvalidConfig(vec!["a must be > 0".into(), "b missing".into()]);
        assert_eq!(err.to_string(), "invalid configuration: a must be > 0, b missing");

        let err = PipelineError::ModelUnavailable {
            path: "models/x.json".into(),
            reason: "not found".into(),
        };
        assert!(err.to_string().contains("models/x.json"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = PipelineError::InsufficientData("no rows".into()).into();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InsufficientData(_))
        ));
    }
}
