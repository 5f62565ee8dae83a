use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use super::features::{engineer, feature_matrix, FeatureRow};
use super::forest::RandomForest;
use crate::error::PipelineError;
use crate::indicators::{mean, stddev};
use crate::types::DerivedBar;

pub const CSV_HEADER: &str = "target_date,forecast_close,std_dev,mean_prediction_signal,lower_bound,upper_bound";

/// Next-day close estimate with a one standard deviation band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub target_date: NaiveDate,
    pub forecast_close: f64,
    pub std_dev: f64,
    pub mean_prediction_signal: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl Forecast {
    /// `last_close + mean_signal * std_dev`, banded by `std_dev` either side
    pub fn from_signal(target_date: NaiveDate, last_close: f64, mean_signal: f64, std_dev: f64) -> Self {
        let forecast_close = last_close + mean_signal * std_dev;
        Self {
            target_date,
            forecast_close,
            std_dev,
            mean_prediction_signal: mean_signal,
            lower_bound: forecast_close - std_dev,
            upper_bound: forecast_close + std_dev,
        }
    }

    pub fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.target_date.format("%Y-%m-%d"),
            self.forecast_close,
            self.std_dev,
            self.mean_prediction_signal,
            self.lower_bound,
            self.upper_bound
        )
    }

    /// Write header plus one data row, replacing `path`
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut file =
            std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        writeln!(file, "{}", CSV_HEADER)?;
        writeln!(file, "{}", self.csv_row())?;
        info!("Forecast written to {}", path.display());
        Ok(())
    }
}

/// Weekday bars up to and including `cutoff`, turned into feature rows
pub fn forecast_window(bars: &[DerivedBar], cutoff: NaiveDate) -> Vec<FeatureRow> {
    let window: Vec<DerivedBar> = bars
        .iter()
        .filter(|b| b.is_weekday() && b.date <= cutoff)
        .cloned()
        .collect();
    debug!("Forecast window: {} weekday bars up to {}", window.len(), cutoff);
    engineer(&window)
}

/// Predict every row of the window and combine the mean signal with the
/// window's close dispersion into a forecast for `target_date`.
pub fn forecast(
    model: &RandomForest,
    bars: &[DerivedBar],
    cutoff: NaiveDate,
    target_date: NaiveDate,
) -> Result<Forecast> {
    let rows = forecast_window(bars, cutoff);
    let Some(last) = rows.last() else {
        return Err(PipelineError::InsufficientData(format!(
            "no complete feature rows among {} bars up to {}",
            bars.len(),
            cutoff
        ))
        .into());
    };

    let predictions = model.predict(feature_matrix(&rows).view())?;
    let signals: Vec<f64> = predictions.iter().map(|p| *p as f64).collect();
    let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();

    let mean_signal = mean(&signals).unwrap_or(0.0);
    let std_dev = stddev(&closes).unwrap_or(0.0);

    info!(
        "Forecast inputs: {} rows, last close {:.5} on {}, mean signal {:.3}, std {:.5}",
        rows.len(),
        last.close,
        last.date,
        mean_signal,
        std_dev
    );

    Ok(Forecast::from_signal(target_date, last.close, mean_signal, std_dev))
}
