use chrono::{Datelike, NaiveDate};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::{lag1, rolling_mean};
use crate::types::DerivedBar;

/// Window of the close rolling mean
pub const ROLLING_WINDOW: usize = 5;

pub const FEATURE_NAMES: [&str; FeatureRow::NUM_FEATURES] = [
    "open",
    "high",
    "low",
    "close",
    "volume",
    "volatility",
    "price_change",
    "activity",
    "price_density",
    "day_of_week",
    "month",
    "year",
    "close_lag1",
    "close_rolling_mean5",
];

/// One trading day with every feature defined and its direction label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub volatility: f64,
    pub price_change: f64,
    pub activity: f64,
    pub price_density: f64,
    /// Monday = 0
    pub day_of_week: u32,
    pub month: u32,
    pub year: i32,
    pub close_lag1: f64,
    pub close_rolling_mean5: f64,
    /// 1 when close rose versus the previous row
    pub target: u8,
}

impl FeatureRow {
    pub const NUM_FEATURES: usize = 14;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume as f64,
            self.volatility,
            self.price_change,
            self.activity,
            self.price_density,
            self.day_of_week as f64,
            self.month as f64,
            self.year as f64,
            self.close_lag1,
            self.close_rolling_mean5,
        ]
    }
}

/// Build feature rows from date-ordered derived bars.
///
/// Lag and rolling features look backwards only. The target of each row is
/// computed against the previous bar before any row is dropped, then rows
/// with an undefined lag, rolling mean or derived column are removed.
pub fn engineer(bars: &[DerivedBar]) -> Vec<FeatureRow> {
    let mut sorted: Vec<&DerivedBar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.date);

    let closes: Vec<f64> = sorted.iter().map(|b| b.close).collect();
    let lagged = lag1(&closes);
    let rolling = rolling_mean(&closes.iter().map(|c| Some(*c)).collect::<Vec<_>>(), ROLLING_WINDOW);

    let rows: Vec<FeatureRow> = sorted
        .iter()
        .enumerate()
        .filter_map(|(i, bar)| {
            let target = match i {
                0 => 0,
                _ if bar.close > closes[i - 1] => 1,
                _ => 0,
            };
            Some(FeatureRow {
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                volatility: bar.volatility,
                price_change: bar.price_change?,
                activity: bar.activity?,
                price_density: bar.price_density?,
                day_of_week: bar.date.weekday().num_days_from_monday(),
                month: bar.date.month(),
                year: bar.date.year(),
                close_lag1: lagged[i]?,
                close_rolling_mean5: rolling[i]?,
                target,
            })
        })
        .collect();

    debug!("Engineered {} feature rows from {} bars", rows.len(), bars.len());
    rows
}

/// Row-major feature matrix in `FEATURE_NAMES` order
pub fn feature_matrix(rows: &[FeatureRow]) -> Array2<f64> {
    let mut matrix = Array2::<f64>::zeros((rows.len(), FeatureRow::NUM_FEATURES));
    for (i, row) in rows.iter().enumerate() {
        for (j, value) in row.to_array().iter().enumerate() {
            matrix[[i, j]] = *value;
        }
    }
    matrix
}

pub fn targets(rows: &[FeatureRow]) -> Vec<u8> {
    rows.iter().map(|r| r.target).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn derived(start: NaiveDate, closes: &[f64]) -> Vec<DerivedBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| DerivedBar {
                date: start + Duration::days(i as i64),
                open: c,
                high: c + 0.01,
                low: c - 0.01,
                close: c,
                volume: 0,
                volatility: 0.02,
                price_change: Some(0.01),
                activity: Some(0.03),
                price_density: Some(4.0),
            })
            .collect()
    }

    #[test]
    fn test_reference_scenario() {
        let closes = [1.10, 1.11, 1.12, 1.11, 1.13, 1.14, 1.12, 1.15, 1.16, 1.17];
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let rows = engineer(&derived(start, &closes));

        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2020, 1, 5).unwrap());
        assert_eq!(rows[5].date, NaiveDate::from_ymd_opt(2020, 1, 10).unwrap());
        assert_eq!(targets(&rows), vec![1, 1, 0, 1, 1, 1]);

        // 2020-01-05 was a Sunday
        assert_eq!(rows[0].day_of_week, 6);
        assert!((rows[0].close_lag1 - 1.11).abs() < 1e-12);
        assert!((rows[0].close_rolling_mean5 - 1.114).abs() < 1e-12);
    }

    #[test]
    fn test_increasing_series_is_all_up() {
        let closes: Vec<f64> = (0..10).map(|i| 1.0 + i as f64 * 0.01).collect();
        let rows = engineer(&derived(NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(), &closes));
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.target == 1));
    }

    #[test]
    fn test_undefined_derived_columns_drop_rows() {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let mut bars = derived(start, &[1.0, 1.1, 1.2, 1.3, 1.4, 1.5, 1.6]);
        bars[5].activity = None;
        bars[6].price_density = None;
        let rows = engineer(&bars);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, start + Duration::days(4));
    }

    #[test]
    fn test_short_input_is_empty_not_error() {
        assert!(engineer(&[]).is_empty());
        let bars = derived(NaiveDate::from_ymd_opt(2022, 1, 3).unwrap(), &[1.0, 1.1, 1.2, 1.3]);
        assert!(engineer(&bars).is_empty());
    }

    #[test]
    fn test_feature_matrix_layout() {
        let closes = [1.10, 1.11, 1.12, 1.11, 1.13, 1.14];
        let rows = engineer(&derived(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), &closes));
        let matrix = feature_matrix(&rows);
        assert_eq!(matrix.dim(), (2, FeatureRow::NUM_FEATURES));
        assert_eq!(FEATURE_NAMES[3], "close");
        assert!((matrix[[1, 3]] - 1.14).abs() < 1e-12);
        assert_eq!(matrix[[0, 11]], 2020.0);
    }
}
