pub mod yahoo;

pub use yahoo::*;

use async_trait::async_trait;
use chrono::NaiveDate;
#[cfg(test)]
use mockall::automock;

use crate::types::Bar;

/// Source of daily OHLCV bars
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Daily bars for `symbol` in `[start, end]`, ordered by date
    async fn fetch_daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> anyhow::Result<Vec<Bar>>;

    fn name(&self) -> &str;
}
