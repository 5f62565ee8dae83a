use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use yahoo_finance_api as yahoo;

use super::BarSource;
use crate::types::Bar;

/// Daily bars from Yahoo Finance
pub struct YahooClient {
    connector: yahoo::YahooConnector,
}

impl YahooClient {
    pub fn new() -> Result<Self> {
        let connector = yahoo::YahooConnector::new().context("Failed to create Yahoo Finance connector")?;
        Ok(Self { connector })
    }
}

#[async_trait]
impl BarSource for YahooClient {
    async fn fetch_daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>> {
        let from = to_offset_datetime(start, NaiveTime::MIN)?;
        let to = to_offset_datetime(end, NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))?;
        debug!("Fetching {} daily bars from Yahoo Finance ({} to {})", symbol, start, end);

        let response = self
            .connector
            .get_quote_history_interval(symbol, from, to, "1d")
            .await
            .with_context(|| format!("Yahoo Finance request failed for {}", symbol))?;

        // daily bars are stamped at exchange midnight, not UTC midnight
        let utc_offset = match response.metadata() {
            Ok(meta) => meta.gmtoffset as i64,
            Err(e) => {
                warn!("No exchange metadata for {} ({}); dating bars in UTC", symbol, e);
                0
            }
        };

        let quotes = response
            .quotes()
            .with_context(|| format!("Failed to parse Yahoo Finance quotes for {}", symbol))?;

        let bars = merge_daily(
            quotes
                .iter()
                .filter_map(|q| {
                    let date = trading_date(q.timestamp as i64, utc_offset)?;
                    let bar = Bar {
                        date,
                        open: q.open,
                        high: q.high,
                        low: q.low,
                        close: q.close,
                        volume: q.volume as i64,
                    };
                    is_complete(&bar).then_some(bar)
                })
                .collect(),
        );

        info!(
            "Fetched {} daily bars for {} ({} to {}, utc offset {}s)",
            bars.len(),
            symbol,
            start,
            end,
            utc_offset
        );
        Ok(bars)
    }

    fn name(&self) -> &str {
        "yahoo"
    }
}

fn to_offset_datetime(date: NaiveDate, at: NaiveTime) -> Result<OffsetDateTime> {
    let ts = date.and_time(at).and_utc().timestamp();
    OffsetDateTime::from_unix_timestamp(ts).with_context(|| format!("Date out of range: {}", date))
}

/// Calendar date of a bar stamped `timestamp` in an exchange running
/// `utc_offset` seconds ahead of UTC
pub fn trading_date(timestamp: i64, utc_offset: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp.checked_add(utc_offset)?, 0).map(|dt| dt.date_naive())
}

fn is_complete(bar: &Bar) -> bool {
    [bar.open, bar.high, bar.low, bar.close].iter().all(|v| v.is_finite())
}

/// Order bars by date, keeping the last bar of a repeated date
pub fn merge_daily(bars: Vec<Bar>) -> Vec<Bar> {
    let mut merged: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match merged.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => merged.push(bar),
        }
    }
    merged.sort_by_key(|b| b.date);
    merged.dedup_by_key(|b| b.date);
    merged
}
