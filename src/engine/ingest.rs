use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::DataSettings;
use crate::database::Database;
use crate::exchange::BarSource;
use crate::indicators::derive_bars;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// Ingestion requests logged today, this one included
    pub requests_today: i64,
    pub fetched: usize,
    pub cleared: u64,
    pub inserted: u64,
}

/// Fetch the full daily history, derive indicators over it and store the
/// bars that are not stored yet. With `rebuild` the stored table is
/// replaced in one transaction so whole-history values such as price
/// density are refreshed.
pub async fn run_ingest(
    db: &Database,
    source: &dyn BarSource,
    settings: &DataSettings,
    today: NaiveDate,
    rebuild: bool,
) -> Result<IngestReport> {
    let requests_today = db.log_request(today).await?;
    info!("Ingestion request #{} for {}", requests_today, today);

    let bars = source
        .fetch_daily_bars(&settings.symbol, settings.history_start, today)
        .await?;

    if bars.is_empty() {
        warn!(
            "No bars returned for {} between {} and {}",
            settings.symbol, settings.history_start, today
        );
        return Ok(IngestReport {
            requests_today,
            fetched: 0,
            cleared: 0,
            inserted: 0,
        });
    }

    let derived = derive_bars(&bars);

    let (cleared, inserted) = if rebuild {
        db.replace_bars(&derived).await?
    } else {
        (0, db.insert_bars(&derived).await?)
    };

    info!(
        "Stored {} new bars out of {} fetched ({} already present)",
        inserted,
        derived.len(),
        derived.len() as u64 - inserted
    );

    Ok(IngestReport {
        requests_today,
        fetched: bars.len(),
        cleared,
        inserted,
    })
}
