use tracing::{debug, warn};

use super::{abs_diff, price_density, rolling_mean};
use crate::types::{Bar, DerivedBar};

pub const ACTIVITY_WINDOW: usize = 5;

/// Compute volatility, price change, activity and price density for a full
/// bar history. Density is estimated over every close in `bars`, so the
/// caller must pass the whole history, not an incremental slice.
pub fn derive_bars(bars: &[Bar]) -> Vec<DerivedBar> {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by_key(|b| b.date);

    let closes: Vec<f64> = sorted.iter().map(|b| b.close).collect();
    let volatility: Vec<f64> = sorted.iter().map(|b| b.range()).collect();
    let price_change = abs_diff(&closes);

    let activity_input: Vec<Option<f64>> = volatility
        .iter()
        .zip(price_change.iter())
        .map(|(v, pc)| pc.map(|pc| v + pc))
        .collect();
    let activity = rolling_mean(&activity_input, ACTIVITY_WINDOW);

    let density = price_density(&closes);
    if !closes.is_empty() && density.iter().all(|d| d.is_none()) {
        warn!("Price density undefined for {} bars (degenerate close series)", closes.len());
    }

    debug!("Derived metrics computed for {} bars", sorted.len());

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, bar)| DerivedBar {
            date: bar.date,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            volatility: volatility[i],
            price_change: price_change[i],
            activity: activity[i],
            price_density: density[i],
        })
        .collect()
}
