use anyhow::Result;
use std::path::Path;
use tracing::info;

use crate::config::ForecastSettings;
use crate::database::Database;
use crate::ml::forecast::forecast;
use crate::ml::{Forecast, ModelArtifact};
use crate::types::next_weekday;

/// Load the persisted model, forecast from the stored window and write the
/// one-row CSV.
pub async fn run_forecast(db: &Database, artifact_path: &Path, settings: &ForecastSettings) -> Result<Forecast> {
    let artifact = ModelArtifact::load(artifact_path)?;

    let bars = db.get_bars(settings.window_start, settings.cutoff).await?;
    info!(
        "Forecast window {} to {}: {} stored bars",
        settings.window_start,
        settings.cutoff,
        bars.len()
    );

    let target_date = settings.target_date.unwrap_or_else(|| next_weekday(settings.cutoff));
    let result = forecast(&artifact.model, &bars, settings.cutoff, target_date)?;
    result.write_csv(Path::new(&settings.output))?;

    info!(
        "Forecast for {}: {:.5} [{:.5}, {:.5}]",
        result.target_date, result.forecast_close, result.lower_bound, result.upper_bound
    );
    Ok(result)
}
