use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::DerivedBar;

const BARS_TABLE: &str = "eur_usd_yf";

/// Handle on the feature table, the request log and the training run history.
/// Acquired once per command and released with [`Database::close`].
pub struct Database {
    pool: SqlitePool,
}

/// Summary row of a completed walk-forward training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRunRecord {
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub periods_trained: usize,
    pub periods_skipped: usize,
    pub n_trees: usize,
    pub mean_cv_accuracy: Option<f64>,
    pub artifact_path: String,
}

/// Row count and date range of the feature table
#[derive(Debug, Clone, PartialEq)]
pub struct BarSummary {
    pub count: i64,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

impl Database {
    /// Open (creating if needed) the database and ensure the schema
    pub async fn new(db_url: &str) -> Result<Self> {
        info!("Opening SQLite database at: {}", db_url);

        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_url))?;

        let db = Self { pool };
        db.create_schema().await?;

        debug!("Database schema ready");
        Ok(db)
    }

    /// Release every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
        debug!("Database closed");
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS eur_usd_yf (
                date TEXT PRIMARY KEY,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                volatility REAL NOT NULL,
                price_change REAL,
                activity REAL,
                price_density REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_requests (
                request_date TEXT PRIMARY KEY,
                request_count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_runs (
                run_id TEXT PRIMARY KEY,
                trained_at TEXT NOT NULL,
                periods_trained INTEGER NOT NULL,
                periods_skipped INTEGER NOT NULL,
                n_trees INTEGER NOT NULL,
                mean_cv_accuracy REAL,
                artifact_path TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_training_runs_trained_at ON training_runs(trained_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Tables created by older releases lack the indicator columns
        self.add_column_if_missing(BARS_TABLE, "activity", "REAL").await?;
        self.add_column_if_missing(BARS_TABLE, "price_density", "REAL").await?;

        Ok(())
    }

    /// Add a column, treating "duplicate column" as already present.
    /// Returns whether the column was added.
    pub async fn add_column_if_missing(&self, table: &str, column: &str, sql_type: &str) -> Result<bool> {
        let statement = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, sql_type);
        match sqlx::query(&statement).execute(&self.pool).await {
            Ok(_) => {
                info!("Added column '{}' to {}", column, table);
                Ok(true)
            }
            Err(e) if e.to_string().contains("duplicate column") => {
                debug!("Column '{}' already exists in {}", column, table);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Count one ingestion request for `day` and return the day's total
    pub async fn log_request(&self, day: NaiveDate) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO api_requests (request_date, request_count)
            VALUES (?, 1)
            ON CONFLICT(request_date) DO UPDATE SET
                request_count = request_count + 1
            "#,
        )
        .bind(day)
        .execute(&self.pool)
        .await?;

        self.request_count(day).await
    }

    pub async fn request_count(&self, day: NaiveDate) -> Result<i64> {
        let row = sqlx::query("SELECT request_count FROM api_requests WHERE request_date = ?")
            .bind(day)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("request_count")).unwrap_or(0))
    }

    /// Insert bars whose date is not stored yet. Existing dates are left
    /// untouched. Returns the number of new rows.
    pub async fn insert_bars(&self, bars: &[DerivedBar]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_rows(&mut tx, bars).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Delete every stored bar and insert `bars` in one transaction, so a
    /// failed insert leaves the previous rows in place. Returns
    /// `(deleted, inserted)`.
    pub async fn replace_bars(&self, bars: &[DerivedBar]) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM eur_usd_yf")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let inserted = insert_rows(&mut tx, bars).await?;
        tx.commit().await?;

        info!("Replaced {} stored bars with {}", deleted, inserted);
        Ok((deleted, inserted))
    }

    /// Bars with `start <= date <= end`, ordered by date
    pub async fn get_bars(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DerivedBar>> {
        let rows = sqlx::query(
            r#"
            SELECT date, open, high, low, close, volume,
                   volatility, price_change, activity, price_density
            FROM eur_usd_yf
            WHERE date BETWEEN ? AND ?
            ORDER BY date ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            bars.push(DerivedBar {
                date: row.try_get("date")?,
                open: row.try_get("open")?,
                high: row.try_get("high")?,
                low: row.try_get("low")?,
                close: row.try_get("close")?,
                volume: row.try_get("volume")?,
                volatility: row.try_get("volatility")?,
                price_change: row.try_get("price_change")?,
                activity: row.try_get("activity")?,
                price_density: row.try_get("price_density")?,
            });
        }

        Ok(bars)
    }

    pub async fn bar_summary(&self) -> Result<Option<BarSummary>> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n, MIN(date) AS first_date, MAX(date) AS last_date
            FROM eur_usd_yf
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("n");
        let first: Option<String> = row.get("first_date");
        let last: Option<String> = row.get("last_date");

        match (first, last) {
            (Some(first), Some(last)) if count > 0 => Ok(Some(BarSummary {
                count,
                first_date: NaiveDate::from_str(&first)?,
                last_date: NaiveDate::from_str(&last)?,
            })),
            _ => Ok(None),
        }
    }

    pub async fn record_training_run(&self, run: &TrainingRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO training_runs (
                run_id, trained_at, periods_trained, periods_skipped,
                n_trees, mean_cv_accuracy, artifact_path
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(run.trained_at.to_rfc3339())
        .bind(run.periods_trained as i64)
        .bind(run.periods_skipped as i64)
        .bind(run.n_trees as i64)
        .bind(run.mean_cv_accuracy)
        .bind(&run.artifact_path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn last_training_run(&self) -> Result<Option<TrainingRunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT run_id, trained_at, periods_trained, periods_skipped,
                   n_trees, mean_cv_accuracy, artifact_path
            FROM training_runs
            ORDER BY trained_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let run_id: String = row.get("run_id");
                let trained_at: String = row.get("trained_at");
                Ok(Some(TrainingRunRecord {
                    run_id: Uuid::parse_str(&run_id)?,
                    trained_at: DateTime::parse_from_rfc3339(&trained_at)?.with_timezone(&Utc),
                    periods_trained: row.get::<i64, _>("periods_trained") as usize,
                    periods_skipped: row.get::<i64, _>("periods_skipped") as usize,
                    n_trees: row.get::<i64, _>("n_trees") as usize,
                    mean_cv_accuracy: row.get("mean_cv_accuracy"),
                    artifact_path: row.get("artifact_path"),
                }))
            }
            None => Ok(None),
        }
    }
}

async fn insert_rows(tx: &mut Transaction<'_, Sqlite>, bars: &[DerivedBar]) -> Result<u64> {
    let mut inserted = 0;
    for bar in bars {
        let result = sqlx::query(
            r#"
            INSERT INTO eur_usd_yf (
                date, open, high, low, close, volume,
                volatility, price_change, activity, price_density
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(date) DO NOTHING
            "#,
        )
        .bind(bar.date)
        .bind(bar.open)
        .bind(bar.high)
        .bind(bar.low)
        .bind(bar.close)
        .bind(bar.volume)
        .bind(bar.volatility)
        .bind(bar.price_change)
        .bind(bar.activity)
        .bind(bar.price_density)
        .execute(&mut **tx)
        .await?;

        inserted += result.rows_affected();
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("forex.db").display());
        let db = Database::new(&url).await.unwrap();
        (db, dir)
    }

    fn bar(day: u32, close: f64) -> DerivedBar {
        DerivedBar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close + 0.005,
            low: close - 0.005,
            close,
            volume: 0,
            volatility: 0.01,
            price_change: if day == 1 { None } else { Some(0.001) },
            activity: None,
            price_density: Some(3.2),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let (db, _dir) = open_temp().await;
        let bars: Vec<DerivedBar> = (1..=5).map(|d| bar(d, 1.1 + d as f64 * 0.001)).collect();

        assert_eq!(db.insert_bars(&bars).await.unwrap(), 5);
        assert_eq!(db.insert_bars(&bars).await.unwrap(), 0);

        let mut changed = bars[2].clone();
        changed.close = 9.9;
        assert_eq!(db.insert_bars(&[changed]).await.unwrap(), 0);

        let stored = db
            .get_bars(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stored, bars);
        db.close().await;
    }

    #[tokio::test]
    async fn test_range_query_is_bounded_and_ordered() {
        let (db, _dir) = open_temp().await;
        let mut bars: Vec<DerivedBar> = (1..=9).map(|d| bar(d, 1.1)).collect();
        bars.reverse();
        db.insert_bars(&bars).await.unwrap();

        let stored = db
            .get_bars(
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(),
            )
            .await
            .unwrap();
        let days: Vec<u32> = stored.iter().map(|b| chrono::Datelike::day(&b.date)).collect();
        assert_eq!(days, vec![3, 4, 5, 6]);

        let summary = db.bar_summary().await.unwrap().unwrap();
        assert_eq!(summary.count, 9);
        assert_eq!(summary.first_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(summary.last_date, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());

        assert_eq!(db.replace_bars(&bars[..3]).await.unwrap(), (9, 3));
        let summary = db.bar_summary().await.unwrap().unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.first_date, NaiveDate::from_ymd_opt(2024, 1, 7).unwrap());
        assert_eq!(summary.last_date, NaiveDate::from_ymd_opt(2024, 1, 9).unwrap());
        db.close().await;
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_rows() {
        let (db, _dir) = open_temp().await;
        let bars: Vec<DerivedBar> = (1..=4).map(|d| bar(d, 1.1)).collect();
        db.insert_bars(&bars).await.unwrap();

        // SQLite stores NaN as NULL, which the NOT NULL column rejects
        let mut broken = bar(5, 1.2);
        broken.volatility = f64::NAN;
        assert!(db.replace_bars(&[bar(6, 1.3), broken]).await.is_err());

        let summary = db.bar_summary().await.unwrap().unwrap();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.last_date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        db.close().await;
    }

    #[tokio::test]
    async fn test_request_counter_increments_per_day() {
        let (db, _dir) = open_temp().await;
        let today = NaiveDate::from_ymd_opt(2025, 1, 19).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap();

        assert_eq!(db.request_count(today).await.unwrap(), 0);
        assert_eq!(db.log_request(today).await.unwrap(), 1);
        assert_eq!(db.log_request(today).await.unwrap(), 2);
        assert_eq!(db.log_request(tomorrow).await.unwrap(), 1);
        assert_eq!(db.request_count(today).await.unwrap(), 2);
        db.close().await;
    }

    #[tokio::test]
    async fn test_existing_columns_are_tolerated() {
        let (db, _dir) = open_temp().await;
        assert!(!db.add_column_if_missing(BARS_TABLE, "activity", "REAL").await.unwrap());
        assert!(db.add_column_if_missing(BARS_TABLE, "note", "TEXT").await.unwrap());
        assert!(db.add_column_if_missing("missing_table", "x", "REAL").await.is_err());
        db.close().await;
    }

    #[tokio::test]
    async fn test_training_run_round_trip() {
        let (db, _dir) = open_temp().await;
        assert!(db.last_training_run().await.unwrap().is_none());

        let run = TrainingRunRecord {
            run_id: Uuid::new_v4(),
            trained_at: DateTime::parse_from_rfc3339("2025-01-19T10:00:00+00:00")
                .unwrap()
                .with_timezone(&Utc),
            periods_trained: 7,
            periods_skipped: 1,
            n_trees: 450,
            mean_cv_accuracy: Some(0.52),
            artifact_path: "models/random_forest_final.json".to_string(),
        };
        db.record_training_run(&run).await.unwrap();
        assert_eq!(db.last_training_run().await.unwrap(), Some(run));
        db.close().await;
    }
}
