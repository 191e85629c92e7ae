//! Database initialization
//!
//! Opens (or creates) the SQLite file holding study records and brings the
//! schema up idempotently on every start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // applied to every pooled connection, not just the first
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL lets intake reads proceed while a study result is written
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_study_tables(&pool).await?;

    Ok(pool)
}

/// Create patients, studies and study_results tables (idempotent)
pub async fn create_study_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patients (
            mrn TEXT PRIMARY KEY,
            name TEXT,
            sex TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS studies (
            accession_number TEXT PRIMARY KEY,
            mrn TEXT REFERENCES patients(mrn),
            description TEXT,
            patient_age TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS study_results (
            study_key TEXT PRIMARY KEY,
            accession_number TEXT,
            severity INTEGER NOT NULL,
            result_path TEXT NOT NULL,
            overlay_path TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database tables initialized (patients, studies, study_results)");
    Ok(())
}
