//! Study record upserts
//!
//! Three tables, each keyed by a natural key: `patients` (MRN), `studies`
//! (accession number) and `study_results` (study key). Repeating a persist
//! with identical data leaves the tables unchanged.

use crate::error::StudyError;
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mls_common::{StudyKey, StudyMetadata};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

/// How long a write keeps retrying while SQLite reports a lock
const MAX_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Everything persisted for one processed study
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyRecord {
    pub study_key: StudyKey,
    pub metadata: StudyMetadata,
    pub severity: u8,
    pub result_path: String,
    pub overlay_path: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Structured record store consumed by the study pipeline
#[async_trait]
pub trait StudyStore: Send + Sync {
    /// Insert or update the record for `record.study_key`
    async fn persist(&self, record: &StudyRecord) -> Result<(), StudyError>;
}

/// SQLite-backed [`StudyStore`]
#[derive(Debug, Clone)]
pub struct SqliteStudyStore {
    db: SqlitePool,
}

impl SqliteStudyStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    async fn upsert(&self, record: &StudyRecord) -> Result<(), sqlx::Error> {
        let metadata = &record.metadata;
        let mut tx = self.db.begin().await?;

        if let Some(mrn) = metadata.patient_id() {
            sqlx::query(
                r#"
                INSERT INTO patients (mrn, name, sex) VALUES (?, ?, ?)
                ON CONFLICT(mrn) DO UPDATE SET
                    name = COALESCE(excluded.name, patients.name),
                    sex = COALESCE(excluded.sex, patients.sex)
                "#,
            )
            .bind(mrn)
            .bind(metadata.patient_name())
            .bind(metadata.patient_sex())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(accession) = metadata.accession_number() {
            sqlx::query(
                r#"
                INSERT INTO studies (accession_number, mrn, description, patient_age)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(accession_number) DO UPDATE SET
                    mrn = COALESCE(excluded.mrn, studies.mrn),
                    description = COALESCE(excluded.description, studies.description),
                    patient_age = COALESCE(excluded.patient_age, studies.patient_age)
                "#,
            )
            .bind(accession)
            .bind(metadata.patient_id())
            .bind(metadata.study_description())
            .bind(metadata.patient_age())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO study_results
                (study_key, accession_number, severity, result_path, overlay_path, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(study_key) DO UPDATE SET
                accession_number = excluded.accession_number,
                severity = excluded.severity,
                result_path = excluded.result_path,
                overlay_path = excluded.overlay_path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.study_key.as_str())
        .bind(metadata.accession_number())
        .bind(record.severity as i64)
        .bind(&record.result_path)
        .bind(record.overlay_path.as_deref())
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }
}

#[async_trait]
impl StudyStore for SqliteStudyStore {
    async fn persist(&self, record: &StudyRecord) -> Result<(), StudyError> {
        retry_on_lock("persist study record", MAX_LOCK_WAIT, || self.upsert(record))
            .await
            .map_err(|e| StudyError::Persistence(e.to_string()))?;

        info!(
            study_key = %record.study_key,
            severity = record.severity,
            "Study record persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteStudyStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        mls_common::db::create_study_tables(&pool).await.unwrap();
        SqliteStudyStore::new(pool)
    }

    fn record(key: &str, severity: u8) -> StudyRecord {
        StudyRecord {
            study_key: StudyKey::new(key),
            metadata: StudyMetadata {
                patient_id: Some("MRN1".to_string()),
                patient_name: Some("DOE^JANE".to_string()),
                patient_sex: Some("F".to_string()),
                accession_number: Some("ACC1".to_string()),
                study_description: Some("CHEST PA".to_string()),
                ..Default::default()
            },
            severity,
            result_path: format!("/data/{}_{}.png", key, severity),
            overlay_path: None,
            updated_at: Utc::now(),
        }
    }

    async fn count(store: &SqliteStudyStore, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn persist_writes_all_three_tables() {
        let store = store().await;
        store.persist(&record("pMRN1_ACC1_1", 2)).await.unwrap();

        assert_eq!(count(&store, "patients").await, 1);
        assert_eq!(count(&store, "studies").await, 1);
        assert_eq!(count(&store, "study_results").await, 1);
    }

    #[tokio::test]
    async fn repeated_persist_is_idempotent() {
        let store = store().await;
        let record = record("pMRN1_ACC1_1", 2);

        store.persist(&record).await.unwrap();
        store.persist(&record).await.unwrap();

        assert_eq!(count(&store, "patients").await, 1);
        assert_eq!(count(&store, "studies").await, 1);
        assert_eq!(count(&store, "study_results").await, 1);
    }

    #[tokio::test]
    async fn upsert_updates_existing_result() {
        let store = store().await;
        store.persist(&record("k_1", 1)).await.unwrap();
        store.persist(&record("k_1", 3)).await.unwrap();

        let severity: i64 = sqlx::query_scalar("SELECT severity FROM study_results WHERE study_key = 'k_1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(severity, 3);
    }

    #[tokio::test]
    async fn anonymous_study_only_writes_result() {
        let store = store().await;
        let mut anonymous = record("unknown_1", 0);
        anonymous.metadata = StudyMetadata::default();

        store.persist(&anonymous).await.unwrap();

        assert_eq!(count(&store, "patients").await, 0);
        assert_eq!(count(&store, "studies").await, 0);
        assert_eq!(count(&store, "study_results").await, 1);
    }

    #[tokio::test]
    async fn missing_schema_is_a_persistence_error() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStudyStore::new(pool);

        let result = store.persist(&record("k_1", 1)).await;
        assert!(matches!(result, Err(StudyError::Persistence(_))));
    }
}
