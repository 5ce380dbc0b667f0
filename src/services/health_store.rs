use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::nutrition::NewNutritionEntry;

/// System of record for nutrition entries.
#[async_trait]
pub trait HealthDataStore: Send + Sync {
    /// Insert an entry and return its record id. Inserting the same
    /// `client_key` twice returns the original record.
    async fn insert(&self, entry: &NewNutritionEntry) -> Result<Uuid, HealthStoreError>;

    /// Record id of the entry written under `client_key`, if one exists.
    async fn find(&self, client_key: Uuid) -> Result<Option<Uuid>, HealthStoreError>;
}

/// PostgreSQL-backed health data store.
pub struct PgHealthStore {
    pool: PgPool,
}

impl PgHealthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthDataStore for PgHealthStore {
    async fn insert(&self, entry: &NewNutritionEntry) -> Result<Uuid, HealthStoreError> {
        queries::insert_nutrition_entry(&self.pool, entry)
            .await
            .map_err(HealthStoreError::from)
    }

    async fn find(&self, client_key: Uuid) -> Result<Option<Uuid>, HealthStoreError> {
        queries::find_nutrition_entry(&self.pool, client_key)
            .await
            .map_err(HealthStoreError::from)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HealthStoreError {
    /// Write access to the store has been revoked.
    #[error("Health data store permission denied: {0}")]
    PermissionDenied(String),

    #[error("Health data store rejected the entry: {0}")]
    Validation(String),

    #[error("Health data store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for HealthStoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => from_sqlstate(db.code().as_deref(), db.message()),
            _ => HealthStoreError::Unavailable(e.to_string()),
        }
    }
}

/// Map a PostgreSQL SQLSTATE onto the store's failure taxonomy.
fn from_sqlstate(code: Option<&str>, message: &str) -> HealthStoreError {
    match code {
        // insufficient_privilege
        Some("42501") => HealthStoreError::PermissionDenied(message.to_string()),
        // data_exception and integrity_constraint_violation classes
        Some(c) if c.starts_with("22") || c.starts_with("23") => {
            HealthStoreError::Validation(message.to_string())
        }
        _ => HealthStoreError::Unavailable(message.to_string()),
    }
}
