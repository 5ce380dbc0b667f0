use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::nutrition::NewNutritionEntry;

/// Insert a nutrition entry, returning its id.
///
/// Re-inserting an entry with the same `client_key` (a retried attempt whose
/// previous insert already landed) returns the existing row's id.
pub async fn insert_nutrition_entry(
    pool: &PgPool,
    entry: &NewNutritionEntry,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO nutrition_entries (client_key, calories, description, recorded_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (client_key) DO UPDATE SET client_key = EXCLUDED.client_key
        RETURNING id
        "#,
    )
    .bind(entry.client_key)
    .bind(entry.calories)
    .bind(&entry.description)
    .bind(entry.recorded_at)
    .fetch_one(pool)
    .await?;

    row.try_get("id")
}

/// Id of the entry stored under `client_key`, if any.
pub async fn find_nutrition_entry(
    pool: &PgPool,
    client_key: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    let row = sqlx::query("SELECT id FROM nutrition_entries WHERE client_key = $1")
        .bind(client_key)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.try_get("id")).transpose()
}
