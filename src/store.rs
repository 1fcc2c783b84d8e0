use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::PostgresConfig;
use crate::models::{User, UserProfile};
use crate::scrapers::types::SearchParams;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    external_id BIGINT NOT NULL UNIQUE,
    username TEXT,
    first_name TEXT,
    last_name TEXT,
    language_code TEXT,
    is_premium BOOLEAN NOT NULL DEFAULT FALSE,
    search_params JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const SCHEMA_LOCK_ID: i64 = 4_812_207;

const USER_COLUMNS: &str = "id, external_id, username, first_name, last_name, language_code, \
     is_premium, search_params, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    external_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    language_code: Option<String>,
    is_premium: bool,
    search_params: Option<Json<SearchParams>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            external_id: row.external_id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            language_code: row.language_code,
            is_premium: row.is_premium,
            search_params: row.search_params.map(|params| params.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Caller identities keyed by their chat platform id.
///
/// The `UNIQUE` constraint on `external_id` plus `INSERT .. ON CONFLICT DO UPDATE`
/// keep concurrent sightings of the same caller to a single row.
#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.pool_max_conns)
            .min_connections(cfg.pool_min_conns)
            .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
            .connect(&cfg.dsn)
            .await?;

        info!("Connected to PostgreSQL");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `users` table if needed; safe to call from several processes at once.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        // Concurrent CREATE TABLE IF NOT EXISTS can still race on pg_type, so serialize
        // on a transaction-scoped advisory lock.
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query(SCHEMA).execute(&mut *tx).await?;

        tx.commit().await?;

        Ok(())
    }

    /// Insert the caller on first sight, refresh the profile on every later one.
    pub async fn upsert(
        &self,
        external_id: i64,
        profile: &UserProfile,
    ) -> Result<User, StoreError> {
        check_external_id(external_id)?;

        let sql = format!(
            "\
INSERT INTO users (external_id, username, first_name, last_name, language_code, is_premium)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (external_id) DO UPDATE SET
    username = EXCLUDED.username,
    first_name = EXCLUDED.first_name,
    last_name = EXCLUDED.last_name,
    language_code = EXCLUDED.language_code,
    is_premium = EXCLUDED.is_premium,
    updated_at = now()
RETURNING {USER_COLUMNS}"
        );
        let row: UserRow = sqlx::query_as(&sql)
            .bind(external_id)
            .bind(profile.username.as_deref())
            .bind(profile.first_name.as_deref())
            .bind(profile.last_name.as_deref())
            .bind(profile.language_code.as_deref())
            .bind(profile.is_premium)
            .fetch_one(&self.pool)
            .await?;

        debug!("Upserted user {} (row {})", external_id, row.id);

        Ok(row.into())
    }

    pub async fn get_by_external_id(&self, external_id: i64) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = $1");
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    /// Remember the caller's latest search; `None` if the caller was never upserted
    pub async fn save_search_params(
        &self,
        external_id: i64,
        params: &SearchParams,
    ) -> Result<Option<User>, StoreError> {
        check_external_id(external_id)?;

        let sql = format!(
            "\
UPDATE users
SET search_params = $2, updated_at = now()
WHERE external_id = $1
RETURNING {USER_COLUMNS}"
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(external_id)
            .bind(Json(params))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }
}

fn check_external_id(external_id: i64) -> Result<(), StoreError> {
    if external_id <= 0 {
        return Err(StoreError::InvalidArgument(format!(
            "external id must be positive, got {}",
            external_id
        )));
    }
    Ok(())
}
