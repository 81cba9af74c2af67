//! PostgreSQL token store
//!
//! Uses runtime `sqlx::query_as` because the table name is configurable.
//! The nonce advance is a single conditional `UPDATE ... RETURNING` run inside
//! a transaction that the returned lease owns: committing the lease makes the
//! advance durable, dropping it rolls it back. While a lease is open the row
//! stays locked, so concurrent requests on the same key queue behind it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{generate_key_pair, AdvanceOutcome, LeaseHandle, NonceLease, TokenStore, MAX_KEY_ATTEMPTS};
use crate::error::StoreError;
use crate::types::{IssuedToken, Principal, TokenRecord, INITIAL_NONCE};

/// Longest identifier PostgreSQL keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

/// Row type for token lookup (token joined with its owner)
#[derive(sqlx::FromRow)]
struct TokenRow {
    public_key: String,
    secret_key: String,
    last_nonce: i32,
    expires_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    owner_id: Uuid,
    owner_username: Option<String>,
    owner_is_active: bool,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        let owner = Principal {
            id: row.owner_id,
            username: row.owner_username,
            is_active: row.owner_is_active,
        };
        let mut record = TokenRecord::new(row.public_key, row.secret_key, owner);
        record.last_nonce = row.last_nonce;
        record.expires_at = row.expires_at;
        record.revoked_at = row.revoked_at;
        record.created_at = row.created_at;
        record
    }
}

/// Check that a configured table name is a plain lowercase identifier
pub(crate) fn validate_model(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(StoreError::InvalidModel(name.to_string()))
    }
}

/// Token store backed by a PostgreSQL table joined with `users`
#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
    table: String,
}

impl PgTokenStore {
    /// `model` names the token table; it is interpolated into SQL and so
    /// must pass identifier validation.
    pub fn new(pool: PgPool, model: &str) -> Result<Self, StoreError> {
        validate_model(model)?;
        Ok(Self {
            pool,
            table: model.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn lookup_token(&self, public_key: &str) -> Result<Option<TokenRecord>, StoreError> {
        let row: Option<TokenRow> = sqlx::query_as(&format!(
            r#"
            SELECT t.public_key, t.secret_key, t.last_nonce,
                   t.expires_at, t.revoked_at, t.created_at,
                   u.id AS owner_id, u.username AS owner_username,
                   u.is_active AS owner_is_active
            FROM {} t
            INNER JOIN users u ON u.id = t.user_id
            WHERE t.public_key = $1
            "#,
            self.table
        ))
        .bind(public_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TokenRecord::from))
    }

    async fn atomic_advance_nonce(
        &self,
        public_key: &str,
        nonce: i32,
    ) -> Result<AdvanceOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let advanced: Option<i32> = sqlx::query_scalar(&format!(
            r#"
            UPDATE {} AS t
            SET last_nonce = $2, last_used_at = NOW()
            FROM users u
            WHERE t.public_key = $1
              AND u.id = t.user_id
              AND u.is_active
              AND t.revoked_at IS NULL
              AND (t.expires_at IS NULL OR t.expires_at > NOW())
              AND t.last_nonce < $2
            RETURNING t.last_nonce
            "#,
            self.table
        ))
        .bind(public_key)
        .bind(nonce)
        .fetch_optional(&mut *tx)
        .await?;

        if advanced.is_some() {
            let handle = PgLease { tx };
            return Ok(AdvanceOutcome::Advanced(NonceLease::new(public_key, nonce, handle)));
        }

        // Nothing changed; tell a stale nonce apart from an unusable token
        let usable: Option<bool> = sqlx::query_scalar(&format!(
            r#"
            SELECT (t.revoked_at IS NULL
                    AND (t.expires_at IS NULL OR t.expires_at > NOW())
                    AND u.is_active)
            FROM {} t
            INNER JOIN users u ON u.id = t.user_id
            WHERE t.public_key = $1
            "#,
            self.table
        ))
        .bind(public_key)
        .fetch_optional(&mut *tx)
        .await?;

        tx.rollback().await?;

        Ok(match usable {
            Some(true) => AdvanceOutcome::Stale,
            _ => AdvanceOutcome::Inactive,
        })
    }

    async fn issue(
        &self,
        owner_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError> {
        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let (public_key, secret_key) = generate_key_pair()?;

            let inserted = sqlx::query_scalar::<_, DateTime<Utc>>(&format!(
                r#"
                INSERT INTO {} (id, user_id, public_key, secret_key, last_nonce, expires_at, created_at)
                SELECT $1, u.id, $3, $4, $5, $6, NOW()
                FROM users u
                WHERE u.id = $2 AND u.is_active
                RETURNING created_at
                "#,
                self.table
            ))
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(&public_key)
            .bind(&secret_key)
            .bind(INITIAL_NONCE)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await;

            match inserted {
                Ok(Some(_)) => {
                    return Ok(IssuedToken {
                        public_key,
                        secret_key,
                        expires_at,
                    })
                }
                Ok(None) => return Err(StoreError::InactiveOwner(owner_id)),
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    tracing::warn!(attempt, owner_id = %owner_id, "Generated key collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::KeyCollision(MAX_KEY_ATTEMPTS))
    }

    async fn revoke(&self, public_key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET revoked_at = NOW() WHERE public_key = $1 AND revoked_at IS NULL",
            self.table
        ))
        .bind(public_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Open transaction holding the advanced row; dropped transactions roll back
struct PgLease {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LeaseHandle for PgLease {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgLease { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
