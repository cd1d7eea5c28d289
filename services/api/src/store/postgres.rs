//! Postgres-backed allocation store.
//!
//! One transaction per engine operation. `slots_for_owner` takes `FOR UPDATE`
//! row locks over the owner's whole chain in chain order, which serializes
//! concurrent engine operations on the same owner; lock acquisition order is
//! always slots before tokens, so there is no lock cycle to deadlock on.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use slotq_id::{OwnerId, SlotId, TokenId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::str::FromStr;

use crate::domain::{NewToken, Owner, Slot, Token, TokenPlacement};

use super::{AllocationStore, StoreError, StoreTx};

const SLOT_COLUMNS: &str = "slot_id, owner_id, start_time, end_time, capacity, used, created_at";
const TOKEN_COLUMNS: &str =
    "token_id, patient, owner_id, slot_id, kind, priority, status, created_at, updated_at";

/// Postgres store handle, cheap to clone.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AllocationStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let tx = self.pool.begin().await.map_err(StoreError::Query)?;
        Ok(PgTx { tx })
    }
}

/// A single Postgres transaction. Dropping it without commit rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn slots_for_owner(&mut self, owner_id: OwnerId) -> Result<Vec<Slot>, StoreError> {
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM slots WHERE owner_id = $1 \
             ORDER BY start_time, slot_id FOR UPDATE"
        );
        sqlx::query_as::<_, Slot>(&sql)
            .bind(owner_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn slot(&mut self, slot_id: SlotId) -> Result<Option<Slot>, StoreError> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM slots WHERE slot_id = $1");
        sqlx::query_as::<_, Slot>(&sql)
            .bind(slot_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn next_slot_after(
        &mut self,
        owner_id: OwnerId,
        start_time: NaiveTime,
    ) -> Result<Option<Slot>, StoreError> {
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM slots \
             WHERE owner_id = $1 AND start_time > $2 \
             ORDER BY start_time, slot_id LIMIT 1"
        );
        sqlx::query_as::<_, Slot>(&sql)
            .bind(owner_id.to_string())
            .bind(start_time)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn increment_usage(&mut self, slot_id: SlotId) -> Result<(), StoreError> {
        sqlx::query("UPDATE slots SET used = used + 1 WHERE slot_id = $1")
            .bind(slot_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }

    async fn decrement_usage(&mut self, slot_id: SlotId) -> Result<(), StoreError> {
        sqlx::query("UPDATE slots SET used = used - 1 WHERE slot_id = $1 AND used > 0")
            .bind(slot_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }

    async fn lowest_priority_confirmed_in_slot(
        &mut self,
        slot_id: SlotId,
    ) -> Result<Option<Token>, StoreError> {
        // Eviction order: worst score first; among equals the latest arrival
        // goes, and the token ID breaks exact ties deterministically.
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens \
             WHERE slot_id = $1 AND status = 'CONFIRMED' \
             ORDER BY priority ASC, created_at DESC, token_id DESC LIMIT 1"
        );
        sqlx::query_as::<_, Token>(&sql)
            .bind(slot_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn waiting_tokens_for_owner(
        &mut self,
        owner_id: OwnerId,
    ) -> Result<Vec<Token>, StoreError> {
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens \
             WHERE owner_id = $1 AND status = 'WAITING' \
             ORDER BY priority DESC, created_at ASC, token_id ASC"
        );
        sqlx::query_as::<_, Token>(&sql)
            .bind(owner_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn create_token(&mut self, token: &NewToken) -> Result<Token, StoreError> {
        let sql = format!(
            "INSERT INTO tokens \
             (token_id, patient, owner_id, slot_id, kind, priority, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
             RETURNING {TOKEN_COLUMNS}"
        );
        sqlx::query_as::<_, Token>(&sql)
            .bind(token.token_id.to_string())
            .bind(&token.patient)
            .bind(token.owner_id.to_string())
            .bind(token.slot_id.map(|id| id.to_string()))
            .bind(token.kind.as_str())
            .bind(token.priority)
            .bind(token.status.as_str())
            .bind(token.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn token(&mut self, token_id: TokenId) -> Result<Option<Token>, StoreError> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_id = $1");
        sqlx::query_as::<_, Token>(&sql)
            .bind(token_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn token_for_update(&mut self, token_id: TokenId) -> Result<Option<Token>, StoreError> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_id = $1 FOR UPDATE");
        sqlx::query_as::<_, Token>(&sql)
            .bind(token_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn update_token(
        &mut self,
        token_id: TokenId,
        placement: TokenPlacement,
        updated_at: DateTime<Utc>,
    ) -> Result<Token, StoreError> {
        let sql = format!(
            "UPDATE tokens SET slot_id = $2, status = $3, updated_at = $4 \
             WHERE token_id = $1 RETURNING {TOKEN_COLUMNS}"
        );
        sqlx::query_as::<_, Token>(&sql)
            .bind(token_id.to_string())
            .bind(placement.slot_id.map(|id| id.to_string()))
            .bind(placement.status.as_str())
            .bind(updated_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn cancel_token(
        &mut self,
        token_id: TokenId,
        updated_at: DateTime<Utc>,
    ) -> Result<Token, StoreError> {
        // slot_id is deliberately left in place as the historical seat.
        let sql = format!(
            "UPDATE tokens SET status = 'CANCELLED', updated_at = $2 \
             WHERE token_id = $1 RETURNING {TOKEN_COLUMNS}"
        );
        sqlx::query_as::<_, Token>(&sql)
            .bind(token_id.to_string())
            .bind(updated_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::Query)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::Query)
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Parse a TEXT column into a typed value, reporting decode failures through
/// sqlx's own error channel.
fn parse_col<T>(column: &'static str, raw: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse().map_err(|e: T::Err| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> sqlx::FromRow<'r, PgRow> for Owner {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let owner_id: String = row.try_get("owner_id")?;
        Ok(Self {
            owner_id: parse_col("owner_id", &owner_id)?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Slot {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let slot_id: String = row.try_get("slot_id")?;
        let owner_id: String = row.try_get("owner_id")?;
        Ok(Self {
            slot_id: parse_col("slot_id", &slot_id)?,
            owner_id: parse_col("owner_id", &owner_id)?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            capacity: row.try_get("capacity")?,
            used: row.try_get("used")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Token {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let token_id: String = row.try_get("token_id")?;
        let owner_id: String = row.try_get("owner_id")?;
        let slot_id: Option<String> = row.try_get("slot_id")?;
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            token_id: parse_col("token_id", &token_id)?,
            patient: row.try_get("patient")?,
            owner_id: parse_col("owner_id", &owner_id)?,
            slot_id: slot_id
                .as_deref()
                .map(|raw| parse_col("slot_id", raw))
                .transpose()?,
            kind: parse_col("kind", &kind)?,
            priority: row.try_get("priority")?,
            status: parse_col("status", &status)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
