//! Transactional store abstraction for the allocation engine.
//!
//! The engine never touches SQL directly; it drives a [`StoreTx`] obtained
//! from an [`AllocationStore`]. Production uses the Postgres implementation
//! in [`postgres`]; tests drive the engine against an in-memory store with
//! the same contract.
//!
//! Transaction semantics: every read inside a `StoreTx` observes writes made
//! earlier in the same transaction, `commit` publishes them atomically, and
//! dropping a `StoreTx` without committing rolls everything back.

pub mod postgres;

pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use slotq_id::{OwnerId, SlotId, TokenId};
use thiserror::Error;

use crate::domain::{NewToken, Slot, Token, TokenPlacement};

/// Storage-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A query failed at the database.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Non-SQL backend failure (used by alternative store implementations).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Hands out transactions over the allocation tables.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    type Tx: StoreTx;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One transaction over owners, slots and tokens.
///
/// Callers must take the owner's slot chain (`slots_for_owner`) before any
/// token row locks; that ordering is what keeps concurrent engine operations
/// on the same owner serialized without deadlocking.
#[async_trait]
pub trait StoreTx: Send {
    /// All slots for an owner in chain order (start time, then slot ID),
    /// row-locked until the transaction ends.
    async fn slots_for_owner(&mut self, owner_id: OwnerId) -> Result<Vec<Slot>, StoreError>;

    /// Re-read a single slot, seeing this transaction's own counter updates.
    async fn slot(&mut self, slot_id: SlotId) -> Result<Option<Slot>, StoreError>;

    /// The slot after `start_time` in the owner's chain, if any.
    async fn next_slot_after(
        &mut self,
        owner_id: OwnerId,
        start_time: NaiveTime,
    ) -> Result<Option<Slot>, StoreError>;

    /// Bump a slot's occupancy counter by one.
    async fn increment_usage(&mut self, slot_id: SlotId) -> Result<(), StoreError>;

    /// Drop a slot's occupancy counter by one, flooring at zero.
    async fn decrement_usage(&mut self, slot_id: SlotId) -> Result<(), StoreError>;

    /// The confirmed token in `slot_id` that a displacement would evict:
    /// lowest priority first, then latest created, then highest token ID.
    async fn lowest_priority_confirmed_in_slot(
        &mut self,
        slot_id: SlotId,
    ) -> Result<Option<Token>, StoreError>;

    /// All WAITING tokens for an owner in promotion order: highest priority
    /// first, then earliest created, then lowest token ID.
    async fn waiting_tokens_for_owner(&mut self, owner_id: OwnerId)
        -> Result<Vec<Token>, StoreError>;

    /// Insert a token and return the stored row.
    async fn create_token(&mut self, token: &NewToken) -> Result<Token, StoreError>;

    /// Read a token without locking it.
    async fn token(&mut self, token_id: TokenId) -> Result<Option<Token>, StoreError>;

    /// Read a token with a row lock held until the transaction ends.
    async fn token_for_update(&mut self, token_id: TokenId) -> Result<Option<Token>, StoreError>;

    /// Move a token: seat it in a slot or push it back to the waitlist.
    async fn update_token(
        &mut self,
        token_id: TokenId,
        placement: TokenPlacement,
        updated_at: DateTime<Utc>,
    ) -> Result<Token, StoreError>;

    /// Flip a token to CANCELLED, leaving `slot_id` as a historical record.
    async fn cancel_token(
        &mut self,
        token_id: TokenId,
        updated_at: DateTime<Utc>,
    ) -> Result<Token, StoreError>;

    /// Publish the transaction's writes.
    async fn commit(self) -> Result<(), StoreError>;
}
