//! The allocation engine.
//!
//! Three operations, each a single store transaction:
//!
//! - [`Engine::book`] seats a non-emergency token in the first open slot of
//!   the owner's chain, or waitlists it when the chain is full.
//! - [`Engine::insert_emergency`] forces a token into the chain's first slot
//!   and resolves the resulting overflow by cascading displaced tokens down
//!   the chain, one slot at a time.
//! - [`Engine::cancel`] releases a seat and promotes the best waiting token
//!   into it.
//!
//! Every operation starts by taking the owner's slot chain through
//! [`StoreTx::slots_for_owner`], whose row locks serialize concurrent
//! operations per owner. Slot locks are always taken before token locks.

use chrono::{DateTime, Utc};
use slotq_id::{OwnerId, SlotId, TokenId};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domain::{compute_priority, NewToken, Token, TokenKind, TokenPlacement, TokenStatus};
use crate::store::{AllocationStore, StoreError, StoreTx};

/// Engine operation failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// EMERGENCY tokens bypass booking entirely.
    #[error("{0} tokens cannot be booked; use the emergency insert")]
    KindNotBookable(TokenKind),

    /// The owner has no slot chain to allocate into.
    #[error("owner {0} has no slots")]
    NoSlotsForOwner(OwnerId),

    /// No token with this ID.
    #[error("token not found: {0}")]
    TokenNotFound(TokenId),

    /// Cancellation is terminal; a second cancel is a conflict.
    #[error("token {0} is already cancelled")]
    AlreadyCancelled(TokenId),

    /// A state the locking protocol is supposed to make impossible.
    #[error("allocation invariant violated: {0}")]
    Invariant(String),

    /// The store failed underneath us.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Priority-based slot allocator over an abstract transactional store.
pub struct Engine<S> {
    store: S,
}

impl<S: AllocationStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Book a token of any non-emergency kind.
    ///
    /// The token's priority is scored once, here, and never rescored. With
    /// the chain locked, the first slot with spare capacity seats the token
    /// as CONFIRMED; a full chain leaves it WAITING with no slot.
    #[instrument(skip(self, patient), fields(owner_id = %owner_id, kind = %kind))]
    pub async fn book(
        &self,
        owner_id: OwnerId,
        patient: &str,
        kind: TokenKind,
    ) -> Result<Token, EngineError> {
        if kind == TokenKind::Emergency {
            return Err(EngineError::KindNotBookable(kind));
        }

        let mut tx = self.store.begin().await?;
        let slots = tx.slots_for_owner(owner_id).await?;
        if slots.is_empty() {
            return Err(EngineError::NoSlotsForOwner(owner_id));
        }

        let now = Utc::now();
        let placement = match slots.iter().find(|slot| slot.has_space()) {
            Some(slot) => TokenPlacement::seated(slot.slot_id),
            None => TokenPlacement::unseated(),
        };

        let token = tx
            .create_token(&NewToken {
                token_id: TokenId::new(),
                patient: patient.to_string(),
                owner_id,
                slot_id: placement.slot_id,
                kind,
                priority: compute_priority(kind, now, now),
                status: placement.status,
                created_at: now,
            })
            .await?;
        if let Some(slot_id) = placement.slot_id {
            tx.increment_usage(slot_id).await?;
        }

        tx.commit().await?;
        info!(token_id = %token.token_id, status = %token.status, "Booked token");
        Ok(token)
    }

    /// Insert an EMERGENCY token into the front of the owner's chain.
    ///
    /// The token always targets the first slot. If that slot was full,
    /// seating it pushes the slot over capacity and the lowest-ranked
    /// confirmed token there is displaced into the next slot, which may
    /// overflow in turn; the cascade walks down the chain until a slot
    /// absorbs the displaced token or the chain runs out, in which case the
    /// last displaced token stays WAITING.
    #[instrument(skip(self, patient), fields(owner_id = %owner_id))]
    pub async fn insert_emergency(
        &self,
        owner_id: OwnerId,
        patient: &str,
    ) -> Result<Token, EngineError> {
        let mut tx = self.store.begin().await?;
        let slots = tx.slots_for_owner(owner_id).await?;
        let Some(first) = slots.first() else {
            return Err(EngineError::NoSlotsForOwner(owner_id));
        };

        let now = Utc::now();
        let token_id = TokenId::new();
        tx.create_token(&NewToken {
            token_id,
            patient: patient.to_string(),
            owner_id,
            slot_id: None,
            kind: TokenKind::Emergency,
            priority: compute_priority(TokenKind::Emergency, now, now),
            status: TokenStatus::Waiting,
            created_at: now,
        })
        .await?;

        self.cascade(&mut tx, first.slot_id, token_id).await?;

        // The cascade can land the new token anywhere in the chain, or leave
        // it waiting if it lost a tie-break; report where it ended up.
        let token = tx
            .token(token_id)
            .await?
            .ok_or_else(|| EngineError::Invariant(format!("token {token_id} vanished mid-transaction")))?;

        tx.commit().await?;
        info!(
            token_id = %token.token_id,
            status = %token.status,
            "Inserted emergency token"
        );
        Ok(token)
    }

    /// Cancel a token.
    ///
    /// Cancelling a confirmed token frees its seat and promotes the
    /// best-ranked waiting token into it. Cancelling a waiting token just
    /// removes it from the waitlist. The token keeps its last `slot_id` as a
    /// historical record either way.
    #[instrument(skip(self), fields(token_id = %token_id))]
    pub async fn cancel(&self, token_id: TokenId) -> Result<Token, EngineError> {
        let mut tx = self.store.begin().await?;

        // Peek unlocked to learn the owner, then take locks in the canonical
        // order (slot chain first, token second) and re-read under lock.
        let peek = tx
            .token(token_id)
            .await?
            .ok_or(EngineError::TokenNotFound(token_id))?;
        tx.slots_for_owner(peek.owner_id).await?;

        let token = tx
            .token_for_update(token_id)
            .await?
            .ok_or(EngineError::TokenNotFound(token_id))?;
        if token.status == TokenStatus::Cancelled {
            return Err(EngineError::AlreadyCancelled(token_id));
        }

        let now = Utc::now();
        if token.status == TokenStatus::Confirmed {
            let slot_id = token
                .slot_id
                .ok_or_else(|| EngineError::Invariant(format!("confirmed token {token_id} has no slot")))?;
            tx.decrement_usage(slot_id).await?;
            self.promote_into(&mut tx, token.owner_id, slot_id, now).await?;
        }

        let cancelled = tx.cancel_token(token_id, now).await?;
        tx.commit().await?;
        info!(kind = %cancelled.kind, "Cancelled token");
        Ok(cancelled)
    }

    /// Seat `incoming` in `slot_id` and push overflow down the chain.
    ///
    /// Each round seats one token, then checks occupancy. An over-capacity
    /// slot evicts its lowest-ranked confirmed token, which includes the one
    /// just seated, so an emergency that loses the tie-break moves itself
    /// along. One token moves per round and every round targets a strictly
    /// later slot, so the walk does at most one pass over the chain.
    async fn cascade(
        &self,
        tx: &mut S::Tx,
        slot_id: SlotId,
        incoming: TokenId,
    ) -> Result<(), EngineError> {
        let mut slot_id = slot_id;
        let mut moving = incoming;

        loop {
            let now = Utc::now();
            debug!(token_id = %moving, slot_id = %slot_id, "Seating token");
            tx.update_token(moving, TokenPlacement::seated(slot_id), now)
                .await?;
            tx.increment_usage(slot_id).await?;

            let slot = tx
                .slot(slot_id)
                .await?
                .ok_or_else(|| EngineError::Invariant(format!("slot {slot_id} vanished mid-transaction")))?;
            if slot.used <= slot.capacity {
                return Ok(());
            }

            let victim = tx.lowest_priority_confirmed_in_slot(slot_id).await?.ok_or_else(|| {
                EngineError::Invariant(format!("slot {slot_id} over capacity with no confirmed tokens"))
            })?;
            debug!(
                token_id = %victim.token_id,
                slot_id = %slot_id,
                priority = victim.priority,
                "Evicting lowest-ranked occupant"
            );
            tx.update_token(victim.token_id, TokenPlacement::unseated(), now)
                .await?;
            tx.decrement_usage(slot_id).await?;

            match tx.next_slot_after(slot.owner_id, slot.start_time).await? {
                Some(next) => {
                    moving = victim.token_id;
                    slot_id = next.slot_id;
                }
                None => {
                    warn!(
                        token_id = %victim.token_id,
                        "Displaced token ran off the end of the chain; leaving it waiting"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Promote the best waiting token into a freed seat, if anyone is waiting.
    async fn promote_into(
        &self,
        tx: &mut S::Tx,
        owner_id: OwnerId,
        slot_id: SlotId,
        now: DateTime<Utc>,
    ) -> Result<Option<Token>, EngineError> {
        let waiting = tx.waiting_tokens_for_owner(owner_id).await?;
        let Some(next) = waiting.first() else {
            return Ok(None);
        };

        let promoted = tx
            .update_token(next.token_id, TokenPlacement::seated(slot_id), now)
            .await?;
        tx.increment_usage(slot_id).await?;
        info!(
            promoted = %promoted.token_id,
            slot_id = %slot_id,
            "Promoted waiting token into freed seat"
        );
        Ok(Some(promoted))
    }
}
