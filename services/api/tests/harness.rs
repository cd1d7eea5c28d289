//! In-memory allocation store for exercising the engine without Postgres.
//!
//! The store keeps a single world snapshot behind a mutex. A transaction
//! clones the snapshot, works on the clone, and swaps it back on commit, so
//! dropping an uncommitted transaction discards its writes just like a
//! rolled-back database transaction. Ordering rules (chain order, victim
//! order, promotion order) mirror the SQL in the Postgres store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use slotq_api::domain::{NewToken, Slot, Token, TokenKind, TokenPlacement, TokenStatus};
use slotq_api::store::{AllocationStore, StoreError, StoreTx};
use slotq_id::{OwnerId, SlotId, TokenId, Ulid};

#[derive(Debug, Clone, Default)]
struct WorldState {
    slots: BTreeMap<SlotId, Slot>,
    tokens: BTreeMap<TokenId, Token>,
}

/// Shared in-memory store handle.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<WorldState>>,
    seat_ops: Arc<AtomicUsize>,
}

/// A fixed instant so seeded arrival orders are reproducible. Engine-minted
/// tokens use the real clock and therefore always sort as the newest.
pub fn seeded_at(offset_minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap() + Duration::minutes(offset_minutes)
}

fn wall_clock(value: &str) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").expect("bad wall-clock literal in test")
}

/// Deterministic token IDs so identity tie-breaks are assertable.
pub fn nth_token_id(n: u128) -> TokenId {
    TokenId::from_ulid(Ulid::from(n))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of seatings performed (occupancy increments), across all
    /// transactions. Bounds cascade work in displacement tests.
    pub fn seat_ops(&self) -> usize {
        self.seat_ops.load(Ordering::SeqCst)
    }

    pub fn add_owner(&self) -> OwnerId {
        // Owners are implicit in this store; slots reference them directly.
        OwnerId::new()
    }

    pub fn add_slot(&self, owner_id: OwnerId, start: &str, end: &str, capacity: i32) -> SlotId {
        let slot_id = SlotId::new();
        let slot = Slot {
            slot_id,
            owner_id,
            start_time: wall_clock(start),
            end_time: wall_clock(end),
            capacity,
            used: 0,
            created_at: seeded_at(0),
        };
        self.state.lock().unwrap().slots.insert(slot_id, slot);
        slot_id
    }

    /// Seed a confirmed token into a slot, bumping the slot's usage.
    pub fn add_confirmed_token(
        &self,
        slot_id: SlotId,
        patient: &str,
        kind: TokenKind,
        seq: u128,
        created_offset_minutes: i64,
    ) -> TokenId {
        let mut state = self.state.lock().unwrap();
        let owner_id = state.slots[&slot_id].owner_id;
        let token_id = nth_token_id(seq);
        let created_at = seeded_at(created_offset_minutes);
        state.tokens.insert(
            token_id,
            Token {
                token_id,
                patient: patient.to_string(),
                owner_id,
                slot_id: Some(slot_id),
                kind,
                priority: kind.base_priority(),
                status: TokenStatus::Confirmed,
                created_at,
                updated_at: created_at,
            },
        );
        state
            .slots
            .get_mut(&slot_id)
            .expect("slot vanished while seeding")
            .used += 1;
        token_id
    }

    /// Seed a waitlisted token for an owner.
    pub fn add_waiting_token(
        &self,
        owner_id: OwnerId,
        patient: &str,
        kind: TokenKind,
        seq: u128,
        created_offset_minutes: i64,
    ) -> TokenId {
        let token_id = nth_token_id(seq);
        let created_at = seeded_at(created_offset_minutes);
        self.state.lock().unwrap().tokens.insert(
            token_id,
            Token {
                token_id,
                patient: patient.to_string(),
                owner_id,
                slot_id: None,
                kind,
                priority: kind.base_priority(),
                status: TokenStatus::Waiting,
                created_at,
                updated_at: created_at,
            },
        );
        token_id
    }

    pub fn token(&self, token_id: TokenId) -> Token {
        self.state.lock().unwrap().tokens[&token_id].clone()
    }

    pub fn slot(&self, slot_id: SlotId) -> Slot {
        self.state.lock().unwrap().slots[&slot_id].clone()
    }

    /// Current usage per slot.
    pub fn occupancy(&self) -> BTreeMap<SlotId, i32> {
        self.state
            .lock()
            .unwrap()
            .slots
            .iter()
            .map(|(id, slot)| (*id, slot.used))
            .collect()
    }

    /// Status and seat of every token, for whole-world assertions.
    pub fn token_states(&self) -> BTreeMap<TokenId, (TokenStatus, Option<SlotId>)> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .iter()
            .map(|(id, token)| (*id, (token.status, token.slot_id)))
            .collect()
    }

    /// Confirmed tokens currently seated in a slot.
    pub fn confirmed_in_slot(&self, slot_id: SlotId) -> Vec<TokenId> {
        self.state
            .lock()
            .unwrap()
            .tokens
            .values()
            .filter(|t| t.status == TokenStatus::Confirmed && t.slot_id == Some(slot_id))
            .map(|t| t.token_id)
            .collect()
    }

    /// Every slot within capacity, usage never negative, and usage equal to
    /// the count of confirmed tokens seated there.
    pub fn assert_consistent(&self) {
        let state = self.state.lock().unwrap();
        for slot in state.slots.values() {
            assert!(
                slot.used >= 0 && slot.used <= slot.capacity,
                "slot {} usage {} outside 0..={}",
                slot.slot_id,
                slot.used,
                slot.capacity
            );
            let seated = state
                .tokens
                .values()
                .filter(|t| t.status == TokenStatus::Confirmed && t.slot_id == Some(slot.slot_id))
                .count() as i32;
            assert_eq!(
                slot.used, seated,
                "slot {} usage {} disagrees with {} seated tokens",
                slot.slot_id, slot.used, seated
            );
        }
        for token in state.tokens.values() {
            match token.status {
                TokenStatus::Confirmed => {
                    assert!(token.slot_id.is_some(), "confirmed token without a seat")
                }
                TokenStatus::Waiting => {
                    assert!(token.slot_id.is_none(), "waiting token holding a seat")
                }
                TokenStatus::Cancelled => {}
            }
        }
    }
}

/// One transaction: a private copy of the world, swapped in on commit.
pub struct MemoryTx {
    working: WorldState,
    shared: Arc<Mutex<WorldState>>,
    seat_ops: Arc<AtomicUsize>,
}

#[async_trait]
impl AllocationStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx {
            working: self.state.lock().unwrap().clone(),
            shared: Arc::clone(&self.state),
            seat_ops: Arc::clone(&self.seat_ops),
        })
    }
}

fn chain_position(slot: &Slot) -> (NaiveTime, SlotId) {
    (slot.start_time, slot.slot_id)
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn slots_for_owner(&mut self, owner_id: OwnerId) -> Result<Vec<Slot>, StoreError> {
        let mut slots: Vec<Slot> = self
            .working
            .slots
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        slots.sort_by_key(chain_position);
        Ok(slots)
    }

    async fn slot(&mut self, slot_id: SlotId) -> Result<Option<Slot>, StoreError> {
        Ok(self.working.slots.get(&slot_id).cloned())
    }

    async fn next_slot_after(
        &mut self,
        owner_id: OwnerId,
        start_time: NaiveTime,
    ) -> Result<Option<Slot>, StoreError> {
        Ok(self
            .working
            .slots
            .values()
            .filter(|s| s.owner_id == owner_id && s.start_time > start_time)
            .min_by_key(|s| chain_position(s))
            .cloned())
    }

    async fn increment_usage(&mut self, slot_id: SlotId) -> Result<(), StoreError> {
        let slot = self
            .working
            .slots
            .get_mut(&slot_id)
            .ok_or_else(|| StoreError::Backend(format!("no slot {slot_id}")))?;
        slot.used += 1;
        self.seat_ops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn decrement_usage(&mut self, slot_id: SlotId) -> Result<(), StoreError> {
        let slot = self
            .working
            .slots
            .get_mut(&slot_id)
            .ok_or_else(|| StoreError::Backend(format!("no slot {slot_id}")))?;
        if slot.used > 0 {
            slot.used -= 1;
        }
        Ok(())
    }

    async fn lowest_priority_confirmed_in_slot(
        &mut self,
        slot_id: SlotId,
    ) -> Result<Option<Token>, StoreError> {
        let mut candidates: Vec<&Token> = self
            .working
            .tokens
            .values()
            .filter(|t| t.status == TokenStatus::Confirmed && t.slot_id == Some(slot_id))
            .collect();
        candidates.sort_by(|a, b| {
            a.priority
                .total_cmp(&b.priority)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.token_id.cmp(&a.token_id))
        });
        Ok(candidates.first().map(|t| (*t).clone()))
    }

    async fn waiting_tokens_for_owner(
        &mut self,
        owner_id: OwnerId,
    ) -> Result<Vec<Token>, StoreError> {
        let mut waiting: Vec<Token> = self
            .working
            .tokens
            .values()
            .filter(|t| t.status == TokenStatus::Waiting && t.owner_id == owner_id)
            .cloned()
            .collect();
        waiting.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.token_id.cmp(&b.token_id))
        });
        Ok(waiting)
    }

    async fn create_token(&mut self, token: &NewToken) -> Result<Token, StoreError> {
        let stored = Token {
            token_id: token.token_id,
            patient: token.patient.clone(),
            owner_id: token.owner_id,
            slot_id: token.slot_id,
            kind: token.kind,
            priority: token.priority,
            status: token.status,
            created_at: token.created_at,
            updated_at: token.created_at,
        };
        self.working.tokens.insert(stored.token_id, stored.clone());
        Ok(stored)
    }

    async fn token(&mut self, token_id: TokenId) -> Result<Option<Token>, StoreError> {
        Ok(self.working.tokens.get(&token_id).cloned())
    }

    async fn token_for_update(&mut self, token_id: TokenId) -> Result<Option<Token>, StoreError> {
        // Single-threaded harness; locking is a no-op.
        Ok(self.working.tokens.get(&token_id).cloned())
    }

    async fn update_token(
        &mut self,
        token_id: TokenId,
        placement: TokenPlacement,
        updated_at: DateTime<Utc>,
    ) -> Result<Token, StoreError> {
        let token = self
            .working
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| StoreError::Backend(format!("no token {token_id}")))?;
        token.slot_id = placement.slot_id;
        token.status = placement.status;
        token.updated_at = updated_at;
        Ok(token.clone())
    }

    async fn cancel_token(
        &mut self,
        token_id: TokenId,
        updated_at: DateTime<Utc>,
    ) -> Result<Token, StoreError> {
        let token = self
            .working
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| StoreError::Backend(format!("no token {token_id}")))?;
        token.status = TokenStatus::Cancelled;
        token.updated_at = updated_at;
        Ok(token.clone())
    }

    async fn commit(self) -> Result<(), StoreError> {
        *self.shared.lock().unwrap() = self.working;
        Ok(())
    }
}
