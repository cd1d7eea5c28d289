//! Engine behavior tests over the in-memory store.
//!
//! Everything here drives the real [`Engine`] through the [`harness`] store:
//! booking order, emergency displacement, cancellation promotion, and the
//! occupancy invariants that must hold after every committed operation.

mod harness;

use harness::MemoryStore;
use slotq_api::domain::{TokenKind, TokenStatus};
use slotq_api::engine::{Engine, EngineError};

// =============================================================================
// Booking
// =============================================================================

#[tokio::test]
async fn book_seats_first_open_slot_in_chain_order() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot1 = store.add_slot(owner, "09:00", "10:00", 1);
    let slot2 = store.add_slot(owner, "10:00", "11:00", 1);
    let engine = Engine::new(store.clone());

    let first = engine.book(owner, "Ama", TokenKind::Walkin).await.unwrap();
    let second = engine.book(owner, "Kofi", TokenKind::Walkin).await.unwrap();
    let third = engine.book(owner, "Esi", TokenKind::Walkin).await.unwrap();

    assert_eq!(first.status, TokenStatus::Confirmed);
    assert_eq!(first.slot_id, Some(slot1));
    assert_eq!(second.status, TokenStatus::Confirmed);
    assert_eq!(second.slot_id, Some(slot2));
    assert_eq!(third.status, TokenStatus::Waiting);
    assert_eq!(third.slot_id, None);
    store.assert_consistent();
}

#[tokio::test]
async fn book_never_overbooks_a_full_slot() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 2);
    let engine = Engine::new(store.clone());

    for patient in ["Ama", "Kofi", "Esi"] {
        engine.book(owner, patient, TokenKind::Online).await.unwrap();
    }

    assert_eq!(store.slot(slot).used, 2);
    let waiting = store
        .token_states()
        .values()
        .filter(|(status, _)| *status == TokenStatus::Waiting)
        .count();
    assert_eq!(waiting, 1);
    store.assert_consistent();
}

#[tokio::test]
async fn book_rejects_emergency_kind() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    store.add_slot(owner, "09:00", "10:00", 3);
    let engine = Engine::new(store.clone());

    let err = engine
        .book(owner, "Ama", TokenKind::Emergency)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::KindNotBookable(_)));
    assert!(store.token_states().is_empty(), "rejected book left a token");
}

#[tokio::test]
async fn book_fails_for_owner_without_slots() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let engine = Engine::new(store.clone());

    let err = engine.book(owner, "Ama", TokenKind::Walkin).await.unwrap_err();
    assert!(matches!(err, EngineError::NoSlotsForOwner(_)));
    assert!(store.token_states().is_empty(), "failed book left a token");
}

#[tokio::test]
async fn booked_priority_is_the_base_score() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    store.add_slot(owner, "09:00", "10:00", 3);
    let engine = Engine::new(store.clone());

    // Scored at creation with zero waiting time, so the aging bonus is zero.
    let token = engine.book(owner, "Ama", TokenKind::Online).await.unwrap();
    assert_eq!(token.priority, TokenKind::Online.base_priority());
}

// =============================================================================
// Emergency insertion
// =============================================================================

#[tokio::test]
async fn emergency_fills_spare_capacity_without_eviction() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 2);
    let seated = store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 1, 0);
    let engine = Engine::new(store.clone());

    let emergency = engine.insert_emergency(owner, "Kofi").await.unwrap();

    assert_eq!(emergency.status, TokenStatus::Confirmed);
    assert_eq!(emergency.slot_id, Some(slot));
    assert_eq!(store.slot(slot).used, 2);
    assert_eq!(store.token(seated).status, TokenStatus::Confirmed);
    store.assert_consistent();
}

#[tokio::test]
async fn emergency_evicts_the_last_ranked_occupant_of_a_full_slot() {
    // One slot, capacity 3, three walk-ins seated and an online booking on
    // the waitlist. The emergency displaces the walk-in that arrived last;
    // with no later slot the victim joins the waitlist.
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 3);
    let walkin1 = store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 1, 0);
    let walkin2 = store.add_confirmed_token(slot, "Kofi", TokenKind::Walkin, 2, 1);
    let walkin3 = store.add_confirmed_token(slot, "Esi", TokenKind::Walkin, 3, 2);
    let engine = Engine::new(store.clone());

    let online = engine.book(owner, "Yaw", TokenKind::Online).await.unwrap();
    assert_eq!(online.status, TokenStatus::Waiting);

    let emergency = engine.insert_emergency(owner, "Adwoa").await.unwrap();

    assert_eq!(emergency.status, TokenStatus::Confirmed);
    assert_eq!(emergency.slot_id, Some(slot));
    assert_eq!(store.slot(slot).used, 3);
    assert_eq!(store.token(walkin1).status, TokenStatus::Confirmed);
    assert_eq!(store.token(walkin2).status, TokenStatus::Confirmed);
    assert_eq!(store.token(walkin3).status, TokenStatus::Waiting);
    assert_eq!(store.token(walkin3).slot_id, None);
    assert_eq!(store.token(online.token_id).status, TokenStatus::Waiting);
    store.assert_consistent();
}

#[tokio::test]
async fn emergency_cascades_down_a_full_chain() {
    // Two slots, capacity 1 each, both holding priority tokens. The
    // emergency takes slot 1, its occupant moves to slot 2, and slot 2's
    // occupant runs off the end of the chain.
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot1 = store.add_slot(owner, "09:00", "10:00", 1);
    let slot2 = store.add_slot(owner, "10:00", "11:00", 1);
    let priority1 = store.add_confirmed_token(slot1, "Ama", TokenKind::Priority, 1, 0);
    let priority2 = store.add_confirmed_token(slot2, "Kofi", TokenKind::Priority, 2, 1);
    let engine = Engine::new(store.clone());

    let emergency = engine.insert_emergency(owner, "Esi").await.unwrap();

    assert_eq!(emergency.slot_id, Some(slot1));
    assert_eq!(store.confirmed_in_slot(slot1), vec![emergency.token_id]);
    assert_eq!(store.token(priority1).slot_id, Some(slot2));
    assert_eq!(store.confirmed_in_slot(slot2), vec![priority1]);
    assert_eq!(store.token(priority2).status, TokenStatus::Waiting);
    assert_eq!(store.token(priority2).slot_id, None);
    store.assert_consistent();
}

#[tokio::test]
async fn emergency_evicts_itself_when_it_ranks_last() {
    // The victim candidate set includes the freshly seated token. Against an
    // equal-priority occupant that arrived earlier, the new emergency loses
    // the tie-break and moves on itself.
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot1 = store.add_slot(owner, "09:00", "10:00", 1);
    let slot2 = store.add_slot(owner, "10:00", "11:00", 1);
    let earlier = store.add_confirmed_token(slot1, "Ama", TokenKind::Emergency, 1, 0);
    let engine = Engine::new(store.clone());

    let emergency = engine.insert_emergency(owner, "Kofi").await.unwrap();

    assert_eq!(store.token(earlier).slot_id, Some(slot1));
    assert_eq!(emergency.status, TokenStatus::Confirmed);
    assert_eq!(emergency.slot_id, Some(slot2));
    store.assert_consistent();
}

#[tokio::test]
async fn emergency_ends_waiting_when_every_slot_outranks_it() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 1);
    let earlier = store.add_confirmed_token(slot, "Ama", TokenKind::Emergency, 1, 0);
    let engine = Engine::new(store.clone());

    let emergency = engine.insert_emergency(owner, "Kofi").await.unwrap();

    assert_eq!(emergency.status, TokenStatus::Waiting);
    assert_eq!(emergency.slot_id, None);
    assert_eq!(store.token(earlier).status, TokenStatus::Confirmed);
    assert_eq!(store.slot(slot).used, 1);
    store.assert_consistent();
}

#[tokio::test]
async fn victim_ties_break_by_token_identity() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 2);
    // Same kind, same creation instant; only the IDs differ.
    let lower_id = store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 5, 0);
    let higher_id = store.add_confirmed_token(slot, "Kofi", TokenKind::Walkin, 6, 0);
    let engine = Engine::new(store.clone());

    engine.insert_emergency(owner, "Esi").await.unwrap();

    assert_eq!(store.token(lower_id).status, TokenStatus::Confirmed);
    assert_eq!(store.token(higher_id).status, TokenStatus::Waiting);
    store.assert_consistent();
}

#[tokio::test]
async fn cascade_work_is_bounded_by_chain_length() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let starts = [
        ("09:00", "10:00"),
        ("10:00", "11:00"),
        ("11:00", "12:00"),
        ("12:00", "13:00"),
    ];
    for (i, (start, end)) in starts.iter().enumerate() {
        let slot = store.add_slot(owner, start, end, 1);
        store.add_confirmed_token(slot, "seed", TokenKind::Priority, i as u128 + 1, i as i64);
    }
    let engine = Engine::new(store.clone());

    let before = store.seat_ops();
    engine.insert_emergency(owner, "Esi").await.unwrap();
    let steps = store.seat_ops() - before;

    // One seating per slot at most: the cascade walks each slot once.
    assert!(steps <= starts.len(), "cascade took {steps} seat steps");
    store.assert_consistent();
}

#[tokio::test]
async fn cascade_adds_exactly_one_confirmed_token() {
    let confirmed_count = |store: &MemoryStore| {
        store
            .token_states()
            .values()
            .filter(|(status, _)| *status == TokenStatus::Confirmed)
            .count()
    };

    // Chain with spare capacity: confirmed population grows by one.
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot1 = store.add_slot(owner, "09:00", "10:00", 1);
    store.add_slot(owner, "10:00", "11:00", 1);
    store.add_confirmed_token(slot1, "Ama", TokenKind::Followup, 1, 0);
    let engine = Engine::new(store.clone());

    let before = confirmed_count(&store);
    engine.insert_emergency(owner, "Kofi").await.unwrap();
    assert_eq!(confirmed_count(&store), before + 1);
    store.assert_consistent();

    // Full chain: one in, one out, population unchanged.
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot1 = store.add_slot(owner, "09:00", "10:00", 1);
    let slot2 = store.add_slot(owner, "10:00", "11:00", 1);
    store.add_confirmed_token(slot1, "Ama", TokenKind::Followup, 1, 0);
    store.add_confirmed_token(slot2, "Kofi", TokenKind::Followup, 2, 1);
    let engine = Engine::new(store.clone());

    let before = confirmed_count(&store);
    engine.insert_emergency(owner, "Esi").await.unwrap();
    assert_eq!(confirmed_count(&store), before);
    store.assert_consistent();
}

#[tokio::test]
async fn emergency_fails_for_owner_without_slots() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let engine = Engine::new(store.clone());

    let err = engine.insert_emergency(owner, "Ama").await.unwrap_err();
    assert!(matches!(err, EngineError::NoSlotsForOwner(_)));
    assert!(store.token_states().is_empty(), "failed insert left a token");
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancel_frees_the_seat_and_promotes_the_best_waiting_token() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 1);
    let seated = store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 1, 0);
    let online = store.add_waiting_token(owner, "Kofi", TokenKind::Online, 10, 5);
    let priority_early = store.add_waiting_token(owner, "Esi", TokenKind::Priority, 11, 6);
    let priority_late = store.add_waiting_token(owner, "Yaw", TokenKind::Priority, 12, 7);
    let engine = Engine::new(store.clone());

    let cancelled = engine.cancel(seated).await.unwrap();

    assert_eq!(cancelled.status, TokenStatus::Cancelled);
    // Last seat held stays on the record.
    assert_eq!(cancelled.slot_id, Some(slot));

    // Highest priority wins; among equals the earlier arrival goes first.
    assert_eq!(store.token(priority_early).status, TokenStatus::Confirmed);
    assert_eq!(store.token(priority_early).slot_id, Some(slot));
    assert_eq!(store.token(priority_late).status, TokenStatus::Waiting);
    assert_eq!(store.token(online).status, TokenStatus::Waiting);

    // One vacated, one filled.
    assert_eq!(store.slot(slot).used, 1);
    store.assert_consistent();
}

#[tokio::test]
async fn promotion_ties_break_by_arrival_then_identity() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 1);
    let seated = store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 1, 0);
    // Equal priority and equal arrival instant; the smaller ID is promoted.
    let lower_id = store.add_waiting_token(owner, "Kofi", TokenKind::Online, 5, 3);
    let higher_id = store.add_waiting_token(owner, "Esi", TokenKind::Online, 6, 3);
    let engine = Engine::new(store.clone());

    engine.cancel(seated).await.unwrap();

    assert_eq!(store.token(lower_id).status, TokenStatus::Confirmed);
    assert_eq!(store.token(higher_id).status, TokenStatus::Waiting);
    store.assert_consistent();
}

#[tokio::test]
async fn cancel_waiting_token_leaves_slots_untouched() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 1);
    store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 1, 0);
    let waiting = store.add_waiting_token(owner, "Kofi", TokenKind::Online, 2, 1);
    let engine = Engine::new(store.clone());

    let occupancy_before = store.occupancy();
    let cancelled = engine.cancel(waiting).await.unwrap();

    assert_eq!(cancelled.status, TokenStatus::Cancelled);
    assert_eq!(cancelled.slot_id, None);
    assert_eq!(store.occupancy(), occupancy_before);
    store.assert_consistent();
}

#[tokio::test]
async fn cancel_without_waiting_tokens_just_frees_the_seat() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 2);
    let seated = store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 1, 0);
    let engine = Engine::new(store.clone());

    engine.cancel(seated).await.unwrap();

    assert_eq!(store.slot(slot).used, 0);
    store.assert_consistent();
}

#[tokio::test]
async fn cancel_is_not_reentrant() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    let slot = store.add_slot(owner, "09:00", "10:00", 1);
    let seated = store.add_confirmed_token(slot, "Ama", TokenKind::Walkin, 1, 0);
    store.add_waiting_token(owner, "Kofi", TokenKind::Online, 2, 1);
    let engine = Engine::new(store.clone());

    engine.cancel(seated).await.unwrap();
    let states_before = store.token_states();
    let occupancy_before = store.occupancy();

    let err = engine.cancel(seated).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyCancelled(_)));

    // The conflict rolled back without touching anything.
    assert_eq!(store.token_states(), states_before);
    assert_eq!(store.occupancy(), occupancy_before);
    store.assert_consistent();
}

#[tokio::test]
async fn cancel_unknown_token_is_not_found() {
    let store = MemoryStore::new();
    let engine = Engine::new(store.clone());

    let err = engine.cancel(harness::nth_token_id(404)).await.unwrap_err();
    assert!(matches!(err, EngineError::TokenNotFound(_)));
}

// =============================================================================
// Whole-day flow
// =============================================================================

#[tokio::test]
async fn mixed_day_preserves_capacity_invariants() {
    let store = MemoryStore::new();
    let owner = store.add_owner();
    store.add_slot(owner, "09:00", "10:00", 3);
    store.add_slot(owner, "10:00", "11:00", 3);
    store.add_slot(owner, "11:00", "12:00", 3);
    let engine = Engine::new(store.clone());

    let mut booked = Vec::new();
    let day = [
        TokenKind::Online,
        TokenKind::Walkin,
        TokenKind::Priority,
        TokenKind::Followup,
        TokenKind::Online,
        TokenKind::Walkin,
        TokenKind::Followup,
        TokenKind::Online,
        TokenKind::Priority,
    ];
    for (i, kind) in day.iter().enumerate() {
        let token = engine
            .book(owner, &format!("patient-{i}"), *kind)
            .await
            .unwrap();
        booked.push(token);
        store.assert_consistent();
    }

    engine.insert_emergency(owner, "emergency-1").await.unwrap();
    store.assert_consistent();
    engine.insert_emergency(owner, "emergency-2").await.unwrap();
    store.assert_consistent();

    engine.cancel(booked[0].token_id).await.unwrap();
    store.assert_consistent();

    // 9 bookings + 2 emergencies - 1 cancellation across 9 seats: the chain
    // stays full and the rest queue up.
    let confirmed = store
        .token_states()
        .values()
        .filter(|(status, _)| *status == TokenStatus::Confirmed)
        .count();
    assert_eq!(confirmed, 9);
}
