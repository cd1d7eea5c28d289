//! Core allocation domain types.
//!
//! Owners hold a chain of time-ordered slots; tokens request admission into
//! that chain. Everything the engine and the store exchange is defined here.

mod priority;

pub use priority::compute_priority;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use slotq_id::{OwnerId, SlotId, TokenId};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Token Kind
// =============================================================================

/// Admission kind. Determines the base priority score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenKind {
    Emergency,
    Priority,
    Followup,
    Online,
    Walkin,
}

impl TokenKind {
    /// Base priority score for this kind.
    pub fn base_priority(self) -> f64 {
        match self {
            TokenKind::Emergency => 100.0,
            TokenKind::Priority => 80.0,
            TokenKind::Followup => 60.0,
            TokenKind::Online => 40.0,
            TokenKind::Walkin => 20.0,
        }
    }

    /// Canonical uppercase spelling, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Emergency => "EMERGENCY",
            TokenKind::Priority => "PRIORITY",
            TokenKind::Followup => "FOLLOWUP",
            TokenKind::Online => "ONLINE",
            TokenKind::Walkin => "WALKIN",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a token kind from its stored spelling.
#[derive(Debug, Error)]
#[error("unknown token kind: {0}")]
pub struct UnknownTokenKind(pub String);

impl FromStr for TokenKind {
    type Err = UnknownTokenKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMERGENCY" => Ok(TokenKind::Emergency),
            "PRIORITY" => Ok(TokenKind::Priority),
            "FOLLOWUP" => Ok(TokenKind::Followup),
            "ONLINE" => Ok(TokenKind::Online),
            "WALKIN" => Ok(TokenKind::Walkin),
            other => Err(UnknownTokenKind(other.to_string())),
        }
    }
}

// =============================================================================
// Token Status
// =============================================================================

/// Lifecycle state of a token.
///
/// `Cancelled` is terminal. A cancelled token keeps its last `slot_id` as a
/// historical record; occupancy accounting only counts `Confirmed` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenStatus {
    Confirmed,
    Waiting,
    Cancelled,
}

impl TokenStatus {
    /// Canonical uppercase spelling, as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenStatus::Confirmed => "CONFIRMED",
            TokenStatus::Waiting => "WAITING",
            TokenStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a token status from its stored spelling.
#[derive(Debug, Error)]
#[error("unknown token status: {0}")]
pub struct UnknownTokenStatus(pub String);

impl FromStr for TokenStatus {
    type Err = UnknownTokenStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(TokenStatus::Confirmed),
            "WAITING" => Ok(TokenStatus::Waiting),
            "CANCELLED" => Ok(TokenStatus::Cancelled),
            other => Err(UnknownTokenStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Owner / Slot / Token
// =============================================================================

/// A resource owner (e.g. a practitioner) with a daily chain of slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub owner_id: OwnerId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A fixed-capacity time window in an owner's chain.
///
/// `used` counts confirmed tokens only. Chain order is `start_time`
/// ascending, with `slot_id` breaking ties between windows that start
/// at the same instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub slot_id: SlotId,
    pub owner_id: OwnerId,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub used: i32,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    /// Whether one more confirmed token fits without displacement.
    pub fn has_space(&self) -> bool {
        self.used < self.capacity
    }

    /// Remaining confirmed seats. Never negative, even mid-cascade.
    pub fn available(&self) -> i32 {
        (self.capacity - self.used).max(0)
    }
}

/// An admission token.
///
/// `priority` is fixed at creation time; `slot_id` is `Some` while the token
/// holds a confirmed seat, and for cancelled tokens records the last seat held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token_id: TokenId,
    pub patient: String,
    pub owner_id: OwnerId,
    pub slot_id: Option<SlotId>,
    pub kind: TokenKind,
    pub priority: f64,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a token. The engine mints the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub token_id: TokenId,
    pub patient: String,
    pub owner_id: OwnerId,
    pub slot_id: Option<SlotId>,
    pub kind: TokenKind,
    pub priority: f64,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
}

/// Where a token sits after an engine step: seated in a slot, or waiting.
#[derive(Debug, Clone, Copy)]
pub struct TokenPlacement {
    pub slot_id: Option<SlotId>,
    pub status: TokenStatus,
}

impl TokenPlacement {
    /// Confirmed into the given slot.
    pub fn seated(slot_id: SlotId) -> Self {
        Self {
            slot_id: Some(slot_id),
            status: TokenStatus::Confirmed,
        }
    }

    /// Off the chain, on the waitlist.
    pub fn unseated() -> Self {
        Self {
            slot_id: None,
            status: TokenStatus::Waiting,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
