//! Priority scoring.
//!
//! A token's score is its kind's base plus a waiting bonus of one point per
//! five minutes between creation and the scoring instant. Scores are computed
//! once, when the token is created, and never rescored afterwards; a token
//! created at instant `now` therefore carries exactly its base score.

use chrono::{DateTime, Utc};

use super::TokenKind;

/// Score a token of `kind` created at `created_at`, as of `now`.
///
/// Clock skew can put `created_at` after `now`; the bonus floors at zero
/// rather than penalizing such tokens.
pub fn compute_priority(kind: TokenKind, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let waited_minutes = (now - created_at).num_minutes().max(0) as f64;
    kind.base_priority() + waited_minutes / 5.0
}
