//! Typed ID definitions for slotq resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.
//! IDs are ULID-based for sortability and uniqueness. Token IDs double as
//! the final tie-break key in allocation ordering, which works because the
//! canonical string form sorts exactly like the underlying ULID.

use crate::define_id;

// =============================================================================
// Allocation Model
// =============================================================================

define_id!(OwnerId, "own");
define_id!(SlotId, "slot");
define_id!(TokenId, "tok");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================
