//! # slotq-id
//!
//! Typed ID types, parsing, and validation for slotq.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different resource types
//!
//! ## ID Format
//!
//! All resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `own_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `slot_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `tok_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! This format provides:
//! - Type safety (prefix indicates resource type)
//! - Sortability (ULID is time-ordered, and the canonical string sorts the
//!   same way the typed value does — allocation tie-breaks depend on this)
//! - Uniqueness (ULID has 80 bits of randomness)
//! - Human readability (clear prefixes)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
