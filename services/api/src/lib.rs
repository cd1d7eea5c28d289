//! slotq allocation service library.
//!
//! This crate primarily ships a `slotq-api` binary, but we expose a small
//! library surface to enable integration testing and reuse. The allocation
//! engine ([`engine::Engine`]) is generic over its store, so tests can drive
//! the full booking/displacement/promotion logic without Postgres.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod state;
pub mod store;
