//! Application state shared across request handlers.

use std::sync::Arc;

use crate::db::Database;
use crate::engine::Engine;
use crate::store::PgStore;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Database,
    engine: Engine<PgStore>,
}

impl AppState {
    /// Create a new application state with an engine over the given pool.
    pub fn new(db: Database) -> Self {
        let engine = Engine::new(PgStore::new(db.pool().clone()));
        Self {
            inner: Arc::new(AppStateInner { db, engine }),
        }
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    /// Get a reference to the allocation engine.
    pub fn engine(&self) -> &Engine<PgStore> {
        &self.inner.engine
    }
}
