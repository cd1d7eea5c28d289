//! API v1 routes.

mod owners;
mod tokens;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/owners", owners::routes())
        .nest("/tokens", tokens::routes())
        // Slot-scoped token listing: /v1/slots/{slot_id}/tokens
        .nest("/slots", tokens::slot_routes())
}
