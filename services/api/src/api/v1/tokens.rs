//! Token API endpoints.
//!
//! Booking, emergency insertion and cancellation all delegate to the
//! allocation engine; the handlers only parse, validate and serialize.
//! Reads go straight to the pool.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotq_id::{OwnerId, SlotId, TokenId};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::domain::{Slot, Token, TokenKind, TokenStatus};
use crate::engine::EngineError;
use crate::state::AppState;

use super::owners::format_hhmm;

/// Token routes.
///
/// /v1/tokens
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/book", post(book_token))
        .route("/emergency", post(insert_emergency))
        .route("/{token_id}", get(get_token))
        .route("/{token_id}/cancel", post(cancel_token))
}

/// Slot-scoped token routes.
///
/// /v1/slots/{slot_id}/tokens
pub fn slot_routes() -> Router<AppState> {
    Router::new().route("/{slot_id}/tokens", get(list_slot_tokens))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to book a non-emergency token.
#[derive(Debug, Deserialize)]
pub struct BookTokenRequest {
    /// Who the token is for.
    pub patient: String,

    /// Owner whose chain to book into.
    pub owner_id: String,

    /// Token kind; any kind except EMERGENCY.
    pub kind: String,
}

/// Request to force an emergency into the front of a chain.
#[derive(Debug, Deserialize)]
pub struct EmergencyTokenRequest {
    pub patient: String,
    pub owner_id: String,
}

/// Response for a single token.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id: String,
    pub patient: String,
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    pub kind: TokenKind,
    pub priority: f64,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Token> for TokenResponse {
    fn from(token: Token) -> Self {
        Self {
            id: token.token_id.to_string(),
            patient: token.patient,
            owner_id: token.owner_id.to_string(),
            slot_id: token.slot_id.map(|id| id.to_string()),
            kind: token.kind,
            priority: token.priority,
            status: token.status,
            created_at: token.created_at,
            updated_at: token.updated_at,
        }
    }
}

/// Response for listing a slot's confirmed tokens.
#[derive(Debug, Serialize)]
pub struct SlotTokensResponse {
    pub slot_id: String,
    pub start_time: String,
    pub end_time: String,
    pub capacity: i32,
    pub used: i32,
    pub items: Vec<TokenResponse>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Book a token into the first open slot of the owner's chain.
///
/// POST /v1/tokens/book
async fn book_token(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<BookTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();

    let patient = validate_patient(&req.patient, &request_id)?;
    let owner_id = parse_owner_id(&req.owner_id, &request_id)?;
    let kind: TokenKind = req.kind.parse().map_err(|_| {
        ApiError::bad_request(
            "invalid_kind",
            format!(
                "Unknown token kind {:?}; expected PRIORITY, FOLLOWUP, ONLINE or WALKIN",
                req.kind
            ),
        )
        .with_request_id(request_id.clone())
    })?;

    let token = state
        .engine()
        .book(owner_id, patient, kind)
        .await
        .map_err(|e| engine_error(e, &request_id))?;

    Ok((StatusCode::CREATED, Json(TokenResponse::from(token))))
}

/// Insert an emergency token at the front of the owner's chain.
///
/// POST /v1/tokens/emergency
async fn insert_emergency(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<EmergencyTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();

    let patient = validate_patient(&req.patient, &request_id)?;
    let owner_id = parse_owner_id(&req.owner_id, &request_id)?;

    let token = state
        .engine()
        .insert_emergency(owner_id, patient)
        .await
        .map_err(|e| engine_error(e, &request_id))?;

    Ok((StatusCode::CREATED, Json(TokenResponse::from(token))))
}

/// Get a single token by ID.
///
/// GET /v1/tokens/{token_id}
async fn get_token(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(token_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let token_id = parse_token_id(&token_id, &request_id)?;

    let token = sqlx::query_as::<_, Token>(
        "SELECT token_id, patient, owner_id, slot_id, kind, priority, status, \
                created_at, updated_at \
         FROM tokens WHERE token_id = $1",
    )
    .bind(token_id.to_string())
    .fetch_optional(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, token_id = %token_id, "Failed to load token");
        ApiError::internal("internal_error", "Failed to load token")
            .with_request_id(request_id.clone())
    })?
    .ok_or_else(|| {
        ApiError::not_found("token_not_found", format!("token not found: {token_id}"))
            .with_request_id(request_id.clone())
    })?;

    Ok(Json(TokenResponse::from(token)))
}

/// Cancel a token, promoting the best waiting token into any freed seat.
///
/// POST /v1/tokens/{token_id}/cancel
async fn cancel_token(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(token_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let token_id = parse_token_id(&token_id, &request_id)?;

    let token = state
        .engine()
        .cancel(token_id)
        .await
        .map_err(|e| engine_error(e, &request_id))?;

    Ok(Json(TokenResponse::from(token)))
}

/// List a slot's confirmed tokens in serving order.
///
/// GET /v1/slots/{slot_id}/tokens
async fn list_slot_tokens(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(slot_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();

    let slot_id: SlotId = slot_id.parse().map_err(|_| {
        ApiError::bad_request("invalid_slot_id", "Invalid slot ID format")
            .with_request_id(request_id.clone())
    })?;

    let slot = sqlx::query_as::<_, Slot>(
        "SELECT slot_id, owner_id, start_time, end_time, capacity, used, created_at \
         FROM slots WHERE slot_id = $1",
    )
    .bind(slot_id.to_string())
    .fetch_optional(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, slot_id = %slot_id, "Failed to load slot");
        ApiError::internal("internal_error", "Failed to load slot")
            .with_request_id(request_id.clone())
    })?
    .ok_or_else(|| {
        ApiError::not_found("slot_not_found", format!("slot not found: {slot_id}"))
            .with_request_id(request_id.clone())
    })?;

    let tokens = sqlx::query_as::<_, Token>(
        "SELECT token_id, patient, owner_id, slot_id, kind, priority, status, \
                created_at, updated_at \
         FROM tokens \
         WHERE slot_id = $1 AND status = 'CONFIRMED' \
         ORDER BY priority DESC, created_at ASC, token_id ASC",
    )
    .bind(slot_id.to_string())
    .fetch_all(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, slot_id = %slot_id, "Failed to list slot tokens");
        ApiError::internal("internal_error", "Failed to list slot tokens")
            .with_request_id(request_id.clone())
    })?;

    Ok(Json(SlotTokensResponse {
        slot_id: slot.slot_id.to_string(),
        start_time: format_hhmm(slot.start_time),
        end_time: format_hhmm(slot.end_time),
        capacity: slot.capacity,
        used: slot.used,
        items: tokens.into_iter().map(TokenResponse::from).collect(),
    }))
}

// =============================================================================
// Shared helpers
// =============================================================================

fn validate_patient<'a>(raw: &'a str, request_id: &str) -> Result<&'a str, ApiError> {
    let patient = raw.trim();
    if patient.is_empty() {
        return Err(
            ApiError::bad_request("invalid_patient", "Patient name cannot be empty")
                .with_request_id(request_id.to_string()),
        );
    }
    if patient.len() > 200 {
        return Err(ApiError::bad_request(
            "invalid_patient",
            "Patient name cannot exceed 200 characters",
        )
        .with_request_id(request_id.to_string()));
    }
    Ok(patient)
}

fn parse_owner_id(raw: &str, request_id: &str) -> Result<OwnerId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_owner_id", "Invalid owner ID format")
            .with_request_id(request_id.to_string())
    })
}

fn parse_token_id(raw: &str, request_id: &str) -> Result<TokenId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_token_id", "Invalid token ID format")
            .with_request_id(request_id.to_string())
    })
}

/// Map engine failures onto the problem-document taxonomy.
fn engine_error(e: EngineError, request_id: &str) -> ApiError {
    let api = match &e {
        EngineError::KindNotBookable(_) => {
            ApiError::bad_request("kind_not_bookable", e.to_string())
        }
        EngineError::NoSlotsForOwner(_) => {
            ApiError::not_found("no_slots_for_owner", e.to_string())
        }
        EngineError::TokenNotFound(_) => ApiError::not_found("token_not_found", e.to_string()),
        EngineError::AlreadyCancelled(_) => ApiError::conflict("already_cancelled", e.to_string()),
        EngineError::Invariant(_) => {
            tracing::error!(error = %e, request_id = %request_id, "Allocation invariant violated");
            ApiError::internal("invariant_violation", "Allocation invariant violated")
        }
        EngineError::Store(_) => {
            tracing::error!(error = %e, request_id = %request_id, "Engine storage failure");
            ApiError::internal("internal_error", "Storage failure")
        }
    };
    api.with_request_id(request_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_request_deserialization() {
        let json = r#"{"patient": "Ama Mensah", "owner_id": "own_01J9ZX", "kind": "WALKIN"}"#;
        let req: BookTokenRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.patient, "Ama Mensah");
        assert_eq!(req.kind, "WALKIN");
    }

    #[test]
    fn test_emergency_request_deserialization() {
        let json = r#"{"patient": "Kofi Boateng", "owner_id": "own_01J9ZX"}"#;
        let req: EmergencyTokenRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.patient, "Kofi Boateng");
    }

    #[test]
    fn test_token_response_serializes_uppercase_enums() {
        let token = Token {
            token_id: TokenId::new(),
            patient: "Ama".to_string(),
            owner_id: OwnerId::new(),
            slot_id: None,
            kind: TokenKind::Walkin,
            priority: 20.0,
            status: TokenStatus::Waiting,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(TokenResponse::from(token)).unwrap();
        assert_eq!(json["kind"], "WALKIN");
        assert_eq!(json["status"], "WAITING");
        assert!(json.get("slot_id").is_none());
    }

    #[test]
    fn test_engine_errors_map_to_statuses() {
        let e = engine_error(
            EngineError::KindNotBookable(TokenKind::Emergency),
            "req_1",
        );
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.problem.code, "kind_not_bookable");

        let e = engine_error(EngineError::AlreadyCancelled(TokenId::new()), "req_2");
        assert_eq!(e.status, StatusCode::CONFLICT);
        assert_eq!(e.problem.request_id, "req_2");

        let e = engine_error(EngineError::NoSlotsForOwner(OwnerId::new()), "req_3");
        assert_eq!(e.status, StatusCode::NOT_FOUND);
    }
}
