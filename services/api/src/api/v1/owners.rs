//! Owner and slot API endpoints.
//!
//! Owners and their slot chains are plain resources; creating or listing
//! them never goes through the allocation engine. Slot `used` counters are
//! only ever mutated by engine operations.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use slotq_id::{OwnerId, SlotId};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::api::error::{ApiError, FieldError};
use crate::api::request_context::RequestContext;
use crate::domain::{Owner, Slot, Token};
use crate::state::AppState;

/// Owner routes.
///
/// /v1/owners
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_owner))
        .route("/", get(list_owners))
        .route("/{owner_id}", get(get_owner))
        .route("/{owner_id}/slots", post(create_slot))
        .route("/{owner_id}/slots", get(list_slots))
        .route("/{owner_id}/summary", get(owner_summary))
        .route("/{owner_id}/tokens", get(list_owner_tokens))
}

/// Parse an "HH:MM" wall-clock time; seconds are accepted but not required.
pub(super) fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Render a wall-clock time as "HH:MM" for responses.
pub(super) fn format_hhmm(value: NaiveTime) -> String {
    value.format("%H:%M").to_string()
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to create a new owner.
#[derive(Debug, Deserialize)]
pub struct CreateOwnerRequest {
    /// Owner display name.
    pub name: String,
}

/// Response for a single owner.
#[derive(Debug, Serialize)]
pub struct OwnerResponse {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<Owner> for OwnerResponse {
    fn from(owner: Owner) -> Self {
        Self {
            id: owner.owner_id.to_string(),
            name: owner.name,
            created_at: owner.created_at,
        }
    }
}

/// Response for listing owners.
#[derive(Debug, Serialize)]
pub struct ListOwnersResponse {
    pub items: Vec<OwnerResponse>,
    pub total: i64,
}

/// Request to append a slot to an owner's chain.
#[derive(Debug, Deserialize)]
pub struct CreateSlotRequest {
    /// Window start, "HH:MM".
    pub start_time: String,

    /// Window end, "HH:MM"; must be after `start_time`.
    pub end_time: String,

    /// Confirmed seats in this window; at least 1.
    pub capacity: i32,
}

/// Response for a single slot, with availability derived from usage.
#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub id: String,
    pub owner_id: String,
    pub start_time: String,
    pub end_time: String,
    pub capacity: i32,
    pub used: i32,
    pub available: i32,
    pub has_space: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Slot> for SlotResponse {
    fn from(slot: Slot) -> Self {
        Self {
            id: slot.slot_id.to_string(),
            owner_id: slot.owner_id.to_string(),
            start_time: format_hhmm(slot.start_time),
            end_time: format_hhmm(slot.end_time),
            capacity: slot.capacity,
            used: slot.used,
            available: slot.available(),
            has_space: slot.has_space(),
            created_at: slot.created_at,
        }
    }
}

/// Response for listing an owner's slots.
#[derive(Debug, Serialize)]
pub struct ListSlotsResponse {
    pub items: Vec<SlotResponse>,
}

/// Token counts for an owner.
#[derive(Debug, Serialize)]
pub struct TokenStats {
    pub total: i64,
    pub confirmed: i64,
    pub waiting: i64,
    pub cancelled: i64,
    pub emergencies: i64,
}

/// Combined owner snapshot: the chain plus token counts.
#[derive(Debug, Serialize)]
pub struct OwnerSummaryResponse {
    pub owner: OwnerResponse,
    pub slots: Vec<SlotResponse>,
    pub tokens: TokenStats,
}

/// A token with its slot's window joined in, for owner-scoped listings.
#[derive(Debug, Serialize)]
pub struct OwnerTokenResponse {
    pub id: String,
    pub patient: String,
    pub kind: crate::domain::TokenKind,
    pub priority: f64,
    pub status: crate::domain::TokenStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_end: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Response for listing an owner's tokens.
#[derive(Debug, Serialize)]
pub struct ListOwnerTokensResponse {
    pub items: Vec<OwnerTokenResponse>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a new owner.
///
/// POST /v1/owners
async fn create_owner(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateOwnerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();

    let name = req.name.trim();
    if name.is_empty() {
        return Err(
            ApiError::bad_request("invalid_name", "Owner name cannot be empty")
                .with_request_id(request_id),
        );
    }
    if name.len() > 100 {
        return Err(ApiError::bad_request(
            "invalid_name",
            "Owner name cannot exceed 100 characters",
        )
        .with_request_id(request_id));
    }

    let owner_id = OwnerId::new();
    let owner = sqlx::query_as::<_, Owner>(
        "INSERT INTO owners (owner_id, name) VALUES ($1, $2) \
         RETURNING owner_id, name, created_at",
    )
    .bind(owner_id.to_string())
    .bind(name)
    .fetch_one(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, "Failed to create owner");
        ApiError::internal("internal_error", "Failed to create owner")
            .with_request_id(request_id.clone())
    })?;

    Ok((StatusCode::CREATED, Json(OwnerResponse::from(owner))))
}

/// List owners, newest first.
///
/// GET /v1/owners
async fn list_owners(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();

    let owners = sqlx::query_as::<_, Owner>(
        "SELECT owner_id, name, created_at FROM owners \
         ORDER BY created_at DESC LIMIT 100",
    )
    .fetch_all(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, "Failed to list owners");
        ApiError::internal("internal_error", "Failed to list owners")
            .with_request_id(request_id.clone())
    })?;

    let items: Vec<OwnerResponse> = owners.into_iter().map(OwnerResponse::from).collect();
    let total = items.len() as i64;

    Ok(Json(ListOwnersResponse { items, total }))
}

/// Get a single owner by ID.
///
/// GET /v1/owners/{owner_id}
async fn get_owner(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(owner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let owner_id = parse_owner_id(&owner_id, &request_id)?;

    let owner = fetch_owner(&state, owner_id, &request_id).await?;
    Ok(Json(OwnerResponse::from(owner)))
}

/// Append a slot to an owner's chain.
///
/// POST /v1/owners/{owner_id}/slots
async fn create_slot(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(owner_id): Path<String>,
    Json(req): Json<CreateSlotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let owner_id = parse_owner_id(&owner_id, &request_id)?;

    let mut field_errors = Vec::new();
    let start_time = parse_time(&req.start_time);
    if start_time.is_none() {
        field_errors.push(FieldError {
            field: "start_time".to_string(),
            message: "must be a wall-clock time like \"09:00\"".to_string(),
        });
    }
    let end_time = parse_time(&req.end_time);
    if end_time.is_none() {
        field_errors.push(FieldError {
            field: "end_time".to_string(),
            message: "must be a wall-clock time like \"10:00\"".to_string(),
        });
    }
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if end <= start {
            field_errors.push(FieldError {
                field: "end_time".to_string(),
                message: "must be after start_time".to_string(),
            });
        }
    }
    if req.capacity < 1 {
        field_errors.push(FieldError {
            field: "capacity".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    let (start_time, end_time) = match (start_time, end_time) {
        (Some(start), Some(end)) if field_errors.is_empty() => (start, end),
        _ => {
            return Err(
                ApiError::bad_request("invalid_slot", "Slot window is invalid")
                    .with_details(field_errors)
                    .with_request_id(request_id),
            );
        }
    };

    // 404 before insert so a bad owner ID doesn't read as a server error.
    fetch_owner(&state, owner_id, &request_id).await?;

    let slot_id = SlotId::new();
    let slot = sqlx::query_as::<_, Slot>(
        "INSERT INTO slots (slot_id, owner_id, start_time, end_time, capacity) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING slot_id, owner_id, start_time, end_time, capacity, used, created_at",
    )
    .bind(slot_id.to_string())
    .bind(owner_id.to_string())
    .bind(start_time)
    .bind(end_time)
    .bind(req.capacity)
    .fetch_one(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, owner_id = %owner_id, "Failed to create slot");
        ApiError::internal("internal_error", "Failed to create slot")
            .with_request_id(request_id.clone())
    })?;

    Ok((StatusCode::CREATED, Json(SlotResponse::from(slot))))
}

/// List an owner's slots in chain order, with availability.
///
/// GET /v1/owners/{owner_id}/slots
async fn list_slots(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(owner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let owner_id = parse_owner_id(&owner_id, &request_id)?;

    fetch_owner(&state, owner_id, &request_id).await?;
    let slots = fetch_chain(&state, owner_id, &request_id).await?;

    Ok(Json(ListSlotsResponse {
        items: slots.into_iter().map(SlotResponse::from).collect(),
    }))
}

/// Owner snapshot: chain with availability plus token counts.
///
/// GET /v1/owners/{owner_id}/summary
async fn owner_summary(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(owner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let owner_id = parse_owner_id(&owner_id, &request_id)?;

    let owner = fetch_owner(&state, owner_id, &request_id).await?;
    let slots = fetch_chain(&state, owner_id, &request_id).await?;

    let stats = sqlx::query_as::<_, TokenStatsRow>(
        "SELECT COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE status = 'CONFIRMED') AS confirmed, \
                COUNT(*) FILTER (WHERE status = 'WAITING') AS waiting, \
                COUNT(*) FILTER (WHERE status = 'CANCELLED') AS cancelled, \
                COUNT(*) FILTER (WHERE kind = 'EMERGENCY') AS emergencies \
         FROM tokens WHERE owner_id = $1",
    )
    .bind(owner_id.to_string())
    .fetch_one(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, owner_id = %owner_id, "Failed to count tokens");
        ApiError::internal("internal_error", "Failed to summarize owner")
            .with_request_id(request_id.clone())
    })?;

    Ok(Json(OwnerSummaryResponse {
        owner: OwnerResponse::from(owner),
        slots: slots.into_iter().map(SlotResponse::from).collect(),
        tokens: TokenStats {
            total: stats.total,
            confirmed: stats.confirmed,
            waiting: stats.waiting,
            cancelled: stats.cancelled,
            emergencies: stats.emergencies,
        },
    }))
}

/// List an owner's tokens, newest first, with slot windows joined in.
///
/// GET /v1/owners/{owner_id}/tokens
async fn list_owner_tokens(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(owner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id.clone();
    let owner_id = parse_owner_id(&owner_id, &request_id)?;

    fetch_owner(&state, owner_id, &request_id).await?;

    let rows = sqlx::query_as::<_, TokenWithSlotRow>(
        "SELECT t.token_id, t.patient, t.owner_id, t.slot_id, t.kind, t.priority, \
                t.status, t.created_at, t.updated_at, \
                s.start_time AS slot_start, s.end_time AS slot_end \
         FROM tokens t \
         LEFT JOIN slots s ON t.slot_id = s.slot_id \
         WHERE t.owner_id = $1 \
         ORDER BY t.created_at DESC",
    )
    .bind(owner_id.to_string())
    .fetch_all(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, owner_id = %owner_id, "Failed to list tokens");
        ApiError::internal("internal_error", "Failed to list tokens")
            .with_request_id(request_id.clone())
    })?;

    let items = rows
        .into_iter()
        .map(|row| OwnerTokenResponse {
            id: row.token.token_id.to_string(),
            patient: row.token.patient,
            kind: row.token.kind,
            priority: row.token.priority,
            status: row.token.status,
            slot_id: row.token.slot_id.map(|id| id.to_string()),
            slot_start: row.slot_start.map(format_hhmm),
            slot_end: row.slot_end.map(format_hhmm),
            created_at: row.token.created_at,
            updated_at: row.token.updated_at,
        })
        .collect();

    Ok(Json(ListOwnerTokensResponse { items }))
}

// =============================================================================
// Shared lookups
// =============================================================================

fn parse_owner_id(raw: &str, request_id: &str) -> Result<OwnerId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_owner_id", "Invalid owner ID format")
            .with_request_id(request_id.to_string())
    })
}

async fn fetch_owner(
    state: &AppState,
    owner_id: OwnerId,
    request_id: &str,
) -> Result<Owner, ApiError> {
    sqlx::query_as::<_, Owner>("SELECT owner_id, name, created_at FROM owners WHERE owner_id = $1")
        .bind(owner_id.to_string())
        .fetch_optional(state.db().pool())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, owner_id = %owner_id, "Failed to load owner");
            ApiError::internal("internal_error", "Failed to load owner")
                .with_request_id(request_id.to_string())
        })?
        .ok_or_else(|| {
            ApiError::not_found("owner_not_found", format!("owner not found: {owner_id}"))
                .with_request_id(request_id.to_string())
        })
}

async fn fetch_chain(
    state: &AppState,
    owner_id: OwnerId,
    request_id: &str,
) -> Result<Vec<Slot>, ApiError> {
    sqlx::query_as::<_, Slot>(
        "SELECT slot_id, owner_id, start_time, end_time, capacity, used, created_at \
         FROM slots WHERE owner_id = $1 ORDER BY start_time, slot_id",
    )
    .bind(owner_id.to_string())
    .fetch_all(state.db().pool())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, request_id = %request_id, owner_id = %owner_id, "Failed to load slots");
        ApiError::internal("internal_error", "Failed to load slots")
            .with_request_id(request_id.to_string())
    })
}

// =============================================================================
// Database Row Types
// =============================================================================

struct TokenStatsRow {
    total: i64,
    confirmed: i64,
    waiting: i64,
    cancelled: i64,
    emergencies: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TokenStatsRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            total: row.try_get("total")?,
            confirmed: row.try_get("confirmed")?,
            waiting: row.try_get("waiting")?,
            cancelled: row.try_get("cancelled")?,
            emergencies: row.try_get("emergencies")?,
        })
    }
}

struct TokenWithSlotRow {
    token: Token,
    slot_start: Option<NaiveTime>,
    slot_end: Option<NaiveTime>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TokenWithSlotRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            token: Token::from_row(row)?,
            slot_start: row.try_get("slot_start")?,
            slot_end: row.try_get("slot_end")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_owner_request_deserialization() {
        let json = r#"{"name": "Dr. Okafor"}"#;
        let req: CreateOwnerRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.name, "Dr. Okafor");
    }

    #[test]
    fn test_create_slot_request_deserialization() {
        let json = r#"{"start_time": "09:00", "end_time": "10:00", "capacity": 3}"#;
        let req: CreateSlotRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.start_time, "09:00");
        assert_eq!(req.capacity, 3);
    }

    #[test]
    fn test_parse_time_accepts_minutes_and_seconds() {
        assert_eq!(
            parse_time("09:30"),
            NaiveTime::from_hms_opt(9, 30, 0)
        );
        assert_eq!(
            parse_time("09:30:15"),
            NaiveTime::from_hms_opt(9, 30, 15)
        );
        assert_eq!(parse_time("9am"), None);
        assert_eq!(parse_time(""), None);
    }

    #[test]
    fn test_format_hhmm_drops_seconds() {
        let t = NaiveTime::from_hms_opt(14, 5, 59).unwrap();
        assert_eq!(format_hhmm(t), "14:05");
    }

    #[test]
    fn test_slot_response_derives_availability() {
        let slot = Slot {
            slot_id: SlotId::new(),
            owner_id: OwnerId::new(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            capacity: 3,
            used: 2,
            created_at: Utc::now(),
        };
        let resp = SlotResponse::from(slot);
        assert_eq!(resp.start_time, "09:00");
        assert_eq!(resp.available, 1);
        assert!(resp.has_space);
    }
}
