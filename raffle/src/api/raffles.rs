//! Public raffle endpoints.

use super::ApiResponse;
use crate::aggregate;
use crate::error::ReconcileError;
use crate::server::state::AppState;
use crate::types::RaffleId;
use axum::{
    Json,
    extract::{Query, State},
};
use raffle_web::{AppError, WebResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Upper bound of raffle ids per request.
const MAX_RAFFLE_IDS: usize = 100;

/// `?ids=<uuid>,<uuid>`
#[derive(Debug, Deserialize)]
pub struct SoldQuery {
    /// Comma-separated raffle ids
    #[serde(default)]
    pub ids: String,
}

/// Sold tickets per raffle.
#[derive(Debug, Serialize)]
pub struct SoldCountsResponse {
    /// Raffle id to tickets sold
    pub counts: BTreeMap<RaffleId, u64>,
}

/// Sold-ticket counts for the requested raffles.
///
/// # Errors
///
/// 400 for a missing or malformed id list.
pub async fn sold_counts(
    State(state): State<AppState>,
    Query(query): Query<SoldQuery>,
) -> WebResult<Json<ApiResponse<SoldCountsResponse>>> {
    let ids = parse_raffle_ids(&query.ids)?;
    let counts = aggregate::sold_counts(state.reconciler.store(), &ids)
        .await
        .map_err(ReconcileError::from)?;
    Ok(ApiResponse::ok(SoldCountsResponse { counts }))
}

fn parse_raffle_ids(raw: &str) -> WebResult<Vec<RaffleId>> {
    let mut ids = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = Uuid::parse_str(part)
            .map_err(|_| AppError::bad_request(format!("invalid raffle id: {part}")))?;
        let id = RaffleId::from_uuid(id);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(AppError::bad_request("ids is required"));
    }
    if ids.len() > MAX_RAFFLE_IDS {
        return Err(AppError::bad_request(format!("at most {MAX_RAFFLE_IDS} raffle ids")));
    }
    Ok(ids)
}
