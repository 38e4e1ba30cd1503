use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct UnlockQuery {
    // developer bypass, shows content without touching the gate
    #[serde(default)]
    pub preview: bool,
}

// GET /api/unlock - latest gate sample
pub async fn unlock_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnlockQuery>,
) -> Json<Value> {
    let snapshot = state.gate.borrow().clone();

    Json(json!({
        "state": snapshot.state,
        "visible": snapshot.is_visible(query.preview),
        "remaining": snapshot.remaining,
        "target": snapshot.target.to_rfc3339(),
    }))
}
