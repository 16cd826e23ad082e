//! Work item endpoints
//!
//! GET /items, GET /items/:source_id, DELETE /items/:source_id

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::error::{ApiError, ApiResult};
use crate::models::{ItemFilter, WorkItem};
use crate::AppState;

/// GET /items
///
/// Flag filters as query parameters, e.g. `?transcribed=true&summarized=false`.
pub async fn list_items(
    State(state): State<AppState>,
    Query(filter): Query<ItemFilter>,
) -> ApiResult<Json<Vec<WorkItem>>> {
    Ok(Json(state.store.get(&filter).await?))
}

/// GET /items/:source_id
pub async fn get_item(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<WorkItem>> {
    state
        .store
        .get_one(&source_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Work item {}", source_id)))
}

/// DELETE /items/:source_id
///
/// Removes the row and every artifact of the item.
pub async fn delete_item(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete(&source_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Work item {}", source_id)))
    }
}

/// Build item routes
pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/items", get(list_items))
        .route("/items/:source_id", get(get_item).delete(delete_item))
}
