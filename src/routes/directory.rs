use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{responses::JsonResponse, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct UserSearch {
    #[serde(default)]
    pub q: String,
}

/// Assignee picker lookup by id, display name or email.
pub async fn search_users(
    State(app_state): State<AppState>,
    Query(params): Query<UserSearch>,
) -> Response {
    match app_state.directory.search_users(&params.q).await {
        Ok(users) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "users": users,
            })),
        )
            .into_response(),
        Err(err) => {
            error!(?err, "directory search failed");
            JsonResponse::server_error("Directory is unavailable").into_response()
        }
    }
}
