use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::{models::template::TemplateDraft, responses::JsonResponse, state::AppState};

pub async fn list_templates(State(app_state): State<AppState>) -> Response {
    match app_state.engine.list_templates().await {
        Ok(templates) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "templates": templates,
            })),
        )
            .into_response(),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn create_template(
    State(app_state): State<AppState>,
    Json(mut draft): Json<TemplateDraft>,
) -> Response {
    // new templates always get a fresh id
    draft.id = None;
    match app_state.engine.save_template(draft).await {
        Ok(template) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "template": template,
            })),
        )
            .into_response(),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn get_template(
    State(app_state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Response {
    match app_state.engine.get_template(template_id).await {
        Ok(template) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "template": template,
            })),
        )
            .into_response(),
        Err(err) => JsonResponse::engine_error(err),
    }
}

/// Stores the next version of an existing template. Requests already running
/// stay on the version they were submitted against.
pub async fn update_template(
    State(app_state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(mut draft): Json<TemplateDraft>,
) -> Response {
    if let Err(err) = app_state.engine.get_template(template_id).await {
        return JsonResponse::engine_error(err);
    }
    draft.id = Some(template_id);
    match app_state.engine.save_template(draft).await {
        Ok(template) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "template": template,
            })),
        )
            .into_response(),
        Err(err) => JsonResponse::engine_error(err),
    }
}
