pub(crate) use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
pub(crate) use serde::Deserialize;
pub(crate) use serde_json::json;
pub(crate) use uuid::Uuid;

pub(crate) use crate::{
    models::field::FieldValues,
    models::request::{RequestInstance, StepInstance, StepOutcome},
    responses::JsonResponse,
    state::AppState,
};

pub(crate) fn request_response(status: StatusCode, request: &RequestInstance) -> Response {
    (
        status,
        Json(json!({
            "success": true,
            "request": request,
        })),
    )
        .into_response()
}

pub(crate) fn step_response(step: &StepInstance) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "step": step,
        })),
    )
        .into_response()
}
