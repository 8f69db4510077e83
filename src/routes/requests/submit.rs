use super::prelude::*;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub template_id: Uuid,
    pub submitter_id: String,
    #[serde(default)]
    pub values: FieldValues,
}

#[derive(Debug, Deserialize)]
pub struct EditValues {
    pub actor: String,
    pub step_id: Uuid,
    pub values: FieldValues,
}

pub async fn submit_request(
    State(app_state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let SubmitRequest {
        template_id,
        submitter_id,
        values,
    } = payload;
    if submitter_id.trim().is_empty() {
        return JsonResponse::bad_request("submitter_id is required").into_response();
    }

    match app_state
        .engine
        .submit_request(template_id, submitter_id.trim(), values)
        .await
    {
        Ok(request) => request_response(StatusCode::CREATED, &request),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn get_request(
    State(app_state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Response {
    match app_state.engine.get_request(request_id).await {
        Ok(request) => request_response(StatusCode::OK, &request),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn edit_values(
    State(app_state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<EditValues>,
) -> Response {
    match app_state
        .engine
        .edit_values(request_id, payload.step_id, &payload.actor, payload.values)
        .await
    {
        Ok(request) => request_response(StatusCode::OK, &request),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn retry_role_grants(
    State(app_state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Response {
    match app_state.engine.retry_role_grants(request_id).await {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({
                "success": report.failed.is_empty(),
                "granted": report.granted,
                "failed": report.failed,
            })),
        )
            .into_response(),
        Err(err) => JsonResponse::engine_error(err),
    }
}
