use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::engine::EngineError;

#[derive(Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
    pub code: Option<String>,
}

impl JsonResponse {
    fn error(status: StatusCode, msg: &str, code: Option<&str>) -> (StatusCode, Json<JsonResponse>) {
        (
            status,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: code.map(str::to_string),
            }),
        )
    }

    pub fn success(msg: &str) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(JsonResponse {
                status: "success".to_string(),
                success: true,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn not_found(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::NOT_FOUND, msg, None)
    }

    pub fn server_error(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, msg, None)
    }

    pub fn bad_request(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::BAD_REQUEST, msg, None)
    }

    pub fn forbidden_with_code(msg: &str, code: &str) -> impl IntoResponse {
        Self::error(StatusCode::FORBIDDEN, msg, Some(code))
    }

    /// Maps an engine failure to its HTTP status. Validation failures carry
    /// the per-field errors; storage failures hide their details.
    pub fn engine_error(err: EngineError) -> Response {
        let code = err.kind();
        match &err {
            EngineError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "status": "error",
                    "success": false,
                    "message": errors.to_string(),
                    "code": code,
                    "errors": errors.errors,
                })),
            )
                .into_response(),
            EngineError::TemplateNotFound(_)
            | EngineError::RequestNotFound(_)
            | EngineError::StepNotFound { .. }
            | EngineError::RuleNotFound(_) => {
                Self::error(StatusCode::NOT_FOUND, &err.to_string(), Some(code)).into_response()
            }
            EngineError::Capability { .. } | EngineError::NotAssignee { .. } => {
                Self::forbidden_with_code(&err.to_string(), code).into_response()
            }
            EngineError::UnroutableRequest { .. }
            | EngineError::TemplateInactive(_)
            | EngineError::InvalidTransition(_) => {
                Self::error(StatusCode::CONFLICT, &err.to_string(), Some(code)).into_response()
            }
            EngineError::StaleTemplate { .. } => {
                Self::error(StatusCode::GONE, &err.to_string(), Some(code)).into_response()
            }
            EngineError::InvalidTemplate(_) => {
                Self::error(StatusCode::BAD_REQUEST, &err.to_string(), Some(code)).into_response()
            }
            EngineError::Repository(_) | EngineError::Directory(_) => {
                error!(?err, "request failed on a backing service");
                Self::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    Some(code),
                )
                .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;
    use serde_json::{from_slice, Value};
    use uuid::Uuid;

    use crate::engine::{
        Capability, EngineError, ValidationError, ValidationErrors, ValidationReason,
    };
    use crate::responses::JsonResponse;

    #[tokio::test]
    async fn test_success_response() {
        let resp = JsonResponse::success("ok").into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert_eq!(json.status, "success");
        assert!(json.success);
        assert_eq!(json.message, "ok");
    }

    #[tokio::test]
    async fn test_capability_error_is_forbidden_with_code() {
        let resp = JsonResponse::engine_error(EngineError::Capability {
            step: "dean".into(),
            capability: Capability::Reject,
        });
        assert_eq!(resp.status(), axum::http::StatusCode::FORBIDDEN);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: JsonResponse = from_slice(&body).unwrap();
        assert!(!json.success);
        assert_eq!(json.code.as_deref(), Some("capability_error"));
        assert!(json.message.contains("can_reject"));
    }

    #[tokio::test]
    async fn test_validation_error_lists_fields() {
        let resp = JsonResponse::engine_error(EngineError::Validation(ValidationErrors {
            errors: vec![ValidationError {
                field: "faculty".into(),
                reason: ValidationReason::Required,
                message: "faculty is required".into(),
            }],
        }));
        assert_eq!(resp.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let json: Value = from_slice(&body).unwrap();
        assert_eq!(json["code"], "validation_error");
        assert_eq!(json["errors"][0]["field"], "faculty");
    }

    #[tokio::test]
    async fn test_missing_request_is_not_found() {
        let resp = JsonResponse::engine_error(EngineError::RequestNotFound(Uuid::nil()));
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
