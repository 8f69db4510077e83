pub mod directory;
pub mod requests;
pub mod templates;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::responses::JsonResponse;
use crate::state::AppState;

pub fn api_routes() -> Router<AppState> {
    let template_routes = Router::new()
        .route(
            "/",
            get(templates::list_templates).post(templates::create_template),
        )
        .route(
            "/{template_id}",
            get(templates::get_template).put(templates::update_template),
        );

    let request_routes = Router::new()
        .route("/", post(requests::submit_request))
        .route("/{request_id}", get(requests::get_request))
        .route("/{request_id}/values", patch(requests::edit_values))
        .route(
            "/{request_id}/role-grants/retry",
            post(requests::retry_role_grants),
        )
        .route(
            "/{request_id}/steps/{step_id}/advance",
            post(requests::advance_step),
        )
        .route(
            "/{request_id}/steps/{step_id}/assign",
            post(requests::assign_step),
        )
        .route(
            "/{request_id}/steps/{step_id}/reassign",
            post(requests::reassign_step),
        )
        .route(
            "/{request_id}/steps/{step_id}/delegate",
            post(requests::delegate_step),
        )
        .route(
            "/{request_id}/steps/{step_id}/escalate",
            post(requests::escalate_step),
        );

    Router::new()
        .nest("/templates", template_routes)
        .nest("/requests", request_routes)
        .route("/directory/users", get(directory::search_users))
}

/// Full application router. CORS is layered on by the binary.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .nest("/api", api_routes())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Response {
    JsonResponse::success("Portal workflow engine is running").into_response()
}

async fn not_found() -> Response {
    JsonResponse::not_found("Route not found").into_response()
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Method, Request},
        response::Response,
    };
    use serde_json::Value;

    pub(crate) fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub(crate) fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    pub(crate) async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::test_helpers::{body_json, get_request};
    use super::*;
    use crate::state::test_support::test_app;

    #[tokio::test]
    async fn root_reports_running() {
        let app = app(test_app().state);
        let resp = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["success"], true);
    }

    #[tokio::test]
    async fn unknown_route_is_json_not_found() {
        let app = app(test_app().state);
        let resp = app.oneshot(get_request("/api/nowhere")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["status"], "error");
    }
}
