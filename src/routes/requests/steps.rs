use super::prelude::*;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceStep {
    pub actor: String,
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
}

impl AdvanceStep {
    fn outcome(self) -> StepOutcome {
        match self.decision {
            Decision::Approve => StepOutcome::Approve {
                comment: self.comment,
            },
            Decision::Reject => StepOutcome::Reject {
                comment: self.comment,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignStep {
    pub actor: String,
    pub assignees: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegateStep {
    pub actor: String,
    pub delegate: String,
}

#[derive(Debug, Deserialize)]
pub struct EscalateStep {
    pub rule_id: String,
}

pub async fn advance_step(
    State(app_state): State<AppState>,
    Path((request_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AdvanceStep>,
) -> Response {
    let actor = payload.actor.clone();
    match app_state
        .engine
        .advance_step(request_id, step_id, payload.outcome(), &actor)
        .await
    {
        Ok(step) => step_response(&step),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn assign_step(
    State(app_state): State<AppState>,
    Path((request_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AssignStep>,
) -> Response {
    match app_state
        .engine
        .assign_step(request_id, step_id, payload.assignees, &payload.actor)
        .await
    {
        Ok(step) => step_response(&step),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn reassign_step(
    State(app_state): State<AppState>,
    Path((request_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AssignStep>,
) -> Response {
    match app_state
        .engine
        .reassign_step(request_id, step_id, &payload.actor, payload.assignees)
        .await
    {
        Ok(step) => step_response(&step),
        Err(err) => JsonResponse::engine_error(err),
    }
}

pub async fn delegate_step(
    State(app_state): State<AppState>,
    Path((request_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<DelegateStep>,
) -> Response {
    match app_state
        .engine
        .delegate_step(request_id, step_id, &payload.actor, &payload.delegate)
        .await
    {
        Ok(step) => step_response(&step),
        Err(err) => JsonResponse::engine_error(err),
    }
}

/// Fires one escalation rule right away, whatever its trigger.
pub async fn escalate_step(
    State(app_state): State<AppState>,
    Path((request_id, step_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<EscalateStep>,
) -> Response {
    match app_state
        .engine
        .escalate_step(request_id, step_id, &payload.rule_id)
        .await
    {
        Ok(request) => request_response(StatusCode::OK, &request),
        Err(err) => JsonResponse::engine_error(err),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::routes::app;
    use crate::routes::test_helpers::{body_json, get_request, json_request};
    use crate::state::test_support::{test_app, TestApp};

    struct Submitted {
        router: Router,
        request_id: String,
        first_step: String,
    }

    async fn submitted(test: TestApp, steps: Value, rules: Value) -> Submitted {
        let router = app(test.state);
        let resp = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/templates",
                json!({ "name": "Certificate", "steps": steps, "escalation_rules": rules }),
            ))
            .await
            .unwrap();
        let template = body_json(resp).await;
        let resp = router
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/requests",
                json!({ "template_id": template["template"]["id"], "submitter_id": "S1" }),
            ))
            .await
            .unwrap();
        let request = body_json(resp).await["request"].clone();
        Submitted {
            router,
            request_id: request["id"].as_str().unwrap().to_string(),
            first_step: request["steps"][0]["id"].as_str().unwrap().to_string(),
        }
    }

    impl Submitted {
        async fn post(&self, action: &str, body: Value) -> (StatusCode, Value) {
            let uri = format!(
                "/api/requests/{}/steps/{}/{action}",
                self.request_id, self.first_step
            );
            let resp = self
                .router
                .clone()
                .oneshot(json_request(Method::POST, &uri, body))
                .await
                .unwrap();
            (resp.status(), body_json(resp).await)
        }

        async fn request(&self) -> Value {
            let resp = self
                .router
                .clone()
                .oneshot(get_request(&format!("/api/requests/{}", self.request_id)))
                .await
                .unwrap();
            body_json(resp).await["request"].clone()
        }
    }

    fn single_step(capabilities: Value) -> Value {
        json!([{ "id": "registrar", "order": 1, "step_type": "approval",
                 "assignment_type": "user", "assigned_users": ["U1"],
                 "capabilities": capabilities }])
    }

    #[tokio::test]
    async fn approving_the_only_step_completes_the_request() {
        let flow = submitted(test_app(), single_step(json!({})), json!([])).await;

        let (status, body) = flow
            .post("advance", json!({ "actor": "U1", "decision": "approve", "comment": "ok" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"]["state"], "completed");
        assert_eq!(body["step"]["comment"], "ok");
        assert_eq!(flow.request().await["status"], "completed");
    }

    #[tokio::test]
    async fn reject_without_capability_is_forbidden() {
        let flow = submitted(test_app(), single_step(json!({})), json!([])).await;

        let (status, body) = flow
            .post("advance", json!({ "actor": "U1", "decision": "reject" }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "capability_error");
        assert_eq!(flow.request().await["status"], "in_progress");
    }

    #[tokio::test]
    async fn delegate_can_act_after_delegation() {
        let flow = submitted(
            test_app(),
            single_step(json!({ "can_delegate": true, "can_reassign": true })),
            json!([]),
        )
        .await;

        let (status, body) = flow
            .post("delegate", json!({ "actor": "U1", "delegate": "U3" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"]["delegates"], json!(["U3"]));

        let (status, _) = flow
            .post("advance", json!({ "actor": "U3", "decision": "approve" }))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn reassign_replaces_assignees() {
        let flow = submitted(
            test_app(),
            single_step(json!({ "can_reassign": true })),
            json!([]),
        )
        .await;

        let (status, body) = flow
            .post("reassign", json!({ "actor": "U1", "assignees": ["U2"] }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"]["assigned_to"], json!(["U2"]));

        let (status, body) = flow
            .post("advance", json!({ "actor": "U1", "decision": "approve" }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "not_assignee");
    }

    #[tokio::test]
    async fn manual_selection_waits_for_assignment() {
        let steps = json!([{ "id": "committee", "order": 1, "step_type": "review",
                             "assignment_type": "users", "assigned_users": ["U1", "U2"],
                             "selection": "manual" }]);
        let flow = submitted(test_app(), steps, json!([])).await;
        assert_eq!(flow.request().await["steps"][0]["state"], "pending");

        let (status, body) = flow
            .post("assign", json!({ "actor": "admin", "assignees": ["U2"] }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"]["state"], "active");
        assert_eq!(body["step"]["assigned_to"], json!(["U2"]));
    }

    #[tokio::test]
    async fn manual_escalation_fires_its_actions() {
        let test = test_app();
        let engine = test.state.engine.clone();
        let notifier = test.notifier.clone();
        let rules = json!([{ "id": "dean-review", "trigger_type": "manual",
                             "actions": ["notify", "priority_up"],
                             "escalate_to": { "target_type": "user", "target": "U9" } }]);
        let flow = submitted(test, single_step(json!({})), rules).await;

        let (status, body) = flow
            .post("escalate", json!({ "rule_id": "dean-review" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["request"]["steps"][0]["state"], "escalated");
        assert_eq!(body["request"]["priority"], "high");

        let (status, body) = flow.post("escalate", json!({ "rule_id": "nope" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "rule_not_found");

        engine.drain_notifications().await;
        let mut recipients: Vec<String> = notifier
            .sent()
            .into_iter()
            .map(|n| n.recipient)
            .collect();
        recipients.sort();
        assert_eq!(recipients, vec!["U1", "U9"]);
    }
}
