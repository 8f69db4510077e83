use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::request::StepState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransitionEvent {
    pub instance_id: Uuid,
    pub step_id: Uuid,
    pub step_key: String,
    pub from: StepState,
    pub to: StepState,
    pub actor: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Emitted by the `log_incident` escalation action and by unroutable steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub instance_id: Uuid,
    pub step_id: Option<Uuid>,
    pub rule_id: Option<String>,
    pub kind: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}
