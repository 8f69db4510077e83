use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use super::validator::ValidationErrors;
use crate::db::RepositoryError;
use crate::models::template::TemplateError;
use crate::services::directory::DirectoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Reject,
    Edit,
    Reassign,
    Delegate,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Reject => "can_reject",
            Capability::Edit => "can_edit",
            Capability::Reassign => "can_reassign",
            Capability::Delegate => "can_delegate",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("no assignee could be resolved for step `{step}`")]
    UnroutableRequest { step: String },
    #[error("step `{step}` does not grant {}", .capability.as_str())]
    Capability { step: String, capability: Capability },
    #[error("`{actor}` is not an assignee or delegate of step `{step}`")]
    NotAssignee { step: String, actor: String },
    #[error("template {template_id} version {version} no longer exists")]
    StaleTemplate { template_id: Uuid, version: u32 },
    #[error("template {0} not found")]
    TemplateNotFound(Uuid),
    #[error("template {0} is not active")]
    TemplateInactive(Uuid),
    #[error(transparent)]
    InvalidTemplate(#[from] TemplateError),
    #[error("request {0} not found")]
    RequestNotFound(Uuid),
    #[error("step {step_id} not found in request {instance_id}")]
    StepNotFound { instance_id: Uuid, step_id: Uuid },
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("escalation rule `{0}` not found")]
    RuleNotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl EngineError {
    /// Stable machine-readable kind for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::UnroutableRequest { .. } => "unroutable_request",
            EngineError::Capability { .. } => "capability_error",
            EngineError::NotAssignee { .. } => "not_assignee",
            EngineError::StaleTemplate { .. } => "stale_template",
            EngineError::TemplateNotFound(_) => "template_not_found",
            EngineError::TemplateInactive(_) => "template_inactive",
            EngineError::InvalidTemplate(_) => "invalid_template",
            EngineError::RequestNotFound(_) => "request_not_found",
            EngineError::StepNotFound { .. } => "step_not_found",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::RuleNotFound(_) => "rule_not_found",
            EngineError::Repository(_) => "repository_error",
            EngineError::Directory(_) => "directory_error",
        }
    }
}
