use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::field::FieldValues;
use super::step::StepDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    InProgress,
    Completed,
    Rejected,
    /// The pinned template version disappeared; the instance cannot advance.
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// One level up, saturating at `Urgent`.
    pub fn raised(self) -> Self {
        match self {
            Priority::Low => Priority::Normal,
            Priority::Normal => Priority::High,
            Priority::High | Priority::Urgent => Priority::Urgent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Active,
    Escalated,
    Completed,
    Skipped,
    Rejected,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed | StepState::Skipped | StepState::Rejected
        )
    }

    /// Escalated steps are still being worked on.
    pub fn is_open(&self) -> bool {
        matches!(self, StepState::Active | StepState::Escalated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Active => "active",
            StepState::Escalated => "escalated",
            StepState::Completed => "completed",
            StepState::Skipped => "skipped",
            StepState::Rejected => "rejected",
        }
    }
}

/// Decision submitted by the assignee of an open step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum StepOutcome {
    Approve {
        #[serde(default)]
        comment: Option<String>,
    },
    Reject {
        #[serde(default)]
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInstance {
    pub id: Uuid,
    /// Snapshot of the definition the step runs under.
    pub definition: StepDefinition,
    pub state: StepState,
    pub assigned_to: Vec<String>,
    #[serde(default)]
    pub delegates: Vec<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub entered_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    /// Escalation rule ids already fired for this step.
    #[serde(default)]
    pub fired_rules: BTreeSet<String>,
    #[serde(default)]
    pub routing_error: Option<String>,
    #[serde(default)]
    pub acted_by: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Set on steps inserted by an `add_step` escalation.
    #[serde(default)]
    pub added_by_rule: Option<String>,
}

impl StepInstance {
    pub fn pending(definition: StepDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            state: StepState::Pending,
            assigned_to: Vec::new(),
            delegates: Vec::new(),
            entered_at: None,
            finished_at: None,
            fired_rules: BTreeSet::new(),
            routing_error: None,
            acted_by: None,
            comment: None,
            added_by_rule: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.definition.id
    }

    /// Assignees and delegates may both act on the step.
    pub fn can_act(&self, actor: &str) -> bool {
        self.assigned_to.iter().any(|a| a == actor) || self.delegates.iter().any(|d| d == actor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInstance {
    pub id: Uuid,
    pub template_id: Uuid,
    pub template_version: u32,
    pub submitter_id: String,
    /// Effective values: conditionally hidden fields are already stripped.
    pub values: FieldValues,
    pub steps: Vec<StepInstance>,
    pub status: RequestStatus,
    #[serde(default)]
    pub priority: Priority,
    /// Roles whose grant failed on completion and can be retried.
    #[serde(default)]
    pub failed_role_grants: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

impl RequestInstance {
    pub fn step(&self, step_id: Uuid) -> Option<&StepInstance> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_index(&self, step_id: Uuid) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn step_by_key(&self, key: &str) -> Option<&StepInstance> {
        self.steps.iter().find(|s| s.key() == key)
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == RequestStatus::InProgress
    }
}
