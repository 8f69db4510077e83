use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::escalation::EscalationRule;
use super::field::FieldDefinition;
use super::step::StepDefinition;

/// Condition-to-assignee mapping. The first matching rule in storage order wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub field: String,
    pub value: String,
    pub assignees: Vec<String>,
}

impl RoutingRule {
    pub fn new(field: &str, value: &str, assignees: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            assignees: assignees.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Condition-to-role mapping. Every matching rule contributes its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub field: String,
    pub value: String,
    pub role: String,
    #[serde(default)]
    pub description: String,
}

impl RoleRule {
    pub fn new(field: &str, value: &str, role: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            role: role.to_string(),
            description: String::new(),
        }
    }
}

/// A saved, immutable template version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
    pub routing_rules: Vec<RoutingRule>,
    pub role_rules: Vec<RoleRule>,
    pub steps: Vec<StepDefinition>,
    pub default_assignees: Vec<String>,
    pub escalation_rules: Vec<EscalationRule>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl WorkflowTemplate {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps sorted by `order`; definition order breaks ties.
    pub fn ordered_steps(&self) -> Vec<StepDefinition> {
        let mut steps = self.steps.clone();
        steps.sort_by_key(|s| s.order);
        steps
    }
}

/// Payload for saving a template. Omitting `id` creates a new template,
/// passing an existing `id` stores the next version of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDraft {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
    #[serde(default)]
    pub role_rules: Vec<RoleRule>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub default_assignees: Vec<String>,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template name is required")]
    MissingName,
    #[error("field `{0}` is defined more than once")]
    DuplicateField(String),
    #[error("field `{0}` needs at least one option")]
    MissingOptions(String),
    #[error("field `{field}` is conditional on unknown field `{source_field}`")]
    UnknownConditionSource { field: String, source_field: String },
    #[error("step `{0}` is defined more than once")]
    DuplicateStep(String),
    #[error("step `{0}` must satisfy warning_time <= auto_escalate_time <= max_execution_time")]
    TimingOutOfOrder(String),
    #[error("escalation rule `{0}` is defined more than once")]
    DuplicateEscalationRule(String),
}

impl TemplateDraft {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            description: None,
            fields: Vec::new(),
            routing_rules: Vec::new(),
            role_rules: Vec::new(),
            steps: Vec::new(),
            default_assignees: Vec::new(),
            escalation_rules: Vec::new(),
            is_active: true,
        }
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.name.trim().is_empty() {
            return Err(TemplateError::MissingName);
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(TemplateError::DuplicateField(field.name.clone()));
            }
            if field.field_type.requires_options() && field.options.is_empty() {
                return Err(TemplateError::MissingOptions(field.name.clone()));
            }
        }
        for field in &self.fields {
            if let Some(cond) = &field.conditional {
                if !names.contains(cond.field.as_str()) {
                    return Err(TemplateError::UnknownConditionSource {
                        field: field.name.clone(),
                        source_field: cond.field.clone(),
                    });
                }
            }
        }

        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(step.id.as_str()) {
                return Err(TemplateError::DuplicateStep(step.id.clone()));
            }
            if !step.timing.is_ordered() {
                return Err(TemplateError::TimingOutOfOrder(step.id.clone()));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.escalation_rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(TemplateError::DuplicateEscalationRule(rule.id.clone()));
            }
        }
        Ok(())
    }

    /// Freezes the draft into a template version.
    pub fn into_template(self, id: Uuid, version: u32, created_at: OffsetDateTime) -> WorkflowTemplate {
        WorkflowTemplate {
            id,
            version,
            name: self.name,
            description: self.description,
            fields: self.fields,
            routing_rules: self.routing_rules,
            role_rules: self.role_rules,
            steps: self.steps,
            default_assignees: self.default_assignees,
            escalation_rules: self.escalation_rules,
            is_active: self.is_active,
            created_at,
        }
    }
}
