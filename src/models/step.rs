use serde::{Deserialize, Serialize};

use super::field::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Approval,
    Review,
    Action,
    Notification,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Approval => "approval",
            StepType::Review => "review",
            StepType::Action => "action",
            StepType::Notification => "notification",
        }
    }
}

/// Where the candidate assignee pool of a step comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    User,
    Users,
    Role,
    Department,
    Position,
    Smart,
}

/// How the final assignee(s) are picked out of the resolved pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    All,
    AutoAssign,
    RoundRobin,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepCapabilities {
    #[serde(default)]
    pub can_reject: bool,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_reassign: bool,
    #[serde(default)]
    pub can_delegate: bool,
}

/// Time budget of a step, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTiming {
    pub max_execution_time: u32,
    pub auto_escalate_time: u32,
    pub warning_time: u32,
}

impl StepTiming {
    pub fn new(max_execution_time: u32, auto_escalate_time: u32, warning_time: u32) -> Self {
        Self {
            max_execution_time,
            auto_escalate_time,
            warning_time,
        }
    }

    /// `warning_time <= auto_escalate_time <= max_execution_time`
    pub fn is_ordered(&self) -> bool {
        self.warning_time <= self.auto_escalate_time
            && self.auto_escalate_time <= self.max_execution_time
    }
}

impl Default for StepTiming {
    fn default() -> Self {
        Self::new(72, 48, 24)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub order: u32,
    pub step_type: StepType,
    pub assignment_type: AssignmentType,
    #[serde(default)]
    pub assigned_users: Vec<String>,
    #[serde(default)]
    pub assigned_roles: Vec<String>,
    #[serde(default)]
    pub assigned_departments: Vec<String>,
    #[serde(default)]
    pub assigned_positions: Vec<String>,
    #[serde(default)]
    pub selection: SelectionStrategy,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default = "default_required")]
    pub is_required: bool,
    #[serde(default)]
    pub capabilities: StepCapabilities,
    #[serde(default)]
    pub timing: StepTiming,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub skip_conditions: Vec<Condition>,
}

fn default_required() -> bool {
    true
}

impl StepDefinition {
    pub fn new(id: &str, order: u32, step_type: StepType, assignment_type: AssignmentType) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            order,
            step_type,
            assignment_type,
            assigned_users: Vec::new(),
            assigned_roles: Vec::new(),
            assigned_departments: Vec::new(),
            assigned_positions: Vec::new(),
            selection: SelectionStrategy::All,
            is_parallel: false,
            is_required: true,
            capabilities: StepCapabilities::default(),
            timing: StepTiming::default(),
            conditions: Vec::new(),
            skip_conditions: Vec::new(),
        }
    }

    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }

    pub fn with_users(mut self, users: &[&str]) -> Self {
        self.assigned_users = users.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_capabilities(mut self, capabilities: StepCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_timing(mut self, timing: StepTiming) -> Self {
        self.timing = timing;
        self
    }
}
