use serde::{Deserialize, Serialize};

use super::field::Condition;
use super::step::StepType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Time,
    Condition,
    Manual,
    SlaBreach,
}

/// Which threshold of the step timing a time rule is bound to. Warning
/// rules only ever deliver notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStage {
    Warning,
    #[default]
    AutoEscalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepTypeFilter {
    #[default]
    Any,
    Approval,
    Review,
    Action,
    Notification,
}

impl StepTypeFilter {
    pub fn matches(&self, step_type: StepType) -> bool {
        match self {
            StepTypeFilter::Any => true,
            StepTypeFilter::Approval => step_type == StepType::Approval,
            StepTypeFilter::Review => step_type == StepType::Review,
            StepTypeFilter::Action => step_type == StepType::Action,
            StepTypeFilter::Notification => step_type == StepType::Notification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerConditions {
    /// Overrides the step timing threshold when set.
    #[serde(default)]
    pub hours_elapsed: Option<f64>,
    #[serde(default)]
    pub step_type: StepTypeFilter,
    /// Predicates for `condition` triggers; all must hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTargetType {
    User,
    Role,
    Department,
    Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalateTo {
    pub target_type: EscalationTargetType,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Notify,
    Reassign,
    PriorityUp,
    AddStep,
    AutoApprove,
    LogIncident,
}

impl EscalationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationAction::Notify => "notify",
            EscalationAction::Reassign => "reassign",
            EscalationAction::PriorityUp => "priority_up",
            EscalationAction::AddStep => "add_step",
            EscalationAction::AutoApprove => "auto_approve",
            EscalationAction::LogIncident => "log_incident",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Telegram,
    Push,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Telegram => "telegram",
            NotificationChannel::Push => "push",
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationChannels {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub sms: bool,
    #[serde(default)]
    pub telegram: bool,
    #[serde(default)]
    pub push: bool,
}

impl NotificationChannels {
    pub fn email_only() -> Self {
        Self {
            email: true,
            ..Self::default()
        }
    }

    pub fn enabled(&self) -> Vec<NotificationChannel> {
        let mut channels = Vec::new();
        if self.email {
            channels.push(NotificationChannel::Email);
        }
        if self.sms {
            channels.push(NotificationChannel::Sms);
        }
        if self.telegram {
            channels.push(NotificationChannel::Telegram);
        }
        if self.push {
            channels.push(NotificationChannel::Push);
        }
        channels
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub stage: EscalationStage,
    #[serde(default)]
    pub trigger_conditions: TriggerConditions,
    #[serde(default)]
    pub escalate_to: Option<EscalateTo>,
    /// Applied in declared order.
    #[serde(default)]
    pub actions: Vec<EscalationAction>,
    /// Email only when omitted.
    #[serde(default = "NotificationChannels::email_only")]
    pub channels: NotificationChannels,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl EscalationRule {
    pub fn new(id: &str, trigger_type: TriggerType, actions: &[EscalationAction]) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            trigger_type,
            stage: EscalationStage::AutoEscalate,
            trigger_conditions: TriggerConditions::default(),
            escalate_to: None,
            actions: actions.to_vec(),
            channels: NotificationChannels::email_only(),
            is_active: true,
        }
    }

    pub fn warning(mut self) -> Self {
        self.stage = EscalationStage::Warning;
        self
    }

    pub fn escalate_to(mut self, target_type: EscalationTargetType, target: &str) -> Self {
        self.escalate_to = Some(EscalateTo {
            target_type,
            target: target.to_string(),
        });
        self
    }
}
