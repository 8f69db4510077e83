use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::conditions::all_hold;
use super::error::EngineError;
use super::executor::WorkflowEngine;
use super::state_machine::end_of_stage;
use crate::models::escalation::{
    EscalationAction, EscalationRule, EscalationStage, TriggerType,
};
use crate::models::events::IncidentRecord;
use crate::models::field::FieldValues;
use crate::models::request::{RequestInstance, StepInstance, StepState};
use crate::models::step::{AssignmentType, StepDefinition, StepTiming, StepType};
use crate::models::template::WorkflowTemplate;
use crate::services::directory::GroupKind;
use crate::services::notifications::{Delivery, NotificationMessage};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Actor recorded on transitions the scheduler performs.
pub const SCHEDULER_ACTOR: &str = "system:escalation";

pub fn elapsed_hours(step: &StepInstance, now: OffsetDateTime) -> Option<f64> {
    step.entered_at
        .map(|entered| (now - entered).as_seconds_f64() / SECONDS_PER_HOUR)
}

/// Hours after which a rule is due. `None` for rules the clock never fires.
pub fn threshold_hours(rule: &EscalationRule, timing: &StepTiming) -> Option<f64> {
    let override_hours = rule.trigger_conditions.hours_elapsed;
    match (rule.trigger_type, rule.stage) {
        (TriggerType::Time, EscalationStage::Warning) => {
            Some(override_hours.unwrap_or(f64::from(timing.warning_time)))
        }
        (TriggerType::Time, EscalationStage::AutoEscalate) => Some(
            override_hours
                .unwrap_or(0.0)
                .max(f64::from(timing.auto_escalate_time)),
        ),
        (TriggerType::SlaBreach, _) => Some(f64::from(timing.max_execution_time)),
        (TriggerType::Condition, _) => Some(override_hours.unwrap_or(0.0)),
        (TriggerType::Manual, _) => None,
    }
}

/// Warning-stage time rules only ever notify.
pub fn effective_actions(rule: &EscalationRule) -> Vec<EscalationAction> {
    let warning_only =
        rule.trigger_type == TriggerType::Time && rule.stage == EscalationStage::Warning;
    rule.actions
        .iter()
        .copied()
        .filter(|action| !warning_only || *action == EscalationAction::Notify)
        .collect()
}

pub fn is_due(
    rule: &EscalationRule,
    step: &StepInstance,
    values: &FieldValues,
    now: OffsetDateTime,
) -> bool {
    if !rule.is_active
        || !step.state.is_open()
        || step.fired_rules.contains(&rule.id)
        || !rule.trigger_conditions.step_type.matches(step.definition.step_type)
    {
        return false;
    }
    let Some(threshold) = threshold_hours(rule, &step.definition.timing) else {
        return false;
    };
    let Some(elapsed) = elapsed_hours(step, now) else {
        return false;
    };
    if elapsed < threshold {
        return false;
    }
    match rule.trigger_type {
        TriggerType::Condition => {
            let conditions = &rule.trigger_conditions.conditions;
            !conditions.is_empty() && all_hold(conditions, values)
        }
        _ => true,
    }
}

/// Due rules in template order.
pub fn due_rules<'a>(
    rules: &'a [EscalationRule],
    step: &StepInstance,
    values: &FieldValues,
    now: OffsetDateTime,
) -> Vec<&'a EscalationRule> {
    rules
        .iter()
        .filter(|rule| is_due(rule, step, values, now))
        .collect()
}

impl WorkflowEngine {
    /// Fires every due rule on the open steps of one instance. Returns how
    /// many rules fired.
    pub(super) async fn escalate_due_steps(
        &self,
        template: &WorkflowTemplate,
        instance: &mut RequestInstance,
        now: OffsetDateTime,
    ) -> usize {
        let open: Vec<Uuid> = instance
            .steps
            .iter()
            .filter(|s| s.state.is_open())
            .map(|s| s.id)
            .collect();

        let mut fired = 0;
        for step_id in open {
            let due: Vec<EscalationRule> = match instance.step(step_id) {
                Some(step) => due_rules(&template.escalation_rules, step, &instance.values, now)
                    .into_iter()
                    .cloned()
                    .collect(),
                None => continue,
            };
            for rule in due {
                // an earlier rule may have auto-approved the step
                let still_open = instance
                    .step(step_id)
                    .map(|s| s.state.is_open())
                    .unwrap_or(false);
                if !still_open {
                    break;
                }
                if self.fire_rule(template, instance, step_id, &rule, now).await {
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Records the rule as fired and applies its actions in declared order.
    /// Returns false when the rule had already fired on this step.
    pub(super) async fn fire_rule(
        &self,
        template: &WorkflowTemplate,
        instance: &mut RequestInstance,
        step_id: Uuid,
        rule: &EscalationRule,
        now: OffsetDateTime,
    ) -> bool {
        let Some(idx) = instance.step_index(step_id) else {
            return false;
        };
        let step = &mut instance.steps[idx];
        if !step.fired_rules.insert(rule.id.clone()) {
            return false;
        }

        let from = step.state;
        if from == StepState::Active {
            step.state = StepState::Escalated;
        }
        let escalated = step.clone();
        warn!(
            instance_id = %instance.id,
            step_id = %step_id,
            rule_id = %rule.id,
            elapsed_hours = ?elapsed_hours(&escalated, now),
            "escalation rule fired"
        );
        if from != escalated.state {
            self.record_transition(
                instance.id,
                &escalated,
                from,
                Some(SCHEDULER_ACTOR),
                Some(format!("rule {}", rule.id)),
                now,
            )
            .await;
        }

        for action in effective_actions(rule) {
            let open = instance
                .step(step_id)
                .map(|s| s.state.is_open())
                .unwrap_or(false);
            if !open {
                info!(
                    instance_id = %instance.id,
                    step_id = %step_id,
                    rule_id = %rule.id,
                    action = action.as_str(),
                    "step closed, remaining escalation actions skipped"
                );
                break;
            }
            if let Err(err) = self
                .apply_action(template, instance, step_id, rule, action, now)
                .await
            {
                warn!(
                    instance_id = %instance.id,
                    step_id = %step_id,
                    rule_id = %rule.id,
                    action = action.as_str(),
                    ?err,
                    "escalation action failed"
                );
                self.observability
                    .record_incident(IncidentRecord {
                        instance_id: instance.id,
                        step_id: Some(step_id),
                        rule_id: Some(rule.id.clone()),
                        kind: "escalation_action_failed".to_string(),
                        message: format!("{} failed: {}", action.as_str(), err),
                        recorded_at: now,
                    })
                    .await;
            }
        }
        true
    }

    async fn apply_action(
        &self,
        template: &WorkflowTemplate,
        instance: &mut RequestInstance,
        step_id: Uuid,
        rule: &EscalationRule,
        action: EscalationAction,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        let idx = instance
            .step_index(step_id)
            .ok_or(EngineError::StepNotFound {
                instance_id: instance.id,
                step_id,
            })?;

        match action {
            EscalationAction::Notify => {
                let targets = self.escalation_targets(rule).await?;
                self.notify(instance, idx, rule, &targets, now).await
            }
            EscalationAction::Reassign => {
                let current = instance.steps[idx].assigned_to.clone();
                let definition = instance.steps[idx].definition.clone();
                let reassigned = match self
                    .routing
                    .resolve_excluding(template, &definition, &instance.values, instance.priority, &current)
                    .await
                {
                    Ok(ids) => ids,
                    Err(EngineError::UnroutableRequest { step }) => {
                        let targets = self.escalation_targets(rule).await?;
                        if targets.is_empty() {
                            return Err(EngineError::UnroutableRequest { step });
                        }
                        targets
                    }
                    Err(err) => return Err(err),
                };
                let step = &mut instance.steps[idx];
                info!(
                    instance_id = %instance.id,
                    step_id = %step_id,
                    rule_id = %rule.id,
                    from = ?step.assigned_to,
                    to = ?reassigned,
                    "step reassigned by escalation"
                );
                step.assigned_to = reassigned;
                step.delegates.clear();
                Ok(())
            }
            EscalationAction::PriorityUp => {
                let raised = instance.priority.raised();
                info!(
                    instance_id = %instance.id,
                    rule_id = %rule.id,
                    from = instance.priority.as_str(),
                    to = raised.as_str(),
                    "request priority raised"
                );
                instance.priority = raised;
                Ok(())
            }
            EscalationAction::AddStep => {
                let key = format!("{}-{}-review", instance.steps[idx].key(), rule.id);
                if instance.step_by_key(&key).is_some() {
                    return Ok(());
                }
                let mut reviewers = self.escalation_targets(rule).await?;
                if reviewers.is_empty() {
                    reviewers = instance.steps[idx].assigned_to.clone();
                }
                let source = &instance.steps[idx].definition;
                let mut definition =
                    StepDefinition::new(&key, source.order, StepType::Review, AssignmentType::Users);
                definition.name = format!("{} review", source.name);
                definition.assigned_users = reviewers;
                definition.timing = source.timing;

                let mut added = StepInstance::pending(definition);
                added.added_by_rule = Some(rule.id.clone());
                let position = end_of_stage(&instance.steps, idx);
                info!(
                    instance_id = %instance.id,
                    rule_id = %rule.id,
                    step = %key,
                    position,
                    "review step added by escalation"
                );
                instance.steps.insert(position, added);
                Ok(())
            }
            EscalationAction::AutoApprove => {
                let step = &mut instance.steps[idx];
                let from = step.state;
                step.state = StepState::Completed;
                step.finished_at = Some(now);
                step.acted_by = Some(SCHEDULER_ACTOR.to_string());
                let snapshot = step.clone();
                self.record_transition(
                    instance.id,
                    &snapshot,
                    from,
                    Some(SCHEDULER_ACTOR),
                    Some(format!("auto-approved by rule {}", rule.id)),
                    now,
                )
                .await;
                Ok(())
            }
            EscalationAction::LogIncident => {
                let step = &instance.steps[idx];
                self.observability
                    .record_incident(IncidentRecord {
                        instance_id: instance.id,
                        step_id: Some(step_id),
                        rule_id: Some(rule.id.clone()),
                        kind: "sla_escalation".to_string(),
                        message: format!(
                            "step `{}` escalated by rule `{}` after {:.1}h",
                            step.key(),
                            rule.id,
                            elapsed_hours(step, now).unwrap_or(0.0)
                        ),
                        recorded_at: now,
                    })
                    .await;
                Ok(())
            }
        }
    }

    /// Users behind the rule's `escalate_to` target.
    async fn escalation_targets(&self, rule: &EscalationRule) -> Result<Vec<String>, EngineError> {
        let Some(target) = &rule.escalate_to else {
            return Ok(Vec::new());
        };
        match GroupKind::for_target(target.target_type) {
            None => Ok(vec![target.target.clone()]),
            Some(kind) => Ok(self.directory.group_members(kind, &target.target).await?),
        }
    }

    async fn notify(
        &self,
        instance: &RequestInstance,
        idx: usize,
        rule: &EscalationRule,
        targets: &[String],
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        let channels = rule.channels.enabled();
        if channels.is_empty() {
            return Ok(());
        }
        let step = &instance.steps[idx];
        let mut recipients: Vec<String> = Vec::new();
        for id in step.assigned_to.iter().chain(targets) {
            if !recipients.contains(id) {
                recipients.push(id.clone());
            }
        }

        let message = NotificationMessage {
            subject: format!("Overdue: {}", step.definition.name),
            body: format!(
                "Request {} has been waiting at step \"{}\" for {:.1} hours (priority {}).",
                instance.id,
                step.definition.name,
                elapsed_hours(step, now).unwrap_or(0.0),
                instance.priority.as_str()
            ),
            instance_id: instance.id,
            step_id: Some(step.id),
            rule_id: Some(rule.id.clone()),
        };

        for user_id in recipients {
            let Some(contact) = self.directory.contact(&user_id).await? else {
                warn!(
                    instance_id = %instance.id,
                    rule_id = %rule.id,
                    user_id = %user_id,
                    "escalation recipient missing from directory"
                );
                continue;
            };
            for channel in &channels {
                self.dispatcher
                    .dispatch(Delivery {
                        channel: *channel,
                        recipient: contact.clone(),
                        message: message.clone(),
                    })
                    .await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::escalation::{StepTypeFilter, TriggerConditions};
    use crate::models::field::{Condition, ConditionOperator};
    use serde_json::json;
    use time::Duration;

    fn active_step(entered_at: OffsetDateTime) -> StepInstance {
        let definition = StepDefinition::new("dean", 1, StepType::Approval, AssignmentType::Smart)
            .with_timing(StepTiming::new(48, 24, 18));
        let mut step = StepInstance::pending(definition);
        step.state = StepState::Active;
        step.entered_at = Some(entered_at);
        step
    }

    fn rules() -> Vec<EscalationRule> {
        vec![
            EscalationRule::new(
                "warn",
                TriggerType::Time,
                &[EscalationAction::Notify, EscalationAction::Reassign],
            )
            .warning(),
            EscalationRule::new(
                "auto",
                TriggerType::Time,
                &[EscalationAction::Reassign, EscalationAction::Notify],
            ),
            EscalationRule::new("breach", TriggerType::SlaBreach, &[EscalationAction::LogIncident]),
            EscalationRule::new("manual", TriggerType::Manual, &[EscalationAction::AutoApprove]),
        ]
    }

    fn ids(rules: Vec<&EscalationRule>) -> Vec<&str> {
        rules.into_iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn thresholds_are_inclusive() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let step = active_step(start);
        let rules = rules();
        let values = FieldValues::new();

        let just_before = start + Duration::hours(18) - Duration::seconds(1);
        assert!(due_rules(&rules, &step, &values, just_before).is_empty());
        assert_eq!(ids(due_rules(&rules, &step, &values, start + Duration::hours(18))), vec!["warn"]);
        assert_eq!(
            ids(due_rules(&rules, &step, &values, start + Duration::hours(24))),
            vec!["warn", "auto"]
        );
        assert_eq!(
            ids(due_rules(&rules, &step, &values, start + Duration::hours(48))),
            vec!["warn", "auto", "breach"]
        );
    }

    #[test]
    fn warning_rules_only_notify() {
        let rules = rules();
        assert_eq!(effective_actions(&rules[0]), vec![EscalationAction::Notify]);
        assert_eq!(
            effective_actions(&rules[1]),
            vec![EscalationAction::Reassign, EscalationAction::Notify]
        );
    }

    #[test]
    fn fired_rules_are_not_due_again() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let mut step = active_step(start);
        step.fired_rules.insert("warn".into());
        let rules = rules();
        let due = due_rules(&rules, &step, &FieldValues::new(), start + Duration::hours(30));
        assert_eq!(ids(due), vec!["auto"]);
    }

    #[test]
    fn hours_elapsed_cannot_pull_auto_escalation_earlier() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let step = active_step(start);
        let mut rule = EscalationRule::new("auto", TriggerType::Time, &[EscalationAction::Notify]);
        rule.trigger_conditions.hours_elapsed = Some(2.0);
        assert_eq!(threshold_hours(&rule, &step.definition.timing), Some(24.0));

        rule.trigger_conditions.hours_elapsed = Some(30.0);
        assert!(!is_due(&rule, &step, &FieldValues::new(), start + Duration::hours(29)));
        assert!(is_due(&rule, &step, &FieldValues::new(), start + Duration::hours(30)));
    }

    #[test]
    fn step_type_filter_and_conditions() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let step = active_step(start);
        let mut values = FieldValues::new();
        values.insert("faculty".into(), json!("technical"));

        let mut rule = EscalationRule::new("cond", TriggerType::Condition, &[EscalationAction::Notify]);
        rule.trigger_conditions = TriggerConditions {
            hours_elapsed: None,
            step_type: StepTypeFilter::Approval,
            conditions: vec![Condition::new("faculty", ConditionOperator::Equals, Some("technical"))],
        };
        assert!(is_due(&rule, &step, &values, start));

        rule.trigger_conditions.step_type = StepTypeFilter::Review;
        assert!(!is_due(&rule, &step, &values, start));

        rule.trigger_conditions.step_type = StepTypeFilter::Any;
        rule.trigger_conditions.conditions.clear();
        assert!(!is_due(&rule, &step, &values, start));
    }

    #[test]
    fn closed_or_inactive_never_due() {
        let start = OffsetDateTime::UNIX_EPOCH;
        let late = start + Duration::hours(100);
        let mut step = active_step(start);
        let mut rules = rules();
        rules[1].is_active = false;
        assert_eq!(ids(due_rules(&rules, &step, &FieldValues::new(), late)), vec!["warn", "breach"]);

        step.state = StepState::Completed;
        assert!(due_rules(&rules, &step, &FieldValues::new(), late).is_empty());
    }
}
