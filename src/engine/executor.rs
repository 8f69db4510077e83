use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::conditions::value_as_string;
use super::error::{Capability, EngineError};
use super::roles::{grant_roles, matching_roles, RoleGrantReport};
use super::routing::{Resolution, RoutingResolver};
use super::state_machine::{
    awaiting_assignment, is_complete, predecessors_done, ready_steps, should_skip, stages,
    MANUAL_ASSIGNMENT,
};
use super::validator::validate_submission;
use crate::db::request_repository::RequestRepository;
use crate::db::template_repository::TemplateStore;
use crate::db::RepositoryError;
use crate::models::events::{IncidentRecord, StepTransitionEvent};
use crate::models::field::FieldValues;
use crate::models::request::{
    Priority, RequestInstance, RequestStatus, StepInstance, StepOutcome, StepState,
};
use crate::models::template::{TemplateDraft, WorkflowTemplate};
use crate::services::directory::Directory;
use crate::services::notifications::{
    DeliveryOutcome, NotificationDispatcher, Notifier, RetryPolicy,
};
use crate::services::observability::ObservabilitySink;
use crate::services::profile::ProfileService;

const PERSISTENCE_MAX_ATTEMPTS: usize = 3;
#[cfg(test)]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(5);
#[cfg(not(test))]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Collaborators the engine is built from.
pub struct EngineServices {
    pub templates: Arc<dyn TemplateStore>,
    pub requests: Arc<dyn RequestRepository>,
    pub directory: Arc<dyn Directory>,
    pub profiles: Arc<dyn ProfileService>,
    pub notifier: Arc<dyn Notifier>,
    pub observability: Arc<dyn ObservabilitySink>,
    pub clock: Arc<dyn Clock>,
    pub notification_retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub scanned: usize,
    pub fired: usize,
    pub failed: usize,
    /// Instances locked by another operation, left for the next tick.
    pub busy: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MappingTrigger {
    Submit,
    Approve,
}

pub struct WorkflowEngine {
    pub(super) templates: Arc<dyn TemplateStore>,
    pub(super) requests: Arc<dyn RequestRepository>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) profiles: Arc<dyn ProfileService>,
    pub(super) observability: Arc<dyn ObservabilitySink>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) dispatcher: NotificationDispatcher,
    pub(super) routing: RoutingResolver,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl WorkflowEngine {
    pub fn new(services: EngineServices) -> Self {
        Self {
            routing: RoutingResolver::new(services.directory.clone()),
            dispatcher: NotificationDispatcher::new(services.notifier, services.notification_retry),
            templates: services.templates,
            requests: services.requests,
            directory: services.directory,
            profiles: services.profiles,
            observability: services.observability,
            clock: services.clock,
            locks: DashMap::new(),
        }
    }

    pub async fn save_template(&self, draft: TemplateDraft) -> Result<WorkflowTemplate, EngineError> {
        draft.validate()?;
        let template = self.templates.save_template(draft).await?;
        info!(
            template_id = %template.id,
            version = template.version,
            name = %template.name,
            "template version saved"
        );
        Ok(template)
    }

    pub async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, EngineError> {
        Ok(self.templates.list_templates().await?)
    }

    pub async fn get_template(&self, template_id: Uuid) -> Result<WorkflowTemplate, EngineError> {
        self.templates
            .get_template(template_id)
            .await?
            .ok_or(EngineError::TemplateNotFound(template_id))
    }

    pub async fn get_request(&self, instance_id: Uuid) -> Result<RequestInstance, EngineError> {
        self.requests
            .find_request(instance_id)
            .await?
            .ok_or(EngineError::RequestNotFound(instance_id))
    }

    /// Validates the submission against the latest template version and
    /// starts the first stage.
    pub async fn submit_request(
        &self,
        template_id: Uuid,
        submitter_id: &str,
        values: FieldValues,
    ) -> Result<RequestInstance, EngineError> {
        let template = self.get_template(template_id).await?;
        if !template.is_active {
            return Err(EngineError::TemplateInactive(template_id));
        }
        let effective = validate_submission(&template, &values)?;

        let now = self.clock.now();
        let mut instance = RequestInstance {
            id: Uuid::new_v4(),
            template_id: template.id,
            template_version: template.version,
            submitter_id: submitter_id.to_string(),
            values: effective,
            steps: template
                .ordered_steps()
                .into_iter()
                .map(StepInstance::pending)
                .collect(),
            status: RequestStatus::InProgress,
            priority: Priority::Normal,
            failed_role_grants: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        info!(
            instance_id = %instance.id,
            template_id = %template.id,
            version = template.version,
            submitter = submitter_id,
            "request submitted"
        );

        // grants and mappings run only once the request is stored
        let lock = self.instance_lock(instance.id);
        let _guard = lock.lock().await;
        retry_with_backoff(instance.id, "insert_request", || {
            let requests = self.requests.clone();
            let instance = instance.clone();
            async move { requests.insert_request(instance).await }
        })
        .await?;

        self.apply_profile_mappings(&template, &instance, MappingTrigger::Submit)
            .await;
        self.progress(&template, &mut instance, now).await?;
        self.persist(&mut instance).await?;
        self.release_if_finished(&instance);
        Ok(instance)
    }

    pub async fn advance_step(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        outcome: StepOutcome,
        actor: &str,
    ) -> Result<StepInstance, EngineError> {
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let mut instance = self.load_in_progress(instance_id).await?;
        let template = self.pinned_template(&mut instance).await?;
        let idx = open_step_index(&instance, step_id)?;
        ensure_actor(&instance.steps[idx], actor)?;

        let now = self.clock.now();
        let step = &mut instance.steps[idx];
        let (target, comment) = match outcome {
            StepOutcome::Approve { comment } => (StepState::Completed, comment),
            StepOutcome::Reject { comment } => {
                if !step.definition.capabilities.can_reject {
                    return Err(EngineError::Capability {
                        step: step.key().to_string(),
                        capability: Capability::Reject,
                    });
                }
                (StepState::Rejected, comment)
            }
        };
        let from = step.state;
        step.state = target;
        step.finished_at = Some(now);
        step.acted_by = Some(actor.to_string());
        step.comment = comment;
        let acted = step.clone();
        self.record_transition(instance.id, &acted, from, Some(actor), acted.comment.clone(), now)
            .await;

        if target == StepState::Rejected && acted.definition.is_required {
            self.reject_request(&mut instance, &acted, now).await;
        } else {
            self.progress(&template, &mut instance, now).await?;
        }
        self.persist(&mut instance).await?;
        self.release_if_finished(&instance);

        Ok(instance.step(step_id).cloned().unwrap_or(acted))
    }

    /// Administrative assignment of a pending step that waits for a human:
    /// manual selection or a routing failure.
    pub async fn assign_step(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        assignees: Vec<String>,
        actor: &str,
    ) -> Result<StepInstance, EngineError> {
        let assignees = clean_ids(assignees);
        if assignees.is_empty() {
            return Err(EngineError::InvalidTransition(
                "at least one assignee is required".into(),
            ));
        }
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let mut instance = self.load_in_progress(instance_id).await?;
        self.pinned_template(&mut instance).await?;
        let idx = instance.step_index(step_id).ok_or(EngineError::StepNotFound {
            instance_id,
            step_id,
        })?;
        let stage_of = stages(&instance.steps);
        if !awaiting_assignment(&instance.steps[idx])
            || !predecessors_done(&instance.steps, &stage_of, idx)
        {
            return Err(EngineError::InvalidTransition(format!(
                "step `{}` is not waiting for assignment",
                instance.steps[idx].key()
            )));
        }

        let now = self.clock.now();
        let step = &mut instance.steps[idx];
        step.assigned_to = assignees;
        step.routing_error = None;
        step.state = StepState::Active;
        step.entered_at = Some(now);
        let assigned = step.clone();
        self.record_transition(
            instance.id,
            &assigned,
            StepState::Pending,
            Some(actor),
            Some(format!("assigned to {}", assigned.assigned_to.join(", "))),
            now,
        )
        .await;
        self.persist(&mut instance).await?;
        Ok(assigned)
    }

    /// Replaces the assignees of an open step.
    pub async fn reassign_step(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        actor: &str,
        assignees: Vec<String>,
    ) -> Result<StepInstance, EngineError> {
        let assignees = clean_ids(assignees);
        if assignees.is_empty() {
            return Err(EngineError::InvalidTransition(
                "at least one assignee is required".into(),
            ));
        }
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let mut instance = self.load_in_progress(instance_id).await?;
        self.pinned_template(&mut instance).await?;
        let idx = open_step_index(&instance, step_id)?;
        let step = &mut instance.steps[idx];
        ensure_actor(step, actor)?;
        ensure_capability(step, Capability::Reassign)?;

        let previous = std::mem::replace(&mut step.assigned_to, assignees);
        step.delegates.clear();
        let reassigned = step.clone();
        let now = self.clock.now();
        self.record_transition(
            instance.id,
            &reassigned,
            reassigned.state,
            Some(actor),
            Some(format!(
                "reassigned from {} to {}",
                previous.join(", "),
                reassigned.assigned_to.join(", ")
            )),
            now,
        )
        .await;
        self.persist(&mut instance).await?;
        Ok(reassigned)
    }

    /// Lets another identity act on the step. The assignee stays on it.
    pub async fn delegate_step(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        actor: &str,
        delegate: &str,
    ) -> Result<StepInstance, EngineError> {
        let delegate = delegate.trim();
        if delegate.is_empty() {
            return Err(EngineError::InvalidTransition("delegate is required".into()));
        }
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let mut instance = self.load_in_progress(instance_id).await?;
        self.pinned_template(&mut instance).await?;
        let idx = open_step_index(&instance, step_id)?;
        let step = &mut instance.steps[idx];
        if !step.assigned_to.iter().any(|a| a == actor) {
            return Err(EngineError::NotAssignee {
                step: step.key().to_string(),
                actor: actor.to_string(),
            });
        }
        ensure_capability(step, Capability::Delegate)?;

        if !step.can_act(delegate) {
            step.delegates.push(delegate.to_string());
        }
        let delegated = step.clone();
        let now = self.clock.now();
        self.record_transition(
            instance.id,
            &delegated,
            delegated.state,
            Some(actor),
            Some(format!("delegated to {delegate}")),
            now,
        )
        .await;
        self.persist(&mut instance).await?;
        Ok(delegated)
    }

    /// Merges `changes` into the request values and revalidates the result.
    pub async fn edit_values(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        actor: &str,
        changes: FieldValues,
    ) -> Result<RequestInstance, EngineError> {
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let mut instance = self.load_in_progress(instance_id).await?;
        let template = self.pinned_template(&mut instance).await?;
        let idx = open_step_index(&instance, step_id)?;
        ensure_actor(&instance.steps[idx], actor)?;
        ensure_capability(&instance.steps[idx], Capability::Edit)?;

        let mut merged = instance.values.clone();
        merged.extend(changes);
        instance.values = validate_submission(&template, &merged)?;
        info!(
            instance_id = %instance.id,
            step_id = %step_id,
            actor,
            "request values edited"
        );
        self.persist(&mut instance).await?;
        Ok(instance)
    }

    /// Fires one escalation rule on demand, typically a `manual` one.
    pub async fn escalate_step(
        &self,
        instance_id: Uuid,
        step_id: Uuid,
        rule_id: &str,
    ) -> Result<RequestInstance, EngineError> {
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let mut instance = self.load_in_progress(instance_id).await?;
        let template = self.pinned_template(&mut instance).await?;
        open_step_index(&instance, step_id)?;
        let rule = template
            .escalation_rules
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
            .ok_or_else(|| EngineError::RuleNotFound(rule_id.to_string()))?;

        let now = self.clock.now();
        if self.fire_rule(&template, &mut instance, step_id, &rule, now).await {
            self.progress(&template, &mut instance, now).await?;
            self.persist(&mut instance).await?;
            self.release_if_finished(&instance);
        }
        Ok(instance)
    }

    /// Grants again the roles that failed when the request completed.
    pub async fn retry_role_grants(&self, instance_id: Uuid) -> Result<RoleGrantReport, EngineError> {
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let mut instance = self.get_request(instance_id).await?;
        if instance.status != RequestStatus::Completed {
            return Err(EngineError::InvalidTransition(format!(
                "request is {}, role grants run on completed requests",
                instance.status.as_str()
            )));
        }
        let pending = instance.failed_role_grants.clone();
        let report = grant_roles(self.profiles.as_ref(), &instance.submitter_id, &pending).await;
        instance.failed_role_grants = report.failed_roles();
        self.persist(&mut instance).await?;
        Ok(report)
    }

    /// One scheduler pass over every in-progress request. Failures stay
    /// with their instance.
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        let ids = self.requests.list_in_progress().await?;
        let mut report = TickReport::default();
        for instance_id in ids {
            report.scanned += 1;
            match self.tick_instance(instance_id).await {
                Ok(Some(fired)) => report.fired += fired,
                Ok(None) => report.busy += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(%instance_id, ?err, "scheduler tick failed for request");
                }
            }
        }
        if report.fired > 0 {
            info!(
                scanned = report.scanned,
                fired = report.fired,
                failed = report.failed,
                busy = report.busy,
                "scheduler tick finished"
            );
        }
        Ok(report)
    }

    /// `None` when another operation holds the instance; the scheduler never
    /// waits on a single request.
    async fn tick_instance(&self, instance_id: Uuid) -> Result<Option<usize>, EngineError> {
        let lock = self.instance_lock(instance_id);
        let Ok(_guard) = lock.try_lock() else {
            debug!(%instance_id, "request busy, escalation check deferred");
            return Ok(None);
        };

        let Some(mut instance) = self.requests.find_request(instance_id).await? else {
            return Ok(Some(0));
        };
        if !instance.is_in_progress() {
            return Ok(Some(0));
        }
        let template = self.pinned_template(&mut instance).await?;
        let now = self.clock.now();
        let fired = self.escalate_due_steps(&template, &mut instance, now).await;
        if fired > 0 {
            self.progress(&template, &mut instance, now).await?;
            self.persist(&mut instance).await?;
            self.release_if_finished(&instance);
        }
        Ok(Some(fired))
    }

    /// Waits for queued notifications. Used on shutdown and in tests.
    pub async fn drain_notifications(&self) -> Vec<DeliveryOutcome> {
        self.dispatcher.drain().await
    }

    fn instance_lock(&self, instance_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the lock of a finished request unless someone is waiting on it.
    fn release_if_finished(&self, instance: &RequestInstance) {
        if !instance.is_in_progress() {
            self.locks
                .remove_if(&instance.id, |_, lock| Arc::strong_count(lock) <= 2);
        }
    }

    async fn load_in_progress(&self, instance_id: Uuid) -> Result<RequestInstance, EngineError> {
        let instance = self.get_request(instance_id).await?;
        if !instance.is_in_progress() {
            return Err(EngineError::InvalidTransition(format!(
                "request is {}",
                instance.status.as_str()
            )));
        }
        Ok(instance)
    }

    /// Template version the instance was created with. A missing version
    /// fails the instance.
    async fn pinned_template(
        &self,
        instance: &mut RequestInstance,
    ) -> Result<WorkflowTemplate, EngineError> {
        if let Some(template) = self
            .templates
            .get_template_version(instance.template_id, instance.template_version)
            .await?
        {
            return Ok(template);
        }

        let err = EngineError::StaleTemplate {
            template_id: instance.template_id,
            version: instance.template_version,
        };
        error!(instance_id = %instance.id, %err, "request failed on stale template");
        let now = self.clock.now();
        instance.status = RequestStatus::Failed;
        instance.error = Some(err.to_string());
        instance.finished_at = Some(now);
        self.persist(instance).await?;
        self.observability
            .record_incident(IncidentRecord {
                instance_id: instance.id,
                step_id: None,
                rule_id: None,
                kind: "stale_template".to_string(),
                message: err.to_string(),
                recorded_at: now,
            })
            .await;
        self.release_if_finished(instance);
        Err(err)
    }

    /// Activates whatever became ready and completes the request when
    /// nothing is left.
    async fn progress(
        &self,
        template: &WorkflowTemplate,
        instance: &mut RequestInstance,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        self.activate_ready(template, instance, now).await?;
        if instance.is_in_progress() && is_complete(&instance.steps) {
            self.complete_request(template, instance, now).await;
        }
        Ok(())
    }

    async fn activate_ready(
        &self,
        template: &WorkflowTemplate,
        instance: &mut RequestInstance,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        loop {
            let ready = ready_steps(&instance.steps);
            if ready.is_empty() {
                return Ok(());
            }
            for idx in ready {
                let definition = instance.steps[idx].definition.clone();
                if should_skip(&definition, &instance.values) {
                    let step = &mut instance.steps[idx];
                    step.state = StepState::Skipped;
                    step.finished_at = Some(now);
                    let skipped = step.clone();
                    self.record_transition(
                        instance.id,
                        &skipped,
                        StepState::Pending,
                        None,
                        Some("skip conditions hold".into()),
                        now,
                    )
                    .await;
                    continue;
                }

                let resolution = self
                    .routing
                    .resolve(template, &definition, &instance.values, instance.priority)
                    .await;
                let step = &mut instance.steps[idx];
                match resolution {
                    Ok(Resolution::Assigned(assignees)) => {
                        step.assigned_to = assignees;
                        step.state = StepState::Active;
                        step.entered_at = Some(now);
                        let activated = step.clone();
                        self.record_transition(
                            instance.id,
                            &activated,
                            StepState::Pending,
                            None,
                            Some(format!("assigned to {}", activated.assigned_to.join(", "))),
                            now,
                        )
                        .await;
                    }
                    Ok(Resolution::Manual) => {
                        step.routing_error = Some(MANUAL_ASSIGNMENT.to_string());
                        info!(
                            instance_id = %instance.id,
                            step = %definition.id,
                            "step waits for manual assignment"
                        );
                    }
                    Err(err @ EngineError::UnroutableRequest { .. }) => {
                        step.routing_error = Some(err.to_string());
                        let step_id = step.id;
                        warn!(
                            instance_id = %instance.id,
                            step = %definition.id,
                            "step is unroutable; waiting for manual assignment"
                        );
                        self.observability
                            .record_incident(IncidentRecord {
                                instance_id: instance.id,
                                step_id: Some(step_id),
                                rule_id: None,
                                kind: "unroutable_request".to_string(),
                                message: err.to_string(),
                                recorded_at: now,
                            })
                            .await;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    async fn reject_request(
        &self,
        instance: &mut RequestInstance,
        rejected: &StepInstance,
        now: OffsetDateTime,
    ) {
        for idx in 0..instance.steps.len() {
            if instance.steps[idx].state.is_terminal() {
                continue;
            }
            let step = &mut instance.steps[idx];
            let from = step.state;
            step.state = StepState::Skipped;
            step.finished_at = Some(now);
            let skipped = step.clone();
            self.record_transition(
                instance.id,
                &skipped,
                from,
                None,
                Some(format!("request rejected at `{}`", rejected.key())),
                now,
            )
            .await;
        }
        instance.status = RequestStatus::Rejected;
        instance.finished_at = Some(now);
        info!(
            instance_id = %instance.id,
            step = %rejected.key(),
            actor = ?rejected.acted_by,
            "request rejected"
        );
    }

    async fn complete_request(
        &self,
        template: &WorkflowTemplate,
        instance: &mut RequestInstance,
        now: OffsetDateTime,
    ) {
        for idx in 0..instance.steps.len() {
            if instance.steps[idx].state != StepState::Pending {
                continue;
            }
            let step = &mut instance.steps[idx];
            step.state = StepState::Skipped;
            step.finished_at = Some(now);
            let skipped = step.clone();
            self.record_transition(
                instance.id,
                &skipped,
                StepState::Pending,
                None,
                Some("request completed".into()),
                now,
            )
            .await;
        }
        instance.status = RequestStatus::Completed;
        instance.finished_at = Some(now);

        let roles = matching_roles(&template.role_rules, &instance.values);
        let report = grant_roles(self.profiles.as_ref(), &instance.submitter_id, &roles).await;
        instance.failed_role_grants = report.failed_roles();
        self.apply_profile_mappings(template, instance, MappingTrigger::Approve)
            .await;
        info!(
            instance_id = %instance.id,
            granted = ?report.granted,
            failed = ?instance.failed_role_grants,
            "request completed"
        );
    }

    async fn apply_profile_mappings(
        &self,
        template: &WorkflowTemplate,
        instance: &RequestInstance,
        trigger: MappingTrigger,
    ) {
        for field in &template.fields {
            let Some(mapping) = &field.profile_mapping else {
                continue;
            };
            let fires = match trigger {
                MappingTrigger::Submit => mapping.on_submit,
                MappingTrigger::Approve => mapping.on_approve,
            };
            let Some(value) = instance.values.get(&field.name) else {
                continue;
            };
            if !fires {
                continue;
            }
            let rendered = value_as_string(value).unwrap_or_else(|| value.to_string());
            if let Err(err) = self
                .profiles
                .update_profile_field(&instance.submitter_id, &mapping.profile_field, &rendered)
                .await
            {
                warn!(
                    instance_id = %instance.id,
                    field = %field.name,
                    profile_field = %mapping.profile_field,
                    ?err,
                    "profile mapping failed"
                );
            }
        }
    }

    pub(super) async fn record_transition(
        &self,
        instance_id: Uuid,
        step: &StepInstance,
        from: StepState,
        actor: Option<&str>,
        detail: Option<String>,
        now: OffsetDateTime,
    ) {
        self.observability
            .record_transition(StepTransitionEvent {
                instance_id,
                step_id: step.id,
                step_key: step.key().to_string(),
                from,
                to: step.state,
                actor: actor.map(|a| a.to_string()),
                detail,
                recorded_at: now,
            })
            .await;
    }

    async fn persist(&self, instance: &mut RequestInstance) -> Result<(), EngineError> {
        instance.updated_at = self.clock.now();
        let snapshot = instance.clone();
        retry_with_backoff(instance.id, "update_request", || {
            let requests = self.requests.clone();
            let snapshot = snapshot.clone();
            async move { requests.update_request(&snapshot).await }
        })
        .await
    }
}

fn clean_ids(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        let id = id.trim().to_string();
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

fn open_step_index(instance: &RequestInstance, step_id: Uuid) -> Result<usize, EngineError> {
    let idx = instance.step_index(step_id).ok_or(EngineError::StepNotFound {
        instance_id: instance.id,
        step_id,
    })?;
    let step = &instance.steps[idx];
    if !step.state.is_open() {
        return Err(EngineError::InvalidTransition(format!(
            "step `{}` is {}",
            step.key(),
            step.state.as_str()
        )));
    }
    Ok(idx)
}

fn ensure_actor(step: &StepInstance, actor: &str) -> Result<(), EngineError> {
    if step.can_act(actor) {
        Ok(())
    } else {
        Err(EngineError::NotAssignee {
            step: step.key().to_string(),
            actor: actor.to_string(),
        })
    }
}

fn ensure_capability(step: &StepInstance, capability: Capability) -> Result<(), EngineError> {
    let caps = &step.definition.capabilities;
    let granted = match capability {
        Capability::Reject => caps.can_reject,
        Capability::Edit => caps.can_edit,
        Capability::Reassign => caps.can_reassign,
        Capability::Delegate => caps.can_delegate,
    };
    if granted {
        Ok(())
    } else {
        Err(EngineError::Capability {
            step: step.key().to_string(),
            capability,
        })
    }
}

async fn retry_with_backoff<T, Fut, F>(
    instance_id: Uuid,
    operation: &'static str,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RepositoryError>>,
{
    let mut attempt = 0usize;
    let mut backoff = PERSISTENCE_INITIAL_BACKOFF;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ RepositoryError::Unavailable(_)) if attempt < PERSISTENCE_MAX_ATTEMPTS => {
                warn!(
                    %instance_id,
                    operation,
                    attempt,
                    ?err,
                    "request persistence failed; retrying"
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                error!(
                    %instance_id,
                    operation,
                    attempt,
                    ?err,
                    "request persistence failed"
                );
                return Err(err.into());
            }
        }
    }
}
