use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::conditions::value_as_string;
use super::error::EngineError;
use crate::models::field::FieldValues;
use crate::models::request::Priority;
use crate::models::step::{AssignmentType, SelectionStrategy, StepDefinition};
use crate::models::template::{RoutingRule, WorkflowTemplate};
use crate::services::directory::{Directory, GroupKind};

/// Pseudo-field carrying the instance priority when the form has no field
/// of that name.
pub const PRIORITY_FIELD: &str = "priority";

/// First-match scan over the routing rules; falls back to the defaults.
/// Matching is an exact compare of the scalar value.
pub fn match_routing_rules(
    rules: &[RoutingRule],
    default_assignees: &[String],
    values: &FieldValues,
) -> Vec<String> {
    let matched = rules.iter().find(|rule| {
        values
            .get(&rule.field)
            .and_then(value_as_string)
            .map(|actual| actual == rule.value)
            .unwrap_or(false)
    });
    let assignees = match matched {
        Some(rule) => &rule.assignees,
        None => default_assignees,
    };
    dedup(assignees.iter().cloned())
}

/// Values as routing sees them.
pub fn routing_values(values: &FieldValues, priority: Priority) -> Cow<'_, FieldValues> {
    if values.contains_key(PRIORITY_FIELD) {
        Cow::Borrowed(values)
    } else {
        let mut with_priority = values.clone();
        with_priority.insert(PRIORITY_FIELD.to_string(), priority.as_str().into());
        Cow::Owned(with_priority)
    }
}

fn dedup(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        if !id.trim().is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Assigned(Vec<String>),
    /// Left for an administrator to assign.
    Manual,
}

#[derive(Debug, Default)]
struct TemplateCursor {
    sequence: u64,
    last_assigned: HashMap<String, u64>,
    last_round_robin: Option<String>,
}

/// Resolves step assignees. Holds the per-template selection cursors, so
/// one resolver is shared by the whole engine.
pub struct RoutingResolver {
    directory: Arc<dyn Directory>,
    cursors: DashMap<Uuid, TemplateCursor>,
}

impl RoutingResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            cursors: DashMap::new(),
        }
    }

    pub async fn resolve(
        &self,
        template: &WorkflowTemplate,
        step: &StepDefinition,
        values: &FieldValues,
        priority: Priority,
    ) -> Result<Resolution, EngineError> {
        if step.selection == SelectionStrategy::Manual {
            return Ok(Resolution::Manual);
        }
        let pool = self.candidate_pool(template, step, values, priority).await?;
        if pool.is_empty() {
            return Err(EngineError::UnroutableRequest {
                step: step.id.clone(),
            });
        }
        Ok(Resolution::Assigned(self.select(
            template.id,
            step.selection,
            pool,
        )))
    }

    /// Re-resolution for a reassignment. Manual steps pick from the whole
    /// pool, and `exclude` members are never chosen.
    pub async fn resolve_excluding(
        &self,
        template: &WorkflowTemplate,
        step: &StepDefinition,
        values: &FieldValues,
        priority: Priority,
        exclude: &[String],
    ) -> Result<Vec<String>, EngineError> {
        let mut pool = self.candidate_pool(template, step, values, priority).await?;
        pool.retain(|id| !exclude.contains(id));
        if pool.is_empty() {
            return Err(EngineError::UnroutableRequest {
                step: step.id.clone(),
            });
        }
        let strategy = match step.selection {
            SelectionStrategy::Manual => SelectionStrategy::All,
            other => other,
        };
        Ok(self.select(template.id, strategy, pool))
    }

    async fn candidate_pool(
        &self,
        template: &WorkflowTemplate,
        step: &StepDefinition,
        values: &FieldValues,
        priority: Priority,
    ) -> Result<Vec<String>, EngineError> {
        let explicit = match step.assignment_type {
            AssignmentType::Smart => Vec::new(),
            AssignmentType::User | AssignmentType::Users => dedup(step.assigned_users.iter().cloned()),
            AssignmentType::Role => self.members(GroupKind::Role, &step.assigned_roles).await?,
            AssignmentType::Department => {
                self.members(GroupKind::Department, &step.assigned_departments)
                    .await?
            }
            AssignmentType::Position => {
                self.members(GroupKind::Position, &step.assigned_positions)
                    .await?
            }
        };
        if !explicit.is_empty() {
            return Ok(explicit);
        }

        let values = routing_values(values, priority);
        let pool = match_routing_rules(&template.routing_rules, &template.default_assignees, &values);
        debug!(
            template_id = %template.id,
            step = %step.id,
            pool = ?pool,
            "routing rules resolved candidate pool"
        );
        Ok(pool)
    }

    async fn members(&self, kind: GroupKind, groups: &[String]) -> Result<Vec<String>, EngineError> {
        let mut members = Vec::new();
        for group in groups {
            members.extend(self.directory.group_members(kind, group).await?);
        }
        Ok(dedup(members))
    }

    fn select(&self, template_id: Uuid, strategy: SelectionStrategy, pool: Vec<String>) -> Vec<String> {
        match strategy {
            SelectionStrategy::All | SelectionStrategy::Manual => pool,
            SelectionStrategy::AutoAssign => {
                let mut cursor = self.cursors.entry(template_id).or_default();
                // least recently assigned; never-assigned members first, ties in pool order
                let Some(chosen) = pool
                    .iter()
                    .min_by_key(|id| cursor.last_assigned.get(*id).copied().unwrap_or(0))
                    .cloned()
                else {
                    return pool;
                };
                cursor.sequence += 1;
                let sequence = cursor.sequence;
                cursor.last_assigned.insert(chosen.clone(), sequence);
                vec![chosen]
            }
            SelectionStrategy::RoundRobin => {
                let mut cursor = self.cursors.entry(template_id).or_default();
                let next = cursor
                    .last_round_robin
                    .as_ref()
                    .and_then(|last| pool.iter().position(|id| id == last))
                    .map(|idx| (idx + 1) % pool.len())
                    .unwrap_or(0);
                let Some(chosen) = pool.get(next).cloned() else {
                    return pool;
                };
                cursor.last_round_robin = Some(chosen.clone());
                vec![chosen]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::step::StepType;
    use crate::models::template::TemplateDraft;
    use crate::services::directory::InMemoryDirectory;
    use serde_json::json;
    use time::OffsetDateTime;

    fn faculty_template() -> WorkflowTemplate {
        let mut draft = TemplateDraft::new("Lab access");
        draft.routing_rules = vec![RoutingRule::new("faculty", "technical", &["U1", "U2"])];
        draft.default_assignees = vec!["U3".into()];
        draft.into_template(Uuid::new_v4(), 1, OffsetDateTime::now_utc())
    }

    fn smart_step() -> StepDefinition {
        StepDefinition::new("dean", 1, StepType::Approval, AssignmentType::Smart)
    }

    fn values(faculty: &str) -> FieldValues {
        let mut values = FieldValues::new();
        values.insert("faculty".into(), json!(faculty));
        values
    }

    fn resolver() -> RoutingResolver {
        RoutingResolver::new(Arc::new(InMemoryDirectory::new()))
    }

    #[tokio::test]
    async fn faculty_routing_scenario() {
        let template = faculty_template();
        let resolver = resolver();

        let technical = resolver
            .resolve(&template, &smart_step(), &values("technical"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(technical, Resolution::Assigned(vec!["U1".into(), "U2".into()]));

        let economics = resolver
            .resolve(&template, &smart_step(), &values("economics"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(economics, Resolution::Assigned(vec!["U3".into()]));
    }

    #[test]
    fn first_match_wins_and_is_deterministic() {
        let rules = vec![
            RoutingRule::new("faculty", "technical", &["U1"]),
            RoutingRule::new("faculty", "technical", &["U7"]),
        ];
        let first = match_routing_rules(&rules, &[], &values("technical"));
        for _ in 0..10 {
            assert_eq!(match_routing_rules(&rules, &[], &values("technical")), first);
        }
        assert_eq!(first, vec!["U1"]);
    }

    #[test]
    fn routing_compare_is_exact() {
        let rules = vec![RoutingRule::new("faculty", "technical", &["U1"])];
        assert!(match_routing_rules(&rules, &[], &values("Technical")).is_empty());
        assert!(match_routing_rules(&rules, &[], &values("technical ")).is_empty());
    }

    #[tokio::test]
    async fn empty_pool_is_unroutable() {
        let mut template = faculty_template();
        template.default_assignees.clear();
        let err = resolver()
            .resolve(&template, &smart_step(), &values("economics"), Priority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnroutableRequest { step } if step == "dean"));
    }

    #[tokio::test]
    async fn manual_selection_defers_assignment() {
        let step = smart_step().with_selection(SelectionStrategy::Manual);
        let resolution = resolver()
            .resolve(&faculty_template(), &step, &values("technical"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Manual);
    }

    #[tokio::test]
    async fn group_assignment_reads_directory_and_falls_back_to_rules() {
        let directory = InMemoryDirectory::new()
            .with_member(GroupKind::Department, "registrar", "R1")
            .with_member(GroupKind::Department, "registrar", "R2");
        let resolver = RoutingResolver::new(Arc::new(directory));
        let template = faculty_template();

        let mut step = StepDefinition::new("office", 2, StepType::Action, AssignmentType::Department);
        step.assigned_departments = vec!["registrar".into()];
        let resolution = resolver
            .resolve(&template, &step, &values("economics"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Assigned(vec!["R1".into(), "R2".into()]));

        step.assigned_departments = vec!["dormitory".into()];
        let resolution = resolver
            .resolve(&template, &step, &values("technical"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Assigned(vec!["U1".into(), "U2".into()]));
    }

    #[tokio::test]
    async fn auto_assign_picks_least_recently_assigned() {
        let mut template = faculty_template();
        template.routing_rules = vec![RoutingRule::new("faculty", "technical", &["U1", "U2", "U3"])];
        let step = smart_step().with_selection(SelectionStrategy::AutoAssign);
        let resolver = resolver();

        let mut picks = Vec::new();
        for _ in 0..4 {
            match resolver
                .resolve(&template, &step, &values("technical"), Priority::Normal)
                .await
                .unwrap()
            {
                Resolution::Assigned(ids) => picks.extend(ids),
                Resolution::Manual => unreachable!(),
            }
        }
        assert_eq!(picks, vec!["U1", "U2", "U3", "U1"]);
    }

    #[tokio::test]
    async fn round_robin_wraps_and_restarts_when_last_left_pool() {
        let mut template = faculty_template();
        template.routing_rules = vec![RoutingRule::new("faculty", "technical", &["U1", "U2"])];
        let step = smart_step().with_selection(SelectionStrategy::RoundRobin);
        let resolver = resolver();

        assert_eq!(first_pick(&resolver, &template, &step).await, "U1");
        assert_eq!(first_pick(&resolver, &template, &step).await, "U2");
        assert_eq!(first_pick(&resolver, &template, &step).await, "U1");

        template.routing_rules = vec![RoutingRule::new("faculty", "technical", &["U5", "U6"])];
        assert_eq!(first_pick(&resolver, &template, &step).await, "U5");
    }

    async fn first_pick(
        resolver: &RoutingResolver,
        template: &WorkflowTemplate,
        step: &StepDefinition,
    ) -> String {
        match resolver
            .resolve(template, step, &values("technical"), Priority::Normal)
            .await
            .unwrap()
        {
            Resolution::Assigned(ids) => ids[0].clone(),
            Resolution::Manual => unreachable!(),
        }
    }

    #[tokio::test]
    async fn priority_is_visible_to_routing() {
        let mut template = faculty_template();
        template.routing_rules.insert(0, RoutingRule::new("priority", "urgent", &["DEAN"]));
        let resolver = resolver();

        let normal = resolver
            .resolve(&template, &smart_step(), &values("technical"), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(normal, Resolution::Assigned(vec!["U1".into(), "U2".into()]));

        let urgent = resolver
            .resolve(&template, &smart_step(), &values("technical"), Priority::Urgent)
            .await
            .unwrap();
        assert_eq!(urgent, Resolution::Assigned(vec!["DEAN".into()]));
    }

    #[tokio::test]
    async fn reassignment_excludes_current_assignees() {
        let template = faculty_template();
        let reassigned = resolver()
            .resolve_excluding(
                &template,
                &smart_step(),
                &values("technical"),
                Priority::Normal,
                &["U1".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(reassigned, vec!["U2"]);
    }
}
