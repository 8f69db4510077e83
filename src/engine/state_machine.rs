//! Pure step bookkeeping: stages, joins, skips and completion. The
//! executor applies the results under the instance lock.

use super::conditions::{all_hold, any_holds};
use crate::models::field::FieldValues;
use crate::models::request::{StepInstance, StepState};
use crate::models::step::StepDefinition;

/// Note left on a pending step that waits for an administrator.
pub const MANUAL_ASSIGNMENT: &str = "manual assignment required";

/// Stage number of every step. A parallel step shares the stage of the
/// step before it.
pub fn stages(steps: &[StepInstance]) -> Vec<usize> {
    let mut stage = 0;
    steps
        .iter()
        .enumerate()
        .map(|(idx, step)| {
            if idx > 0 && !step.definition.is_parallel {
                stage += 1;
            }
            stage
        })
        .collect()
}

/// Join check: every required step of every earlier stage is terminal.
pub fn predecessors_done(steps: &[StepInstance], stage_of: &[usize], idx: usize) -> bool {
    let stage = stage_of[idx];
    steps
        .iter()
        .zip(stage_of)
        .filter(|(_, s)| **s < stage)
        .all(|(step, _)| !step.definition.is_required || step.state.is_terminal())
}

/// A pending step that an earlier pass could not route.
pub fn awaiting_assignment(step: &StepInstance) -> bool {
    step.state == StepState::Pending && step.routing_error.is_some()
}

/// Pending steps whose predecessors have joined.
pub fn ready_steps(steps: &[StepInstance]) -> Vec<usize> {
    let stage_of = stages(steps);
    (0..steps.len())
        .filter(|&idx| {
            steps[idx].state == StepState::Pending
                && !awaiting_assignment(&steps[idx])
                && predecessors_done(steps, &stage_of, idx)
        })
        .collect()
}

/// Skipped when any skip condition holds, or when activation conditions
/// exist and do not all hold.
pub fn should_skip(definition: &StepDefinition, values: &FieldValues) -> bool {
    if any_holds(&definition.skip_conditions, values) {
        return true;
    }
    !definition.conditions.is_empty() && !all_hold(&definition.conditions, values)
}

/// Nothing is open and no required step is still pending.
pub fn is_complete(steps: &[StepInstance]) -> bool {
    steps.iter().all(|step| {
        step.state.is_terminal()
            || (step.state == StepState::Pending
                && !step.definition.is_required
                && awaiting_assignment(step))
    })
}

/// Position right after the last step sharing the stage of `idx`.
pub fn end_of_stage(steps: &[StepInstance], idx: usize) -> usize {
    let stage_of = stages(steps);
    let stage = stage_of[idx];
    stage_of
        .iter()
        .rposition(|s| *s == stage)
        .map(|last| last + 1)
        .unwrap_or(steps.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::field::{Condition, ConditionOperator};
    use crate::models::step::{AssignmentType, StepType};
    use serde_json::json;

    fn step(id: &str, order: u32) -> StepInstance {
        StepInstance::pending(StepDefinition::new(
            id,
            order,
            StepType::Approval,
            AssignmentType::Smart,
        ))
    }

    fn parallel(id: &str, order: u32) -> StepInstance {
        let mut s = step(id, order);
        s.definition.is_parallel = true;
        s
    }

    #[test]
    fn parallel_steps_share_a_stage() {
        let steps = vec![step("a", 1), step("b", 2), parallel("c", 3), step("d", 4)];
        assert_eq!(stages(&steps), vec![0, 1, 1, 2]);
    }

    #[test]
    fn successor_waits_for_both_parallel_siblings() {
        let mut steps = vec![step("b", 1), parallel("c", 2), step("d", 3)];
        steps[0].state = StepState::Active;
        steps[1].state = StepState::Active;
        assert!(ready_steps(&steps).is_empty());

        steps[1].state = StepState::Completed;
        assert!(ready_steps(&steps).is_empty());

        steps[0].state = StepState::Escalated;
        assert!(ready_steps(&steps).is_empty());

        steps[0].state = StepState::Completed;
        assert_eq!(ready_steps(&steps), vec![2]);
    }

    #[test]
    fn optional_predecessor_does_not_block() {
        let mut steps = vec![step("a", 1), step("b", 2)];
        steps[0].definition.is_required = false;
        steps[0].state = StepState::Active;
        assert_eq!(ready_steps(&steps), vec![1]);
    }

    #[test]
    fn unroutable_steps_are_not_retried() {
        let mut steps = vec![step("a", 1)];
        steps[0].routing_error = Some("no assignee".into());
        assert!(ready_steps(&steps).is_empty());
        assert!(!is_complete(&steps));

        steps[0].definition.is_required = false;
        assert!(is_complete(&steps));
    }

    #[test]
    fn skip_rules() {
        let mut values = FieldValues::new();
        values.insert("faculty".into(), json!("economics"));

        let mut definition = StepDefinition::new("lab", 1, StepType::Review, AssignmentType::Smart);
        assert!(!should_skip(&definition, &values));

        definition.conditions = vec![Condition::new(
            "faculty",
            ConditionOperator::Equals,
            Some("technical"),
        )];
        assert!(should_skip(&definition, &values));

        definition.conditions.clear();
        definition.skip_conditions = vec![
            Condition::new("faculty", ConditionOperator::Equals, Some("law")),
            Condition::new("faculty", ConditionOperator::Equals, Some("economics")),
        ];
        assert!(should_skip(&definition, &values));
    }

    #[test]
    fn open_steps_prevent_completion() {
        let mut steps = vec![step("a", 1), step("b", 2)];
        steps[0].state = StepState::Completed;
        steps[1].state = StepState::Escalated;
        assert!(!is_complete(&steps));
        steps[1].state = StepState::Skipped;
        assert!(is_complete(&steps));
    }

    #[test]
    fn end_of_stage_lands_after_parallel_siblings() {
        let steps = vec![step("a", 1), step("b", 2), parallel("c", 3), step("d", 4)];
        assert_eq!(end_of_stage(&steps, 1), 3);
        assert_eq!(end_of_stage(&steps, 2), 3);
        assert_eq!(end_of_stage(&steps, 3), 4);
    }
}
