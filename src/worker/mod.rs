use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::state::AppState;

/// Runs the escalation scheduler every `scheduler_tick`. Ticks that overrun
/// are skipped, never queued.
pub fn start_background_workers(state: AppState) -> JoinHandle<()> {
    let period = state.config.scheduler_tick;
    info!(period_ms = period.as_millis() as u64, "escalation scheduler started");
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match state.engine.tick().await {
                Ok(report) => debug!(
                    scanned = report.scanned,
                    fired = report.fired,
                    failed = report.failed,
                    busy = report.busy,
                    "scheduler tick"
                ),
                Err(err) => error!(?err, "scheduler tick failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::models::escalation::{
        EscalationAction, EscalationRule, EscalationTargetType, TriggerType,
    };
    use crate::models::request::StepState;
    use crate::models::step::{AssignmentType, StepDefinition, StepTiming, StepType};
    use crate::models::template::TemplateDraft;
    use crate::state::test_support::test_app;

    #[tokio::test]
    async fn worker_fires_due_escalations() {
        let mut app = test_app();
        let config = Config::from_lookup(|name| {
            (name == "SCHEDULER_TICK_MS").then(|| "5".to_string())
        })
        .unwrap();
        app.state.config = Arc::new(config);

        let mut draft = TemplateDraft::new("Transcript");
        draft.steps = vec![
            StepDefinition::new("registrar", 1, StepType::Approval, AssignmentType::User)
                .with_users(&["U1"])
                .with_timing(StepTiming::new(48, 24, 18)),
        ];
        draft.escalation_rules = vec![EscalationRule::new(
            "auto",
            TriggerType::Time,
            &[EscalationAction::Reassign],
        )
        .escalate_to(EscalationTargetType::User, "U9")];
        let engine = app.state.engine.clone();
        let template = engine.save_template(draft).await.unwrap();
        let request = engine
            .submit_request(template.id, "S1", Default::default())
            .await
            .unwrap();

        app.clock.advance(time::Duration::hours(24));
        let handle = start_background_workers(app.state.clone());
        let mut escalated = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let instance = engine.get_request(request.id).await.unwrap();
            let step = instance.step_by_key("registrar").cloned().unwrap();
            if step.state == StepState::Escalated {
                escalated = Some(step);
                break;
            }
        }
        handle.abort();

        let step = escalated.expect("scheduler never escalated the step");
        assert_eq!(step.assigned_to, vec!["U9"]);
        assert!(step.fired_rules.contains("auto"));
    }
}
