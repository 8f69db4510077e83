use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::events::{IncidentRecord, StepTransitionEvent};

#[async_trait]
pub trait ObservabilitySink: Send + Sync {
    async fn record_transition(&self, event: StepTransitionEvent);

    async fn record_incident(&self, record: IncidentRecord);
}

/// Default sink: structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ObservabilitySink for TracingSink {
    async fn record_transition(&self, event: StepTransitionEvent) {
        info!(
            instance_id = %event.instance_id,
            step_id = %event.step_id,
            step = %event.step_key,
            from = event.from.as_str(),
            to = event.to.as_str(),
            actor = ?event.actor,
            detail = ?event.detail,
            "step transition"
        );
    }

    async fn record_incident(&self, record: IncidentRecord) {
        warn!(
            instance_id = %record.instance_id,
            step_id = ?record.step_id,
            rule_id = ?record.rule_id,
            kind = %record.kind,
            "{}",
            record.message
        );
    }
}

/// Keeps everything in memory; handy for tests and local inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub transitions: Mutex<Vec<StepTransitionEvent>>,
    pub incidents: Mutex<Vec<IncidentRecord>>,
}

impl RecordingSink {
    pub fn incidents(&self) -> Vec<IncidentRecord> {
        self.incidents.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn transitions(&self) -> Vec<StepTransitionEvent> {
        self.transitions.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ObservabilitySink for RecordingSink {
    async fn record_transition(&self, event: StepTransitionEvent) {
        if let Ok(mut transitions) = self.transitions.lock() {
            transitions.push(event);
        }
    }

    async fn record_incident(&self, record: IncidentRecord) {
        if let Ok(mut incidents) = self.incidents.lock() {
            incidents.push(record);
        }
    }
}
