use std::sync::Arc;

use crate::config::Config;
use crate::engine::WorkflowEngine;
use crate::services::directory::Directory;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub directory: Arc<dyn Directory>,
    pub config: Arc<Config>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use time::OffsetDateTime;

    use super::AppState;
    use crate::config::Config;
    use crate::db::memory_db::{InMemoryRequestRepository, InMemoryTemplateStore};
    use crate::engine::{EngineServices, ManualClock, WorkflowEngine};
    use crate::services::directory::{Contact, InMemoryDirectory};
    use crate::services::notifications::{RecordingNotifier, RetryPolicy};
    use crate::services::observability::RecordingSink;
    use crate::services::profile::InMemoryProfileService;

    pub(crate) struct TestApp {
        pub state: AppState,
        pub clock: Arc<ManualClock>,
        pub notifier: Arc<RecordingNotifier>,
    }

    /// In-memory app with users U1, U2, U3 and U9 and a clock frozen at the epoch.
    pub(crate) fn test_app() -> TestApp {
        let directory = Arc::new(["U1", "U2", "U3", "U9"].iter().fold(
            InMemoryDirectory::new(),
            |dir, id| {
                let mut contact =
                    Contact::new(id).with_email(&format!("{}@uni.example", id.to_lowercase()));
                contact.display_name = format!("User {id}");
                dir.with_user(contact)
            },
        ));
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = WorkflowEngine::new(EngineServices {
            templates: Arc::new(InMemoryTemplateStore::new()),
            requests: Arc::new(InMemoryRequestRepository::new()),
            directory: directory.clone(),
            profiles: Arc::new(InMemoryProfileService::new()),
            notifier: notifier.clone(),
            observability: Arc::new(RecordingSink::default()),
            clock: clock.clone(),
            notification_retry: RetryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
            },
        });
        let config = Config::from_lookup(|_| None).expect("default config");
        TestApp {
            state: AppState {
                engine: Arc::new(engine),
                directory,
                config: Arc::new(config),
            },
            clock,
            notifier,
        }
    }
}
