mod channel_notifier;
mod mock_notifier;
mod smtp_impl;
mod webhook_impl;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::address::AddressError;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, warn};
use uuid::Uuid;

pub use channel_notifier::ChannelNotifier;
pub use mock_notifier::{RecordedNotification, RecordingNotifier};
pub use smtp_impl::{SmtpConfig, SmtpMailer, TlsMode};
pub use webhook_impl::{MessagingNotifier, TelegramSettings};

use crate::models::escalation::NotificationChannel;
use crate::services::directory::Contact;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("channel `{0}` is not configured")]
    ChannelDisabled(NotificationChannel),
    #[error("recipient `{user_id}` has no {channel} address")]
    MissingAddress {
        channel: NotificationChannel,
        user_id: String,
    },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("send error: {0}")]
    Send(String),
    #[error("env var missing: {0}")]
    EnvVarMissing(String),
}

impl NotificationError {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotificationError::Send(_))
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotificationError::Send(err.to_string())
    }
}

impl From<lettre::error::Error> for NotificationError {
    fn from(err: lettre::error::Error) -> Self {
        NotificationError::Send(err.to_string())
    }
}

impl From<AddressError> for NotificationError {
    fn from(err: AddressError) -> Self {
        NotificationError::InvalidAddress(err.to_string())
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        NotificationError::Send(err.to_string())
    }
}

impl From<std::env::VarError> for NotificationError {
    fn from(err: std::env::VarError) -> Self {
        NotificationError::EnvVarMissing(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
    pub instance_id: Uuid,
    pub step_id: Option<Uuid>,
    pub rule_id: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &Contact,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: NotificationChannel,
    pub recipient: Contact,
    pub message: NotificationMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub delivery: Delivery,
    pub attempts: usize,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Fire-and-forget delivery with retries. Callers never wait on a send;
/// `drain` collects whatever is still in flight.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    inflight: Arc<Mutex<JoinSet<DeliveryOutcome>>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self {
            notifier,
            policy,
            inflight: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub async fn dispatch(&self, delivery: Delivery) {
        let notifier = self.notifier.clone();
        let policy = self.policy;
        let mut inflight = self.inflight.lock().await;
        // reap finished deliveries so the set does not grow unbounded
        while inflight.try_join_next().is_some() {}
        inflight.spawn(deliver_with_retry(notifier, policy, delivery));
    }

    /// Waits for every outstanding delivery.
    pub async fn drain(&self) -> Vec<DeliveryOutcome> {
        let mut inflight = self.inflight.lock().await;
        let mut outcomes = Vec::new();
        while let Some(joined) = inflight.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(?err, "notification task panicked"),
            }
        }
        outcomes
    }
}

async fn deliver_with_retry(
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    delivery: Delivery,
) -> DeliveryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0usize;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;
        match notifier
            .send(delivery.channel, &delivery.recipient, &delivery.message)
            .await
        {
            Ok(()) => {
                return DeliveryOutcome {
                    delivery,
                    attempts: attempt,
                    error: None,
                }
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(
                    instance_id = %delivery.message.instance_id,
                    channel = %delivery.channel,
                    recipient = %delivery.recipient.user_id,
                    attempt,
                    ?err,
                    "notification delivery failed; retrying"
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                error!(
                    instance_id = %delivery.message.instance_id,
                    channel = %delivery.channel,
                    recipient = %delivery.recipient.user_id,
                    attempt,
                    ?err,
                    "notification delivery gave up"
                );
                return DeliveryOutcome {
                    delivery,
                    attempts: attempt,
                    error: Some(err.to_string()),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn delivery() -> Delivery {
        Delivery {
            channel: NotificationChannel::Email,
            recipient: Contact::new("U1").with_email("u1@uni.example"),
            message: NotificationMessage {
                subject: "Step overdue".into(),
                body: "Please review".into(),
                instance_id: Uuid::new_v4(),
                step_id: None,
                rule_id: Some("warn".into()),
            },
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut notifier = MockNotifier::new();
        notifier.expect_send().times(2).returning(move |_, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(NotificationError::Send("connection reset".into()))
            } else {
                Ok(())
            }
        });

        let dispatcher = NotificationDispatcher::new(Arc::new(notifier), fast_policy());
        dispatcher.dispatch(delivery()).await;
        let outcomes = dispatcher.drain().await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].delivered());
        assert_eq!(outcomes[0].attempts, 2);
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .times(3)
            .returning(|_, _, _| Err(NotificationError::Send("smtp down".into())));

        let dispatcher = NotificationDispatcher::new(Arc::new(notifier), fast_policy());
        dispatcher.dispatch(delivery()).await;
        let outcomes = dispatcher.drain().await;

        assert_eq!(outcomes[0].attempts, 3);
        assert!(!outcomes[0].delivered());
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().times(1).returning(|channel, _, _| {
            Err(NotificationError::ChannelDisabled(channel))
        });

        let dispatcher = NotificationDispatcher::new(Arc::new(notifier), fast_policy());
        dispatcher.dispatch(delivery()).await;
        let outcomes = dispatcher.drain().await;

        assert_eq!(outcomes[0].attempts, 1);
        assert_eq!(
            outcomes[0].error.as_deref(),
            Some("channel `email` is not configured")
        );
    }
}
