use std::sync::Mutex;

use async_trait::async_trait;

use super::{NotificationError, NotificationMessage, Notifier};
use crate::models::escalation::NotificationChannel;
use crate::services::directory::Contact;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: String,
    pub rule_id: Option<String>,
}

/// A notifier that records deliveries instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<RecordedNotification>>,
    pub fail_send: bool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<RecordedNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &Contact,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        if self.fail_send {
            return Err(NotificationError::Send("mock failure".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(RecordedNotification {
                channel,
                recipient: recipient.user_id.clone(),
                subject: message.subject.clone(),
                rule_id: message.rule_id.clone(),
            });
        }
        Ok(())
    }
}
