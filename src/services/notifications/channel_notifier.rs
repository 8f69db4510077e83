use async_trait::async_trait;

use super::{MessagingNotifier, NotificationError, NotificationMessage, Notifier, SmtpMailer};
use crate::models::escalation::NotificationChannel;
use crate::services::directory::Contact;

/// Routes each channel to the transport that serves it.
#[derive(Clone)]
pub struct ChannelNotifier {
    email: Option<SmtpMailer>,
    messaging: MessagingNotifier,
}

impl ChannelNotifier {
    pub fn new(email: Option<SmtpMailer>, messaging: MessagingNotifier) -> Self {
        Self { email, messaging }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &Contact,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        match channel {
            NotificationChannel::Email => match &self.email {
                Some(mailer) => mailer.send(channel, recipient, message).await,
                None => Err(NotificationError::ChannelDisabled(channel)),
            },
            _ => self.messaging.send(channel, recipient, message).await,
        }
    }
}
