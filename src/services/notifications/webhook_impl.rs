use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{NotificationError, NotificationMessage, Notifier};
use crate::models::escalation::NotificationChannel;
use crate::services::directory::Contact;

const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub api_base: String,
}

impl TelegramSettings {
    pub fn new(bot_token: &str, api_base: Option<&str>) -> Self {
        let api_base = api_base
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_TELEGRAM_API_BASE);
        Self {
            bot_token: bot_token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

/// Telegram via the Bot API; SMS and push through JSON webhooks of the
/// university's gateways.
#[derive(Clone, Default)]
pub struct MessagingNotifier {
    client: Client,
    telegram: Option<TelegramSettings>,
    sms_webhook_url: Option<String>,
    push_webhook_url: Option<String>,
}

impl MessagingNotifier {
    pub fn new(
        client: Client,
        telegram: Option<TelegramSettings>,
        sms_webhook_url: Option<String>,
        push_webhook_url: Option<String>,
    ) -> Self {
        Self {
            client,
            telegram,
            sms_webhook_url,
            push_webhook_url,
        }
    }

    async fn send_telegram(
        &self,
        settings: &TelegramSettings,
        chat_id: &str,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        let url = format!("{}/bot{}/sendMessage", settings.api_base, settings.bot_token);
        let text = format!("{}\n\n{}", message.subject, message.body);
        let response = self
            .client
            .post(url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;

        let status = response.status();
        let body_text = response.text().await?;
        let parsed: Option<Value> = serde_json::from_str(&body_text).ok();
        let is_ok = parsed
            .as_ref()
            .and_then(|v| v.get("ok"))
            .and_then(|v| v.as_bool())
            .unwrap_or_else(|| status.is_success());

        if !status.is_success() || !is_ok {
            let detail = parsed
                .as_ref()
                .and_then(|v| v.get("description"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| body_text.trim().to_string());
            return Err(NotificationError::Send(format!(
                "Telegram API error (status {}): {}",
                status.as_u16(),
                detail
            )));
        }
        Ok(())
    }

    async fn post_webhook(
        &self,
        url: &str,
        payload: Value,
        channel: NotificationChannel,
    ) -> Result<(), NotificationError> {
        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Send(format!(
                "{} gateway error (status {}): {}",
                channel,
                status.as_u16(),
                body.trim()
            )));
        }
        Ok(())
    }
}

fn required_address<'a>(
    value: Option<&'a str>,
    channel: NotificationChannel,
    recipient: &Contact,
) -> Result<&'a str, NotificationError> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| NotificationError::MissingAddress {
            channel,
            user_id: recipient.user_id.clone(),
        })
}

#[async_trait]
impl Notifier for MessagingNotifier {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &Contact,
        message: &NotificationMessage,
    ) -> Result<(), NotificationError> {
        match channel {
            NotificationChannel::Telegram => {
                let settings = self
                    .telegram
                    .as_ref()
                    .ok_or(NotificationError::ChannelDisabled(channel))?;
                let chat_id =
                    required_address(recipient.telegram_chat_id.as_deref(), channel, recipient)?;
                self.send_telegram(settings, chat_id, message).await
            }
            NotificationChannel::Sms => {
                let url = self
                    .sms_webhook_url
                    .as_deref()
                    .ok_or(NotificationError::ChannelDisabled(channel))?;
                let phone = required_address(recipient.phone.as_deref(), channel, recipient)?;
                let payload = json!({
                    "to": phone,
                    "text": format!("{}: {}", message.subject, message.body),
                });
                self.post_webhook(url, payload, channel).await
            }
            NotificationChannel::Push => {
                let url = self
                    .push_webhook_url
                    .as_deref()
                    .ok_or(NotificationError::ChannelDisabled(channel))?;
                let token = required_address(recipient.push_token.as_deref(), channel, recipient)?;
                let payload = json!({
                    "token": token,
                    "title": message.subject,
                    "body": message.body,
                    "data": {
                        "instance_id": message.instance_id,
                        "step_id": message.step_id,
                    },
                });
                self.post_webhook(url, payload, channel).await
            }
            NotificationChannel::Email => Err(NotificationError::ChannelDisabled(channel)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use uuid::Uuid;

    fn message() -> NotificationMessage {
        NotificationMessage {
            subject: "Approval overdue".into(),
            body: "Request is waiting for you".into(),
            instance_id: Uuid::new_v4(),
            step_id: Some(Uuid::new_v4()),
            rule_id: Some("warn".into()),
        }
    }

    fn contact() -> Contact {
        let mut contact = Contact::new("U1");
        contact.telegram_chat_id = Some("4242".into());
        contact.phone = Some("+7 900 000 00 00".into());
        contact
    }

    #[tokio::test]
    async fn telegram_posts_to_bot_api() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/botTOKEN/sendMessage")
                    .json_body_partial(r#"{"chat_id":"4242"}"#);
                then.status(200).json_body(json!({"ok": true}));
            })
            .await;

        let notifier = MessagingNotifier::new(
            Client::new(),
            Some(TelegramSettings::new("TOKEN", Some(&server.base_url()))),
            None,
            None,
        );
        notifier
            .send(NotificationChannel::Telegram, &contact(), &message())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn telegram_api_error_is_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/botTOKEN/sendMessage");
                then.status(429)
                    .json_body(json!({"ok": false, "description": "Too Many Requests"}));
            })
            .await;

        let notifier = MessagingNotifier::new(
            Client::new(),
            Some(TelegramSettings::new("TOKEN", Some(&server.base_url()))),
            None,
            None,
        );
        let err = notifier
            .send(NotificationChannel::Telegram, &contact(), &message())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Too Many Requests"));
    }

    #[tokio::test]
    async fn sms_webhook_receives_phone_and_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/sms")
                    .json_body_partial(r#"{"to":"+7 900 000 00 00"}"#);
                then.status(202);
            })
            .await;

        let notifier =
            MessagingNotifier::new(Client::new(), None, Some(server.url("/sms")), None);
        notifier
            .send(NotificationChannel::Sms, &contact(), &message())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unconfigured_channels_are_disabled() {
        let notifier = MessagingNotifier::default();
        let err = notifier
            .send(NotificationChannel::Push, &contact(), &message())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NotificationError::ChannelDisabled(NotificationChannel::Push)
        ));
        assert!(!err.is_retryable());
    }
}
