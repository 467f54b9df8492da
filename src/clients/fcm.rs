use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    dispatcher::ChannelSender,
    models::{
        fcm::{FcmMessage, FcmNotification, FcmRequest, FcmResponse},
        notification::{Notification, NotificationChannel},
        result::NotificationResult,
        validation::validate_push_token,
    },
};

pub const PUSH_TOKEN_KEY: &str = "push_token";

const FCM_BASE_URL: &str = "https://fcm.googleapis.com";
const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

pub enum TokenSource {
    /// Application default credentials through `gcp_auth`.
    GoogleCloud,
    Static(String),
}

impl TokenSource {
    async fn bearer(&self) -> Result<String, Error> {
        match self {
            TokenSource::GoogleCloud => {
                let provider = gcp_auth::provider().await?;
                let token = provider.token(FCM_SCOPES).await?;
                Ok(token.as_str().to_string())
            }
            TokenSource::Static(token) => Ok(token.clone()),
        }
    }
}

/// Push channel backed by Firebase Cloud Messaging (HTTP v1).
///
/// The device token comes from the notification's `push_token` data entry.
pub struct FcmPushSender {
    http_client: Client,
    project_id: String,
    base_url: String,
    token_source: TokenSource,
}

impl FcmPushSender {
    pub fn new(project_id: impl Into<String>, token_source: TokenSource) -> Self {
        Self {
            http_client: Client::new(),
            project_id: project_id.into(),
            base_url: FCM_BASE_URL.to_string(),
            token_source,
        }
    }

    /// `None` when no FCM project is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let project_id = config.fcm_project_id.clone()?;
        info!(project_id = %project_id, "FCM push sender initialized");

        let sender = Self::new(project_id, TokenSource::GoogleCloud);
        Some(match &config.fcm_base_url {
            Some(base_url) => sender.with_base_url(base_url),
            None => sender,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        )
    }

    fn build_request(&self, notification: &Notification, device_token: &str) -> FcmRequest {
        let mut data: HashMap<String, String> = notification
            .data
            .iter()
            .filter(|(key, _)| key.as_str() != PUSH_TOKEN_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        data.insert("notification_id".to_string(), notification.id.to_string());

        FcmRequest {
            message: FcmMessage {
                token: device_token.to_string(),
                notification: FcmNotification {
                    title: notification.title.clone(),
                    body: notification.message.clone(),
                },
                data: Some(data),
            },
        }
    }
}

#[async_trait]
impl ChannelSender for FcmPushSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Push
    }

    async fn validate(&self, notification: &Notification) -> bool {
        match notification.data.get(PUSH_TOKEN_KEY) {
            Some(token) => match validate_push_token(token) {
                Ok(()) => true,
                Err(e) => {
                    warn!(notification_id = %notification.id, error = %e, "Invalid push token");
                    false
                }
            },
            None => {
                warn!(notification_id = %notification.id, "Push notification has no device token");
                false
            }
        }
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult, Error> {
        let device_token = notification
            .data
            .get(PUSH_TOKEN_KEY)
            .ok_or_else(|| anyhow!("Push notification has no device token"))?;

        debug!(notification_id = %notification.id, "Sending FCM push notification");

        let bearer = self.token_source.bearer().await?;
        let request = self.build_request(notification, device_token);

        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(bearer)
            .json(&request)
            .send()
            .await?;

        if response.status().is_success() {
            let body: FcmResponse = response.json().await?;
            info!(notification_id = %notification.id, "FCM push notification sent successfully");

            let mut result =
                NotificationResult::success(notification.id).with_metadata("provider", "fcm");
            if let Some(name) = body.name {
                result = result.with_metadata("message_name", name);
            }
            Ok(result)
        } else {
            let status = response.status();
            let error_text = response.text().await?;
            Ok(NotificationResult::failure(
                notification.id,
                format!("FCM request failed ({}): {}", status, error_text),
            ))
        }
    }
}
