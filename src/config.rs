use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    clients::transport::TransportConfig,
    models::{notification::NotificationChannel, retry::RetryConfig},
};

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub service_name: String,

    pub rabbitmq_url: String,
    #[serde(default = "default_exchange_name")]
    pub hub_exchange_name: String,
    pub prefetch_count: u16,
    pub inbound_queue_capacity: usize,
    pub max_reconnect_attempts: Option<u32>,

    pub max_delivery_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_auth_channels")]
    pub auth_notification_channels: Vec<NotificationChannel>,

    pub fcm_project_id: Option<String>,
    pub fcm_base_url: Option<String>,

    pub server_port: u16,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_exchange_name() -> String {
    "notify_relay.topics".to_string()
}

fn default_auth_channels() -> Vec<NotificationChannel> {
    vec![NotificationChannel::InApp]
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_delivery_retries,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            service_name: self.service_name.clone(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            inbound_capacity: self.inbound_queue_capacity,
            ..TransportConfig::default()
        }
    }
}
