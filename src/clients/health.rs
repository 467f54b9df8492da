use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::{
    clients::transport::Transport,
    dispatcher::Dispatcher,
    models::{
        health::{HealthCheckResponse, HealthStatus, TransportHealth},
        status::ConnectionState,
    },
};

pub struct HealthChecker {
    transport: Arc<Transport>,
    dispatcher: Arc<Dispatcher>,
}

impl HealthChecker {
    pub fn new(transport: Arc<Transport>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            transport,
            dispatcher,
        }
    }

    pub fn check_all(&self) -> HealthCheckResponse {
        let state = self.transport.state();
        let subscribed_topics = self.transport.registry().topics();

        let error = match state {
            ConnectionState::Disconnected => Some("Not connected to messaging hub".to_string()),
            ConnectionState::Reconnecting => Some("Connection lost, reconnecting".to_string()),
            ConnectionState::Connecting | ConnectionState::Connected => None,
        };

        debug!(
            transport_state = %state,
            topics = subscribed_topics.len(),
            "Health check evaluated"
        );

        HealthCheckResponse {
            status: HealthStatus::from(state),
            service_name: self.transport.service_name().to_string(),
            timestamp: Utc::now(),
            transport: TransportHealth {
                state,
                subscribed_topics,
                error,
            },
            channels: self
                .dispatcher
                .channels()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}
