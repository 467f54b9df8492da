use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notify_relay::{
    api::run_api_server,
    clients::{
        consumer::Consumer, fcm::FcmPushSender, health::HealthChecker, inapp::InAppSender,
        publisher::Publisher, rbmq::RabbitMqHub, transport::Transport,
    },
    config::Config,
    dispatcher::Dispatcher,
    handlers::{auth::AuthenticationHandler, notify::NotificationCommandHandler},
    utils::init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing(config.log_format);

    info!(service = %config.service_name, "Starting notification relay");

    let shutdown = CancellationToken::new();

    let hub = Arc::new(RabbitMqHub::from_config(&config));
    let transport = Transport::new(hub, config.transport_config());
    let consumer = Consumer::new(Arc::clone(&transport))?;
    let publisher = Arc::new(Publisher::new(Arc::clone(&transport)));

    let mut dispatcher = Dispatcher::new(config.retry_config()).with_sender(Arc::new(
        InAppSender::new(
            Arc::clone(&publisher),
            config.service_name.clone(),
            shutdown.clone(),
        ),
    ));
    match FcmPushSender::from_config(&config) {
        Some(fcm) => dispatcher = dispatcher.with_sender(Arc::new(fcm)),
        None => warn!("FCM_PROJECT_ID not set, push channel disabled"),
    }
    let dispatcher = Arc::new(dispatcher);

    Arc::new(NotificationCommandHandler::new(
        Arc::clone(&dispatcher),
        shutdown.clone(),
    ))
    .register(&consumer)
    .await?;

    Arc::new(AuthenticationHandler::new(
        Arc::clone(&publisher),
        config.auth_notification_channels.clone(),
        shutdown.clone(),
    ))
    .register(&consumer)
    .await?;

    let health_checker = HealthChecker::new(Arc::clone(&transport), Arc::clone(&dispatcher));
    let server = tokio::spawn(run_api_server(
        health_checker,
        config.server_port,
        shutdown.clone(),
    ));

    info!(topics = ?consumer.topics(), "Worker is ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    transport.shutdown().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Health server failed"),
        Err(e) => error!(error = %e, "Health server task panicked"),
    }

    info!("Notification relay stopped");
    Ok(())
}
