use std::sync::Arc;

use anyhow::Result;
use notify_relay::{
    clients::fcm::{FcmPushSender, PUSH_TOKEN_KEY, TokenSource},
    dispatcher::{ChannelSender, Dispatcher},
    models::{
        delivery::{ChannelDelivery, DeliveryStatus},
        notification::{Notification, NotificationChannel},
    },
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

use crate::common::instant_retries;

const DEVICE_TOKEN: &str = "dGVzdF9kZXZpY2VfdG9rZW5fMTIzNDU2Nzg5MA:APA91b";
const SEND_PATH: &str = "/v1/projects/test-project/messages:send";

fn sender(server: &MockServer) -> FcmPushSender {
    FcmPushSender::new("test-project", TokenSource::Static("static-token".to_string()))
        .with_base_url(server.uri())
}

fn push_notification(token: Option<&str>) -> Notification {
    let notification = Notification::new(
        "user-1",
        "Security alert",
        "New sign-in detected",
        [ChannelDelivery::new(NotificationChannel::Push)],
    )
    .with_data("screen", "security");

    match token {
        Some(token) => notification.with_data(PUSH_TOKEN_KEY, token),
        None => notification,
    }
}

/// Test: A successful FCM call yields a successful result with the message name
#[tokio::test]
async fn test_fcm_send_success() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("authorization", "Bearer static-token"))
        .and(body_partial_json(json!({
            "message": {
                "token": DEVICE_TOKEN,
                "notification": {"title": "Security alert", "body": "New sign-in detected"},
                "data": {"screen": "security"}
            }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "projects/test-project/messages/0:123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let notification = push_notification(Some(DEVICE_TOKEN));
    let result = sender(&server).send(&notification).await?;

    assert!(result.success);
    assert_eq!(
        result.metadata["message_name"],
        "projects/test-project/messages/0:123"
    );

    Ok(())
}

/// Test: Provider errors become unsuccessful results, not panics
#[tokio::test]
async fn test_fcm_send_failure_is_reported() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let notification = push_notification(Some(DEVICE_TOKEN));
    let result = sender(&server).send(&notification).await?;

    assert!(!result.success);
    let error = result.error_message.unwrap_or_default();
    assert!(error.contains("503"), "unexpected error: {}", error);
    assert!(error.contains("backend unavailable"));

    Ok(())
}

/// Test: Push validation requires a well-formed device token
#[tokio::test]
async fn test_fcm_validation() -> Result<()> {
    let server = MockServer::start().await;
    let sender = sender(&server);

    assert!(sender.validate(&push_notification(Some(DEVICE_TOKEN))).await);
    assert!(!sender.validate(&push_notification(None)).await);
    assert!(!sender.validate(&push_notification(Some("short"))).await);
    assert!(!sender.validate(&push_notification(Some("has spaces in the device token"))).await);

    Ok(())
}

/// Test: The dispatcher schedules a retry after an FCM outage
#[tokio::test]
async fn test_dispatcher_retries_fcm_outage() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "m/1"})))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(instant_retries()).with_sender(Arc::new(sender(&server)));
    let cancel = CancellationToken::new();
    let mut notification = push_notification(Some(DEVICE_TOKEN));

    let first = dispatcher.send(&mut notification, &cancel).await?;
    assert!(!first.success);
    assert_eq!(first.pending_retries, 1);

    let second = dispatcher.send(&mut notification, &cancel).await?;
    assert!(second.success);

    let entry = &notification.channels[0];
    assert_eq!(entry.status(), DeliveryStatus::Sent);
    assert_eq!(entry.retry_count(), 1);
    assert_eq!(entry.metadata()["provider"], "fcm");

    Ok(())
}
