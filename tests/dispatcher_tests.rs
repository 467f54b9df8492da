use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use notify_relay::{
    dispatcher::{ChannelSender, Dispatcher},
    error::MessagingError,
    models::{
        delivery::{ChannelDelivery, DeliveryStatus},
        notification::{Notification, NotificationChannel},
        result::{DispatchStatus, NotificationResult},
        retry::RetryConfig,
    },
};
use tokio_util::sync::CancellationToken;

use crate::common::{RecordingSender, instant_retries};

fn notification(channels: &[NotificationChannel]) -> Notification {
    Notification::new(
        "user-42",
        "Order shipped",
        "Your order is on its way",
        channels.iter().map(|channel| ChannelDelivery::new(*channel)),
    )
}

/// Test: A channel that always fails is attempted exactly max_retries + 1 times
#[tokio::test]
async fn test_retry_bound_is_four_attempts() -> Result<()> {
    let push = Arc::new(RecordingSender::failing(NotificationChannel::Push));
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(push.clone());
    let cancel = CancellationToken::new();

    let mut notification = notification(&[NotificationChannel::Push]);

    for cycle in 1..=6 {
        let result = dispatcher.send(&mut notification, &cancel).await?;
        assert!(!result.success, "cycle {} should fail", cycle);
    }

    assert_eq!(push.call_count(), 4);

    let entry = notification
        .delivery(NotificationChannel::Push)
        .expect("push entry");
    assert_eq!(entry.status(), DeliveryStatus::Failed);
    assert_eq!(entry.retry_count(), 4);
    assert!(entry.next_retry_at().is_none());
    assert!(!entry.can_retry());
    assert!(entry.is_terminal());
    assert!(notification.is_completely_failed());

    Ok(())
}

/// Test: A failing channel recovers on a later cycle
#[tokio::test]
async fn test_transient_failure_then_success() -> Result<()> {
    let push = Arc::new(RecordingSender::new(NotificationChannel::Push).failing_first(2));
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(push.clone());
    let cancel = CancellationToken::new();

    let mut notification = notification(&[NotificationChannel::Push]);

    let first = dispatcher.send(&mut notification, &cancel).await?;
    assert!(!first.success);
    assert_eq!(first.pending_retries, 1);
    assert!(first.failed_channels.is_empty());

    dispatcher.send(&mut notification, &cancel).await?;
    let third = dispatcher.send(&mut notification, &cancel).await?;

    assert!(third.success);
    assert_eq!(third.delivered_channels, vec!["Push"]);
    assert_eq!(push.call_count(), 3);

    let entry = notification
        .delivery(NotificationChannel::Push)
        .expect("push entry");
    assert_eq!(entry.status(), DeliveryStatus::Sent);
    assert_eq!(entry.retry_count(), 2);
    assert!(entry.sent_at().is_some());
    assert_eq!(entry.metadata()["attempt"], 3);

    // Sent is absorbing.
    dispatcher.send(&mut notification, &cancel).await?;
    assert_eq!(push.call_count(), 3);

    Ok(())
}

/// Test: Expired notifications never reach a channel
#[tokio::test]
async fn test_expired_notification_short_circuits() -> Result<()> {
    let in_app = Arc::new(RecordingSender::new(NotificationChannel::InApp));
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(in_app.clone());

    let mut notification = notification(&[NotificationChannel::InApp])
        .expiring_at(Utc::now() - chrono::Duration::minutes(1));

    let result = dispatcher
        .send(&mut notification, &CancellationToken::new())
        .await?;

    assert!(!result.success);
    assert_eq!(result.status, DispatchStatus::Expired);
    assert_eq!(result.error_message.as_deref(), Some("Notification has expired"));
    assert_eq!(in_app.call_count(), 0);
    assert_eq!(notification.channels[0].status(), DeliveryStatus::Pending);

    Ok(())
}

/// Test: Notifications scheduled in the future are reported as scheduled
#[tokio::test]
async fn test_scheduled_notification_short_circuits() -> Result<()> {
    let in_app = Arc::new(RecordingSender::new(NotificationChannel::InApp));
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(in_app.clone());

    let mut notification = notification(&[NotificationChannel::InApp])
        .scheduled_for(Utc::now() + chrono::Duration::hours(1));

    let result = dispatcher
        .send(&mut notification, &CancellationToken::new())
        .await?;

    assert!(result.success);
    assert!(result.is_scheduled());
    assert!(result.metadata.contains_key("scheduled_at"));
    assert_eq!(in_app.call_count(), 0);

    Ok(())
}

/// Test: One delivered channel makes the notification a success, before and after the other runs out of retries
#[tokio::test]
async fn test_partial_delivery_aggregation() -> Result<()> {
    let in_app = Arc::new(RecordingSender::new(NotificationChannel::InApp));
    let push = Arc::new(RecordingSender::failing(NotificationChannel::Push));
    let dispatcher = Dispatcher::new(instant_retries())
        .with_sender(in_app.clone())
        .with_sender(push.clone());

    let mut notification = notification(&[NotificationChannel::InApp, NotificationChannel::Push]);

    let result = dispatcher
        .send(&mut notification, &CancellationToken::new())
        .await?;

    assert!(result.success);
    assert_eq!(result.delivered_channels, vec!["InApp"]);
    assert!(result.failed_channels.is_empty());
    assert_eq!(result.pending_retries, 1);
    assert_eq!(result.metadata["total_channels"], 2);
    assert_eq!(result.metadata["successful_channels"], 1);
    assert_eq!(result.metadata["is_partially_delivered"], true);
    assert_eq!(result.metadata["is_fully_delivered"], false);
    assert!(notification.is_partially_delivered());

    let cancel = CancellationToken::new();
    let mut result = result;
    for _ in 0..3 {
        result = dispatcher.send(&mut notification, &cancel).await?;
    }

    assert!(result.success);
    assert_eq!(result.delivered_channels, vec!["InApp"]);
    assert_eq!(result.failed_channels, vec!["Push"]);
    assert_eq!(result.pending_retries, 0);
    assert_eq!(result.metadata["failed_channels"], 1);
    assert_eq!(result.metadata["is_partially_delivered"], true);
    assert_eq!(push.call_count(), 4);
    assert_eq!(in_app.call_count(), 1);
    assert!(!notification.channels[1].can_retry());

    Ok(())
}

/// Test: A channel without a sender fails permanently
#[tokio::test]
async fn test_missing_sender_is_permanent() -> Result<()> {
    let in_app = Arc::new(RecordingSender::new(NotificationChannel::InApp));
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(in_app.clone());
    let cancel = CancellationToken::new();

    let mut notification = notification(&[NotificationChannel::Email]);

    let result = dispatcher.send(&mut notification, &cancel).await?;

    assert!(!result.success);
    assert_eq!(result.failed_channels, vec!["Email"]);
    assert_eq!(result.pending_retries, 0);

    let entry = &notification.channels[0];
    assert_eq!(entry.status(), DeliveryStatus::Failed);
    assert_eq!(entry.retry_count(), 1);
    assert!(entry.is_terminal());
    assert!(entry.last_error().unwrap_or_default().contains("No sender"));

    dispatcher.send(&mut notification, &cancel).await?;
    assert_eq!(notification.channels[0].retry_count(), 1);

    Ok(())
}

/// Test: A notification that fails validation is never sent and never retried
#[tokio::test]
async fn test_validation_failure_is_permanent() -> Result<()> {
    let push = Arc::new(RecordingSender::new(NotificationChannel::Push).invalid());
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(push.clone());
    let cancel = CancellationToken::new();

    let mut notification = notification(&[NotificationChannel::Push]);

    let result = dispatcher.send(&mut notification, &cancel).await?;
    dispatcher.send(&mut notification, &cancel).await?;

    assert!(!result.success);
    assert_eq!(result.failed_channels, vec!["Push"]);
    assert_eq!(push.call_count(), 0);
    assert!(notification.channels[0].is_terminal());

    Ok(())
}

/// Test: A failed channel waits for its backoff window
#[tokio::test]
async fn test_retry_waits_for_backoff() -> Result<()> {
    let push = Arc::new(RecordingSender::failing(NotificationChannel::Push));
    let dispatcher = Dispatcher::new(RetryConfig {
        max_retries: 3,
        initial_delay_ms: 60_000,
        max_delay_ms: 300_000,
        backoff_multiplier: 2,
    })
    .with_sender(push.clone());
    let cancel = CancellationToken::new();

    let mut notification = notification(&[NotificationChannel::Push]);

    dispatcher.send(&mut notification, &cancel).await?;
    let second = dispatcher.send(&mut notification, &cancel).await?;

    assert_eq!(push.call_count(), 1);
    assert_eq!(second.pending_retries, 1);

    let next_retry_at = notification.channels[0]
        .next_retry_at()
        .expect("retry scheduled");
    assert!(next_retry_at > Utc::now() + chrono::Duration::seconds(50));

    Ok(())
}

/// Test: A second concurrent send for the same notification is rejected
#[tokio::test]
async fn test_single_flight_per_notification() -> Result<()> {
    let in_app = Arc::new(
        RecordingSender::new(NotificationChannel::InApp).slow(Duration::from_millis(200)),
    );
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(in_app.clone());
    let cancel = CancellationToken::new();

    let mut original = notification(&[NotificationChannel::InApp]);
    let mut copy = original.clone();

    let (first, second) = tokio::join!(dispatcher.send(&mut original, &cancel), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.send(&mut copy, &cancel).await
    });

    assert!(first?.success);
    let second = second?;
    assert!(!second.success);
    assert_eq!(second.status, DispatchStatus::InFlight);
    assert_eq!(in_app.call_count(), 1);

    Ok(())
}

/// Test: Cancellation records the interrupted attempt and reports an error
#[tokio::test]
async fn test_cancellation_keeps_recorded_state() -> Result<()> {
    let push = Arc::new(RecordingSender::new(NotificationChannel::Push).slow(Duration::from_secs(10)));
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(push.clone());
    let cancel = CancellationToken::new();

    let mut notification = notification(&[NotificationChannel::Push]);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = dispatcher.send(&mut notification, &cancel).await;

    assert!(matches!(result, Err(MessagingError::Cancelled)));

    let entry = &notification.channels[0];
    assert_eq!(entry.status(), DeliveryStatus::Failed);
    assert_eq!(entry.retry_count(), 1);
    assert_eq!(entry.last_error(), Some("Operation was cancelled"));
    assert!(entry.can_retry());

    Ok(())
}

/// Sender that fires the token as part of a successful send.
struct CancelAfterSend {
    cancel: CancellationToken,
}

#[async_trait]
impl ChannelSender for CancelAfterSend {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::InApp
    }

    async fn validate(&self, _notification: &Notification) -> bool {
        true
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        self.cancel.cancel();
        Ok(NotificationResult::success(notification.id))
    }
}

/// Test: A token fired after every attempt finished keeps the computed result
#[tokio::test]
async fn test_cancellation_after_completion_keeps_result() -> Result<()> {
    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(Arc::new(CancelAfterSend {
        cancel: cancel.clone(),
    }));

    let mut notification = notification(&[NotificationChannel::InApp]);

    let result = dispatcher.send(&mut notification, &cancel).await?;

    assert!(cancel.is_cancelled());
    assert!(result.success);
    assert_eq!(result.delivered_channels, vec!["InApp"]);
    assert_eq!(notification.channels[0].status(), DeliveryStatus::Sent);

    Ok(())
}

/// Test: Batches return one result per notification in order
#[tokio::test]
async fn test_send_batch() -> Result<()> {
    let in_app = Arc::new(RecordingSender::new(NotificationChannel::InApp));
    let dispatcher = Dispatcher::new(instant_retries()).with_sender(in_app.clone());

    let mut batch = vec![
        notification(&[NotificationChannel::InApp]),
        notification(&[NotificationChannel::Email]),
        notification(&[NotificationChannel::InApp])
            .expiring_at(Utc::now() - chrono::Duration::seconds(1)),
    ];
    let ids: Vec<_> = batch.iter().map(|n| n.id).collect();

    let results = dispatcher
        .send_batch(&mut batch, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    let results: Vec<_> = results.into_iter().collect::<Result<_, _>>()?;

    assert_eq!(
        results.iter().map(|r| r.notification_id).collect::<Vec<_>>(),
        ids
    );
    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results[2].status, DispatchStatus::Expired);
    assert_eq!(in_app.call_count(), 1);

    Ok(())
}
