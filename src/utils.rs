use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{config::LogFormat, error::MessagingError};

/// Races `future` against `cancel`; a cancelled token wins ties.
pub async fn with_cancellation<F, T>(cancel: &CancellationToken, future: F) -> Result<T, MessagingError>
where
    F: Future<Output = Result<T, MessagingError>>,
{
    if cancel.is_cancelled() {
        return Err(MessagingError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MessagingError::Cancelled),
        result = future => result,
    }
}

/// `notify_relay::models::commands::SendNotificationCommand` -> `SendNotificationCommand`
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::commands::SendNotificationCommand;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<SendNotificationCommand>(), "SendNotificationCommand");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
        assert_eq!(short_type_name::<u32>(), "u32");
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = with_cancellation(&cancel, async { Ok::<_, MessagingError>(1) }).await;
        assert!(matches!(result, Err(MessagingError::Cancelled)));
    }

    #[tokio::test]
    async fn test_live_token_passes_result_through() {
        let cancel = CancellationToken::new();

        let result = with_cancellation(&cancel, async { Ok::<_, MessagingError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
