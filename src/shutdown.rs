use tokio::signal;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// A subsystem cannot continue; the whole pipeline has to stop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardError {
    #[error("Invalid chat credentials: {reason}")]
    InvalidChatCredentials { reason: String },
    #[error("Playlist is not public, cannot use it: {name}")]
    PlaylistNotPublic { name: String },
    #[error("Failed getting playlist {playlist_id}: {reason}")]
    PlaylistUnavailable { playlist_id: String, reason: String },
    #[error("Callback server failed: {reason}")]
    CallbackServer { reason: String },
    #[error("Authorization was aborted before a client was delivered")]
    AuthorizationAborted,
}

/// Escalation side of the hard-error channel. Only the first error is kept.
#[derive(Debug, Clone)]
pub struct HardErrorSender {
    tx: mpsc::Sender<HardError>,
}

impl HardErrorSender {
    pub fn escalate(&self, error: HardError) {
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(error)) => {
                tracing::warn!(%error, "Hard error already pending, dropping");
            }
            Err(TrySendError::Closed(error)) => {
                tracing::warn!(%error, "Hard error raised after shutdown, dropping");
            }
        }
    }
}

pub fn hard_error_channel() -> (HardErrorSender, mpsc::Receiver<HardError>) {
    let (tx, rx) = mpsc::channel(1);
    (HardErrorSender { tx }, rx)
}

/// Cancels `cancel` on Ctrl+C or SIGTERM.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_hard_error_wins() {
        let (sender, mut rx) = hard_error_channel();

        sender.escalate(HardError::InvalidChatCredentials {
            reason: "invalid_auth".into(),
        });
        sender.clone().escalate(HardError::AuthorizationAborted);

        assert_eq!(
            rx.recv().await,
            Some(HardError::InvalidChatCredentials {
                reason: "invalid_auth".into()
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_escalate_after_receiver_dropped_does_not_panic() {
        let (sender, rx) = hard_error_channel();
        drop(rx);
        sender.escalate(HardError::AuthorizationAborted);
    }

    #[tokio::test]
    async fn test_receiver_sees_end_when_all_senders_dropped() {
        let (sender, mut rx) = hard_error_channel();
        drop(sender);
        assert_eq!(rx.recv().await, None);
    }
}
