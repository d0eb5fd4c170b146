use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{ChatEvent, ChatMessage, TrackId};
use crate::services::extractor::TrackExtractor;
use crate::shutdown::{HardError, HardErrorSender};

/// Why the listener returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    Cancelled,
    /// The transport closed the event stream.
    StreamClosed,
    InvalidAuth,
    /// The playlist worker is gone, nobody consumes tracks anymore.
    QueueClosed,
}

/// Turns chat events into queued track ids.
pub struct ChatListener {
    extractor: Arc<dyn TrackExtractor>,
    tracks: mpsc::Sender<TrackId>,
    hard_errors: HardErrorSender,
    cancel: CancellationToken,
}

impl ChatListener {
    pub fn new(
        extractor: Arc<dyn TrackExtractor>,
        tracks: mpsc::Sender<TrackId>,
        hard_errors: HardErrorSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            extractor,
            tracks,
            hard_errors,
            cancel,
        }
    }

    pub async fn run(self, mut events: mpsc::Receiver<ChatEvent>) -> ListenerExit {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Chat listener cancelled");
                    return ListenerExit::Cancelled;
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                tracing::info!("Chat event stream closed");
                return ListenerExit::StreamClosed;
            };

            match event {
                ChatEvent::Connected {
                    connection_count,
                    app_id,
                } => {
                    tracing::info!(connection_count, ?app_id, "Connected to chat");
                }
                ChatEvent::Message(message) => {
                    if let Err(exit) = self.process_message(&message).await {
                        return exit;
                    }
                }
                ChatEvent::ProtocolError(error) => {
                    tracing::warn!(%error, "Chat protocol error");
                }
                ChatEvent::InvalidAuth(reason) => {
                    tracing::error!(%reason, "Invalid credentials");
                    self.hard_errors
                        .escalate(HardError::InvalidChatCredentials { reason });
                    return ListenerExit::InvalidAuth;
                }
                ChatEvent::Other(kind) => {
                    tracing::trace!(%kind, "Ignoring chat event");
                }
            }
        }
    }

    /// Pushes every track found in `message`, waiting for queue capacity.
    async fn process_message(&self, message: &ChatMessage) -> Result<(), ListenerExit> {
        for track in self.extractor.extract(message) {
            tracing::info!(%track, channel = ?message.channel, user = ?message.user, "Pushing track");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Cancelled while waiting for queue capacity");
                    return Err(ListenerExit::Cancelled);
                }
                sent = self.tracks.send(track) => {
                    if let Err(mpsc::error::SendError(track)) = sent {
                        tracing::error!(%track, "Track queue closed, stopping chat listener");
                        return Err(ListenerExit::QueueClosed);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, AttachmentField};
    use crate::services::extractor::{AttachmentExtractor, HostMatching, LinkExtractor};
    use crate::shutdown::hard_error_channel;

    struct Harness {
        events: mpsc::Sender<ChatEvent>,
        tracks: mpsc::Receiver<TrackId>,
        hard_errors: mpsc::Receiver<HardError>,
        cancel: CancellationToken,
        listener: tokio::task::JoinHandle<ListenerExit>,
    }

    fn start(extractor: Arc<dyn TrackExtractor>, capacity: usize) -> Harness {
        let (events_tx, events_rx) = mpsc::channel(16);
        let (tracks_tx, tracks_rx) = mpsc::channel(capacity);
        let (hard_error_tx, hard_error_rx) = hard_error_channel();
        let cancel = CancellationToken::new();
        let listener = ChatListener::new(extractor, tracks_tx, hard_error_tx, cancel.clone());
        Harness {
            events: events_tx,
            tracks: tracks_rx,
            hard_errors: hard_error_rx,
            cancel,
            listener: tokio::spawn(listener.run(events_rx)),
        }
    }

    fn link_extractor() -> Arc<dyn TrackExtractor> {
        Arc::new(LinkExtractor::new("spotify.com", HostMatching::Strict))
    }

    fn message(text: &str) -> ChatEvent {
        ChatEvent::Message(ChatMessage::from_text(text))
    }

    #[tokio::test]
    async fn test_message_tracks_are_queued_in_order() {
        let mut harness = start(link_extractor(), 10);

        harness
            .events
            .send(ChatEvent::Connected {
                connection_count: 1,
                app_id: Some("A123".into()),
            })
            .await
            .unwrap();
        harness
            .events
            .send(message(
                "<https://open.spotify.com/track/A> <https://open.spotify.com/track/B>",
            ))
            .await
            .unwrap();
        harness
            .events
            .send(message("and https://open.spotify.com/track/C"))
            .await
            .unwrap();
        drop(harness.events);

        assert_eq!(harness.listener.await.unwrap(), ListenerExit::StreamClosed);
        for expected in ["A", "B", "C"] {
            assert_eq!(harness.tracks.recv().await, Some(TrackId::new(expected)));
        }
        assert!(harness.hard_errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_protocol_errors_and_other_events_are_not_fatal() {
        let mut harness = start(link_extractor(), 10);

        harness
            .events
            .send(ChatEvent::ProtocolError("socket reset".into()))
            .await
            .unwrap();
        harness
            .events
            .send(ChatEvent::Other("reaction_added".into()))
            .await
            .unwrap();
        harness
            .events
            .send(message("no links here"))
            .await
            .unwrap();
        harness
            .events
            .send(message("https://open.spotify.com/track/abc123"))
            .await
            .unwrap();

        assert_eq!(harness.tracks.recv().await, Some(TrackId::new("abc123")));
        drop(harness.events);
        assert_eq!(harness.listener.await.unwrap(), ListenerExit::StreamClosed);
        assert!(harness.hard_errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_auth_escalates_and_stops() {
        let mut harness = start(link_extractor(), 10);

        harness
            .events
            .send(ChatEvent::InvalidAuth("invalid_auth".into()))
            .await
            .unwrap();
        // Never looked at: the listener is gone by then
        let _ = harness
            .events
            .send(message("https://open.spotify.com/track/late"))
            .await;

        assert_eq!(harness.listener.await.unwrap(), ListenerExit::InvalidAuth);
        assert_eq!(
            harness.hard_errors.recv().await,
            Some(HardError::InvalidChatCredentials {
                reason: "invalid_auth".into()
            })
        );
        assert_eq!(harness.tracks.recv().await, None);
    }

    #[tokio::test]
    async fn test_cancel_while_queue_is_full() {
        let harness = start(link_extractor(), 1);

        harness
            .events
            .send(message(
                "https://open.spotify.com/track/A https://open.spotify.com/track/B",
            ))
            .await
            .unwrap();
        // Let the listener fill the queue and block on the second track
        tokio::task::yield_now().await;
        harness.cancel.cancel();

        assert_eq!(harness.listener.await.unwrap(), ListenerExit::Cancelled);
    }

    #[test]
    fn test_run_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}

        let (_events_tx, events_rx) = mpsc::channel(1);
        let (tracks_tx, _tracks_rx) = mpsc::channel(1);
        let (hard_error_tx, _hard_error_rx) = hard_error_channel();
        let listener = ChatListener::new(
            link_extractor(),
            tracks_tx,
            hard_error_tx,
            CancellationToken::new(),
        );

        assert_send(&listener.run(events_rx));
    }

    #[tokio::test]
    async fn test_queue_closed_stops_listener() {
        let harness = start(link_extractor(), 10);
        drop(harness.tracks);

        harness
            .events
            .send(message("https://open.spotify.com/track/A"))
            .await
            .unwrap();

        assert_eq!(harness.listener.await.unwrap(), ListenerExit::QueueClosed);
    }

    #[tokio::test]
    async fn test_attachment_strategy() {
        let mut harness = start(Arc::new(AttachmentExtractor::new("Spotify")), 10);

        harness
            .events
            .send(ChatEvent::Message(ChatMessage {
                attachments: vec![Attachment {
                    fields: vec![
                        AttachmentField::new("service", "Spotify"),
                        AttachmentField::new("title_link", "https://open.spotify.com/track/xyz789"),
                    ],
                    ..Attachment::default()
                }],
                ..ChatMessage::default()
            }))
            .await
            .unwrap();

        assert_eq!(harness.tracks.recv().await, Some(TrackId::new("xyz789")));
        harness.cancel.cancel();
        assert_eq!(harness.listener.await.unwrap(), ListenerExit::Cancelled);
    }
}
