use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::models::ChatEvent;
use crate::slack::SlackError;
use crate::slack::types::{Acknowledge, ConnectionsOpenResponse, EventsApiPayload, SocketFrame};

const CONNECTIONS_OPEN_URL: &str = "https://slack.com/api/apps.connections.open";
const EVENT_BUFFER: usize = 32;

/// `apps.connections.open` error codes meaning the token will never work.
const AUTH_ERRORS: [&str; 5] = [
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// What a decoded frame asks the transport to do.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameAction {
    Emit(ChatEvent),
    /// Slack is about to drop this connection.
    Reconnect(Option<String>),
}

#[derive(Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Set when the frame has to be acknowledged.
    pub envelope_id: Option<String>,
    pub action: FrameAction,
}

#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    /// The receiving side of the event stream is gone.
    EventsClosed,
    Disconnected(Option<String>),
}

/// Keeps a Socket Mode connection alive and turns its frames into chat events.
pub struct SocketModeClient {
    app_token: String,
    http: Client,
    reconnect_delay: Duration,
}

impl SocketModeClient {
    pub fn new(app_token: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            app_token: app_token.into(),
            http: Client::new(),
            reconnect_delay,
        }
    }

    /// Starts the connection task. The returned stream ends on cancellation or
    /// after an `InvalidAuth` event.
    pub fn spawn(self, cancel: CancellationToken) -> mpsc::Receiver<ChatEvent> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(self.manage_connection(events_tx, cancel));
        events_rx
    }

    async fn manage_connection(self, events: mpsc::Sender<ChatEvent>, cancel: CancellationToken) {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                outcome = self.run_session(&events, &cancel) => outcome,
            };

            match outcome {
                Ok(SessionEnd::Cancelled) | Ok(SessionEnd::EventsClosed) => return,
                Ok(SessionEnd::Disconnected(reason)) => {
                    tracing::info!(?reason, "Slack requested a reconnect");
                }
                Err(SlackError::InvalidAuth(reason)) => {
                    tracing::error!(%reason, "Slack rejected the app token");
                    let _ = events.send(ChatEvent::InvalidAuth(reason)).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Slack connection failed, retrying in {:?}: {}",
                        self.reconnect_delay,
                        e
                    );
                    if events.send(ChatEvent::ProtocolError(e.to_string())).await.is_err() {
                        return;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    async fn open_connection(&self) -> Result<String, SlackError> {
        let response: ConnectionsOpenResponse = self
            .http
            .post(CONNECTIONS_OPEN_URL)
            .bearer_auth(&self.app_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        socket_url(response)
    }

    async fn run_session(
        &self,
        events: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, SlackError> {
        let url = self.open_connection().await?;
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SlackError::WebSocket(e.to_string()))?;
        tracing::debug!("Slack socket opened");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = socket.close(None).await {
                        tracing::debug!("Failed closing Slack socket: {}", e);
                    }
                    return Ok(SessionEnd::Cancelled);
                }
                message = socket.next() => message,
            };

            let text = match message {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    return Err(SlackError::WebSocket(format!(
                        "closed by server: {:?}",
                        frame
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SlackError::WebSocket(e.to_string())),
                None => return Err(SlackError::WebSocket("stream ended".to_string())),
            };

            let frame = match decode_frame(text.as_str()) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Skipping undecodable Slack frame: {}", e);
                    if events.send(ChatEvent::ProtocolError(e.to_string())).await.is_err() {
                        return Ok(SessionEnd::EventsClosed);
                    }
                    continue;
                }
            };

            if let Some(envelope_id) = &frame.envelope_id {
                let ack = serde_json::to_string(&Acknowledge { envelope_id })?;
                socket
                    .send(Message::Text(ack.into()))
                    .await
                    .map_err(|e| SlackError::WebSocket(e.to_string()))?;
            }

            match frame.action {
                FrameAction::Emit(event) => {
                    if events.send(event).await.is_err() {
                        return Ok(SessionEnd::EventsClosed);
                    }
                }
                FrameAction::Reconnect(reason) => return Ok(SessionEnd::Disconnected(reason)),
            }
        }
    }
}

/// Picks the WebSocket URL out of an `apps.connections.open` response.
pub fn socket_url(response: ConnectionsOpenResponse) -> Result<String, SlackError> {
    if !response.ok {
        let error = response.error.unwrap_or_else(|| "unknown_error".to_string());
        if AUTH_ERRORS.contains(&error.as_str()) {
            return Err(SlackError::InvalidAuth(error));
        }
        return Err(SlackError::Api(error));
    }
    response
        .url
        .ok_or_else(|| SlackError::Api("response is missing the socket url".to_string()))
}

pub fn decode_frame(text: &str) -> Result<DecodedFrame, SlackError> {
    let frame: SocketFrame = serde_json::from_str(text)?;

    let action = match frame.kind.as_str() {
        "hello" => FrameAction::Emit(ChatEvent::Connected {
            connection_count: frame.num_connections.unwrap_or_default(),
            app_id: frame.connection_info.and_then(|info| info.app_id),
        }),
        "disconnect" => FrameAction::Reconnect(frame.reason),
        "events_api" => {
            let payload = frame.payload.unwrap_or_default();
            let payload: EventsApiPayload = serde_json::from_value(payload)?;
            if payload.event.kind == "message" {
                tracing::trace!(subtype = ?payload.event.subtype, "Message event");
                FrameAction::Emit(ChatEvent::Message(payload.event.into()))
            } else {
                FrameAction::Emit(ChatEvent::Other(payload.event.kind))
            }
        }
        other => FrameAction::Emit(ChatEvent::Other(other.to_string())),
    };

    Ok(DecodedFrame {
        envelope_id: frame.envelope_id,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentField, ChatMessage, TrackId};
    use crate::services::extractor::{
        AttachmentExtractor, HostMatching, LinkExtractor, TrackExtractor,
    };

    fn open_response(json: &str) -> ConnectionsOpenResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_socket_url() {
        let url = socket_url(open_response(
            r#"{"ok": true, "url": "wss://wss-primary.slack.com/link/?ticket=abc"}"#,
        ))
        .unwrap();
        assert_eq!(url, "wss://wss-primary.slack.com/link/?ticket=abc");
    }

    #[test]
    fn test_socket_url_auth_errors() {
        for code in AUTH_ERRORS {
            let result = socket_url(open_response(&format!(r#"{{"ok": false, "error": "{code}"}}"#)));
            assert!(
                matches!(result, Err(SlackError::InvalidAuth(ref e)) if e == code),
                "{code} should be an auth error"
            );
        }
    }

    #[test]
    fn test_socket_url_other_errors() {
        let result = socket_url(open_response(r#"{"ok": false, "error": "ratelimited"}"#));
        assert!(matches!(result, Err(SlackError::Api(ref e)) if e == "ratelimited"));

        let result = socket_url(open_response(r#"{"ok": true}"#));
        assert!(matches!(result, Err(SlackError::Api(_))));
    }

    #[test]
    fn test_decode_hello() {
        let frame = decode_frame(
            r#"{
                "type": "hello",
                "num_connections": 2,
                "debug_info": {"host": "applink-1"},
                "connection_info": {"app_id": "A0123"}
            }"#,
        )
        .unwrap();

        assert_eq!(frame.envelope_id, None);
        assert_eq!(
            frame.action,
            FrameAction::Emit(ChatEvent::Connected {
                connection_count: 2,
                app_id: Some("A0123".into()),
            })
        );
    }

    #[test]
    fn test_decode_message_event() {
        let frame = decode_frame(
            r#"{
                "envelope_id": "57d6a792-4d35-4d0b-b6aa-3361493e1caf",
                "type": "events_api",
                "accepts_response_payload": false,
                "payload": {
                    "type": "event_callback",
                    "event": {
                        "type": "message",
                        "channel": "C123",
                        "user": "U456",
                        "text": "check this out <https://open.spotify.com/track/abc123>",
                        "ts": "1355517523.000005"
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            frame.envelope_id.as_deref(),
            Some("57d6a792-4d35-4d0b-b6aa-3361493e1caf")
        );
        assert_eq!(
            frame.action,
            FrameAction::Emit(ChatEvent::Message(ChatMessage {
                channel: Some("C123".into()),
                user: Some("U456".into()),
                text: "check this out <https://open.spotify.com/track/abc123>".into(),
                attachments: vec![],
            }))
        );
    }

    #[test]
    fn test_decode_bot_message_with_attachments() {
        let frame = decode_frame(
            r#"{
                "envelope_id": "e1",
                "type": "events_api",
                "payload": {
                    "event": {
                        "type": "message",
                        "subtype": "bot_message",
                        "attachments": [{
                            "title": "Song",
                            "service_name": "Spotify",
                            "fields": [
                                {"title": "service", "value": "Spotify", "short": true},
                                {"title": "title_link", "value": "https://open.spotify.com/track/xyz789"}
                            ]
                        }]
                    }
                }
            }"#,
        )
        .unwrap();

        let FrameAction::Emit(ChatEvent::Message(message)) = frame.action else {
            panic!("expected a message, got {:?}", frame.action);
        };
        assert_eq!(message.text, "");
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].service_name.as_deref(), Some("Spotify"));
        assert_eq!(
            message.attachments[0].fields[1],
            AttachmentField::new("title_link", "https://open.spotify.com/track/xyz789")
        );
    }

    fn unfurl_frame() -> &'static str {
        r#"{
            "envelope_id": "e4",
            "type": "events_api",
            "payload": {
                "event": {
                    "type": "message",
                    "subtype": "message_changed",
                    "channel": "C123",
                    "hidden": true,
                    "message": {
                        "type": "message",
                        "user": "U456",
                        "text": "listen <https://open.spotify.com/track/xyz789>",
                        "attachments": [{
                            "service_name": "Spotify",
                            "title": "Song",
                            "title_link": "https://open.spotify.com/track/xyz789",
                            "from_url": "https://open.spotify.com/track/xyz789"
                        }]
                    },
                    "previous_message": {
                        "type": "message",
                        "text": "listen <https://open.spotify.com/track/xyz789>"
                    }
                }
            }
        }"#
    }

    fn decoded_message(frame: &str) -> ChatMessage {
        match decode_frame(frame).unwrap().action {
            FrameAction::Emit(ChatEvent::Message(message)) => message,
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unfurl_keeps_only_attachments() {
        let message = decoded_message(unfurl_frame());

        assert_eq!(message.channel.as_deref(), Some("C123"));
        assert_eq!(message.user.as_deref(), Some("U456"));
        assert_eq!(message.text, "");
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].service_name.as_deref(), Some("Spotify"));
    }

    #[test]
    fn test_unfurl_is_found_in_attachment_mode_only() {
        let message = decoded_message(unfurl_frame());

        let attachments = AttachmentExtractor::new("Spotify");
        assert_eq!(
            attachments.extract(&message).collect::<Vec<_>>(),
            vec![TrackId::new("xyz789")]
        );

        // The link was already picked up from the original message
        let links = LinkExtractor::new("spotify.com", HostMatching::Strict);
        assert_eq!(links.extract(&message).count(), 0);
    }

    #[test]
    fn test_decode_other_events() {
        let frame = decode_frame(
            r#"{
                "envelope_id": "e2",
                "type": "events_api",
                "payload": {"event": {"type": "reaction_added", "user": "U1"}}
            }"#,
        )
        .unwrap();
        assert_eq!(frame.envelope_id.as_deref(), Some("e2"));
        assert_eq!(frame.action, FrameAction::Emit(ChatEvent::Other("reaction_added".into())));

        let frame = decode_frame(r#"{"envelope_id": "e3", "type": "slash_commands", "payload": {}}"#)
            .unwrap();
        assert_eq!(frame.envelope_id.as_deref(), Some("e3"));
        assert_eq!(frame.action, FrameAction::Emit(ChatEvent::Other("slash_commands".into())));
    }

    #[test]
    fn test_decode_disconnect() {
        let frame =
            decode_frame(r#"{"type": "disconnect", "reason": "refresh_requested"}"#).unwrap();
        assert_eq!(
            frame.action,
            FrameAction::Reconnect(Some("refresh_requested".into()))
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode_frame("not json"), Err(SlackError::Decode(_))));
        assert!(matches!(
            decode_frame(r#"{"type": "events_api", "payload": {"nope": 1}}"#),
            Err(SlackError::Decode(_))
        ));
    }

    #[test]
    fn test_acknowledge_shape() {
        let ack = serde_json::to_string(&Acknowledge { envelope_id: "e1" }).unwrap();
        assert_eq!(ack, r#"{"envelope_id":"e1"}"#);
    }

    #[tokio::test]
    async fn test_spawn_stream_ends_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut events =
            SocketModeClient::new("xapp-test", Duration::from_secs(5)).spawn(cancel);

        assert_eq!(events.recv().await, None);
    }
}
