use serde::{Deserialize, Serialize};

use crate::models::{Attachment, AttachmentField, ChatMessage};

/// Response of `apps.connections.open`
#[derive(Debug, Deserialize)]
pub struct ConnectionsOpenResponse {
    pub ok: bool,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// Envelope of every frame Slack pushes over the Socket Mode WebSocket.
#[derive(Debug, Deserialize)]
pub struct SocketFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub envelope_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub num_connections: Option<u32>,
    pub reason: Option<String>,
    pub connection_info: Option<ConnectionInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectionInfo {
    pub app_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsApiPayload {
    pub event: SlackEvent,
}

#[derive(Debug, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: String,
    pub user: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub attachments: Vec<SlackAttachment>,
    /// The edited message of a `message_changed` event, where link unfurls land.
    pub message: Option<ChangedMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChangedMessage {
    pub user: Option<String>,
    #[serde(default)]
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Deserialize)]
pub struct SlackAttachment {
    pub title: Option<String>,
    pub title_link: Option<String>,
    pub service_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<SlackAttachmentField>,
}

#[derive(Debug, Deserialize)]
pub struct SlackAttachmentField {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct Acknowledge<'a> {
    pub envelope_id: &'a str,
}

impl From<SlackEvent> for ChatMessage {
    fn from(event: SlackEvent) -> Self {
        if event.subtype.as_deref() == Some("message_changed") {
            // Only the attachments are new; the text was already seen
            let changed = event.message.unwrap_or(ChangedMessage {
                user: None,
                attachments: Vec::new(),
            });
            return ChatMessage {
                channel: event.channel,
                user: changed.user,
                text: String::new(),
                attachments: changed.attachments.into_iter().map(Attachment::from).collect(),
            };
        }

        ChatMessage {
            channel: event.channel,
            user: event.user,
            text: event.text,
            attachments: event.attachments.into_iter().map(Attachment::from).collect(),
        }
    }
}

impl From<SlackAttachment> for Attachment {
    fn from(attachment: SlackAttachment) -> Self {
        Attachment {
            title: attachment.title,
            title_link: attachment.title_link,
            service_name: attachment.service_name,
            fields: attachment
                .fields
                .into_iter()
                .map(|field| AttachmentField::new(field.title, field.value))
                .collect(),
        }
    }
}
