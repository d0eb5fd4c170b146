use std::fmt;

/// Identifier of a track in the playlist service (the last path segment of a
/// `https://open.spotify.com/track/<id>` link).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `spotify:track:<id>` form expected by the playlist endpoints.
    pub fn uri(&self) -> String {
        format!("spotify:track:{}", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat message as delivered by the chat transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    #[cfg(test)]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Structured attachment on a chat message (link unfurls, bot cards).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub title: Option<String>,
    pub title_link: Option<String>,
    pub service_name: Option<String>,
    pub fields: Vec<AttachmentField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
}

impl AttachmentField {
    pub fn new(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            value: value.into(),
        }
    }
}

/// Events the chat listener reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The transport (re)connected.
    Connected {
        connection_count: u32,
        app_id: Option<String>,
    },
    Message(ChatMessage),
    /// Recoverable transport or protocol problem.
    ProtocolError(String),
    /// The chat credentials were rejected; the transport will not reconnect.
    InvalidAuth(String),
    /// Any other event kind, identified by its wire type.
    Other(String),
}
