//! Slack Socket Mode transport.
//!
//! Docs: https://api.slack.com/apis/socket-mode

pub mod socket_mode;
pub mod types;

pub use socket_mode::SocketModeClient;

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("Slack rejected the app token: {0}")]
    InvalidAuth(String),
    #[error("Slack API error: {0}")]
    Api(String),
    #[error("Request to Slack failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}
