use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::{Attachment, ChatMessage, TrackId};

const TRACK_PATH_SEGMENT: &str = "track";

/// Pulls track identifiers out of a chat message.
///
/// Implementations are pure: extracting from the same message twice yields
/// the same sequence.
pub trait TrackExtractor: Send + Sync {
    fn extract<'a>(&'a self, message: &'a ChatMessage) -> Box<dyn Iterator<Item = TrackId> + Send + 'a>;
}

/// How strictly a link's host is checked against the streaming domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HostMatching {
    /// Host must be the streaming domain or one of its subdomains.
    #[default]
    Strict,
    /// Any host is accepted when the path looks like a track path.
    PathOnly,
}

/// Finds track links in the message text.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    domain: String,
    host_matching: HostMatching,
}

impl LinkExtractor {
    pub fn new(domain: impl Into<String>, host_matching: HostMatching) -> Self {
        Self {
            domain: domain.into(),
            host_matching,
        }
    }

    fn host_matches(&self, url: &Url) -> bool {
        match self.host_matching {
            HostMatching::PathOnly => true,
            HostMatching::Strict => url.host_str().is_some_and(|host| {
                host == self.domain
                    || host
                        .strip_suffix(self.domain.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            }),
        }
    }

    /// Returns the track id for a single whitespace-separated token.
    pub fn track_from_token(&self, token: &str) -> Option<TrackId> {
        // Slack wraps links as `<url>` or `<url|label>`
        let token = token.trim_matches(|c| c == '<' || c == '>');
        let token = token.split('|').next().unwrap_or(token);

        let url = Url::parse(token).ok()?;
        if !matches!(url.scheme(), "http" | "https") || !self.host_matches(&url) {
            return None;
        }
        track_id_after_marker(&url)
    }
}

impl TrackExtractor for LinkExtractor {
    fn extract<'a>(&'a self, message: &'a ChatMessage) -> Box<dyn Iterator<Item = TrackId> + Send + 'a> {
        Box::new(
            message
                .text
                .split_whitespace()
                .filter_map(|token| self.track_from_token(token)),
        )
    }
}

/// `.../track/<id>` where `<id>` is the last non-empty segment.
fn track_id_after_marker(url: &Url) -> Option<TrackId> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., marker, id] if *marker == TRACK_PATH_SEGMENT => Some(TrackId::new(*id)),
        _ => None,
    }
}

/// Last non-empty path segment of a link.
fn last_path_segment(link: &str) -> Option<TrackId> {
    let url = Url::parse(link).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(TrackId::new)
}

/// Finds tracks in structured attachments tagged with the expected service.
#[derive(Debug, Clone)]
pub struct AttachmentExtractor {
    service_name: String,
}

impl AttachmentExtractor {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn field<'a>(attachment: &'a Attachment, titles: &[&str]) -> Option<&'a str> {
        attachment
            .fields
            .iter()
            .find(|field| titles.contains(&field.title.as_str()))
            .map(|field| field.value.as_str())
    }

    pub fn track_from_attachment(&self, attachment: &Attachment) -> Option<TrackId> {
        let service = Self::field(attachment, &["service", "Service"])
            .or(attachment.service_name.as_deref());
        let Some(service) = service else {
            tracing::debug!(title = ?attachment.title, "Attachment has no service field, skipping");
            return None;
        };
        if service != self.service_name {
            tracing::debug!(
                service,
                expected = %self.service_name,
                "Attachment is for another service, skipping"
            );
            return None;
        }

        let Some(link) = Self::field(attachment, &["title_link"]).or(attachment.title_link.as_deref())
        else {
            tracing::warn!(title = ?attachment.title, "Attachment has no title_link, skipping");
            return None;
        };

        let track = last_path_segment(link);
        if track.is_none() {
            tracing::warn!(link, "Failed parsing attachment link, skipping");
        }
        track
    }
}

impl TrackExtractor for AttachmentExtractor {
    fn extract<'a>(&'a self, message: &'a ChatMessage) -> Box<dyn Iterator<Item = TrackId> + Send + 'a> {
        Box::new(
            message
                .attachments
                .iter()
                .filter_map(|attachment| self.track_from_attachment(attachment)),
        )
    }
}
