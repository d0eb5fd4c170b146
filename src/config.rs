use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::{Context, OptionExt, eyre};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::services::extractor::{
    AttachmentExtractor, HostMatching, LinkExtractor, TrackExtractor,
};
use crate::spotify_rs::types::SpotifyApiCredentials;

const APP_DIRECTORY: &str = "slack-playlist-maker";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionStrategy {
    /// Spotify links anywhere in the message text
    #[default]
    Links,
    /// Structured attachments posted by a music integration
    Attachments,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub track_queue_capacity: usize,
    pub slack: SlackConfig,
    pub spotify: SpotifyConfig,
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    #[serde(skip)]
    pub token: Option<String>,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    #[serde(skip)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub playlist_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub strategy: ExtractionStrategy,
    pub host_matching: HostMatching,
    pub domain: String,
    pub service_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            track_queue_capacity: 10,
            slack: SlackConfig::default(),
            spotify: SpotifyConfig::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            token: None,
            reconnect_delay_secs: 5,
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: "http://localhost:8080/spotify/callback/".to_string(),
            playlist_id: None,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractionStrategy::default(),
            host_matching: HostMatching::default(),
            domain: "spotify.com".to_string(),
            service_name: "Spotify".to_string(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(APP_DIRECTORY).join("config.toml"))
    }

    /// Loads the default config file, or the built-in defaults when there is none.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Writes the defaults to the config path unless a file is already there.
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_eyre("No config directory on this platform")?;
        if path.exists() {
            tracing::info!("Config file already exists at {}", path.display());
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents =
            toml::to_string_pretty(&Self::default()).wrap_err("Failed to serialize config")?;
        std::fs::write(&path, contents)
            .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }

    /// The address the callback server binds; `:8080` means every interface.
    pub fn listen_socket_address(&self) -> String {
        match self.listen_addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port),
            None => self.listen_addr.clone(),
        }
    }

    /// The route the OAuth provider redirects back to.
    pub fn callback_path(&self) -> Result<String> {
        let redirect = Url::parse(&self.spotify.redirect_uri).wrap_err_with(|| {
            format!("Invalid Spotify redirect URI: {}", self.spotify.redirect_uri)
        })?;
        Ok(redirect.path().to_string())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.slack.reconnect_delay_secs)
    }

    pub fn playlist_id(&self) -> Result<&str> {
        self.spotify
            .playlist_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_eyre("Spotify playlist id is required (--spotify-playlist-id or spotify.playlist_id)")
    }

    pub fn slack_token(&self) -> Result<&str> {
        self.slack
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_eyre("Slack token is required (--slack-token or SLACK_TOKEN)")
    }

    pub fn spotify_credentials(&self) -> Result<SpotifyApiCredentials> {
        let client_id = self
            .spotify
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_eyre("Spotify client id is required (--spotify-id or SPOTIFY_ID)")?;
        let client_secret = self
            .spotify
            .client_secret
            .clone()
            .filter(|secret| !secret.is_empty())
            .ok_or_eyre("Spotify client secret is required (--spotify-secret or SPOTIFY_SECRET)")?;

        Ok(SpotifyApiCredentials {
            client_id,
            client_secret,
            redirect_uri: self.spotify.redirect_uri.clone(),
        })
    }

    /// Checks everything `serve` needs before any connection is opened.
    pub fn validate(&self) -> Result<()> {
        self.slack_token()?;
        self.spotify_credentials()?;
        self.playlist_id()?;
        self.callback_path()?;
        if self.track_queue_capacity == 0 {
            return Err(eyre!("track_queue_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn build_extractor(&self) -> Arc<dyn TrackExtractor> {
        match self.extraction.strategy {
            ExtractionStrategy::Links => Arc::new(LinkExtractor::new(
                self.extraction.domain.clone(),
                self.extraction.host_matching,
            )),
            ExtractionStrategy::Attachments => Arc::new(AttachmentExtractor::new(
                self.extraction.service_name.clone(),
            )),
        }
    }
}
