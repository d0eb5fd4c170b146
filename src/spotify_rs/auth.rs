use std::collections::HashMap;
use std::time::Duration;

use base64::{
    Engine, alphabet,
    engine::{self, general_purpose},
};
use color_eyre::Result;
use rand::Rng;

use crate::ports::spotify::Authenticator;
use crate::spotify_rs::client::SpotifyClient;
use crate::spotify_rs::types::{SpotifyApiCredentials, SpotifyTokenResponse};

const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Appending to a public playlist is all we ever do.
pub const SPOTIFY_SCOPES: [&str; 1] = ["playlist-modify-public"];

pub const STATE_LENGTH: usize = 16;

const CUSTOM_ENGINE: engine::GeneralPurpose =
    engine::GeneralPurpose::new(&alphabet::STANDARD, general_purpose::PAD);

/// Generate a cryptographically secure random alphanumeric string
fn generate_random_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
            CHARSET[rng.random_range(0..CHARSET.len())] as char
        })
        .collect()
}

/// Generate a random state parameter for CSRF protection
pub fn generate_state() -> String {
    generate_random_string(STATE_LENGTH)
}

/// Build the URL the user has to visit to authorize the application.
pub fn authorize_url(client_id: &str, redirect_uri: &str, state: &str) -> String {
    format!(
        "{}?client_id={}&response_type=code&redirect_uri={}&state={}&scope={}",
        SPOTIFY_AUTH_URL,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(&SPOTIFY_SCOPES.join(" "))
    )
}

fn basic_auth_header(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        CUSTOM_ENGINE.encode(format!("{}:{}", client_id, client_secret))
    )
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeCodeForTokenError {
    #[error("Invalid code: {reason}")]
    InvalidCode { reason: String },
    #[error("Failed to send http request: {0}")]
    FailedToSendRequest(reqwest::Error),
    #[error("Failed to parse response: {0}")]
    FailedToParseResponse(reqwest::Error),
}

/// Exchange authorization code for access token
/// https://developer.spotify.com/documentation/web-api/tutorials/code-flow
pub async fn exchange_code_for_token(
    http: &reqwest::Client,
    credentials: &SpotifyApiCredentials,
    code: &str,
) -> Result<SpotifyTokenResponse, ExchangeCodeForTokenError> {
    let mut params = HashMap::new();
    params.insert("grant_type", "authorization_code");
    params.insert("code", code);
    // Must be byte-for-byte the redirect uri used in the authorize url
    params.insert("redirect_uri", credentials.redirect_uri.as_str());

    let response = http
        .post(SPOTIFY_TOKEN_URL)
        .form(&params)
        .header(
            "Authorization",
            basic_auth_header(&credentials.client_id, &credentials.client_secret),
        )
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(ExchangeCodeForTokenError::FailedToSendRequest)?;

    if !response.status().is_success() {
        return Err(ExchangeCodeForTokenError::InvalidCode {
            reason: response
                .text()
                .await
                .unwrap_or("Failed to get error text".to_string()),
        });
    }

    response
        .json()
        .await
        .map_err(ExchangeCodeForTokenError::FailedToParseResponse)
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshTokenError {
    #[error("Invalid refresh token: {reason}")]
    InvalidRefreshToken { reason: String },
    #[error("Failed to send http request: {0}")]
    FailedToSendRequest(reqwest::Error),
    #[error("Failed to parse response: {0}")]
    FailedToParseResponse(reqwest::Error),
}

/// Refresh an access token using a refresh token
pub async fn refresh_access_token(
    http: &reqwest::Client,
    credentials: &SpotifyApiCredentials,
    refresh_token: &str,
) -> Result<SpotifyTokenResponse, RefreshTokenError> {
    let mut params = HashMap::new();
    params.insert("grant_type", "refresh_token");
    params.insert("refresh_token", refresh_token);

    let response = http
        .post(SPOTIFY_TOKEN_URL)
        .form(&params)
        .header(
            "Authorization",
            basic_auth_header(&credentials.client_id, &credentials.client_secret),
        )
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(RefreshTokenError::FailedToSendRequest)?;

    if !response.status().is_success() {
        return Err(RefreshTokenError::InvalidRefreshToken {
            reason: response
                .text()
                .await
                .unwrap_or("Failed to get error text".to_string()),
        });
    }

    response
        .json()
        .await
        .map_err(RefreshTokenError::FailedToParseResponse)
}

/// Production [`Authenticator`] backed by the Spotify accounts service.
pub struct SpotifyAuthenticator {
    credentials: SpotifyApiCredentials,
    http: reqwest::Client,
}

impl SpotifyAuthenticator {
    pub fn new(credentials: SpotifyApiCredentials) -> Self {
        Self {
            credentials,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for SpotifyAuthenticator {
    type Client = SpotifyClient;

    fn authorize_url(&self, state: &str) -> String {
        authorize_url(
            &self.credentials.client_id,
            &self.credentials.redirect_uri,
            state,
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<SpotifyClient> {
        let token = exchange_code_for_token(&self.http, &self.credentials, code).await?;
        tracing::debug!(scope = %token.scope, expires_in = token.expires_in, "Exchanged code for token");
        Ok(SpotifyClient::new(
            self.http.clone(),
            self.credentials.clone(),
            token,
        ))
    }
}
