use std::time::{Duration, Instant};

use color_eyre::Result;
use color_eyre::eyre::{OptionExt, WrapErr};
use tokio::sync::Mutex;

use crate::models::TrackId;
use crate::ports::spotify::{PlaylistClient, SpotifyApiPlaylist, SpotifyApiTrack, SpotifyApiUser};
use crate::spotify_rs::auth::refresh_access_token;
use crate::spotify_rs::types::{
    AddTracksRequest, SnapshotResponse, SpotifyApiCredentials, SpotifyPlaylist,
    SpotifyTokenResponse, SpotifyTrack, SpotifyUser,
};

const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";

/// Refresh this long before Spotify considers the token expired.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct AccessToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

impl AccessToken {
    fn from_response(response: SpotifyTokenResponse, now: Instant) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: now + Duration::from_secs(response.expires_in),
        }
    }

    fn needs_refresh(&self, now: Instant) -> bool {
        now + EXPIRY_MARGIN >= self.expires_at
    }

    /// Spotify only sometimes rotates the refresh token; keep the old one otherwise.
    fn update(&mut self, response: SpotifyTokenResponse, now: Instant) {
        let refresh_token = response.refresh_token.clone().or(self.refresh_token.take());
        *self = Self::from_response(response, now);
        self.refresh_token = refresh_token;
    }
}

/// Authorized Spotify API client.
///
/// Owns its token and refreshes it on demand, so a single instance stays
/// usable for the whole lifetime of the process.
pub struct SpotifyClient {
    http: reqwest::Client,
    credentials: SpotifyApiCredentials,
    token: Mutex<AccessToken>,
}

impl SpotifyClient {
    pub fn new(
        http: reqwest::Client,
        credentials: SpotifyApiCredentials,
        token: SpotifyTokenResponse,
    ) -> Self {
        Self {
            http,
            credentials,
            token: Mutex::new(AccessToken::from_response(token, Instant::now())),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let now = Instant::now();
        if token.needs_refresh(now) {
            let refresh_token = token
                .refresh_token
                .clone()
                .ok_or_eyre("Access token expired and no refresh token is available")?;
            tracing::debug!("Refreshing spotify access token");
            let response = refresh_access_token(&self.http, &self.credentials, &refresh_token)
                .await
                .wrap_err("Failed to refresh spotify access token")?;
            token.update(response, now);
        }
        Ok(token.access_token.clone())
    }

    /// Get the current user's profile
    pub async fn get_current_user(&self) -> Result<SpotifyUser> {
        let response = self
            .http
            .get(format!("{}/me", SPOTIFY_API_URL))
            .bearer_auth(self.access_token().await?)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Get the name and visibility of a playlist
    pub async fn get_playlist(&self, playlist_id: &str) -> Result<SpotifyPlaylist> {
        let response = self
            .http
            .get(format!(
                "{}/playlists/{}",
                SPOTIFY_API_URL,
                urlencoding::encode(playlist_id)
            ))
            .query(&[("fields", "id,name,public")])
            .bearer_auth(self.access_token().await?)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Get a single track
    pub async fn get_track(&self, track_id: &str) -> Result<SpotifyTrack> {
        let response = self
            .http
            .get(format!(
                "{}/tracks/{}",
                SPOTIFY_API_URL,
                urlencoding::encode(track_id)
            ))
            .bearer_auth(self.access_token().await?)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Append tracks to the end of a playlist, returning the new snapshot id
    pub async fn add_tracks_to_playlist(
        &self,
        playlist_id: &str,
        track_uris: Vec<String>,
    ) -> Result<String> {
        let response = self
            .http
            .post(format!(
                "{}/playlists/{}/tracks",
                SPOTIFY_API_URL,
                urlencoding::encode(playlist_id)
            ))
            .json(&AddTracksRequest { uris: track_uris })
            .bearer_auth(self.access_token().await?)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;

        let snapshot: SnapshotResponse = response.json().await?;
        Ok(snapshot.snapshot_id)
    }
}

#[async_trait::async_trait]
impl PlaylistClient for SpotifyClient {
    async fn current_user(&self) -> Result<SpotifyApiUser> {
        let user = self.get_current_user().await?;
        Ok(SpotifyApiUser {
            id: user.id,
            display_name: user.display_name,
        })
    }

    async fn playlist(&self, playlist_id: &str) -> Result<SpotifyApiPlaylist> {
        let playlist = self.get_playlist(playlist_id).await?;
        Ok(SpotifyApiPlaylist {
            id: playlist.id,
            name: playlist.name,
            is_public: playlist.public.unwrap_or(false),
        })
    }

    async fn track(&self, track_id: &str) -> Result<SpotifyApiTrack> {
        let track = self.get_track(track_id).await?;
        Ok(SpotifyApiTrack {
            id: track.id,
            name: track.name,
            artists: track.artists.into_iter().map(|artist| artist.name).collect(),
        })
    }

    async fn add_track_to_playlist(&self, playlist_id: &str, track_id: &str) -> Result<String> {
        let uri = TrackId::new(track_id).uri();
        self.add_tracks_to_playlist(playlist_id, vec![uri]).await
    }
}
