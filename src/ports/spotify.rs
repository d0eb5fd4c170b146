use color_eyre::eyre::Result;

/// Decoupled representation of the authorized Spotify user.
#[derive(Debug, Clone)]
pub struct SpotifyApiUser {
    pub id: String,
    pub display_name: Option<String>,
}

/// Decoupled representation of a Spotify playlist from the API.
#[derive(Debug, Clone)]
pub struct SpotifyApiPlaylist {
    pub id: String,
    pub name: String,
    pub is_public: bool,
}

/// Decoupled representation of a Spotify track from the API.
#[derive(Debug, Clone)]
pub struct SpotifyApiTrack {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
}

/// Port trait wrapping the playlist capabilities the worker needs once the
/// user has authorized us.
///
/// Implementations live in `spotify_rs::client` (production) or test mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlaylistClient: Send + Sync {
    async fn current_user(&self) -> Result<SpotifyApiUser>;
    async fn playlist(&self, playlist_id: &str) -> Result<SpotifyApiPlaylist>;
    async fn track(&self, track_id: &str) -> Result<SpotifyApiTrack>;
    /// Appends a single track and returns the new playlist snapshot id.
    async fn add_track_to_playlist(&self, playlist_id: &str, track_id: &str) -> Result<String>;
}

/// Port trait for the authorization-code flow.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync + 'static {
    type Client: PlaylistClient + 'static;

    /// URL the user has to visit to grant access, carrying `state`.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchanges the code returned on the redirect for an authorized client.
    async fn exchange_code(&self, code: &str) -> Result<Self::Client>;
}
