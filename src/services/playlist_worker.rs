use color_eyre::eyre::{Result, WrapErr};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::TrackId;
use crate::ports::spotify::PlaylistClient;
use crate::services::authorization::PendingAuthorization;
use crate::shutdown::{HardError, HardErrorSender};

/// Why the worker returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    CancelledBeforeAuthorization,
    Cancelled,
    /// The listener is gone and every queued track was processed.
    QueueClosed,
    /// A hard error was escalated.
    Fatal,
}

/// The playlist tracks get appended to, as validated after login.
#[derive(Debug, Clone)]
pub struct PlaylistTarget {
    pub id: String,
    pub name: String,
    pub is_public: bool,
}

/// Appends queued tracks to the target playlist once the user has logged in.
pub struct PlaylistWorker {
    playlist_id: String,
    tracks: mpsc::Receiver<TrackId>,
    hard_errors: HardErrorSender,
    cancel: CancellationToken,
}

impl PlaylistWorker {
    pub fn new(
        playlist_id: String,
        tracks: mpsc::Receiver<TrackId>,
        hard_errors: HardErrorSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            playlist_id,
            tracks,
            hard_errors,
            cancel,
        }
    }

    pub async fn run<C: PlaylistClient + 'static>(
        mut self,
        authorization: PendingAuthorization<C>,
    ) -> WorkerExit {
        let client = match authorization.wait(&self.cancel).await {
            Ok(Some(client)) => client,
            Ok(None) => return WorkerExit::CancelledBeforeAuthorization,
            Err(error) => {
                self.hard_errors.escalate(error);
                return WorkerExit::Fatal;
            }
        };

        match client.current_user().await {
            Ok(user) => tracing::info!(
                user_id = %user.id,
                display_name = ?user.display_name,
                "Logged in to Spotify"
            ),
            Err(e) => tracing::warn!("Failed getting user: {:#}", e),
        }

        let target = match validate_playlist(&client, &self.playlist_id).await {
            Ok(target) => target,
            Err(error) => {
                tracing::error!(%error, "Playlist cannot be used");
                self.hard_errors.escalate(error);
                return WorkerExit::Fatal;
            }
        };

        self.drain(&client, &target).await
    }

    async fn drain<C: PlaylistClient>(&mut self, client: &C, target: &PlaylistTarget) -> WorkerExit {
        tracing::info!(
            playlist = %target.name,
            playlist_id = %target.id,
            is_public = target.is_public,
            "Waiting for tracks"
        );
        loop {
            let track = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(pending = self.tracks.len(), "Playlist worker cancelled");
                    return WorkerExit::Cancelled;
                }
                track = self.tracks.recv() => track,
            };

            let Some(track) = track else {
                tracing::info!("Track queue closed, stopping");
                return WorkerExit::QueueClosed;
            };

            tracing::info!(%track, "Got track");
            if let Err(e) = process_track(client, &track, &target.id).await {
                tracing::error!(%track, "Error processing track: {:#}", e);
            }
        }
    }
}

/// Fetches the playlist and checks it can be appended to.
pub async fn validate_playlist<C: PlaylistClient + ?Sized>(
    client: &C,
    playlist_id: &str,
) -> Result<PlaylistTarget, HardError> {
    let playlist = client
        .playlist(playlist_id)
        .await
        .map_err(|e| HardError::PlaylistUnavailable {
            playlist_id: playlist_id.to_string(),
            reason: format!("{:#}", e),
        })?;

    tracing::info!(name = %playlist.name, is_public = playlist.is_public, "Playlist found");
    if !playlist.is_public {
        return Err(HardError::PlaylistNotPublic {
            name: playlist.name,
        });
    }

    Ok(PlaylistTarget {
        id: playlist_id.to_string(),
        name: playlist.name,
        is_public: playlist.is_public,
    })
}

/// Looks the track up and appends it on its own, returning the snapshot id.
pub async fn process_track<C: PlaylistClient + ?Sized>(
    client: &C,
    track_id: &TrackId,
    playlist_id: &str,
) -> Result<String> {
    let track = client
        .track(track_id.as_str())
        .await
        .wrap_err_with(|| format!("Failed getting track {}", track_id))?;

    tracing::info!(
        %track_id,
        name = %track.name,
        artists = %track.artists.join(", "),
        "Adding track"
    );

    let snapshot_id = client
        .add_track_to_playlist(playlist_id, track_id.as_str())
        .await
        .wrap_err_with(|| format!("Failed adding track {} to playlist", track_id))?;

    tracing::info!(%track_id, %snapshot_id, "Successfully added track");
    Ok(snapshot_id)
}
