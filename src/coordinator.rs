use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{ChatEvent, TrackId};
use crate::ports::spotify::PlaylistClient;
use crate::services::authorization::PendingAuthorization;
use crate::services::chat_listener::ChatListener;
use crate::services::extractor::TrackExtractor;
use crate::services::playlist_worker::PlaylistWorker;
use crate::shutdown::{HardError, hard_error_channel};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub playlist_id: String,
    pub track_queue_capacity: usize,
}

/// Runs the chat listener and the playlist worker until the first hard error,
/// until `cancel` fires, or until both have finished on their own.
///
/// Returns the hard error that stopped the pipeline, if any.
pub async fn run_pipeline<C: PlaylistClient + 'static>(
    settings: PipelineSettings,
    chat_events: mpsc::Receiver<ChatEvent>,
    extractor: Arc<dyn TrackExtractor>,
    authorization: PendingAuthorization<C>,
    cancel: CancellationToken,
) -> Result<(), HardError> {
    let (tracks_tx, tracks_rx) = mpsc::channel::<TrackId>(settings.track_queue_capacity);
    let (hard_error_tx, mut hard_error_rx) = hard_error_channel();

    let listener = ChatListener::new(extractor, tracks_tx, hard_error_tx.clone(), cancel.clone());
    let worker = PlaylistWorker::new(
        settings.playlist_id,
        tracks_rx,
        hard_error_tx,
        cancel.clone(),
    );

    let listener_task = tokio::spawn(listener.run(chat_events));
    let worker_task = tokio::spawn(worker.run(authorization));

    let outcome = tokio::select! {
        error = hard_error_rx.recv() => match error {
            Some(error) => {
                tracing::error!(%error, "Got hard error, stopping");
                Err(error)
            }
            // Every sender is owned by a task, so both have returned
            None => {
                tracing::info!("Chat listener and playlist worker finished");
                Ok(())
            }
        },
        _ = cancel.cancelled() => {
            tracing::info!("Shutdown requested, stopping");
            Ok(())
        }
    };

    cancel.cancel();

    match listener_task.await {
        Ok(exit) => tracing::debug!(?exit, "Chat listener stopped"),
        Err(e) => tracing::error!("Chat listener task failed: {}", e),
    }
    match worker_task.await {
        Ok(exit) => tracing::debug!(?exit, "Playlist worker stopped"),
        Err(e) => tracing::error!("Playlist worker task failed: {}", e),
    }

    outcome
}
