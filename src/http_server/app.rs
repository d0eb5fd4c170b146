use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{Router, routing::get};
use color_eyre::eyre::{Context, eyre};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::http_server::callback::{healthcheck, spotify_callback};
use crate::http_server::state::CallbackState;
use crate::ports::spotify::Authenticator;

pub fn router<A: Authenticator>(callback_path: &str, state: Arc<CallbackState<A>>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route(callback_path, get(spotify_callback::<A>))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// HTTP listener that lives only for the duration of the login.
pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    failure: Option<oneshot::Receiver<String>>,
    task: JoinHandle<()>,
}

impl CallbackServer {
    pub async fn bind(listen_address: &str, app: Router) -> color_eyre::Result<Self> {
        let listener = tokio::net::TcpListener::bind(listen_address)
            .await
            .wrap_err_with(|| eyre!("Failed to bind to {}", listen_address))?;
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to read bound address")?;

        let shutdown = CancellationToken::new();
        let graceful = shutdown.clone().cancelled_owned();
        let serving = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .into_future();

        tracing::info!(%local_addr, "Callback server listening");
        Ok(Self::spawn(local_addr, shutdown, serving))
    }

    pub(crate) fn spawn<F>(local_addr: SocketAddr, shutdown: CancellationToken, serving: F) -> Self
    where
        F: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        let (failure_tx, failure_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            if let Err(e) = serving.await {
                tracing::error!("HTTP Server encountered an error: {}", e);
                let _ = failure_tx.send(e.to_string());
            }
            tracing::debug!("Callback server stopped");
        });

        Self {
            local_addr,
            shutdown,
            stopped: AtomicBool::new(false),
            failure: Some(failure_rx),
            task,
        }
    }

    /// Resolves with the reason if the server dies on its own. Stays pending
    /// after a clean stop.
    pub async fn failed(&mut self) -> String {
        let Some(failure) = self.failure.as_mut() else {
            return std::future::pending().await;
        };
        match failure.await {
            Ok(reason) => {
                self.failure = None;
                reason
            }
            Err(_) => {
                self.failure = None;
                std::future::pending().await
            }
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Begins graceful shutdown. Only the first call has an effect; it returns
    /// `true`, every later call returns `false`.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!(local_addr = %self.local_addr, "Stopping callback server");
        self.shutdown.cancel();
        true
    }

    /// Stops the server and waits until the listener is closed.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::error!("Callback server task failed: {}", e);
        }
    }
}
