use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::http_server::app::{CallbackServer, router};
use crate::http_server::state::CallbackState;
use crate::ports::spotify::Authenticator;
use crate::shutdown::HardError;
use crate::spotify_rs::auth::generate_state;

/// A login in progress: the callback server is up and the authorization URL
/// has been handed to the user.
pub struct PendingAuthorization<C> {
    client_rx: oneshot::Receiver<C>,
    server: Option<CallbackServer>,
}

impl<C: Send + 'static> PendingAuthorization<C> {
    /// Generates the nonce, starts the callback server and logs the URL the
    /// user has to visit.
    pub async fn start<A>(
        authenticator: A,
        listen_address: &str,
        callback_path: &str,
    ) -> Result<Self, HardError>
    where
        A: Authenticator<Client = C>,
    {
        let state = generate_state();
        let auth_url = authenticator.authorize_url(&state);
        let (client_tx, client_rx) = oneshot::channel();

        let app = router(
            callback_path,
            Arc::new(CallbackState::new(authenticator, state, client_tx)),
        );
        let server = CallbackServer::bind(listen_address, app)
            .await
            .map_err(|e| HardError::CallbackServer {
                reason: format!("{:#}", e),
            })?;

        tracing::info!(%auth_url, "Visit this link to login to Spotify");

        Ok(Self {
            client_rx,
            server: Some(server),
        })
    }

    /// An authorization whose client arrives on `client_rx`, without any server.
    #[cfg(test)]
    pub fn from_receiver(client_rx: oneshot::Receiver<C>) -> Self {
        Self {
            client_rx,
            server: None,
        }
    }

    #[cfg(test)]
    pub fn with_server(client_rx: oneshot::Receiver<C>, server: CallbackServer) -> Self {
        Self {
            client_rx,
            server: Some(server),
        }
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.as_ref().map(CallbackServer::local_addr)
    }

    /// Waits for the authorized client. `Ok(None)` means shutdown was requested
    /// first. The callback server is stopped either way.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<Option<C>, HardError> {
        let Self {
            mut client_rx,
            mut server,
        } = self;

        let server_failed = async {
            match server.as_mut() {
                Some(server) => server.failed().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Shutdown requested before authorization completed");
                Ok(None)
            }
            client = &mut client_rx => match client {
                Ok(client) => Ok(Some(client)),
                Err(_) => Err(HardError::AuthorizationAborted),
            },
            reason = server_failed => {
                tracing::error!(%reason, "Callback server died before authorization completed");
                Err(HardError::CallbackServer { reason })
            }
        };

        if let Some(server) = server.take() {
            server.shutdown().await;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_server::app::tests::FakeAuthenticator;
    use crate::ports::spotify::MockPlaylistClient;

    #[tokio::test]
    async fn test_wait_returns_none_on_cancel_and_stops_server() {
        let authorization = PendingAuthorization::start(
            FakeAuthenticator { valid_code: "good" },
            "127.0.0.1:0",
            "/spotify/callback/",
        )
        .await
        .unwrap();
        let addr = authorization.local_addr().unwrap();

        let health = reqwest::get(format!("http://{addr}/healthcheck")).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);
        drop(health);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = authorization.wait(&cancel).await.unwrap();

        assert!(client.is_none());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_reports_dropped_sender() {
        let (client_tx, client_rx) = oneshot::channel::<MockPlaylistClient>();
        drop(client_tx);

        let result = PendingAuthorization::from_receiver(client_rx)
            .wait(&CancellationToken::new())
            .await;

        assert!(matches!(result, Err(HardError::AuthorizationAborted)));
    }

    #[tokio::test]
    async fn test_wait_escalates_dying_server() {
        let (_client_tx, client_rx) = oneshot::channel::<MockPlaylistClient>();
        let server = CallbackServer::spawn(
            "127.0.0.1:1".parse().unwrap(),
            CancellationToken::new(),
            async { Err(std::io::Error::other("listener closed")) },
        );

        let result = PendingAuthorization::with_server(client_rx, server)
            .wait(&CancellationToken::new())
            .await;

        assert_eq!(
            result.err(),
            Some(HardError::CallbackServer {
                reason: "listener closed".into()
            })
        );
    }

    #[tokio::test]
    async fn test_start_fails_when_address_in_use() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = occupied.local_addr().unwrap().to_string();

        let result = PendingAuthorization::start(
            FakeAuthenticator { valid_code: "good" },
            &address,
            "/spotify/callback/",
        )
        .await;

        assert!(matches!(result, Err(HardError::CallbackServer { .. })));
    }
}
