use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::ports::spotify::Authenticator;

/// Shared state of the authorization callback routes.
pub struct CallbackState<A: Authenticator> {
    pub authenticator: A,
    /// Nonce the callback's `state` parameter has to match exactly.
    pub state: String,
    client_tx: Mutex<Option<oneshot::Sender<A::Client>>>,
}

impl<A: Authenticator> CallbackState<A> {
    pub fn new(authenticator: A, state: String, client_tx: oneshot::Sender<A::Client>) -> Self {
        Self {
            authenticator,
            state,
            client_tx: Mutex::new(Some(client_tx)),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.client_tx
            .lock()
            .map(|slot| slot.is_none())
            .unwrap_or(true)
    }

    /// Hands the authorized client to the waiting worker. Succeeds at most once.
    pub fn deliver(&self, client: A::Client) -> bool {
        let sender = match self.client_tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };

        match sender {
            Some(sender) => {
                if sender.send(client).is_err() {
                    tracing::warn!("Nobody is waiting for the authorized client anymore");
                }
                true
            }
            None => false,
        }
    }
}
