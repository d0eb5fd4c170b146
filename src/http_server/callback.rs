use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::http_server::error::CallbackError;
use crate::http_server::state::CallbackState;
use crate::ports::spotify::Authenticator;

pub const HEALTHCHECK_BODY: &str = "\\0/";
pub const LOGIN_SUCCESSFUL: &str = "Login Successful";

pub async fn healthcheck() -> &'static str {
    HEALTHCHECK_BODY
}

/// Query parameters Spotify appends to the redirect URI.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Completes the authorization-code flow and delivers the authorized client.
pub async fn spotify_callback<A: Authenticator>(
    State(callback): State<Arc<CallbackState<A>>>,
    Query(params): Query<CallbackParams>,
) -> Result<(StatusCode, &'static str), CallbackError> {
    let returned_state = params.state.as_deref().unwrap_or_default();
    if returned_state != callback.state {
        tracing::warn!(returned_state, "State does not match");
        return Err(CallbackError::StateMismatch);
    }

    if let Some(error) = params.error {
        tracing::warn!(%error, "User did not authorize the application");
        return Err(CallbackError::Denied(error));
    }

    let Some(code) = params.code else {
        tracing::warn!("Callback is missing the authorization code");
        return Err(CallbackError::MissingCode);
    };

    if callback.is_delivered() {
        tracing::warn!("Ignoring callback, authorization already completed");
        return Err(CallbackError::AlreadyCompleted);
    }

    let client = match callback.authenticator.exchange_code(&code).await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Failed getting token: {:#}", e);
            return Err(CallbackError::TokenExchange(format!("{:#}", e)));
        }
    };

    if !callback.deliver(client) {
        tracing::warn!("Another callback completed authorization first");
        return Err(CallbackError::AlreadyCompleted);
    }

    tracing::info!("Spotify login successful");
    Ok((StatusCode::OK, LOGIN_SUCCESSFUL))
}
