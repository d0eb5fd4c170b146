use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};

/// Ways an authorization callback can be rejected.
///
/// None of these stop the server: the user can retry the login.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("State does not match")]
    StateMismatch,
    #[error("Authorization was denied: {0}")]
    Denied(String),
    #[error("Missing authorization code")]
    MissingCode,
    #[error("Failed getting token: {0}")]
    TokenExchange(String),
    #[error("Authorization already completed")]
    AlreadyCompleted,
}

impl CallbackError {
    fn status(&self) -> StatusCode {
        match self {
            CallbackError::StateMismatch => StatusCode::NOT_FOUND,
            CallbackError::Denied(_) | CallbackError::MissingCode | CallbackError::TokenExchange(_) => {
                StatusCode::BAD_REQUEST
            }
            CallbackError::AlreadyCompleted => StatusCode::CONFLICT,
        }
    }
}

// Tell axum how to convert `CallbackError` into a response.
impl IntoResponse for CallbackError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let body = match &self {
            CallbackError::StateMismatch => "404 page not found".to_string(),
            CallbackError::TokenExchange(_) => "Failed getting token".to_string(),
            other => other.to_string(),
        };

        (status, body).into_response()
    }
}
