use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use immunity_core::ImmunityError;

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(ImmunityError::InvalidRequest(msg.into()).into())
    }

    pub fn join(e: tokio::task::JoinError) -> Self {
        Self(anyhow::anyhow!("task join error: {e}"))
    }
}

fn status_for(e: &ImmunityError) -> StatusCode {
    match e {
        ImmunityError::NotInitialized
        | ImmunityError::InvalidName(_)
        | ImmunityError::InvalidRequest(_)
        | ImmunityError::UnknownEvent(_)
        | ImmunityError::UnknownState(_)
        | ImmunityError::InvalidRegionConfig(_) => StatusCode::BAD_REQUEST,
        ImmunityError::BuildNotFound(_)
        | ImmunityError::RegionNotFound(_)
        | ImmunityError::ApplicationNotFound(_)
        | ImmunityError::StatusNotFound { .. } => StatusCode::NOT_FOUND,
        ImmunityError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ImmunityError::RegionBusy { .. } => StatusCode::CONFLICT,
        ImmunityError::CommandFailed { .. }
        | ImmunityError::CommandTimeout { .. }
        | ImmunityError::CommandSpawn { .. }
        | ImmunityError::Storage(_)
        | ImmunityError::HomeNotFound
        | ImmunityError::Io(_)
        | ImmunityError::Yaml(_)
        | ImmunityError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self
            .0
            .downcast_ref::<ImmunityError>()
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, status_for);
        if status.is_server_error() {
            tracing::error!("request failed: {:#}", self.0);
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
