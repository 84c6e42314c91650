use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use thiserror::Error;

/// Failure of a request handler that is not a user-facing outcome
///
/// Backend and decode failures are rendered into the page that triggered
/// them; only these internal errors turn into an error response.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to render page: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("invalid upload: {0}")]
    Upload(#[from] MultipartError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("{}", self);
        match self {
            AppError::Render(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Erro interno").into_response()
            }
            AppError::Upload(err) => (err.status(), err.body_text()).into_response(),
        }
    }
}
