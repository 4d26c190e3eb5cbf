use actix_multipart::MultipartError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::inference::InferenceError;

/// Request-level failures, split so callers can tell bad input (400)
/// apart from an internal failure (500). Every variant serializes to the
/// same JSON error body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no file field in multipart upload")]
    MissingFile,
    #[error("uploaded file is empty")]
    EmptyUpload,
    #[error("invalid multipart payload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("could not decode uploaded image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::EmptyUpload
            | ApiError::Multipart(_)
            | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("Request failed: {self}");
        } else {
            log::info!("Rejected request: {self}");
        }
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
