pub mod detector;
pub mod session;
pub mod severity;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("image not found: {0}")]
    ImageNotFound(PathBuf),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("model run failed: {0}")]
    Model(#[from] ort::Error),
    #[error("unexpected class id from classifier: {0}")]
    UnknownClass(i64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
