use std::path::Path;

use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use crate::inference::InferenceError;

/// Builds a CPU-backed ONNX Runtime session for a model artifact on disk.
pub fn load_session(model_path: &Path) -> Result<Session, InferenceError> {
    if !model_path.exists() {
        return Err(InferenceError::ModelNotFound(model_path.to_path_buf()));
    }

    let session = Session::builder()?
        .with_execution_providers([CPUExecutionProvider::default().build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model_path)?;

    log::info!("Loaded ONNX model from {}", model_path.display());
    Ok(session)
}
