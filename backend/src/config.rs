use std::env;
use std::path::PathBuf;

/// Environment-driven settings, resolved once at startup. Defaults mirror
/// the layout the service ships with: model artifacts under `models/` and
/// transient uploads under `temp_uploads/`.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub model_dir: PathBuf,
    pub upload_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8081);
        let model_dir = env::var("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("temp_uploads"));

        Self {
            port,
            model_dir,
            upload_dir,
        }
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("deep").join("acne_detection.onnx")
    }

    pub fn detector_labels_path(&self) -> PathBuf {
        self.model_dir.join("deep").join("acne_labels.txt")
    }

    pub fn backbone_model_path(&self) -> PathBuf {
        self.model_dir.join("ml").join("resnet50_backbone.onnx")
    }

    pub fn forest_model_path(&self) -> PathBuf {
        self.model_dir.join("ml").join("random_forest.onnx")
    }
}
