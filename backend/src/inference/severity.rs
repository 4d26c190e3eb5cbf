use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::Value;
use shared::{SeverityLabel, SeverityPrediction};

use crate::inference::session::load_session;
use crate::inference::InferenceError;

/// Square resolution the backbone was trained on.
const INPUT_SIZE: u32 = 224;
/// Per-channel means subtracted after the RGB->BGR swap, in BGR order.
const BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];

/// Feature-extraction backbone plus tree-ensemble classifier.
///
/// Both sessions are loaded once at startup and shared for the process
/// lifetime; access is serialized through the mutexes. The forest artifact
/// is expected to emit a label tensor and a class-probability tensor.
pub struct SeverityClassifier {
    backbone: Mutex<Session>,
    forest: Mutex<Session>,
}

impl SeverityClassifier {
    pub fn load(backbone_path: &Path, forest_path: &Path) -> Result<Self, InferenceError> {
        let backbone = load_session(backbone_path)?;
        let forest = load_session(forest_path)?;
        Ok(Self {
            backbone: Mutex::new(backbone),
            forest: Mutex::new(forest),
        })
    }

    /// Grades the image at `image_path`: extracts backbone features, runs
    /// the tree ensemble over them, and maps the predicted class id onto
    /// the severity scale. A missing file is an explicit error, never a
    /// silent non-prediction.
    pub fn classify(&self, image_path: &Path) -> Result<SeverityPrediction, InferenceError> {
        if !image_path.exists() {
            return Err(InferenceError::ImageNotFound(image_path.to_path_buf()));
        }

        let image = image::open(image_path)?.to_rgb8();
        let input = backbone_input(&image);

        let features = {
            let mut session = self.backbone.lock().unwrap();
            let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
            let features = outputs[0].try_extract_array::<f32>()?;
            features.iter().copied().collect::<Vec<f32>>()
        };

        let feature_len = features.len();
        let sample = Array2::from_shape_vec((1, feature_len), features)
            .map_err(|e| InferenceError::Preprocessing(e.to_string()))?;

        let (class_id, probabilities) = {
            let mut session = self.forest.lock().unwrap();
            let outputs = session.run(ort::inputs![Value::from_array(sample)?])?;
            let labels = outputs[0].try_extract_array::<i64>()?;
            let class_id = labels.iter().copied().next().ok_or_else(|| {
                InferenceError::Preprocessing("classifier returned no label".to_string())
            })?;
            let probabilities = outputs[1]
                .try_extract_array::<f32>()?
                .iter()
                .copied()
                .collect::<Vec<f32>>();
            (class_id, probabilities)
        };

        let label =
            SeverityLabel::from_class_id(class_id).ok_or(InferenceError::UnknownClass(class_id))?;

        log::info!(
            "Predicted severity for {}: {} (probabilities: {:?})",
            image_path.display(),
            label,
            probabilities
        );

        Ok(SeverityPrediction {
            label,
            probabilities,
        })
    }
}

/// Resizes to the backbone resolution and applies its expected input
/// transform: channels reordered RGB->BGR with the per-channel means
/// subtracted, no further scaling. Output layout is NHWC.
fn backbone_input(image: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let size = INPUT_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        input[[0, y, x, 0]] = pixel[2] as f32 - BGR_MEAN[0];
        input[[0, y, x, 1]] = pixel[1] as f32 - BGR_MEAN[1];
        input[[0, y, x, 2]] = pixel[0] as f32 - BGR_MEAN[2];
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn backbone_input_swaps_channels_and_subtracts_means() {
        // A uniform color survives resizing untouched, so every position
        // carries the same transformed values.
        let image = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
        let input = backbone_input(&image);

        assert_eq!(input.shape(), &[1, 224, 224, 3]);
        assert!((input[[0, 100, 100, 0]] - (30.0 - BGR_MEAN[0])).abs() < 1e-4);
        assert!((input[[0, 100, 100, 1]] - (20.0 - BGR_MEAN[1])).abs() < 1e-4);
        assert!((input[[0, 100, 100, 2]] - (10.0 - BGR_MEAN[2])).abs() < 1e-4);
    }

    const BACKBONE_PATH: &str = "models/ml/resnet50_backbone.onnx";
    const FOREST_PATH: &str = "models/ml/random_forest.onnx";

    #[test]
    #[ignore] // Only run if model files are present
    fn missing_image_is_an_explicit_error() {
        let classifier =
            SeverityClassifier::load(Path::new(BACKBONE_PATH), Path::new(FOREST_PATH)).unwrap();
        let result = classifier.classify(Path::new("definitely/not/here.jpg"));
        assert!(matches!(result, Err(InferenceError::ImageNotFound(_))));
    }

    #[test]
    #[ignore] // Only run if model files are present
    fn classification_is_deterministic() {
        let classifier =
            SeverityClassifier::load(Path::new(BACKBONE_PATH), Path::new(FOREST_PATH)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.png");
        RgbImage::from_pixel(96, 96, Rgb([180, 120, 100]))
            .save(&path)
            .unwrap();

        let first = classifier.classify(&path).unwrap();
        let second = classifier.classify(&path).unwrap();
        assert_eq!(first.label, second.label);
        assert_eq!(first.probabilities, second.probabilities);

        let total: f32 = first.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-3);
    }
}
