use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Overall severity grade produced by the tree-ensemble classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SeverityLabel {
    Mild,
    Moderate,
    Severe,
}

impl SeverityLabel {
    pub fn from_class_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(SeverityLabel::Mild),
            1 => Some(SeverityLabel::Moderate),
            2 => Some(SeverityLabel::Severe),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// [xmin, ymin, xmax, ymax] scaled into the 0-1000 coordinate space.
    pub bbox: [i32; 4],
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeverityPrediction {
    pub label: SeverityLabel,
    pub probabilities: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalysisResponse {
    pub severity: String,
    pub detections: Vec<Detection>,
    pub classification: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}
