use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayView2, Axis, Ix3};
use ort::session::Session;
use ort::value::Value;
use shared::Detection;

use crate::inference::session::load_session;
use crate::inference::InferenceError;

/// Side length of the detector's square input.
const INPUT_SIZE: u32 = 640;
/// IoU threshold for per-class non-maximum suppression.
const NMS_IOU_THRESHOLD: f32 = 0.45;
/// Fill color for letterbox padding.
const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);
/// Bounding boxes are reported in this resolution-independent integer range.
const COORDINATE_SCALE: f32 = 1000.0;

/// A candidate box in whatever pixel space it was produced in,
/// as corner coordinates.
#[derive(Debug, Clone)]
struct RawBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    class_id: usize,
}

/// Pretrained region-detection model plus its class-label table.
///
/// The session is loaded once at startup and shared for the process
/// lifetime; access is serialized through the mutex.
pub struct RegionDetector {
    session: Mutex<Session>,
    labels: Vec<String>,
}

impl RegionDetector {
    pub fn load(model_path: &Path, labels_path: &Path) -> Result<Self, InferenceError> {
        let session = load_session(model_path)?;
        let labels = load_labels(labels_path)?;
        log::info!("Region detector ready with {} classes", labels.len());
        Ok(Self {
            session: Mutex::new(session),
            labels,
        })
    }

    /// Runs detection over a decoded RGB image and returns every region the
    /// model reports at or above `confidence_threshold`, with coordinates
    /// scaled into the 0-1000 range. Output order follows the model's
    /// native output order.
    pub fn detect(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, InferenceError> {
        let (img_w, img_h) = image.dimensions();
        let (input, scale, x_offset, y_offset) = letterbox(image, INPUT_SIZE);

        let output = {
            let mut session = self.session.lock().unwrap();
            let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
            outputs[0].try_extract_array::<f32>()?.into_owned()
        };

        let output = output.into_dimensionality::<Ix3>().map_err(|e| {
            InferenceError::Preprocessing(format!("unexpected detector output shape: {e}"))
        })?;
        let grid = output.index_axis(Axis(0), 0);
        if grid.shape()[0] != 4 + self.labels.len() {
            return Err(InferenceError::Preprocessing(format!(
                "detector output has {} rows, expected {} for {} classes",
                grid.shape()[0],
                4 + self.labels.len(),
                self.labels.len()
            )));
        }

        let candidates = decode_output(grid, confidence_threshold);
        let kept = non_maximum_suppression(candidates, NMS_IOU_THRESHOLD);

        let detections = kept
            .into_iter()
            .map(|raw| {
                let boxed = raw.to_original(scale, x_offset, y_offset, img_w, img_h);
                Detection {
                    label: self
                        .labels
                        .get(boxed.class_id)
                        .cloned()
                        .unwrap_or_else(|| boxed.class_id.to_string()),
                    confidence: boxed.confidence,
                    bbox: normalize_bbox(&boxed, img_w, img_h),
                }
            })
            .collect();

        Ok(detections)
    }
}

/// One class name per line, ids assigned by line number.
fn load_labels(labels_path: &Path) -> Result<Vec<String>, InferenceError> {
    if !labels_path.exists() {
        return Err(InferenceError::ModelNotFound(labels_path.to_path_buf()));
    }

    let file = File::open(labels_path)?;
    let reader = BufReader::new(file);

    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let name = line.trim();
        if !name.is_empty() {
            labels.push(name.to_string());
        }
    }
    Ok(labels)
}

/// Resizes preserving aspect ratio, centers on a padded square canvas, and
/// packs the pixels into a normalized NCHW tensor. Returns the tensor plus
/// the scale and offsets needed to map boxes back to the source image.
fn letterbox(image: &RgbImage, input_size: u32) -> (Array4<f32>, f32, u32, u32) {
    let (width, height) = image.dimensions();
    let scale =
        (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
    let new_width = ((width as f32 * scale) as u32).max(1);
    let new_height = ((height as f32 * scale) as u32).max(1);

    let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);
    let mut padded = RgbImage::from_pixel(input_size, input_size, PAD_COLOR);
    let x_offset = (input_size - new_width) / 2;
    let y_offset = (input_size - new_height) / 2;
    image::imageops::overlay(&mut padded, &resized, x_offset as i64, y_offset as i64);

    let size = input_size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in padded.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        input[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        input[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    (input, scale, x_offset, y_offset)
}

/// Decodes a `[4 + num_classes, anchors]` prediction grid into corner-format
/// candidate boxes, keeping only anchors whose best class score reaches the
/// threshold. Anchor order is preserved.
fn decode_output(grid: ArrayView2<f32>, confidence_threshold: f32) -> Vec<RawBox> {
    let num_classes = grid.shape()[0] - 4;
    let anchors = grid.shape()[1];

    let mut boxes = Vec::new();
    for j in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for c in 0..num_classes {
            let score = grid[[4 + c, j]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (grid[[0, j]], grid[[1, j]], grid[[2, j]], grid[[3, j]]);
        boxes.push(RawBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            confidence: best_score,
            class_id: best_class,
        });
    }
    boxes
}

fn compute_iou(a: &RawBox, b: &RawBox) -> f32 {
    let inter_x1 = a.x1.max(b.x1);
    let inter_y1 = a.y1.max(b.y1);
    let inter_x2 = a.x2.min(b.x2);
    let inter_y2 = a.y2.min(b.y2);

    let inter_area = (inter_x2 - inter_x1).max(0.0) * (inter_y2 - inter_y1).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union_area = area_a + area_b - inter_area;

    if union_area <= 0.0 {
        0.0
    } else {
        inter_area / union_area
    }
}

/// Standard per-class NMS. Kept boxes come back in their original
/// (detector-native) order.
fn non_maximum_suppression(boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    let mut by_class: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, b) in boxes.iter().enumerate() {
        by_class.entry(b.class_id).or_default().push(i);
    }

    let mut keep_indices: Vec<usize> = Vec::new();
    for indices in by_class.values_mut() {
        indices.sort_by(|&i1, &i2| {
            boxes[i2]
                .confidence
                .partial_cmp(&boxes[i1].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut suppressed = vec![false; indices.len()];
        for i in 0..indices.len() {
            if suppressed[i] {
                continue;
            }
            let idx_i = indices[i];
            keep_indices.push(idx_i);
            for j in (i + 1)..indices.len() {
                if suppressed[j] {
                    continue;
                }
                if compute_iou(&boxes[idx_i], &boxes[indices[j]]) > iou_threshold {
                    suppressed[j] = true;
                }
            }
        }
    }

    keep_indices.sort_unstable();
    keep_indices.into_iter().map(|i| boxes[i].clone()).collect()
}

impl RawBox {
    /// Maps letterbox-space coordinates back into the source image's pixel
    /// space, clamped to the image bounds.
    fn to_original(
        &self,
        scale: f32,
        x_offset: u32,
        y_offset: u32,
        img_w: u32,
        img_h: u32,
    ) -> RawBox {
        let map_x = |x: f32| ((x - x_offset as f32) / scale).clamp(0.0, img_w as f32);
        let map_y = |y: f32| ((y - y_offset as f32) / scale).clamp(0.0, img_h as f32);
        RawBox {
            x1: map_x(self.x1),
            y1: map_y(self.y1),
            x2: map_x(self.x2),
            y2: map_y(self.y2),
            confidence: self.confidence,
            class_id: self.class_id,
        }
    }
}

/// Scales pixel coordinates axis-wise into 0-1000 integers,
/// as [xmin, ymin, xmax, ymax].
fn normalize_bbox(raw: &RawBox, img_w: u32, img_h: u32) -> [i32; 4] {
    let norm_x = |x: f32| ((x / img_w as f32) * COORDINATE_SCALE) as i32;
    let norm_y = |y: f32| ((y / img_h as f32) * COORDINATE_SCALE) as i32;
    [
        norm_x(raw.x1).clamp(0, 1000),
        norm_y(raw.y1).clamp(0, 1000),
        norm_x(raw.x2).clamp(0, 1000),
        norm_y(raw.y2).clamp(0, 1000),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32, class_id: usize) -> RawBox {
        RawBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
        }
    }

    #[test]
    fn decode_keeps_anchors_above_threshold_in_order() {
        // Two classes, three anchors: scores put anchor 0 below threshold,
        // anchors 1 and 2 above with different best classes.
        let grid = Array2::from_shape_vec(
            (6, 3),
            vec![
                100.0, 200.0, 300.0, // cx
                100.0, 200.0, 300.0, // cy
                40.0, 60.0, 80.0, // w
                20.0, 30.0, 40.0, // h
                0.10, 0.90, 0.20, // class 0 scores
                0.05, 0.30, 0.75, // class 1 scores
            ],
        )
        .unwrap();

        let boxes = decode_output(grid.view(), 0.25);
        assert_eq!(boxes.len(), 2);

        assert_eq!(boxes[0].class_id, 0);
        assert!((boxes[0].confidence - 0.90).abs() < 1e-6);
        assert!((boxes[0].x1 - 170.0).abs() < 1e-4);
        assert!((boxes[0].y1 - 185.0).abs() < 1e-4);
        assert!((boxes[0].x2 - 230.0).abs() < 1e-4);
        assert!((boxes[0].y2 - 215.0).abs() < 1e-4);

        assert_eq!(boxes[1].class_id, 1);
        assert!((boxes[1].confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = raw(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        let b = raw(20.0, 20.0, 30.0, 30.0, 0.9, 0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(compute_iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_boxes_of_same_class() {
        let boxes = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.8, 0),
            raw(1.0, 1.0, 11.0, 11.0, 0.9, 0),
            raw(50.0, 50.0, 60.0, 60.0, 0.7, 0),
        ];
        let kept = non_maximum_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        // The lower-confidence overlap is dropped; survivors stay in
        // detector-native order.
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let boxes = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.8, 0),
            raw(1.0, 1.0, 11.0, 11.0, 0.9, 1),
        ];
        let kept = non_maximum_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn normalized_bbox_is_resolution_independent() {
        let b = raw(500.0, 250.0, 1500.0, 500.0, 0.9, 0);
        assert_eq!(normalize_bbox(&b, 2000, 500), [250, 500, 750, 1000]);
    }

    #[test]
    fn normalized_bbox_stays_within_bounds() {
        // Letterbox mapping clamps to the image first; normalization clamps
        // the integer result as well.
        let b = raw(-5.0, 0.0, 999.0, 750.0, 0.9, 0).to_original(1.0, 0, 0, 640, 480);
        let bbox = normalize_bbox(&b, 640, 480);
        for v in bbox {
            assert!((0..=1000).contains(&v));
        }
    }

    #[test]
    fn letterbox_centers_and_pads() {
        let image = RgbImage::from_pixel(100, 50, Rgb([255, 0, 0]));
        let (input, scale, x_offset, y_offset) = letterbox(&image, 640);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert!((scale - 6.4).abs() < 1e-6);
        assert_eq!(x_offset, 0);
        assert_eq!(y_offset, 160);

        // Top rows are padding.
        let pad = PAD_COLOR.0[0] as f32 / 255.0;
        assert!((input[[0, 0, 0, 0]] - pad).abs() < 1e-6);
        // Center lands inside the resized content, which is pure red.
        assert!((input[[0, 0, 320, 320]] - 1.0).abs() < 1e-6);
        assert!(input[[0, 1, 320, 320]].abs() < 1e-6);
    }

    #[test]
    fn empty_candidate_set_survives_nms() {
        assert!(non_maximum_suppression(Vec::new(), 0.45).is_empty());
    }
}
