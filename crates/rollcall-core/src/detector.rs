//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD anchor-free detector on a grayscale frame: letterbox
//! resize to the 640×640 model input, per-stride score/bbox/landmark
//! decoding, then NMS. Output regions carry the five landmarks the
//! encoder needs for alignment.

use crate::types::Region;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: usize = 640;
const DET_PIXEL_MEAN: f32 = 127.5;
const DET_PIXEL_STD: f32 = 128.0;
const DET_SCORE_THRESHOLD: f32 = 0.5;
const DET_NMS_IOU: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox mapping between frame coordinates and model-input coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (DET_INPUT_SIZE as f32 / width as f32)
            .min(DET_INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Letterbox {
            scale,
            pad_x: (DET_INPUT_SIZE as f32 - new_w) / 2.0,
            pad_y: (DET_INPUT_SIZE as f32 - new_h) / 2.0,
        }
    }

    /// Map a point in letterboxed model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideSlots = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output slots for strides [8, 16, 32], discovered by
    /// tensor name at load time with a positional fallback.
    stride_slots: [StrideSlots; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_slots = resolve_output_slots(&output_names);
        tracing::debug!(?stride_slots, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_slots,
        })
    }

    /// Detect faces in a grayscale frame, sorted by descending confidence.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Region>, DetectorError> {
        let letterbox = Letterbox::fit(width as usize, height as usize);
        let input = preprocess(frame, width as usize, height as usize, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_slots[pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;

            decode_stride(scores, bboxes, kps, stride, &letterbox, &mut candidates);
        }

        let mut regions = nms(candidates, DET_NMS_IOU);
        regions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(regions)
    }
}

/// Letterbox-resize a grayscale frame into a normalized NCHW tensor.
///
/// Bilinear resize into the scaled area, padding filled with the pixel
/// mean so it normalizes to 0.0. The single gray channel is replicated
/// across R, G and B.
fn preprocess(frame: &[u8], width: usize, height: usize, letterbox: &Letterbox) -> Array4<f32> {
    let new_w = (width as f32 * letterbox.scale).round() as usize;
    let new_h = (height as f32 * letterbox.scale).round() as usize;
    let x_start = letterbox.pad_x.floor() as usize;
    let y_start = letterbox.pad_y.floor() as usize;
    let inv_scale = 1.0 / letterbox.scale;

    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));

    for ty in 0..DET_INPUT_SIZE {
        for tx in 0..DET_INPUT_SIZE {
            let inside = ty >= y_start && ty < y_start + new_h && tx >= x_start && tx < x_start + new_w;
            let pixel = if inside {
                sample_bilinear(
                    frame,
                    width,
                    height,
                    (tx - x_start) as f32,
                    (ty - y_start) as f32,
                    inv_scale,
                )
            } else {
                DET_PIXEL_MEAN
            };

            let normalized = (pixel - DET_PIXEL_MEAN) / DET_PIXEL_STD;
            tensor[[0, 0, ty, tx]] = normalized;
            tensor[[0, 1, ty, tx]] = normalized;
            tensor[[0, 2, ty, tx]] = normalized;
        }
    }

    tensor
}

/// Bilinear sample of the source frame at destination pixel (dx, dy).
fn sample_bilinear(
    frame: &[u8],
    width: usize,
    height: usize,
    dx: f32,
    dy: f32,
    inv_scale: f32,
) -> f32 {
    let src_x = (dx + 0.5) * inv_scale - 0.5;
    let src_y = (dy + 0.5) * inv_scale - 0.5;

    let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
    let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
    let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

    let tl = frame[y0 * width + x0] as f32;
    let tr = frame[y0 * width + x1] as f32;
    let bl = frame[y1 * width + x0] as f32;
    let br = frame[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Resolve output tensor ordering by name.
///
/// SCRFD exports either named tensors ("score_8", "bbox_16", "kps_32", ...)
/// or generic numeric names. When the named pattern is absent, fall back to
/// the standard positional layout:
///   [0-2] = scores, [3-5] = bboxes, [6-8] = kps (strides 8, 16, 32 each).
fn resolve_output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let fully_named = DET_STRIDES.iter().all(|&stride| {
        find("score", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if fully_named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        std::array::from_fn(|i| {
            let stride = DET_STRIDES[i];
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(
            ?names,
            "SCRFD: output names not recognized, using positional mapping"
        );
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode candidate regions for one stride level into `out`.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<Region>,
) {
    let grid_w = DET_INPUT_SIZE / stride;
    let grid_h = DET_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * DET_ANCHORS_PER_CELL;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_SCORE_THRESHOLD {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid_w) as f32 * stride as f32;
        let anchor_cy = (cell / grid_w) as f32 * stride as f32;

        // bbox: [left, top, right, bottom] offsets from the anchor center,
        // in stride units.
        let b = idx * 4;
        if b + 3 >= bboxes.len() {
            continue;
        }
        let (x1, y1) = letterbox.unmap(
            anchor_cx - bboxes[b] * stride as f32,
            anchor_cy - bboxes[b + 1] * stride as f32,
        );
        let (x2, y2) = letterbox.unmap(
            anchor_cx + bboxes[b + 2] * stride as f32,
            anchor_cy + bboxes[b + 3] * stride as f32,
        );

        let k = idx * 10;
        let landmarks = if k + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                *lm = letterbox.unmap(
                    anchor_cx + kps[k + i * 2] * stride as f32,
                    anchor_cy + kps[k + i * 2 + 1] * stride as f32,
                );
            }
            Some(lms)
        } else {
            None
        };

        out.push(Region {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
}

/// Non-maximum suppression: keep the highest-confidence region of each
/// overlapping cluster.
fn nms(mut regions: Vec<Region>, iou_threshold: f32) -> Vec<Region> {
    regions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Region> = Vec::new();
    for region in regions {
        if keep.iter().all(|k| iou(k, &region) <= iou_threshold) {
            keep.push(region);
        }
    }
    keep
}

/// Intersection-over-union of two regions.
fn iou(a: &Region, b: &Region) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Region {
        Region {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = region(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = region(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = region(5.0, 0.0, 10.0, 10.0, 1.0);
        // Intersection 5x10 = 50, union 150.
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let candidates = vec![
            region(0.0, 0.0, 100.0, 100.0, 0.9),
            region(5.0, 5.0, 100.0, 100.0, 0.8),
            region(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(candidates, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let candidates = vec![
            region(0.0, 0.0, 10.0, 10.0, 0.9),
            region(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(nms(candidates, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let letterbox = Letterbox::fit(320, 240);

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let mapped_x = orig_x * letterbox.scale + letterbox.pad_x;
        let mapped_y = orig_y * letterbox.scale + letterbox.pad_y;

        let (back_x, back_y) = letterbox.unmap(mapped_x, mapped_y);
        assert!((back_x - orig_x).abs() < 0.1, "x: {back_x} vs {orig_x}");
        assert!((back_y - orig_y).abs() < 0.1, "y: {back_y} vs {orig_y}");
    }

    #[test]
    fn test_resolve_output_slots_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16",
            "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = resolve_output_slots(&names);
        assert_eq!(slots[0], (0, 3, 6));
        assert_eq!(slots[1], (1, 4, 7));
        assert_eq!(slots[2], (2, 5, 8));
    }

    #[test]
    fn test_resolve_output_slots_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = resolve_output_slots(&names);
        assert_eq!(slots[0], (2, 0, 1));
        assert_eq!(slots[1], (5, 3, 4));
        assert_eq!(slots[2], (8, 6, 7));
    }

    #[test]
    fn test_resolve_output_slots_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(resolve_output_slots(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_preprocess_uniform_frame() {
        // A frame at the pixel mean normalizes to ~0 everywhere, padding
        // included.
        let frame = vec![128u8; 64 * 48];
        let letterbox = Letterbox::fit(64, 48);
        let tensor = preprocess(&frame, 64, 48, &letterbox);

        let max_abs = tensor.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(max_abs < 0.01, "max abs {max_abs}");
    }
}
