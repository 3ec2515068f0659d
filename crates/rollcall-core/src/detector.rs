//! Face-region detection.
//!
//! The session loops only depend on [`RegionDetector`]. [`ScrfdDetector`] is
//! the bundled implementation: SCRFD (Sample and Computation Redistribution
//! for Efficient Face Detection) through ONNX Runtime, with 3-stride anchor
//! decoding and NMS post-processing.

use crate::types::BoundingBox;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Most pyramid levels run per frame, the full-size frame included.
const MAX_PYRAMID_LEVELS: usize = 3;
/// Faces smaller than this (input pixels) fall below the finest SCRFD stride.
const MIN_DETECTABLE_FACE: f32 = 16.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Something that finds face regions in a grayscale frame.
pub trait RegionDetector {
    /// Return zero or more face boxes, best first.
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Detection density/quality knobs. They never change session semantics.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Downscale step between pyramid levels; must be > 1.0.
    pub scale_factor: f32,
    /// Overlapping raw candidates a region must absorb to be kept.
    pub min_neighbors: u32,
    /// Smallest accepted face side, in frame pixels.
    pub min_size: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 50,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !(self.scale_factor > 1.0) {
            return Err(DetectorError::InvalidParams(format!(
                "scale_factor must be greater than 1.0, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }

    /// Frame scales to run detection at: `1`, `1/scale_factor`, ...
    ///
    /// Stops once a `min_size` face would shrink below what the finest stride
    /// can resolve, and never exceeds [`MAX_PYRAMID_LEVELS`].
    fn pyramid_scales(&self) -> Vec<f32> {
        let mut scales = vec![1.0f32];
        while scales.len() < MAX_PYRAMID_LEVELS {
            let next = scales[scales.len() - 1] / self.scale_factor;
            if self.min_size as f32 * next < MIN_DETECTABLE_FACE {
                break;
            }
            scales.push(next);
        }
        scales
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// A candidate box and the number of raw candidates merged into it.
struct Candidate {
    bbox: BoundingBox,
    neighbors: u32,
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    params: DetectionParams,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, params: DetectionParams) -> Result<Self, DetectorError> {
        params.validate()?;
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?stride_indices,
            ?params,
            "loaded SCRFD detector"
        );

        Ok(Self {
            session,
            params,
            stride_indices,
        })
    }

    /// Letterbox a grayscale frame into a normalized NCHW tensor.
    fn preprocess(frame: &GrayImage) -> (Array4<f32>, LetterboxInfo) {
        let (width, height) = (frame.width() as usize, frame.height() as usize);
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);

        let new_w = ((width as f32 * scale).round() as usize).min(SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).min(SCRFD_INPUT_SIZE);
        let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
        let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;

        let resized = image::imageops::resize(
            frame,
            new_w as u32,
            new_h as u32,
            image::imageops::FilterType::Triangle,
        );

        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;
        // Padding uses the mean so it normalizes to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        for y in 0..new_h {
            for x in 0..new_w {
                let pixel = resized.get_pixel(x as u32, y as u32)[0] as f32;
                let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
                for c in 0..3 {
                    tensor[[0, c, y + pad_y_start, x + pad_x_start]] = normalized;
                }
            }
        }

        (tensor, LetterboxInfo { scale, pad_x, pad_y })
    }

    /// One inference pass; decoded candidates are appended to `raw`.
    fn run_level(
        &mut self,
        input: Array4<f32>,
        letterbox: &LetterboxInfo,
        raw: &mut Vec<BoundingBox>,
    ) -> Result<(), DetectorError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            raw.extend(decode_stride(scores, bboxes, stride, letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }
        Ok(())
    }
}

impl RegionDetector for ScrfdDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let mut raw = Vec::new();
        for level in self.params.pyramid_scales() {
            let (width, height) = (
                (frame.width() as f32 * level).round() as u32,
                (frame.height() as f32 * level).round() as u32,
            );
            if width == 0 || height == 0 {
                break;
            }
            let scaled;
            let level_frame = if level < 1.0 {
                scaled = image::imageops::resize(frame, width, height, image::imageops::FilterType::Triangle);
                &scaled
            } else {
                frame
            };

            let (input, mut letterbox) = Self::preprocess(level_frame);
            // Decoded boxes land in full-frame coordinates.
            letterbox.scale *= width as f32 / frame.width() as f32;
            self.run_level(input, &letterbox, &mut raw)?;
        }

        let candidates = raw.len();
        let faces = filter_regions(nms(raw, SCRFD_NMS_THRESHOLD), &self.params);
        tracing::trace!(candidates, faces = faces.len(), "SCRFD detect");
        Ok(faces)
    }
}

/// Map SCRFD outputs to stride slots.
///
/// Named exports use "score_8", "bbox_16", ...; otherwise fall back to the
/// standard positional ordering `[0-2] = scores, [3-5] = bboxes`.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level into frame coordinates.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_h * grid_w * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let off = idx * 4;
        let Some(d) = bboxes.get(off..off + 4) else {
            continue;
        };

        let anchor = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor % grid_w) as f32 * s;
        let anchor_cy = (anchor / grid_w) as f32 * s;

        let x1 = (anchor_cx - d[0] * s - letterbox.pad_x) / letterbox.scale;
        let y1 = (anchor_cy - d[1] * s - letterbox.pad_y) / letterbox.scale;
        let x2 = (anchor_cx + d[2] * s - letterbox.pad_x) / letterbox.scale;
        let y2 = (anchor_cy + d[3] * s - letterbox.pad_y) / letterbox.scale;

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    detections
}

/// Non-Maximum Suppression that also counts how many candidates each kept box absorbed.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<Candidate> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        let mut neighbors = 0;
        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
                neighbors += 1;
            }
        }
        keep.push(Candidate {
            bbox: detections[i].clone(),
            neighbors,
        });
    }
    keep
}

/// Apply `min_neighbors` and `min_size`, preserving confidence order.
fn filter_regions(candidates: Vec<Candidate>, params: &DetectionParams) -> Vec<BoundingBox> {
    let min_side = params.min_size as f32;
    candidates
        .into_iter()
        .filter(|c| c.neighbors >= params.min_neighbors)
        .filter(|c| c.bbox.width >= min_side && c.bbox.height >= min_side)
        .map(|c| c.bbox)
        .collect()
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_counts_absorbed_neighbors() {
        let detections = vec![
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(3.0, 2.0, 100.0, 100.0, 0.6),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].bbox.confidence - 0.9).abs() < 1e-6);
        assert_eq!(kept[0].neighbors, 2);
        assert!((kept[1].bbox.confidence - 0.7).abs() < 1e-6);
        assert_eq!(kept[1].neighbors, 0);
    }

    #[test]
    fn test_filter_min_neighbors_and_size() {
        let candidates = vec![
            Candidate { bbox: make_bbox(0.0, 0.0, 120.0, 120.0, 0.9), neighbors: 4 },
            Candidate { bbox: make_bbox(0.0, 0.0, 120.0, 120.0, 0.8), neighbors: 1 },
            Candidate { bbox: make_bbox(0.0, 0.0, 30.0, 30.0, 0.7), neighbors: 9 },
        ];
        let params = DetectionParams { scale_factor: 1.1, min_neighbors: 3, min_size: 50 };
        let faces = filter_regions(candidates, &params);
        assert_eq!(faces.len(), 1);
        assert!((faces[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_params_validation() {
        assert!(DetectionParams::default().validate().is_ok());
        let bad = DetectionParams { scale_factor: 1.0, ..Default::default() };
        assert!(matches!(bad.validate(), Err(DetectorError::InvalidParams(_))));
    }

    #[test]
    fn test_pyramid_scales_follow_scale_factor() {
        let scales = DetectionParams::default().pyramid_scales();
        assert_eq!(scales.len(), MAX_PYRAMID_LEVELS);
        assert!((scales[1] - 1.0 / 1.1).abs() < 1e-6);
        assert!((scales[2] - 1.0 / (1.1 * 1.1)).abs() < 1e-6);

        // 50px at 1/4 is 12.5px, below the finest stride.
        let coarse = DetectionParams { scale_factor: 2.0, ..Default::default() };
        assert_eq!(coarse.pyramid_scales(), vec![1.0, 0.5]);

        let tiny = DetectionParams { scale_factor: 1.5, min_size: 20, ..Default::default() };
        assert_eq!(tiny.pyramid_scales(), vec![1.0]);
    }

    #[test]
    fn test_decode_stride_maps_to_frame_coordinates() {
        // Identity letterbox, one confident anchor at grid cell (1, 0) of stride 32.
        let stride = 32;
        let cells = (SCRFD_INPUT_SIZE / stride) * (SCRFD_INPUT_SIZE / stride);
        let mut scores = vec![0.0f32; cells * SCRFD_ANCHORS_PER_CELL];
        let mut bboxes = vec![0.0f32; cells * SCRFD_ANCHORS_PER_CELL * 4];
        let idx = 2; // anchor 1 → cx = 32, cy = 0
        scores[idx] = 0.95;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.0, 1.0, 2.0]);

        let letterbox = LetterboxInfo { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&scores, &bboxes, stride, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 16.0).abs() < 1e-4);
        assert!((d.y - 0.0).abs() < 1e-4);
        assert!((d.width - 48.0).abs() < 1e-4);
        assert!((d.height - 64.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_letterbox_padding() {
        let frame = GrayImage::from_pixel(320, 160, Luma([255]));
        let (tensor, lb) = ScrfdDetector::preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert!((lb.pad_y - 160.0).abs() < 1e-6);
        // Padding row normalizes to zero; image row carries the pixel value.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 320, 320]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(discover_output_indices(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }
}
