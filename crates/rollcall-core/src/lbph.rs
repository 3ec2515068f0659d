//! Local Binary Pattern Histogram (LBPH) face model.
//!
//! Each training face is reduced to a spatial histogram of circular local
//! binary patterns. Prediction is nearest-neighbor over those histograms using
//! the alternative chi-square distance, so the returned score is a distance:
//! 0.0 for an identical face, growing as faces diverge.

use crate::types::{Identifier, Prediction};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Tolerance for "neighbor equals center" after bilinear interpolation.
const LBP_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model file {path} is not a valid LBPH model: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// LBPH operator and grid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    /// Radius of the sampling circle around each pixel.
    pub radius: u32,
    /// Sample points on the circle; histograms have `2^neighbors` bins.
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbphParams {
    fn bins(&self) -> usize {
        1usize << self.neighbors
    }
}

/// One training face reduced to its spatial histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbphEntry {
    pub identifier: Identifier,
    pub histogram: Vec<f32>,
}

/// Trained LBPH model: parameters plus one histogram per training face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbphModel {
    pub params: LbphParams,
    pub entries: Vec<LbphEntry>,
}

impl LbphModel {
    /// Build a model from already-normalized faces.
    pub fn train<'a, I>(params: LbphParams, samples: I) -> Self
    where
        I: IntoIterator<Item = (Identifier, &'a GrayImage)>,
    {
        let entries = samples
            .into_iter()
            .map(|(identifier, face)| LbphEntry {
                identifier,
                histogram: spatial_histogram(&params, face),
            })
            .collect();
        Self { params, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct identifiers the model can emit, sorted.
    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self.entries.iter().map(|e| e.identifier).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Nearest training face to `face` (already normalized).
    ///
    /// Ties keep the earliest entry, so prediction is deterministic for a
    /// deterministic entry order.
    pub fn predict(&self, face: &GrayImage) -> Prediction {
        let probe = spatial_histogram(&self.params, face);

        let mut best = Prediction {
            identifier: None,
            distance: f64::MAX,
        };
        for entry in &self.entries {
            let distance = chi_square(&entry.histogram, &probe);
            if distance < best.distance {
                best = Prediction {
                    identifier: Some(entry.identifier),
                    distance,
                };
            }
        }
        best
    }

    /// Write the model, replacing any previous file atomically.
    ///
    /// The JSON is written to a sibling `.tmp` file first and renamed over
    /// `path`, so a concurrent reader sees either the old or the new model.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec(self).map_err(|source| ModelError::Format {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = tmp_path(path);
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, path).map_err(io_err)?;

        tracing::info!(
            path = %path.display(),
            entries = self.entries.len(),
            identities = self.identifiers().len(),
            "LBPH model saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ModelError::Format {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Circular (extended) LBP codes with bilinear sampling.
///
/// Output is `(w - 2r) × (h - 2r)` codes, row-major. Border pixels without a
/// full neighborhood are dropped.
fn lbp_codes(params: &LbphParams, face: &GrayImage) -> (Vec<u32>, usize, usize) {
    let (w, h) = (face.width() as usize, face.height() as usize);
    let r = params.radius as usize;
    if w <= 2 * r || h <= 2 * r {
        return (Vec::new(), 0, 0);
    }

    let out_w = w - 2 * r;
    let out_h = h - 2 * r;
    let mut codes = vec![0u32; out_w * out_h];
    let src = face.as_raw();

    for n in 0..params.neighbors {
        let angle = 2.0 * PI * n as f64 / params.neighbors as f64;
        let sx = params.radius as f64 * angle.cos();
        let sy = -(params.radius as f64) * angle.sin();

        let fx = sx.floor();
        let fy = sy.floor();
        let cx = sx.ceil();
        let cy = sy.ceil();
        let tx = sx - fx;
        let ty = sy - fy;

        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        let (fx, fy, cx, cy) = (fx as isize, fy as isize, cx as isize, cy as isize);

        for y in r..h - r {
            for x in r..w - r {
                let at = |dy: isize, dx: isize| -> f64 {
                    let yy = (y as isize + dy) as usize;
                    let xx = (x as isize + dx) as usize;
                    src[yy * w + xx] as f64
                };
                let t = w1 * at(fy, fx) + w2 * at(fy, cx) + w3 * at(cy, fx) + w4 * at(cy, cx);
                let center = src[y * w + x] as f64;
                if t > center || (t - center).abs() < LBP_EPSILON {
                    codes[(y - r) * out_w + (x - r)] |= 1 << n;
                }
            }
        }
    }

    (codes, out_w, out_h)
}

/// Concatenated per-cell histograms, each normalized by the cell pixel count.
fn spatial_histogram(params: &LbphParams, face: &GrayImage) -> Vec<f32> {
    let bins = params.bins();
    let (gx, gy) = (params.grid_x as usize, params.grid_y as usize);
    let mut hist = vec![0f32; gx * gy * bins];

    let (codes, w, h) = lbp_codes(params, face);
    let cell_w = w / gx.max(1);
    let cell_h = h / gy.max(1);
    if cell_w == 0 || cell_h == 0 {
        return hist;
    }
    let cell_pixels = (cell_w * cell_h) as f32;

    for row in 0..gy {
        for col in 0..gx {
            let cell = &mut hist[(row * gx + col) * bins..(row * gx + col + 1) * bins];
            for y in row * cell_h..(row + 1) * cell_h {
                for x in col * cell_w..(col + 1) * cell_w {
                    cell[codes[y * w + x] as usize] += 1.0;
                }
            }
            for v in cell.iter_mut() {
                *v /= cell_pixels;
            }
        }
    }

    hist
}

/// Alternative chi-square distance: `2 Σ (a - b)² / (a + b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    let mut sum = 0.0f64;
    for (&p, &q) in a.iter().zip(b.iter()) {
        let denom = (p + q) as f64;
        if denom > f64::EPSILON {
            let diff = (p - q) as f64;
            sum += diff * diff / denom;
        }
    }
    2.0 * sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(horizontal: bool, period: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let t = if horizontal { y } else { x };
            Luma([if (t / period) % 2 == 0 { 40 } else { 210 }])
        })
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let a = vec![0.25, 0.25, 0.5, 0.0];
        assert_eq!(chi_square(&a, &a), 0.0);
    }

    #[test]
    fn test_chi_square_disjoint() {
        // Disjoint unit histograms: 2 * (1 + 1)
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((chi_square(&a, &b) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_lbp_uniform_image_sets_all_bits() {
        let face = GrayImage::from_pixel(5, 5, Luma([100]));
        let (codes, w, h) = lbp_codes(&LbphParams::default(), &face);
        assert_eq!((w, h), (3, 3));
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_lbp_too_small_image() {
        let face = GrayImage::from_pixel(2, 2, Luma([100]));
        let (codes, w, h) = lbp_codes(&LbphParams::default(), &face);
        assert!(codes.is_empty());
        assert_eq!((w, h), (0, 0));
    }

    #[test]
    fn test_spatial_histogram_cells_sum_to_one() {
        let params = LbphParams::default();
        let hist = spatial_histogram(&params, &stripes(true, 4));
        assert_eq!(hist.len(), 64 * 256);
        for cell in hist.chunks(256) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "cell sums to {total}");
        }
    }

    #[test]
    fn test_predict_nearest() {
        let h = stripes(true, 4);
        let v = stripes(false, 4);
        let model = LbphModel::train(
            LbphParams::default(),
            [(Identifier(1), &h), (Identifier(2), &v)],
        );

        let p = model.predict(&h);
        assert_eq!(p.identifier, Some(Identifier(1)));
        assert!(p.distance.abs() < 1e-9);

        let p = model.predict(&v);
        assert_eq!(p.identifier, Some(Identifier(2)));
    }

    #[test]
    fn test_predict_empty_model() {
        let model = LbphModel::train(LbphParams::default(), std::iter::empty());
        let p = model.predict(&stripes(true, 4));
        assert_eq!(p.identifier, None);
        assert!(model.is_empty());
    }

    #[test]
    fn test_identifiers_sorted_unique() {
        let face = stripes(true, 4);
        let model = LbphModel::train(
            LbphParams::default(),
            [(Identifier(5), &face), (Identifier(2), &face), (Identifier(5), &face)],
        );
        assert_eq!(model.identifiers(), vec![Identifier(2), Identifier(5)]);
        assert_eq!(model.len(), 3);
    }

    #[test]
    fn test_save_load_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let face = stripes(false, 3);

        let first = LbphModel::train(LbphParams::default(), [(Identifier(1), &face)]);
        first.save(&path).unwrap();
        let second = LbphModel::train(LbphParams::default(), [(Identifier(9), &face)]);
        second.save(&path).unwrap();

        let loaded = LbphModel::load(&path).unwrap();
        assert_eq!(loaded.identifiers(), vec![Identifier(9)]);
        assert!(!dir.path().join("model.json.tmp").exists());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"not a model").unwrap();
        assert!(matches!(LbphModel::load(&path), Err(ModelError::Format { .. })));
    }
}
