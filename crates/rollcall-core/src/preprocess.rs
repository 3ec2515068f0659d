//! Face-region normalization shared by enrollment, training, and recognition.
//!
//! Every face is cropped, resized to 200x200 and histogram-equalized. Training
//! re-applies the pipeline to stored samples so that a sample and a live probe
//! are always comparable.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::contrast;

/// Side length of a normalized face sample.
pub const FACE_SIZE: u32 = 200;

/// Crop a detected region out of a grayscale frame.
///
/// Returns `None` when the box does not overlap the frame.
pub fn crop_face(frame: &GrayImage, region: &BoundingBox) -> Option<GrayImage> {
    let (x, y, w, h) = region.to_pixel_rect(frame.width(), frame.height())?;
    Some(imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// Resize to `FACE_SIZE` square (if needed) and equalize the histogram.
pub fn normalize_face(face: &GrayImage) -> GrayImage {
    let mut out = if face.dimensions() == (FACE_SIZE, FACE_SIZE) {
        face.clone()
    } else {
        imageops::resize(face, FACE_SIZE, FACE_SIZE, FilterType::Triangle)
    };
    equalize_histogram(&mut out);
    out
}

/// Global histogram equalization in-place.
///
/// A single-valued image has nothing to stretch and is left unchanged.
pub fn equalize_histogram(gray: &mut GrayImage) {
    let Some(&first) = gray.as_raw().first() else {
        return;
    };
    if gray.as_raw().iter().all(|&p| p == first) {
        return;
    }
    contrast::equalize_histogram_mut(gray);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(w: u32, h: u32, lo: u8, hi: u8) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| {
            let span = (hi - lo) as u32;
            Luma([lo + (x * span / (w - 1).max(1)) as u8])
        })
    }

    #[test]
    fn test_equalize_stretches_low_contrast() {
        let mut img = gradient(64, 8, 100, 110);
        equalize_histogram(&mut img);
        let min = *img.as_raw().iter().min().unwrap();
        let max = *img.as_raw().iter().max().unwrap();
        assert_eq!(max, 255);
        assert!(max - min > 200, "range {min}..={max}");
    }

    #[test]
    fn test_equalize_uniform_image_unchanged() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([77]));
        equalize_histogram(&mut img);
        assert!(img.as_raw().iter().all(|&p| p == 77));
    }

    #[test]
    fn test_equalize_preserves_order() {
        let mut img = gradient(32, 1, 20, 200);
        let before = img.as_raw().clone();
        equalize_histogram(&mut img);
        for i in 1..before.len() {
            if before[i] >= before[i - 1] {
                assert!(img.as_raw()[i] >= img.as_raw()[i - 1]);
            }
        }
    }

    #[test]
    fn test_two_level_image_is_a_fixed_point() {
        let mut img = GrayImage::from_fn(20, 20, |_, y| Luma([if y < 10 { 60 } else { 190 }]));
        equalize_histogram(&mut img);
        let once = img.clone();
        equalize_histogram(&mut img);
        assert_eq!(once.as_raw(), img.as_raw());
        assert_eq!(*img.as_raw().iter().max().unwrap(), 255);
    }

    #[test]
    fn test_normalize_output_size() {
        let face = gradient(87, 113, 0, 255);
        let out = normalize_face(&face);
        assert_eq!(out.dimensions(), (FACE_SIZE, FACE_SIZE));
    }

    #[test]
    fn test_normalize_is_idempotent_on_normalized_input() {
        let face = normalize_face(&gradient(150, 150, 30, 220));
        let again = normalize_face(&face);
        assert_eq!(face.as_raw(), again.as_raw());
    }

    #[test]
    fn test_crop_face_region() {
        let frame = GrayImage::from_fn(100, 80, |x, y| Luma([(x + y) as u8]));
        let region = BoundingBox { x: 10.0, y: 5.0, width: 20.0, height: 30.0, confidence: 1.0 };
        let crop = crop_face(&frame, &region).unwrap();
        assert_eq!(crop.dimensions(), (20, 30));
        assert_eq!(crop.get_pixel(0, 0)[0], 15);
    }

    #[test]
    fn test_crop_face_outside_frame() {
        let frame = GrayImage::new(50, 50);
        let region = BoundingBox { x: 60.0, y: 60.0, width: 10.0, height: 10.0, confidence: 1.0 };
        assert!(crop_face(&frame, &region).is_none());
    }
}
