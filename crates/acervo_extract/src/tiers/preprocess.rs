//! Image preprocessing before local OCR: grayscale, deskew, contrast
//! stretch, denoise. Works on a grayscale copy written next to the input;
//! the original upload is never touched.

use std::path::{Path, PathBuf};

use acervo_protocol::{PipelineError, PipelineResult, PipelineTier};
use image::GrayImage;
use imageproc::contrast::stretch_contrast;
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use tracing::debug;

/// Candidate skew corrections, in degrees.
const SKEW_CANDIDATES: &[f64] = &[-3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0];

/// Percentiles for contrast stretching.
const STRETCH_LOW_PCT: f64 = 0.05;
const STRETCH_HIGH_PCT: f64 = 0.95;

/// Preprocess an image for OCR, returning the path of the prepared copy.
pub fn preprocess_image(input: &Path) -> PipelineResult<PathBuf> {
    let tier = PipelineTier::LocalOcr;
    let img = image::open(input)
        .map_err(|e| PipelineError::permanent(tier, format!("decode {}: {e}", input.display())))?;
    let mut gray = img.to_luma8();

    let angle = estimate_skew(&gray);
    if angle != 0.0 {
        debug!(angle, "deskewing");
        gray = rotate_about_center(
            &gray,
            (angle.to_radians()) as f32,
            Interpolation::Bilinear,
            image::Luma([255u8]),
        );
    }

    let (low, high) = stretch_bounds(&gray);
    if high > low {
        gray = stretch_contrast(&gray, low, high, 0u8, 255u8);
    }

    gray = median_filter(&gray, 1, 1);

    let output = input.with_extension("pre.png");
    gray.save(&output)
        .map_err(|e| PipelineError::permanent(tier, format!("save {}: {e}", output.display())))?;
    Ok(output)
}

/// Pick the candidate rotation that maximizes row-profile variance: text
/// lines aligned with the raster produce the spikiest profile.
fn estimate_skew(img: &GrayImage) -> f64 {
    let mut best_angle = 0.0;
    let mut best_score = row_profile_variance(img);

    for &angle in SKEW_CANDIDATES {
        if angle == 0.0 {
            continue;
        }
        let rotated = rotate_about_center(
            img,
            (angle.to_radians()) as f32,
            Interpolation::Nearest,
            image::Luma([255u8]),
        );
        let score = row_profile_variance(&rotated);
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }
    best_angle
}

fn row_profile_variance(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let rows: Vec<f64> = (0..height)
        .map(|y| {
            (0..width)
                .filter(|&x| img.get_pixel(x, y).0[0] < 128)
                .count() as f64
        })
        .collect();
    let mean = rows.iter().sum::<f64>() / rows.len() as f64;
    rows.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rows.len() as f64
}

fn stretch_bounds(img: &GrayImage) -> (u8, u8) {
    let mut histogram = [0u64; 256];
    for pixel in img.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return (0, 255);
    }

    let pick = |pct: f64| -> u8 {
        let target = (total as f64 * pct) as u64;
        let mut acc = 0u64;
        for (value, count) in histogram.iter().enumerate() {
            acc += count;
            if acc >= target {
                return value as u8;
            }
        }
        255
    };

    (pick(STRETCH_LOW_PCT), pick(STRETCH_HIGH_PCT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretch_bounds_on_flat_image() {
        let img = GrayImage::from_pixel(10, 10, image::Luma([128u8]));
        let (low, high) = stretch_bounds(&img);
        assert_eq!(low, 128);
        assert_eq!(high, 128);
    }

    #[test]
    fn test_row_profile_prefers_aligned_lines() {
        // horizontal dark bands -> high variance; uniform noise -> low
        let mut banded = GrayImage::from_pixel(40, 40, image::Luma([255u8]));
        for y in (0..40).step_by(8) {
            for x in 0..40 {
                banded.put_pixel(x, y, image::Luma([0u8]));
            }
        }
        let uniform = GrayImage::from_pixel(40, 40, image::Luma([200u8]));
        assert!(row_profile_variance(&banded) > row_profile_variance(&uniform));
    }

    #[test]
    fn test_preprocess_writes_sibling_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let input = temp.path().join("scan.png");
        GrayImage::from_pixel(32, 32, image::Luma([180u8]))
            .save(&input)
            .unwrap();

        let output = preprocess_image(&input).unwrap();
        assert!(output.exists());
        assert_eq!(output.extension().unwrap(), "png");
        assert_ne!(output, input);
    }
}
