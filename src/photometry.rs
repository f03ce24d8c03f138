//! Brightness measurement of detected sources.

use serde::{Deserialize, Serialize};

use crate::adjoining_pixel::AdjoiningPixel;
use crate::image::MonoImage;

/// How the brightness value of a star image is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotometryMode {
    /// Sum of the cluster pixels above the threshold.
    #[default]
    PixelAmountOverThreshold,
    /// Peak pixel value of the cluster.
    Peak,
    /// Box aperture with a local sky estimate from a surrounding box.
    Aperture,
}

impl std::str::FromStr for PhotometryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pixel" | "amount" | "pixel_amount" => Ok(PhotometryMode::PixelAmountOverThreshold),
            "peak" => Ok(PhotometryMode::Peak),
            "aperture" => Ok(PhotometryMode::Aperture),
            _ => Err(format!("Unknown photometry mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureParams {
    /// Side of the measurement box, in pixels.
    pub inner: usize,
    /// The sky box side is `outer + 2`.
    pub outer: usize,
    /// Net flux below this multiple of the detection threshold is rejected.
    pub minimum_flux_factor: f64,
}

impl Default for ApertureParams {
    fn default() -> Self {
        Self {
            inner: 5,
            outer: 11,
            minimum_flux_factor: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApertureMeasurement {
    pub net_flux: f64,
    pub sky_per_pixel: f64,
    pub inner_sum: f64,
    pub inner_count: usize,
    pub outer_sum: f64,
    pub outer_count: usize,
}

/// Offsets of a `size`-wide box centered on pixel 0.
fn box_offsets(size: usize) -> std::ops::Range<i32> {
    let half = (size / 2) as i32;
    -half..(size as i32 - half)
}

/// Measure a box aperture centered on `(x, y)`.
///
/// Inner pixels outside the image are skipped. The sky box is sampled with reversing
/// tiling, so it is always complete. Returns `None` when the sky box has no pixels
/// beyond the inner box.
pub fn measure_aperture(
    image: &MonoImage,
    x: f64,
    y: f64,
    inner: usize,
    outer: usize,
) -> Option<ApertureMeasurement> {
    let cx = x.round() as i32;
    let cy = y.round() as i32;

    let mut inner_sum = 0.0;
    let mut inner_count = 0usize;
    for dy in box_offsets(inner) {
        for dx in box_offsets(inner) {
            if let Some(v) = image.get(cx + dx, cy + dy) {
                inner_sum += v;
                inner_count += 1;
            }
        }
    }

    let outer_side = outer + 2;
    let mut outer_sum = 0.0;
    for dy in box_offsets(outer_side) {
        for dx in box_offsets(outer_side) {
            outer_sum += image.get_mirrored(cx + dx, cy + dy);
        }
    }
    let outer_count = outer_side * outer_side;

    if outer_count <= inner_count {
        return None;
    }

    let sky_per_pixel = (outer_sum - inner_sum) / (outer_count - inner_count) as f64;
    Some(ApertureMeasurement {
        net_flux: inner_sum - sky_per_pixel * inner_count as f64,
        sky_per_pixel,
        inner_sum,
        inner_count,
        outer_sum,
        outer_count,
    })
}

/// Brightness of one deblended source, or `None` when the measurement is invalid.
pub fn measure(
    mode: PhotometryMode,
    cluster: &AdjoiningPixel,
    position: (f64, f64),
    aperture_source: Option<&MonoImage>,
    aperture: &ApertureParams,
    threshold: f64,
) -> Option<f64> {
    match mode {
        PhotometryMode::PixelAmountOverThreshold => Some(cluster.amount_over_threshold()),
        PhotometryMode::Peak => Some(cluster.peak().value),
        PhotometryMode::Aperture => {
            let image = aperture_source?;
            let (x, y) = position;
            let m = measure_aperture(image, x, y, aperture.inner, aperture.outer)?;
            (m.net_flux >= aperture.minimum_flux_factor * threshold).then_some(m.net_flux)
        }
    }
}
