//! Sky background estimation.
//!
//! The detector treats the background transform as a black box behind
//! [`BackgroundEstimator`]; [`MeshMedianBackground`] is the stock implementation.

use bumpalo::Bump;
use serde::{Deserialize, Serialize};

use crate::error::DetectionError;
use crate::image::MonoImage;
use crate::statistics::median_in;

/// Produces a sky image of the same size as its input.
pub trait BackgroundEstimator {
    fn estimate(&self, image: &MonoImage) -> Result<MonoImage, DetectionError>;
}

/// Block medians on a square mesh, bilinearly interpolated between block centers.
///
/// Stars occupy a small fraction of each block so the median follows the sky, while
/// the mesh still tracks gradients from moonlight or vignetting. Non-finite pixels
/// never enter a median. Exact zeros are skipped too unless `ignore_zero` is off:
/// registered and cropped frames pad their borders with zeros.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshMedianBackground {
    pub block_size: usize,
    pub ignore_zero: bool,
}

impl Default for MeshMedianBackground {
    fn default() -> Self {
        Self {
            block_size: 64,
            ignore_zero: true,
        }
    }
}

impl MeshMedianBackground {
    fn is_sky_sample(&self, v: f64) -> bool {
        v.is_finite() && !(self.ignore_zero && v == 0.0)
    }

    /// Median of every block, row-major over the mesh. Blocks without a usable pixel
    /// take the median of the other blocks, or zero when no block has one.
    fn block_medians(&self, image: &MonoImage, columns: usize, rows: usize) -> Vec<f64> {
        let bs = self.block_size;
        let (w, h) = (image.width(), image.height());
        let pixels = image.data();

        let mut arena = Bump::new();
        let mut medians: Vec<Option<f64>> = Vec::with_capacity(columns * rows);
        for row in 0..rows {
            let ys = row * bs..((row + 1) * bs).min(h);
            for column in 0..columns {
                let xs = column * bs..((column + 1) * bs).min(w);
                let block = ys
                    .clone()
                    .flat_map(move |y| pixels[y * w + xs.start..y * w + xs.end].iter());
                medians.push(median_in(
                    &arena,
                    block.copied().filter(|&v| self.is_sky_sample(v)),
                ));
                arena.reset();
            }
        }

        let empty = medians.iter().filter(|m| m.is_none()).count();
        let fill = if empty > 0 {
            tracing::debug!(
                "{} of {} background blocks have no sky pixels",
                empty,
                medians.len()
            );
            median_in(&arena, medians.iter().flatten().copied()).unwrap_or(0.0)
        } else {
            0.0
        };
        medians.into_iter().map(|m| m.unwrap_or(fill)).collect()
    }
}

/// Interpolation nodes along one axis: for each pixel, the lower and upper block
/// and the weight of the upper one. Pixels outside the outermost block centers
/// take the edge block's value.
fn axis_weights(length: usize, block_size: usize, blocks: usize) -> Vec<(usize, usize, f64)> {
    let last = (blocks - 1) as f64;
    (0..length)
        .map(|p| {
            let t = ((p as f64 + 0.5) / block_size as f64 - 0.5).clamp(0.0, last);
            let lower = t.floor() as usize;
            (lower, (lower + 1).min(blocks - 1), t - lower as f64)
        })
        .collect()
}

impl BackgroundEstimator for MeshMedianBackground {
    fn estimate(&self, image: &MonoImage) -> Result<MonoImage, DetectionError> {
        let (w, h) = (image.width(), image.height());
        if image.is_empty() {
            return Err(DetectionError::EmptyImage {
                width: w,
                height: h,
            });
        }
        if self.block_size == 0 {
            return Err(DetectionError::Background(
                "block size must be positive".to_string(),
            ));
        }
        let columns = w.div_ceil(self.block_size);
        let rows = h.div_ceil(self.block_size);
        let medians = self.block_medians(image, columns, rows);
        tracing::debug!(
            "Background mesh: {}x{} blocks of {} px",
            columns,
            rows,
            self.block_size
        );

        let across = axis_weights(w, self.block_size, columns);
        let down = axis_weights(h, self.block_size, rows);
        let node = |column: usize, row: usize| medians[row * columns + column];

        let mut sky = Vec::with_capacity(w * h);
        for &(r0, r1, fy) in &down {
            for &(c0, c1, fx) in &across {
                let upper = node(c0, r0) + (node(c1, r0) - node(c0, r0)) * fx;
                let lower = node(c0, r1) + (node(c1, r1) - node(c0, r1)) * fx;
                sky.push(upper + (lower - upper) * fy);
            }
        }
        MonoImage::from_vec(w, h, sky).map_err(|e| DetectionError::Background(e.to_string()))
    }
}

/// A fixed sky level, mostly useful for synthetic frames.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackground(pub f64);

impl BackgroundEstimator for ConstantBackground {
    fn estimate(&self, image: &MonoImage) -> Result<MonoImage, DetectionError> {
        MonoImage::from_vec(
            image.width(),
            image.height(),
            vec![self.0; image.width() * image.height()],
        )
        .map_err(|e| DetectionError::Background(e.to_string()))
    }
}
