//! Star extraction pipeline.
//!
//! Background subtraction, threshold estimation from the negative noise population,
//! adjoining-pixel detection, per-cell radius modeling, deblending, photometry and
//! blooming correction, in that order.

use serde::{Deserialize, Serialize};

use crate::adjoining_pixel::{detect_adjoining_pixels, AdjoiningPixel};
use crate::background::{BackgroundEstimator, MeshMedianBackground};
use crate::blooming::BloomingCanceller;
use crate::error::DetectionError;
use crate::image::MonoImage;
use crate::photometry::{self, ApertureParams, PhotometryMode};
use crate::progress::Progress;
use crate::radius_model::MeanRadiusGrid;
use crate::star_image::StarImage;

/// Star detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Sensitivity coefficient applied to the noise deviation.
    pub coefficient: f64,
    /// `threshold = deviation * coefficient * threshold_factor`
    pub threshold_factor: f64,
    /// `minimum_peak = deviation * coefficient * minimum_peak_factor`
    pub minimum_peak_factor: f64,
    /// Fraction of width and height kept, centered, for the noise estimate.
    pub noise_crop_ratio: f64,
    /// Approximate side of a radius-model cell, in pixels.
    pub radius_cell_size: usize,
    /// Only clusters with a peak above this multiple of the threshold feed the radius model.
    pub radius_model_peak_factor: f64,
    /// Radius used for deblending when no cluster fed the model.
    pub default_radius: f64,
    /// Minimum peak separation for deblending, in units of the local mean radius.
    pub deblend_separation_factor: f64,
    pub photometry: PhotometryMode,
    pub aperture: ApertureParams,
    /// Blooming-corrected positions replace fitted ones farther than this, in pixels.
    pub blooming_shift_px: f64,
    /// Instrumental magnitude zero point; magnitudes are left empty when unset.
    pub magnitude_zero_point: Option<f64>,
    /// Return the sky image with the result.
    pub keep_sky: bool,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            coefficient: 3.0,
            threshold_factor: 1.5,
            minimum_peak_factor: 2.0,
            noise_crop_ratio: 0.9,
            radius_cell_size: 200,
            radius_model_peak_factor: 3.0,
            default_radius: 1.5,
            deblend_separation_factor: 1.0,
            photometry: PhotometryMode::PixelAmountOverThreshold,
            aperture: ApertureParams::default(),
            blooming_shift_px: 1.5,
            magnitude_zero_point: None,
            keep_sky: false,
        }
    }
}

/// Star detection result
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Valid star images, brightest first.
    pub stars: Vec<StarImage>,
    pub threshold: f64,
    pub minimum_peak: f64,
    pub noise_deviation: f64,
    pub adjoining_sets: usize,
    /// Deblended sources dropped by photometry.
    pub rejected: usize,
    pub sky: Option<MonoImage>,
}

pub struct StarDetector {
    params: DetectionParams,
    background: Box<dyn BackgroundEstimator>,
    blooming: Option<Box<dyn BloomingCanceller>>,
}

impl StarDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self {
            params,
            background: Box::new(MeshMedianBackground::default()),
            blooming: None,
        }
    }

    pub fn with_background(mut self, background: impl BackgroundEstimator + 'static) -> Self {
        self.background = Box::new(background);
        self
    }

    pub fn with_blooming(mut self, blooming: impl BloomingCanceller + 'static) -> Self {
        self.blooming = Some(Box::new(blooming));
        self
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Run the pipeline on `image`.
    ///
    /// The buffer is consumed: on return it holds the sky-subtracted frame with every
    /// detected pixel cleared. Clone it beforehand if the original is needed.
    pub fn run(
        &self,
        image: &mut MonoImage,
        progress: &mut dyn Progress,
    ) -> Result<DetectionResult, DetectionError> {
        if image.is_empty() {
            return Err(DetectionError::EmptyImage {
                width: image.width(),
                height: image.height(),
            });
        }

        let blooming_positions = match &self.blooming {
            Some(canceller) => {
                let mut scratch = image.clone();
                let positions = canceller.corrected_positions(&mut scratch);
                milestone(progress, format!("Blooming positions: {}", positions.len()));
                positions
            }
            None => Vec::new(),
        };

        let sky = self.background.estimate(image)?;
        let Some(noise) = image.difference(&sky) else {
            return Err(DetectionError::SizeMismatch {
                width: image.width(),
                height: image.height(),
                actual_width: sky.width(),
                actual_height: sky.height(),
            });
        };
        *image = noise;

        let noise_deviation = self.noise_deviation(image);
        let scale = noise_deviation * self.params.coefficient;
        let threshold = scale * self.params.threshold_factor;
        let minimum_peak = scale * self.params.minimum_peak_factor;
        milestone(progress, format!("Noise deviation: {:.4}", noise_deviation));
        milestone(progress, format!("Threshold: {:.4}", threshold));
        milestone(progress, format!("Minimum peak: {:.4}", minimum_peak));

        let aperture_source =
            (self.params.photometry == PhotometryMode::Aperture).then(|| image.clone());

        let clusters = detect_adjoining_pixels(image, threshold, minimum_peak);
        let adjoining_sets = clusters.len();
        milestone(progress, format!("Adjoining pixels: {} sets", adjoining_sets));

        let (stars, rejected) = self.extract_star_images(
            clusters,
            image.width(),
            image.height(),
            threshold,
            minimum_peak,
            aperture_source.as_ref(),
            &blooming_positions,
        );
        if rejected > 0 {
            tracing::debug!("Photometry rejected {} sources", rejected);
        }
        milestone(progress, format!("Star images: {}", stars.len()));

        Ok(DetectionResult {
            stars,
            threshold,
            minimum_peak,
            noise_deviation,
            adjoining_sets,
            rejected,
            sky: self.params.keep_sky.then_some(sky),
        })
    }

    /// Deviation of the negative pixels in the central crop of a sky-subtracted image.
    fn noise_deviation(&self, image: &MonoImage) -> f64 {
        let ratio = self.params.noise_crop_ratio.clamp(0.0, 1.0);
        let crop_width = ((image.width() as f64 * ratio).round() as usize).max(1);
        let crop_height = ((image.height() as f64 * ratio).round() as usize).max(1);
        let x0 = (image.width() - crop_width.min(image.width())) / 2;
        let y0 = (image.height() - crop_height.min(image.height())) / 2;
        let crop = image.crop(x0, y0, crop_width, crop_height);
        crate::statistics::negative_deviation(crop.data())
    }

    /// Model radii, deblend each cluster and measure every resulting source.
    ///
    /// Returns the valid star images sorted brightest first, and the number of
    /// sources rejected by photometry.
    #[allow(clippy::too_many_arguments)]
    pub fn extract_star_images(
        &self,
        clusters: Vec<AdjoiningPixel>,
        width: usize,
        height: usize,
        threshold: f64,
        minimum_peak: f64,
        aperture_source: Option<&MonoImage>,
        blooming_positions: &[(f64, f64)],
    ) -> (Vec<StarImage>, usize) {
        let params = &self.params;

        let mut radius_grid = MeanRadiusGrid::new(
            width,
            height,
            params.radius_cell_size,
            params.default_radius,
        );
        for cluster in &clusters {
            if cluster.peak().value > threshold * params.radius_model_peak_factor {
                let peak = cluster.peak();
                radius_grid.add(peak.x as f64, peak.y as f64, cluster.radius());
            }
        }
        tracing::debug!(
            "Radius model: {:?} cells, {} samples, field mean {:?}",
            radius_grid.dimensions(),
            radius_grid.sample_count(),
            radius_grid.global_mean()
        );

        let mut stars: Vec<(StarImage, (i32, i32))> = Vec::new();
        let mut rejected = 0;
        for cluster in clusters {
            let peak = cluster.peak();
            let separation = radius_grid.mean_radius(peak.x as f64, peak.y as f64)
                * params.deblend_separation_factor;

            for source in cluster.deblend(separation, minimum_peak, threshold) {
                let mut star = source.star_image();
                let value = photometry::measure(
                    params.photometry,
                    &source,
                    (star.x, star.y),
                    aperture_source,
                    &params.aperture,
                    threshold,
                );
                let Some(value) = value else {
                    rejected += 1;
                    continue;
                };
                star.value = value;

                if let Some(&(bx, by)) = blooming_positions
                    .iter()
                    .find(|(bx, by)| source.contains(bx.round() as i32, by.round() as i32))
                {
                    if star.distance_to(bx, by) > params.blooming_shift_px {
                        tracing::trace!(
                            "Blooming correction ({:.2}, {:.2}) -> ({:.2}, {:.2})",
                            star.x,
                            star.y,
                            bx,
                            by
                        );
                        star.x = bx;
                        star.y = by;
                    }
                }

                if let Some(zero_point) = params.magnitude_zero_point {
                    star.magnitude = StarImage::magnitude_for(star.value, zero_point);
                }

                let first = source.pixels()[0];
                stars.push((star, (first.y, first.x)));
            }
        }

        stars.sort_by(|(a, ka), (b, kb)| b.value.total_cmp(&a.value).then_with(|| ka.cmp(kb)));
        (stars.into_iter().map(|(s, _)| s).collect(), rejected)
    }
}

fn milestone(progress: &mut dyn Progress, message: String) {
    tracing::info!("{}", message);
    progress.milestone(&message);
}
