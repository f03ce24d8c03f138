// End-to-end scenarios on synthetic frames: detection through identification and the
// completeness limit.

#[cfg(test)]
mod tests {
    use crate::adjoining_pixel::detect_adjoining_pixels;
    use crate::background::ConstantBackground;
    use crate::blooming::SaturationBloomingCanceller;
    use crate::catalog::{CatalogStar, MemoryCatalogReader, SkyCoord};
    use crate::document::{EntryKind, StarDocument};
    use crate::identification::{IdentificationParams, Identifier};
    use crate::identification_deleter::IdentificationDeleter;
    use crate::image::MonoImage;
    use crate::limiting_value::{LimitingMode, LimitingValueEstimator, LimitingValueParams};
    use crate::photometry::PhotometryMode;
    use crate::progress::NullProgress;
    use crate::star_detector::{DetectionParams, StarDetector};
    use crate::star_pair::pair_detections;
    use crate::transform::{CoordinateTransform, TangentPlaneTransform};
    use rand::prelude::*;

    /// Synthetic frame with a flat sky and known stars
    struct SyntheticImage {
        pub data: Vec<f64>,
        pub width: usize,
        pub height: usize,
        pub stars: Vec<(f64, f64, f64)>,
    }

    impl SyntheticImage {
        fn new(width: usize, height: usize, background: f64) -> Self {
            SyntheticImage {
                data: vec![background; width * height],
                width,
                height,
                stars: Vec::new(),
            }
        }

        /// Gaussian read noise, Box-Muller from a seeded generator
        fn add_noise(&mut self, sigma: f64, seed: u64) {
            let mut rng = StdRng::seed_from_u64(seed);
            for pixel in self.data.iter_mut() {
                let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                let u2: f64 = rng.gen();
                *pixel += sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            }
        }

        /// Alternating +amplitude / -amplitude pattern
        fn add_checkerboard(&mut self, amplitude: f64) {
            for y in 0..self.height {
                for x in 0..self.width {
                    let sign = if (x + y) % 2 == 0 { 1.0 } else { -1.0 };
                    self.data[y * self.width + x] += sign * amplitude;
                }
            }
        }

        fn add_gaussian_star(&mut self, x: f64, y: f64, fwhm: f64, peak: f64) {
            // FWHM = 2.355 * sigma for Gaussian
            let sigma = fwhm / 2.355;
            let radius = fwhm * 2.0;
            self.stars.push((x, y, peak));

            let x_min = (x - radius).max(0.0) as usize;
            let x_max = (x + radius).min(self.width as f64) as usize;
            let y_min = (y - radius).max(0.0) as usize;
            let y_max = (y + radius).min(self.height as f64) as usize;
            for py in y_min..y_max {
                for px in x_min..x_max {
                    let dx = px as f64 - x;
                    let dy = py as f64 - y;
                    self.data[py * self.width + px] +=
                        peak * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                }
            }
        }

        fn set_column(&mut self, x: usize, rows: std::ops::RangeInclusive<usize>, value: f64) {
            for y in rows {
                self.data[y * self.width + x] = value;
            }
        }

        fn to_mono(&self) -> MonoImage {
            MonoImage::from_vec(self.width, self.height, self.data.clone()).unwrap()
        }
    }

    fn star_field() -> SyntheticImage {
        let mut image = SyntheticImage::new(256, 256, 1000.0);
        image.add_noise(10.0, 7);
        image.add_gaussian_star(60.3, 70.6, 4.0, 3000.0);
        image.add_gaussian_star(180.0, 50.0, 4.0, 2000.0);
        image.add_gaussian_star(128.5, 190.2, 4.0, 1000.0);
        image
    }

    #[test]
    fn test_plus_cluster_end_to_end() {
        let mut image = MonoImage::new(20, 20);
        for (dx, dy) in [(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)] {
            image.set(10 + dx, 10 + dy, 10.0);
        }
        let clusters = detect_adjoining_pixels(&mut image, 5.0, 8.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].peak().value, 10.0);
        assert_eq!(clusters[0].len(), 5);

        let detector = StarDetector::new(DetectionParams::default());
        let (stars, _) = detector.extract_star_images(clusters, 20, 20, 5.0, 8.0, None, &[]);
        assert_eq!(stars.len(), 1);
        assert_eq!(stars[0].value, 5.0 * (10.0 - 5.0));
        assert_eq!((stars[0].x, stars[0].y), (10.0, 10.0));
    }

    #[test]
    fn test_detects_isolated_stars() {
        let synthetic = star_field();
        let mut image = synthetic.to_mono();
        let mut milestones: Vec<String> = Vec::new();
        let result = StarDetector::new(DetectionParams::default())
            .run(&mut image, &mut milestones)
            .unwrap();

        assert!((8.0..12.0).contains(&result.noise_deviation), "dev {}", result.noise_deviation);
        assert!(milestones.iter().any(|m| m.starts_with("Threshold: ")));
        assert!(milestones.iter().any(|m| m == "Star images: 3"));
        assert_eq!(result.stars.len(), 3);

        // Brightest first.
        for (star, &(x, y, _)) in result.stars.iter().zip(&synthetic.stars) {
            assert!(star.distance_to(x, y) < 0.5, "{:?} vs ({}, {})", star, x, y);
        }
        assert!(result.stars.windows(2).all(|w| w[0].value >= w[1].value));
    }

    #[test]
    fn test_aperture_mode_on_star_field() {
        let mut image = star_field().to_mono();
        let params = DetectionParams {
            photometry: PhotometryMode::Aperture,
            ..DetectionParams::default()
        };
        let result = StarDetector::new(params).run(&mut image, &mut NullProgress).unwrap();
        assert_eq!(result.stars.len(), 3);
        // Net flux of a Gaussian is about 2 pi sigma^2 peak; the 5x5 box holds most of it.
        let sigma: f64 = 4.0 / 2.355;
        let total = 2.0 * std::f64::consts::PI * sigma * sigma * 3000.0;
        assert!(result.stars[0].value > 0.5 * total && result.stars[0].value < 1.05 * total);
    }

    #[test]
    fn test_blended_pair_is_split() {
        let mut synthetic = SyntheticImage::new(200, 200, 1000.0);
        synthetic.add_noise(10.0, 11);
        synthetic.add_gaussian_star(100.0, 100.0, 4.0, 2000.0);
        synthetic.add_gaussian_star(108.0, 100.0, 4.0, 2000.0);
        let mut image = synthetic.to_mono();

        let result = StarDetector::new(DetectionParams::default())
            .run(&mut image, &mut NullProgress)
            .unwrap();
        assert_eq!(result.adjoining_sets, 1);
        assert_eq!(result.stars.len(), 2);
        let mut xs: Vec<f64> = result.stars.iter().map(|s| s.x).collect();
        xs.sort_by(f64::total_cmp);
        assert!((xs[0] - 100.0).abs() < 1.0 && (xs[1] - 108.0).abs() < 1.0, "{:?}", xs);
    }

    #[test]
    fn test_blooming_position_is_used() {
        let mut synthetic = SyntheticImage::new(160, 200, 1000.0);
        synthetic.add_checkerboard(10.0);
        synthetic.add_gaussian_star(80.0, 100.0, 4.0, 50000.0);
        synthetic.set_column(80, 95..=105, 65000.0);
        // Unsaturated charge trail below the star drags the centroid down.
        synthetic.set_column(80, 106..=130, 20000.0);
        let mut image = synthetic.to_mono();

        let detector = StarDetector::new(DetectionParams::default())
            .with_background(ConstantBackground(1000.0))
            .with_blooming(SaturationBloomingCanceller::default());
        let mut milestones: Vec<String> = Vec::new();
        let result = detector.run(&mut image, &mut milestones).unwrap();

        assert!(milestones.contains(&"Blooming positions: 1".to_string()));
        assert_eq!(result.stars.len(), 1);
        assert_eq!((result.stars[0].x, result.stars[0].y), (80.0, 100.0));
    }

    #[test]
    fn test_identify_pair_and_limit() {
        let mut image = star_field().to_mono();
        let detection = StarDetector::new(DetectionParams::default())
            .run(&mut image, &mut NullProgress)
            .unwrap();
        let mut document = StarDocument::from_detections(256, 256, &detection.stars);
        let transform = TangentPlaneTransform::north_up(
            (128.0, 128.0),
            SkyCoord::new(210.0, -30.0),
            2.0,
        );

        let catalog_stars = [
            (60.5, 70.4, 9.0),
            (180.2, 50.1, 9.5),
            (128.4, 190.0, 10.2),
            (200.0, 200.0, 12.0),
        ]
        .iter()
        .enumerate()
        .map(|(i, &(x, y, mag))| {
            CatalogStar::new(format!("SYN {}", i + 1), transform.image_to_sky(x, y), Some(mag))
        })
        .collect();
        let mut reader = MemoryCatalogReader::new("SYN", catalog_stars);

        let params = IdentificationParams {
            accept_negative: true,
            ..IdentificationParams::default()
        };
        let before = document.record_count();
        let report = Identifier::new(params.clone())
            .run(&mut document, &mut reader, &transform, &mut NullProgress)
            .unwrap();
        assert_eq!(report.identified.len(), 3);
        assert_eq!(report.negatives.len(), 1);
        let identified = document
            .stars()
            .iter()
            .filter(|s| s.kind() == EntryKind::Catalog("SYN".into()))
            .count();
        assert_eq!(identified, 3);

        let pairs = pair_detections(&document, "SYN");
        assert_eq!(pairs.len(), 4);
        let limit =
            LimitingValueEstimator::new(LimitingValueParams::default(), LimitingMode::Magnitude)
                .run(&pairs);
        assert_eq!((limit.counted, limit.index), (3, 2));
        assert_eq!(limit.ratio, 1.0);
        // Faintest detection on the zero point fitted to the catalog magnitudes.
        let faintest = limit.value.unwrap();
        assert!((9.5..11.5).contains(&faintest), "limit {}", faintest);

        IdentificationDeleter::new(params)
            .run(&mut document, &mut reader, &transform, &mut NullProgress)
            .unwrap();
        assert_eq!(document.record_count(), before);
        assert!(document.stars().iter().all(|s| s.kind() == EntryKind::New));
    }
}
