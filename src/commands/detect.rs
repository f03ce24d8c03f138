use anyhow::{Context, Result};
use std::path::Path;

use starsift::blooming::SaturationBloomingCanceller;
use starsift::document::StarDocument;
use starsift::image::FitsFrame;
use starsift::progress::LogProgress;
use starsift::star_detector::StarDetector;
use starsift::statistics::ImageStatistics;

use crate::cli::DetectionOptions;

#[allow(clippy::too_many_arguments)]
pub fn detect_stars(
    fits_path: &str,
    config: Option<&str>,
    options: &DetectionOptions,
    blooming: bool,
    keep_sky: bool,
    output: Option<&str>,
    document_path: Option<&str>,
) -> Result<()> {
    let mut params = super::load_config(config)?.detection;
    options.apply_to(&mut params)?;
    params.keep_sky |= keep_sky;

    let frame = FitsFrame::from_file(Path::new(fits_path))
        .with_context(|| format!("Failed to load {}", fits_path))?;
    let (width, height) = (frame.image.width(), frame.image.height());
    tracing::info!(
        "Loaded {} ({}x{}, BITPIX {})",
        fits_path,
        width,
        height,
        frame.bit_depth
    );

    let mut detector = StarDetector::new(params);
    if blooming {
        detector = detector.with_blooming(SaturationBloomingCanceller::default());
    }
    let mut image = frame.image;
    let result = detector.run(&mut image, &mut LogProgress)?;

    if let Some(sky) = &result.sky {
        let stats = ImageStatistics::of(sky);
        println!(
            "Sky - Min: {:.2}, Max: {:.2}, Mean: {:.2}, Median: {:.2}, StdDev: {:.2}",
            stats.min, stats.max, stats.mean, stats.median, stats.std_dev
        );
    }

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&result.stars)?;
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path))?;
            println!("Wrote {} stars to {}", result.stars.len(), path);
        }
        None => {
            println!(
                "{:<6} {:>10} {:>10} {:>14} {:>10} {:>8} {:>8}",
                "#", "X", "Y", "Value", "Peak", "Radius", "Mag"
            );
            println!("{:-<72}", "");
            for (i, star) in result.stars.iter().enumerate() {
                println!(
                    "{:<6} {:>10.2} {:>10.2} {:>14.1} {:>10.1} {:>8.2} {:>8}",
                    i + 1,
                    star.x,
                    star.y,
                    star.value,
                    star.peak,
                    star.radius,
                    star.magnitude
                        .map(|m| format!("{:.2}", m))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            println!(
                "\nTotal: {} stars (threshold {:.2}, minimum peak {:.2})",
                result.stars.len(),
                result.threshold,
                result.minimum_peak
            );
        }
    }

    if let Some(path) = document_path {
        let mut document = StarDocument::from_detections(width, height, &result.stars);
        document.mid_date = frame.mid_date;
        document.save(Path::new(path))?;
        println!("Created document {} with {} entries", path, document.len());
    }

    Ok(())
}
