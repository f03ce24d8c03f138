use anyhow::{Context, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageBuffer, ImageEncoder, Rgb};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use starsift::image::{FitsFrame, MonoImage};
use starsift::progress::LogProgress;
use starsift::star_detector::StarDetector;
use starsift::statistics::ImageStatistics;

use crate::cli::DetectionOptions;

/// Convert a color name to RGB values
fn parse_color(color_name: &str) -> Rgb<u8> {
    match color_name.to_lowercase().as_str() {
        "red" => Rgb([255, 0, 0]),
        "green" => Rgb([0, 255, 0]),
        "blue" => Rgb([0, 0, 255]),
        "yellow" => Rgb([255, 255, 0]),
        "cyan" => Rgb([0, 255, 255]),
        "magenta" => Rgb([255, 0, 255]),
        "white" => Rgb([255, 255, 255]),
        _ => Rgb([255, 0, 0]),
    }
}

/// Linear stretch from the median to `median + 10 sigma`.
fn to_display(image: &MonoImage) -> ImageBuffer<Rgb<u8>, Vec<u8>> {
    let stats = ImageStatistics::of(image);
    let black = stats.median;
    let white = (stats.median + 10.0 * stats.std_dev).min(stats.max);
    let span = (white - black).max(f64::EPSILON);

    let width = image.width();
    let data = image.data();
    ImageBuffer::from_fn(width as u32, image.height() as u32, |x, y| {
        let v = data[y as usize * width + x as usize];
        let level = ((v - black) / span).clamp(0.0, 1.0) * 255.0;
        let level = level.round() as u8;
        Rgb([level, level, level])
    })
}

/// Write a PNG of the frame with the brightest detections circled.
pub fn annotate_stars(
    fits_path: &str,
    output: Option<&str>,
    max_stars: usize,
    annotation_color: &str,
    config: Option<&str>,
    options: &DetectionOptions,
) -> Result<()> {
    let mut params = super::load_config(config)?.detection;
    options.apply_to(&mut params)?;

    let frame = FitsFrame::from_file(Path::new(fits_path))
        .with_context(|| format!("Failed to load {}", fits_path))?;
    let (width, height) = (frame.image.width(), frame.image.height());
    let mut rgb_image = to_display(&frame.image);

    let mut working = frame.image;
    let result = StarDetector::new(params).run(&mut working, &mut LogProgress)?;
    let total_stars = result.stars.len();
    let stars_to_annotate: Vec<_> = result.stars.into_iter().take(max_stars).collect();
    tracing::info!(
        "Annotating {} stars (top {} by value)",
        stars_to_annotate.len(),
        max_stars
    );

    let color = parse_color(annotation_color);
    for star in &stars_to_annotate {
        let center = (star.x.round() as i32, star.y.round() as i32);
        let radius = (star.radius * 2.5).max(5.0) as i32;
        draw_hollow_circle_mut(&mut rgb_image, center, radius, color);
        if radius < 8 {
            draw_filled_circle_mut(&mut rgb_image, center, 1, color);
        }
    }

    let output_path = output.map(str::to_string).unwrap_or_else(|| {
        let base = fits_path
            .trim_end_matches(".fits")
            .trim_end_matches(".fit")
            .trim_end_matches(".fts");
        format!("{}_annotated.png", base)
    });

    let file = File::create(&output_path)
        .with_context(|| format!("Failed to create output file: {}", output_path))?;
    let encoder = PngEncoder::new_with_quality(
        BufWriter::new(file),
        CompressionType::Best,
        FilterType::Adaptive,
    );
    encoder
        .write_image(
            &rgb_image,
            width as u32,
            height as u32,
            ColorType::Rgb8.into(),
        )
        .with_context(|| format!("Failed to write PNG image to {}", output_path))?;

    println!("Created annotated image: {}", output_path);
    println!(
        "Annotated {} stars out of {} detected",
        stars_to_annotate.len(),
        total_stars
    );
    Ok(())
}
