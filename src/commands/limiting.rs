use anyhow::Result;
use std::path::Path;

use starsift::document::StarDocument;
use starsift::limiting_value::{LimitingMode, LimitingValueEstimator};
use starsift::star_pair::pair_detections;

pub fn limiting_value(
    document_path: &str,
    catalog_acronym: &str,
    mode: &str,
    zero_point: Option<f64>,
    config: Option<&str>,
) -> Result<()> {
    let mut params = super::load_config(config)?.limiting;
    if zero_point.is_some() {
        params.magnitude_zero_point = zero_point;
    }
    let mode: LimitingMode = mode.parse().map_err(anyhow::Error::msg)?;

    let document = StarDocument::load(Path::new(document_path))?;
    let pairs = pair_detections(&document, catalog_acronym);
    let paired = pairs.iter().filter(|p| p.is_paired()).count();
    tracing::info!(
        "{} pairs, {} identified with {}",
        pairs.len(),
        paired,
        catalog_acronym
    );

    let limit = LimitingValueEstimator::new(params, mode).run(&pairs);
    if limit.counted > 0 && limit.value.is_none() {
        anyhow::bail!(
            "No magnitude scale for {}: pass --zero-point or identify with a catalog that has magnitudes",
            document_path
        );
    }
    let value = limit
        .value
        .map(|v| format!("{:.3}", v))
        .unwrap_or_else(|| "unknown".to_string());
    let label = match mode {
        LimitingMode::Magnitude => "Limiting magnitude",
        LimitingMode::Value => "Limiting value",
    };
    println!("{}: {}", label, value);
    println!(
        "Ratio: {:.3} at star {} of {}",
        limit.ratio,
        limit.index + 1,
        limit.counted
    );
    Ok(())
}
