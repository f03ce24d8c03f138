pub mod annotate;
pub mod detect;
pub mod identify;
pub mod limiting;

pub use annotate::annotate_stars;
pub use detect::detect_stars;
pub use identify::{identify_stars, unidentify_stars};
pub use limiting::limiting_value;

use anyhow::{Context, Result};
use std::path::Path;

use starsift::config::Config;
use starsift::document::StarDocument;
use starsift::transform::TangentPlaneTransform;

pub(crate) fn load_config(path: Option<&str>) -> Result<Config> {
    Config::load(path.map(Path::new))
}

/// The plate solution from `path`, or the one stored in the document.
pub(crate) fn load_transform(
    path: Option<&str>,
    document: &StarDocument,
) -> Result<TangentPlaneTransform> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read transform file {}", path))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse transform file {}", path))
        }
        None => document
            .transform
            .clone()
            .context("The document has no plate solution; pass --transform"),
    }
}
