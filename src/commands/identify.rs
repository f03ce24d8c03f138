use anyhow::{Context, Result};
use std::path::Path;

use starsift::catalog::JsonCatalogReader;
use starsift::document::StarDocument;
use starsift::identification::Identifier;
use starsift::identification_deleter::IdentificationDeleter;
use starsift::progress::LogProgress;

pub fn identify_stars(
    document_path: &str,
    catalog_path: &str,
    transform_path: Option<&str>,
    accept_negative: bool,
    config: Option<&str>,
) -> Result<()> {
    let mut params = super::load_config(config)?.identification;
    params.accept_negative |= accept_negative;

    let mut document = StarDocument::load(Path::new(document_path))?;
    let transform = super::load_transform(transform_path, &document)?;
    let mut reader = JsonCatalogReader::load(Path::new(catalog_path))
        .with_context(|| format!("Failed to load catalog {}", catalog_path))?;

    let result =
        Identifier::new(params).run(&mut document, &mut reader, &transform, &mut LogProgress);
    // Matches recorded before a catalog failure are kept.
    document.save(Path::new(document_path))?;
    let report = result?;

    for identification in &report.identified {
        println!("{:<24} -> {}", identification.catalog_star, identification.entry);
    }
    for negative in &report.negatives {
        println!("{:<24} -> {} (not detected)", negative.catalog_star, negative.entry);
    }
    println!(
        "\nIdentified: {}, negative: {}, unmatched: {}",
        report.identified.len(),
        report.negatives.len(),
        report.unmatched.len()
    );
    Ok(())
}

pub fn unidentify_stars(
    document_path: &str,
    catalog_path: &str,
    transform_path: Option<&str>,
    config: Option<&str>,
) -> Result<()> {
    let params = super::load_config(config)?.identification;

    let mut document = StarDocument::load(Path::new(document_path))?;
    let transform = super::load_transform(transform_path, &document)?;
    let mut reader = JsonCatalogReader::load(Path::new(catalog_path))
        .with_context(|| format!("Failed to load catalog {}", catalog_path))?;

    let result = IdentificationDeleter::new(params).run(
        &mut document,
        &mut reader,
        &transform,
        &mut LogProgress,
    );
    document.save(Path::new(document_path))?;
    let report = result?;

    println!(
        "Deleted: {}, not found: {}",
        report.deleted.len(),
        report.not_found.len()
    );
    Ok(())
}
