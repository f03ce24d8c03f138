use thiserror::Error;

/// Failures while loading or shaping image data.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Failed to open FITS file {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("No primary HDU found in FITS file")]
    MissingHdu,

    #[error("Missing or invalid {0} header")]
    Header(&'static str),

    #[error("FITS file does not contain 2D image data (NAXIS={0})")]
    NotTwoDimensional(i32),

    #[error("FITS file contains character data, not image data")]
    CharacterData,

    #[error("Data size mismatch: expected {expected} pixels, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Failures raised by a star detection run.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Image is empty ({width}x{height})")]
    EmptyImage { width: usize, height: usize },

    #[error("Sky image is {actual_width}x{actual_height}, expected {width}x{height}")]
    SizeMismatch {
        width: usize,
        height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("Background estimation failed: {0}")]
    Background(String),
}

/// Failures raised by a catalog reader.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog query failed: {0}")]
    Query(String),

    #[error("Catalog media not found: {0}")]
    MediaNotFound(String),

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures that abort a whole identification or deletion pass.
#[derive(Debug, Error)]
pub enum IdentificationError {
    #[error("The field of view ({image_fov_deg:.3} deg) is too large for the {catalog} catalog (limit {limit_deg:.3} deg)")]
    FieldTooLarge {
        catalog: String,
        image_fov_deg: f64,
        limit_deg: f64,
    },

    #[error("The {0} catalog is date dependent but the image has no date")]
    MissingDate(String),

    #[error("The image date {date} is out of the valid range of the {catalog} catalog")]
    DateOutOfRange { catalog: String, date: String },

    #[error("The document is incomplete: {0}")]
    IncompleteDocument(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
