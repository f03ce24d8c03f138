pub mod adjoining_pixel;
pub mod background;
pub mod blooming;
pub mod catalog;
pub mod config;
pub mod document;
pub mod error;
pub mod identification;
pub mod identification_deleter;
pub mod image;
pub mod limiting_value;
pub mod photometry;
pub mod progress;
pub mod radius_model;
pub mod star_detector;
pub mod star_image;
pub mod star_map;
pub mod star_pair;
pub mod statistics;
pub mod transform;

#[cfg(test)]
mod test_pipeline;

// Re-export commonly used items
pub use catalog::{CatalogReader, CatalogStar, SkyCoord};
pub use document::StarDocument;
pub use image::{FitsFrame, MonoImage};
pub use star_detector::{DetectionParams, DetectionResult, StarDetector};
pub use star_image::StarImage;
pub use statistics::ImageStatistics;
