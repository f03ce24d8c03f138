use anyhow::Result;
use clap::{Parser, Subcommand};

use starsift::photometry::PhotometryMode;
use starsift::star_detector::DetectionParams;

#[derive(Parser)]
#[command(name = "starsift")]
#[command(about = "Star detection, catalog identification and limiting magnitude estimation for FITS images", long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect stars in a FITS image
    Detect {
        /// FITS file to analyze
        fits_file: String,

        /// JSON config file
        #[arg(long)]
        config: Option<String>,

        #[command(flatten)]
        detection: DetectionOptions,

        /// Correct positions of stars with saturated blooming columns
        #[arg(long)]
        blooming: bool,

        /// Report statistics of the estimated sky image
        #[arg(long)]
        keep_sky: bool,

        /// Write the star list as JSON to this file
        #[arg(short, long)]
        output: Option<String>,

        /// Write a star document with one NEW entry per star to this file
        #[arg(long)]
        document: Option<String>,
    },

    /// Identify document stars with a catalog
    Identify {
        /// Star document (JSON), rewritten in place
        #[arg(long)]
        document: String,

        /// Catalog file (JSON)
        #[arg(long)]
        catalog: String,

        /// Plate solution (JSON); defaults to the one stored in the document
        #[arg(long)]
        transform: Option<String>,

        /// Record undetected catalog stars as NEG entries
        #[arg(long)]
        accept_negative: bool,

        /// JSON config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Remove the identifications a catalog added to a document
    Unidentify {
        /// Star document (JSON), rewritten in place
        #[arg(long)]
        document: String,

        /// Catalog file (JSON)
        #[arg(long)]
        catalog: String,

        /// Plate solution (JSON); defaults to the one stored in the document
        #[arg(long)]
        transform: Option<String>,

        /// JSON config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Estimate the limiting magnitude or value of a document
    Limiting {
        /// Star document (JSON)
        #[arg(long)]
        document: String,

        /// Catalog the detections were identified with
        #[arg(long)]
        catalog_acronym: String,

        /// Brightness scale (magnitude, value)
        #[arg(long, default_value = "magnitude")]
        mode: String,

        /// Magnitude zero point for detection values (fitted to the catalog if unset)
        #[arg(long)]
        zero_point: Option<f64>,

        /// JSON config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Create an annotated PNG with detected stars circled
    Annotate {
        /// FITS file to annotate
        fits_file: String,

        /// Output PNG file (defaults to <input>_annotated.png)
        #[arg(short, long)]
        output: Option<String>,

        /// Maximum number of stars to annotate (brightest first)
        #[arg(long, default_value = "500")]
        max_stars: usize,

        /// Annotation color (red, green, blue, yellow, cyan, magenta, white)
        #[arg(long, default_value = "red")]
        color: String,

        /// JSON config file
        #[arg(long)]
        config: Option<String>,

        #[command(flatten)]
        detection: DetectionOptions,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct DetectionOptions {
    /// Photometry mode (pixel, peak, aperture)
    #[arg(long)]
    pub mode: Option<String>,

    /// Threshold coefficient applied to the noise deviation
    #[arg(long)]
    pub coefficient: Option<f64>,

    /// Magnitude zero point for instrumental magnitudes
    #[arg(long)]
    pub zero_point: Option<f64>,
}

impl DetectionOptions {
    /// Override config values with the flags that were given.
    pub fn apply_to(&self, params: &mut DetectionParams) -> Result<()> {
        if let Some(mode) = &self.mode {
            params.photometry = mode.parse::<PhotometryMode>().map_err(anyhow::Error::msg)?;
        }
        if let Some(coefficient) = self.coefficient {
            if coefficient <= 0.0 {
                anyhow::bail!("Coefficient must be positive, got {}", coefficient);
            }
            params.coefficient = coefficient;
        }
        if self.zero_point.is_some() {
            params.magnitude_zero_point = self.zero_point;
        }
        Ok(())
    }
}
