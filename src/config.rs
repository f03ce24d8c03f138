use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::identification::IdentificationParams;
use crate::limiting_value::LimitingValueParams;
use crate::star_detector::DetectionParams;

/// Parameters of every operation, as read from a JSON config file.
///
/// Any section or field left out keeps its default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionParams,
    pub identification: IdentificationParams,
    pub limiting: LimitingValueParams,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// The file's config, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photometry::PhotometryMode;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"detection": {"coefficient": 4.0, "photometry": "aperture",
                              "aperture": {"inner": 7}},
                "identification": {"accept_negative": true},
                "limiting": {"magnitude_zero_point": 21.5}}"#,
        )
        .unwrap();
        assert_eq!(config.detection.coefficient, 4.0);
        assert_eq!(config.detection.photometry, PhotometryMode::Aperture);
        assert_eq!(config.detection.aperture.inner, 7);
        assert_eq!(config.detection.aperture.outer, 11);
        assert_eq!(config.detection.radius_cell_size, 200);
        assert!(config.identification.accept_negative);
        assert_eq!(config.identification.blend_radius_factor, 1.5);
        assert_eq!(config.limiting.smoothing_passes, 2);
        assert_eq!(config.limiting.magnitude_zero_point, Some(21.5));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/starsift.json"))).is_err());
        assert_eq!(Config::load(None).unwrap().detection.coefficient, 3.0);
    }
}
