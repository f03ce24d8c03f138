//! Catalog stars and the readers that supply them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Equatorial sky position, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyCoord {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }

    /// Great-circle distance in degrees (haversine).
    pub fn separation_deg(&self, other: &SkyCoord) -> f64 {
        let (ra1, dec1) = (self.ra_deg.to_radians(), self.dec_deg.to_radians());
        let (ra2, dec2) = (other.ra_deg.to_radians(), other.dec_deg.to_radians());
        let a = ((dec2 - dec1) / 2.0).sin().powi(2)
            + dec1.cos() * dec2.cos() * ((ra2 - ra1) / 2.0).sin().powi(2);
        (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
    }
}

/// A reference source from an external catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStar {
    pub name: String,
    pub coord: SkyCoord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    /// Nominal position error, in arcseconds.
    #[serde(default = "default_position_error")]
    pub position_error_arcsec: f64,
    /// Worst-case position error; 0 means the nominal error.
    #[serde(default)]
    pub max_position_error_arcsec: f64,
}

fn default_position_error() -> f64 {
    1.0
}

impl CatalogStar {
    pub fn new(name: impl Into<String>, coord: SkyCoord, magnitude: Option<f64>) -> Self {
        Self {
            name: name.into(),
            coord,
            magnitude,
            position_error_arcsec: default_position_error(),
            max_position_error_arcsec: 0.0,
        }
    }

    pub fn with_errors(mut self, nominal_arcsec: f64, max_arcsec: f64) -> Self {
        self.position_error_arcsec = nominal_arcsec;
        self.max_position_error_arcsec = max_arcsec;
        self
    }

    pub fn max_position_error(&self) -> f64 {
        self.max_position_error_arcsec.max(self.position_error_arcsec)
    }
}

/// Inclusive range of observation dates a catalog is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Source of catalog stars around a field.
///
/// A reader is opened for a field, drained with `read_next` until it returns
/// `Ok(None)`, then closed.
pub trait CatalogReader {
    /// Short catalog name recorded on every identification.
    fn acronym(&self) -> &str;

    /// Largest field of view the catalog may be queried for, in degrees.
    fn fov_limit_deg(&self) -> Option<f64> {
        None
    }

    /// Star positions depend on the observation date (minor planets, variable ephemerides).
    fn is_date_dependent(&self) -> bool {
        false
    }

    fn date_limit(&self) -> Option<DateRange> {
        None
    }

    fn open(
        &mut self,
        center: SkyCoord,
        fov_deg: f64,
        date: Option<DateTime<Utc>>,
    ) -> Result<(), CatalogError>;

    fn read_next(&mut self) -> Result<Option<CatalogStar>, CatalogError>;

    fn close(&mut self) {}
}

/// On-disk layout read by [`JsonCatalogReader`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
    pub acronym: String,
    #[serde(default)]
    pub fov_limit_deg: Option<f64>,
    #[serde(default)]
    pub date_dependent: bool,
    #[serde(default)]
    pub date_limit: Option<DateRange>,
    pub stars: Vec<CatalogStar>,
}

/// Catalog held in memory; `open` selects the stars within half the field of view
/// of the center.
#[derive(Debug, Clone)]
pub struct MemoryCatalogReader {
    acronym: String,
    stars: Vec<CatalogStar>,
    fov_limit_deg: Option<f64>,
    date_dependent: bool,
    date_limit: Option<DateRange>,
    selected: Vec<usize>,
    cursor: usize,
}

impl MemoryCatalogReader {
    pub fn new(acronym: impl Into<String>, stars: Vec<CatalogStar>) -> Self {
        Self {
            acronym: acronym.into(),
            stars,
            fov_limit_deg: None,
            date_dependent: false,
            date_limit: None,
            selected: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_fov_limit(mut self, fov_limit_deg: f64) -> Self {
        self.fov_limit_deg = Some(fov_limit_deg);
        self
    }

    pub fn with_date_dependence(mut self, limit: Option<DateRange>) -> Self {
        self.date_dependent = true;
        self.date_limit = limit;
        self
    }
}

impl From<CatalogFile> for MemoryCatalogReader {
    fn from(file: CatalogFile) -> Self {
        let mut reader = MemoryCatalogReader::new(file.acronym, file.stars);
        reader.fov_limit_deg = file.fov_limit_deg;
        reader.date_dependent = file.date_dependent;
        reader.date_limit = file.date_limit;
        reader
    }
}

impl CatalogReader for MemoryCatalogReader {
    fn acronym(&self) -> &str {
        &self.acronym
    }

    fn fov_limit_deg(&self) -> Option<f64> {
        self.fov_limit_deg
    }

    fn is_date_dependent(&self) -> bool {
        self.date_dependent
    }

    fn date_limit(&self) -> Option<DateRange> {
        self.date_limit
    }

    fn open(
        &mut self,
        center: SkyCoord,
        fov_deg: f64,
        _date: Option<DateTime<Utc>>,
    ) -> Result<(), CatalogError> {
        let radius = fov_deg / 2.0;
        self.selected = self
            .stars
            .iter()
            .enumerate()
            .filter(|(_, s)| s.coord.separation_deg(&center) <= radius)
            .map(|(i, _)| i)
            .collect();
        self.cursor = 0;
        tracing::debug!(
            "{}: {} of {} stars within {:.3} deg",
            self.acronym,
            self.selected.len(),
            self.stars.len(),
            radius
        );
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<CatalogStar>, CatalogError> {
        let Some(&index) = self.selected.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(self.stars.get(index).cloned())
    }

    fn close(&mut self) {
        self.selected.clear();
        self.cursor = 0;
    }
}

/// Catalog stored as a JSON [`CatalogFile`]. The file is read on `open`, so a
/// missing file surfaces as a media error at query time.
#[derive(Debug, Clone)]
pub struct JsonCatalogReader {
    path: PathBuf,
    inner: MemoryCatalogReader,
}

impl JsonCatalogReader {
    /// Load the catalog metadata and stars from `path`.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file = read_catalog_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: file.into(),
        })
    }
}

fn read_catalog_file(path: &Path) -> Result<CatalogFile, CatalogError> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CatalogError::MediaNotFound(path.display().to_string()),
        _ => CatalogError::Io(e),
    })?;
    Ok(serde_json::from_str(&text)?)
}

impl CatalogReader for JsonCatalogReader {
    fn acronym(&self) -> &str {
        self.inner.acronym()
    }

    fn fov_limit_deg(&self) -> Option<f64> {
        self.inner.fov_limit_deg()
    }

    fn is_date_dependent(&self) -> bool {
        self.inner.is_date_dependent()
    }

    fn date_limit(&self) -> Option<DateRange> {
        self.inner.date_limit()
    }

    fn open(
        &mut self,
        center: SkyCoord,
        fov_deg: f64,
        date: Option<DateTime<Utc>>,
    ) -> Result<(), CatalogError> {
        let file = read_catalog_file(&self.path)?;
        self.inner.stars = file.stars;
        self.inner.open(center, fov_deg, date)
    }

    fn read_next(&mut self) -> Result<Option<CatalogStar>, CatalogError> {
        self.inner.read_next()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}
