//! The per-image collection of known sources mutated by identification passes.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogStar;
use crate::star_image::StarImage;
use crate::star_map::StarMap;
use crate::transform::TangentPlaneTransform;

/// One observation attached to a document entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StarRecord {
    /// Source detected on this image.
    Detected(StarImage),
    /// Catalog star matched to (or searched for at) this entry.
    Catalog {
        catalog: String,
        star: CatalogStar,
        /// Position the catalog star maps to on this image.
        x: f64,
        y: f64,
    },
}

impl StarRecord {
    pub fn position(&self) -> (f64, f64) {
        match self {
            StarRecord::Detected(image) => (image.x, image.y),
            StarRecord::Catalog { x, y, .. } => (*x, *y),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Detected, not identified with any catalog.
    New,
    /// Catalog star not detected on the image.
    Neg,
    /// Detected and identified; holds the acronym of the first matching catalog.
    Catalog(String),
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::New => write!(f, "NEW"),
            EntryKind::Neg => write!(f, "NEG"),
            EntryKind::Catalog(acronym) => write!(f, "{}", acronym),
        }
    }
}

/// A named source with every record observed at its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStar {
    pub name: String,
    records: Vec<StarRecord>,
    /// Indexed position, refreshed on rebuild.
    #[serde(skip)]
    position: (f64, f64),
}

impl DocumentStar {
    pub fn new(name: impl Into<String>, record: StarRecord) -> Self {
        let position = record.position();
        Self {
            name: name.into(),
            records: vec![record],
            position,
        }
    }

    pub fn records(&self) -> &[StarRecord] {
        &self.records
    }

    pub fn detected(&self) -> Option<&StarImage> {
        self.records.iter().find_map(|r| match r {
            StarRecord::Detected(image) => Some(image),
            StarRecord::Catalog { .. } => None,
        })
    }

    /// Catalog records as `(acronym, star, x, y)`.
    pub fn catalog_records(&self) -> impl Iterator<Item = (&str, &CatalogStar, f64, f64)> + '_ {
        self.records.iter().filter_map(|r| match r {
            StarRecord::Catalog { catalog, star, x, y } => Some((catalog.as_str(), star, *x, *y)),
            StarRecord::Detected(_) => None,
        })
    }

    pub fn kind(&self) -> EntryKind {
        if self.detected().is_none() {
            return EntryKind::Neg;
        }
        match self.catalog_records().next() {
            Some((acronym, ..)) => EntryKind::Catalog(acronym.to_string()),
            None => EntryKind::New,
        }
    }

    /// Position as of the last index rebuild.
    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    /// The detected position, or the mean catalog position for undetected entries.
    fn nominal_position(&self) -> Option<(f64, f64)> {
        if let Some(image) = self.detected() {
            return Some((image.x, image.y));
        }
        let n = self.records.len();
        if n == 0 {
            return None;
        }
        let (sx, sy) = self
            .records
            .iter()
            .map(StarRecord::position)
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        Some((sx / n as f64, sy / n as f64))
    }

    pub fn add_record(&mut self, record: StarRecord) {
        self.records.push(record);
    }

    pub fn remove_record(&mut self, index: usize) -> Option<StarRecord> {
        (index < self.records.len()).then(|| self.records.remove(index))
    }
}

#[derive(Deserialize)]
struct DocumentData {
    width: usize,
    height: usize,
    #[serde(default)]
    mid_date: Option<DateTime<Utc>>,
    #[serde(default)]
    transform: Option<TangentPlaneTransform>,
    #[serde(default)]
    neg_count: u64,
    #[serde(default)]
    stars: Vec<DocumentStar>,
}

impl From<DocumentData> for StarDocument {
    fn from(data: DocumentData) -> Self {
        let mut document = StarDocument {
            width: data.width,
            height: data.height,
            mid_date: data.mid_date,
            transform: data.transform,
            neg_count: data.neg_count,
            stars: data.stars,
            map: StarMap::default(),
        };
        document.rebuild();
        document
    }
}

/// Known sources of one image, with a spatial index over their positions.
///
/// Mutations do not touch the index. Call [`StarDocument::rebuild`] after a pass
/// before issuing further queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DocumentData")]
pub struct StarDocument {
    pub width: usize,
    pub height: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid_date: Option<DateTime<Utc>>,
    /// Plate solution of the image, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<TangentPlaneTransform>,
    neg_count: u64,
    stars: Vec<DocumentStar>,
    #[serde(skip)]
    map: StarMap,
}

impl StarDocument {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            mid_date: None,
            transform: None,
            neg_count: 0,
            stars: Vec::new(),
            map: StarMap::default(),
        }
    }

    /// One NEW entry per detected star.
    pub fn from_detections(width: usize, height: usize, detections: &[StarImage]) -> Self {
        let mut document = Self::new(width, height);
        document.stars = detections
            .iter()
            .enumerate()
            .map(|(i, image)| {
                DocumentStar::new(format!("S{}", i + 1), StarRecord::Detected(image.clone()))
            })
            .collect();
        document.rebuild();
        document
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read document {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse document {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write document {}", path.display()))
    }

    pub fn stars(&self) -> &[DocumentStar] {
        &self.stars
    }

    pub fn star(&self, index: usize) -> Option<&DocumentStar> {
        self.stars.get(index)
    }

    pub fn star_mut(&mut self, index: usize) -> Option<&mut DocumentStar> {
        self.stars.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.stars.iter().map(|s| s.records.len()).sum()
    }

    /// Number of NEG entries ever created on this document.
    pub fn neg_count(&self) -> u64 {
        self.neg_count
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }

    /// Indexed entries within `radius` pixels of `(x, y)`, nearest first.
    pub fn within(&self, x: f64, y: f64, radius: f64) -> Vec<(usize, f64)> {
        self.map.within(x, y, radius)
    }

    /// Create an undetected entry for a catalog star and return its index.
    pub fn add_negative(&mut self, catalog: &str, star: CatalogStar, x: f64, y: f64) -> usize {
        self.neg_count += 1;
        let name = format!("NEG{}", self.neg_count);
        self.stars.push(DocumentStar::new(
            name,
            StarRecord::Catalog {
                catalog: catalog.to_string(),
                star,
                x,
                y,
            },
        ));
        self.stars.len() - 1
    }

    /// Drop entries without records, refresh positions and rebuild the index.
    pub fn rebuild(&mut self) {
        self.stars.retain(|s| !s.records.is_empty());
        for star in &mut self.stars {
            if let Some(position) = star.nominal_position() {
                star.position = position;
            }
        }
        self.map.rebuild(self.stars.iter().map(|s| s.position));
        tracing::debug!("Star map rebuilt with {} entries", self.stars.len());
    }
}
