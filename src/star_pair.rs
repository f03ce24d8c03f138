use serde::{Deserialize, Serialize};

use crate::catalog::CatalogStar;
use crate::document::{EntryKind, StarDocument};
use crate::star_image::StarImage;

/// A detected star and its catalog counterpart; either side may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarPair {
    pub first: Option<StarImage>,
    pub second: Option<CatalogStar>,
    /// Pairing was not attempted because the position lies outside the image.
    #[serde(default)]
    pub out_of_area: bool,
}

impl StarPair {
    pub fn new(first: Option<StarImage>, second: Option<CatalogStar>) -> Self {
        Self {
            first,
            second,
            out_of_area: false,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.first.is_some() && self.second.is_some()
    }
}

/// Pairs of the document entries against one catalog.
///
/// Detected entries come first, brightest first, each with its first record from
/// `acronym` (if any). Undetected entries holding a record from `acronym` follow as
/// catalog-only pairs.
pub fn pair_detections(document: &StarDocument, acronym: &str) -> Vec<StarPair> {
    let counterpart = |index: usize| {
        document.stars()[index]
            .catalog_records()
            .find(|(catalog, ..)| *catalog == acronym)
            .map(|(_, star, x, y)| (star.clone(), x, y))
    };

    let mut detected: Vec<(usize, &StarImage)> = document
        .stars()
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.detected().map(|image| (i, image)))
        .collect();
    detected.sort_by(|(ia, a), (ib, b)| b.value.total_cmp(&a.value).then_with(|| ia.cmp(ib)));

    let mut pairs: Vec<StarPair> = detected
        .into_iter()
        .map(|(i, image)| StarPair {
            first: Some(image.clone()),
            second: counterpart(i).map(|(star, ..)| star),
            out_of_area: !document.contains(image.x, image.y),
        })
        .collect();

    for (i, entry) in document.stars().iter().enumerate() {
        if entry.kind() != EntryKind::Neg {
            continue;
        }
        if let Some((star, x, y)) = counterpart(i) {
            pairs.push(StarPair {
                first: None,
                second: Some(star),
                out_of_area: !document.contains(x, y),
            });
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SkyCoord;
    use crate::document::StarRecord;

    fn detection(x: f64, y: f64, value: f64) -> StarImage {
        StarImage {
            x,
            y,
            value,
            peak: value,
            radius: 1.5,
            pixel_count: 7,
            magnitude: None,
        }
    }

    fn record(catalog: &str, name: &str, x: f64, y: f64) -> StarRecord {
        StarRecord::Catalog {
            catalog: catalog.to_string(),
            star: CatalogStar::new(name, SkyCoord::new(0.0, 0.0), Some(11.0)),
            x,
            y,
        }
    }

    #[test]
    fn test_pairs_follow_brightness_and_catalog() {
        let mut document = StarDocument::from_detections(
            100,
            100,
            &[
                detection(10.0, 10.0, 5.0),
                detection(20.0, 20.0, 50.0),
                detection(-1.0, 30.0, 7.0),
            ],
        );
        document.star_mut(0).unwrap().add_record(record("A", "a1", 10.0, 10.0));
        document.star_mut(1).unwrap().add_record(record("B", "b1", 20.0, 20.0));
        let undetected = CatalogStar::new("a2", SkyCoord::new(0.0, 0.0), None);
        document.add_negative("A", undetected, 70.0, 70.0);
        document.rebuild();

        let pairs = pair_detections(&document, "A");
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0].first.as_ref().unwrap().value, 50.0);
        assert!(pairs[0].second.is_none());
        assert!(pairs[1].out_of_area);
        assert!(pairs[2].is_paired());
        assert!(pairs[3].first.is_none());
        assert_eq!(pairs[3].second.as_ref().unwrap().name, "a2");
    }
}
