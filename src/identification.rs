//! Cross-identification of catalog stars with the sources of a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogReader, CatalogStar, SkyCoord};
use crate::document::{EntryKind, StarDocument, StarRecord};
use crate::error::{CatalogError, IdentificationError};
use crate::progress::Progress;
use crate::transform::CoordinateTransform;

/// Search radii of the identification tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationParams {
    /// Record undetected catalog stars as NEG entries.
    pub accept_negative: bool,
    /// Stars with a position error below this are matched to the nearest source
    /// within this radius.
    pub near_radius_arcsec: f64,
    /// Maximum errors from this size up count as loose positions.
    pub loose_error_arcsec: f64,
    /// Radius for matching a NEW source when the position error is small.
    pub new_search_radius_px: f64,
    /// Radius searched for a brighter source the star may be blended with.
    pub blend_search_radius_px: f64,
    /// A blending source must lie within this multiple of its own radius.
    pub blend_radius_factor: f64,
    pub negative_search_radius_arcsec: f64,
    /// Lower bound of the deletion search radius, in arcseconds.
    pub deletion_radius_arcsec: f64,
    /// Lower bound of the deletion search radius, in pixels.
    pub deletion_floor_px: f64,
}

impl Default for IdentificationParams {
    fn default() -> Self {
        Self {
            accept_negative: false,
            near_radius_arcsec: 5.0,
            loose_error_arcsec: 10.0,
            new_search_radius_px: 2.5,
            blend_search_radius_px: 10.0,
            blend_radius_factor: 1.5,
            negative_search_radius_arcsec: 120.0,
            deletion_radius_arcsec: 120.0,
            deletion_floor_px: 10.0,
        }
    }
}

/// Outcome of one catalog star.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identification {
    pub catalog_star: String,
    /// Name of the document entry the star was attached to.
    pub entry: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentificationReport {
    pub identified: Vec<Identification>,
    /// Stars recorded as new NEG entries.
    pub negatives: Vec<Identification>,
    /// Stars dropped without a record.
    pub unmatched: Vec<String>,
}

/// The field a catalog is queried for, once the pass preconditions hold.
pub(crate) struct Field {
    pub center: SkyCoord,
    /// Diagonal of the image, in degrees.
    pub query_fov_deg: f64,
    pub date: Option<DateTime<Utc>>,
    pub arcsec_per_pixel: f64,
}

/// Check that `reader` applies to the document's image and describe the field.
pub(crate) fn check_field(
    document: &StarDocument,
    reader: &dyn CatalogReader,
    transform: &dyn CoordinateTransform,
) -> Result<Field, IdentificationError> {
    let acronym = reader.acronym().to_string();
    if document.width == 0 || document.height == 0 {
        return Err(IdentificationError::IncompleteDocument(
            "the image size is unknown".to_string(),
        ));
    }
    let arcsec_per_pixel = transform.arcsec_per_pixel();
    if !(arcsec_per_pixel.is_finite() && arcsec_per_pixel > 0.0) {
        return Err(IdentificationError::IncompleteDocument(
            "the pixel scale is unknown".to_string(),
        ));
    }

    let (width, height) = (document.width as f64, document.height as f64);
    let image_fov_deg = width.max(height) * arcsec_per_pixel / 3600.0;
    if let Some(limit_deg) = reader.fov_limit_deg() {
        if image_fov_deg >= limit_deg {
            return Err(IdentificationError::FieldTooLarge {
                catalog: acronym,
                image_fov_deg,
                limit_deg,
            });
        }
    }

    let date = document.mid_date;
    if reader.is_date_dependent() || reader.date_limit().is_some() {
        let Some(date) = date else {
            return Err(IdentificationError::MissingDate(acronym));
        };
        if let Some(range) = reader.date_limit() {
            if !range.contains(date) {
                return Err(IdentificationError::DateOutOfRange {
                    catalog: acronym,
                    date: date.to_rfc3339(),
                });
            }
        }
    }

    Ok(Field {
        center: transform.image_to_sky(width / 2.0, height / 2.0),
        query_fov_deg: (width * width + height * height).sqrt() * arcsec_per_pixel / 3600.0,
        date,
        arcsec_per_pixel,
    })
}

pub struct Identifier {
    params: IdentificationParams,
}

impl Identifier {
    pub fn new(params: IdentificationParams) -> Self {
        Self { params }
    }

    /// Attach every catalog star of `reader` to the document.
    ///
    /// Records added before a catalog failure are kept; the index is rebuilt either way.
    pub fn run(
        &self,
        document: &mut StarDocument,
        reader: &mut dyn CatalogReader,
        transform: &dyn CoordinateTransform,
        progress: &mut dyn Progress,
    ) -> Result<IdentificationReport, IdentificationError> {
        let field = check_field(document, reader, transform)?;
        let acronym = reader.acronym().to_string();

        let mut report = IdentificationReport::default();
        let result = self.identify_all(document, reader, transform, &field, &acronym, &mut report);
        reader.close();
        document.rebuild();

        if let Err(e) = result {
            tracing::error!("Identification with {} aborted: {}", acronym, e);
            return Err(e.into());
        }

        let identified = format!("Identified: {}", report.identified.len());
        let negatives = format!("Negative: {}", report.negatives.len());
        for message in [identified, negatives] {
            tracing::info!("{}", message);
            progress.milestone(&message);
        }
        if !report.unmatched.is_empty() {
            tracing::debug!("{} catalog stars not matched", report.unmatched.len());
        }
        Ok(report)
    }

    fn identify_all(
        &self,
        document: &mut StarDocument,
        reader: &mut dyn CatalogReader,
        transform: &dyn CoordinateTransform,
        field: &Field,
        acronym: &str,
        report: &mut IdentificationReport,
    ) -> Result<(), CatalogError> {
        reader.open(field.center, field.query_fov_deg, field.date)?;

        while let Some(star) = reader.read_next()? {
            let Some((x, y)) = transform.sky_to_image(&star.coord) else {
                report.unmatched.push(star.name);
                continue;
            };

            if let Some(index) = self.find_match(document, &star, x, y, field.arcsec_per_pixel) {
                if let Some(entry) = document.star_mut(index) {
                    tracing::trace!("{} -> {}", star.name, entry.name);
                    report.identified.push(Identification {
                        catalog_star: star.name.clone(),
                        entry: entry.name.clone(),
                    });
                    entry.add_record(StarRecord::Catalog {
                        catalog: acronym.to_string(),
                        star,
                        x,
                        y,
                    });
                }
            } else if self.params.accept_negative && document.contains(x, y) {
                let name = star.name.clone();
                let index = document.add_negative(acronym, star, x, y);
                if let Some(entry) = document.star(index) {
                    report.negatives.push(Identification {
                        catalog_star: name,
                        entry: entry.name.clone(),
                    });
                }
            } else {
                report.unmatched.push(star.name);
            }
        }
        Ok(())
    }

    /// Document entry for a catalog star at image position `(x, y)`, tried tier by tier.
    pub fn find_match(
        &self,
        document: &StarDocument,
        star: &CatalogStar,
        x: f64,
        y: f64,
        arcsec_per_pixel: f64,
    ) -> Option<usize> {
        let p = &self.params;
        let error = star.position_error_arcsec;
        let max_error = star.max_position_error();

        let detected = |radius: f64| {
            document
                .within(x, y, radius)
                .into_iter()
                .filter(|(i, _)| document.stars()[*i].detected().is_some())
                .collect::<Vec<_>>()
        };

        // Tier 1: the catalog position error.
        let tier1 = if error < p.near_radius_arcsec {
            detected(p.near_radius_arcsec / arcsec_per_pixel)
                .first()
                .map(|(i, _)| *i)
        } else {
            brightest(document, detected(error / arcsec_per_pixel))
        };
        if tier1.is_some() {
            return tier1;
        }

        // Tier 2: loose ephemeris, or an unidentified source very close by.
        let tier2 = if max_error >= p.loose_error_arcsec && max_error > error {
            let radius = p.new_search_radius_px.max(max_error / arcsec_per_pixel);
            brightest(document, detected(radius))
        } else {
            let new_only = detected(p.new_search_radius_px)
                .into_iter()
                .filter(|(i, _)| document.stars()[*i].kind() == EntryKind::New)
                .collect();
            brightest(document, new_only)
        };
        if tier2.is_some() {
            return tier2;
        }

        // Tier 3: blended into the profile of a brighter source.
        let blended = detected(p.blend_search_radius_px)
            .into_iter()
            .filter(|(i, distance)| {
                document.stars()[*i]
                    .detected()
                    .is_some_and(|image| *distance <= p.blend_radius_factor * image.radius)
            })
            .collect();
        let tier3 = brightest(document, blended);
        if tier3.is_some() || !p.accept_negative {
            return tier3;
        }

        // Tier 4: a NEG entry from an earlier pass.
        let mut best: Option<(usize, f64, f64)> = None;
        for (i, _) in document.within(x, y, p.negative_search_radius_arcsec / arcsec_per_pixel) {
            let entry = &document.stars()[i];
            if entry.kind() != EntryKind::Neg {
                continue;
            }
            for (_, other, ox, oy) in entry.catalog_records() {
                let distance = ((ox - x).powi(2) + (oy - y).powi(2)).sqrt() * arcsec_per_pixel;
                let limit = max_error.max(other.max_position_error());
                if best.map_or(true, |(_, d, _)| distance < d) {
                    best = Some((i, distance, limit));
                }
            }
        }
        best.filter(|(_, distance, limit)| distance < limit)
            .map(|(i, _, _)| i)
    }
}

/// Brightest detected entry among `candidates` (nearest first); ties keep the nearer.
fn brightest(document: &StarDocument, candidates: Vec<(usize, f64)>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, _) in candidates {
        let Some(image) = document.stars()[i].detected() else {
            continue;
        };
        if best.map_or(true, |(_, value)| image.value > value) {
            best = Some((i, image.value));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DateRange, MemoryCatalogReader};
    use crate::progress::NullProgress;
    use crate::star_image::StarImage;
    use crate::transform::TangentPlaneTransform;
    use chrono::TimeZone;

    const SCALE: f64 = 1.0;

    fn detection(x: f64, y: f64, value: f64, radius: f64) -> StarImage {
        StarImage {
            x,
            y,
            value,
            peak: value,
            radius,
            pixel_count: 9,
            magnitude: None,
        }
    }

    fn transform() -> TangentPlaneTransform {
        TangentPlaneTransform::north_up((50.0, 50.0), SkyCoord::new(150.0, 10.0), SCALE)
    }

    fn catalog_star_at(name: &str, x: f64, y: f64, error: f64) -> CatalogStar {
        CatalogStar::new(name, transform().image_to_sky(x, y), Some(12.0)).with_errors(error, 0.0)
    }

    fn identify(
        document: &mut StarDocument,
        stars: Vec<CatalogStar>,
        accept_negative: bool,
    ) -> IdentificationReport {
        let identifier = Identifier::new(IdentificationParams {
            accept_negative,
            ..IdentificationParams::default()
        });
        let mut reader = MemoryCatalogReader::new("TST", stars);
        identifier
            .run(document, &mut reader, &transform(), &mut NullProgress)
            .unwrap()
    }

    #[test]
    fn test_small_error_prefers_nearest() {
        let mut document = StarDocument::from_detections(
            100,
            100,
            &[detection(52.0, 50.0, 10.0, 2.0), detection(46.0, 50.0, 500.0, 2.0)],
        );
        // The brighter source already carries a catalog identification.
        document.star_mut(1).unwrap().add_record(StarRecord::Catalog {
            catalog: "OLD".to_string(),
            star: catalog_star_at("old", 46.0, 50.0, 1.0),
            x: 46.0,
            y: 50.0,
        });
        document.rebuild();

        let report = identify(&mut document, vec![catalog_star_at("c", 50.0, 50.0, 3.0)], false);
        assert_eq!(report.identified.len(), 1);
        assert_eq!(report.identified[0].entry, "S1");
        assert_eq!(document.stars()[0].kind(), EntryKind::Catalog("TST".to_string()));
    }

    #[test]
    fn test_wide_error_prefers_brightest() {
        let document = StarDocument::from_detections(
            100,
            100,
            &[detection(51.0, 50.0, 10.0, 2.0), detection(58.0, 50.0, 500.0, 2.0)],
        );
        let identifier = Identifier::new(IdentificationParams::default());
        let star = catalog_star_at("iras", 50.0, 50.0, 30.0);
        assert_eq!(identifier.find_match(&document, &star, 50.0, 50.0, SCALE), Some(1));
    }

    #[test]
    fn test_loose_and_blend_tiers() {
        let identifier = Identifier::new(IdentificationParams::default());

        let document = StarDocument::from_detections(100, 100, &[detection(58.0, 50.0, 80.0, 2.0)]);
        let tight = catalog_star_at("v", 50.0, 50.0, 1.0);
        assert_eq!(identifier.find_match(&document, &tight, 50.0, 50.0, SCALE), None);
        let loose = tight.clone().with_errors(1.0, 20.0);
        assert_eq!(identifier.find_match(&document, &loose, 50.0, 50.0, SCALE), Some(0));

        let wide = StarDocument::from_detections(100, 100, &[detection(56.0, 50.0, 900.0, 5.0)]);
        assert_eq!(identifier.find_match(&wide, &tight, 50.0, 50.0, SCALE), Some(0));
        let narrow = StarDocument::from_detections(100, 100, &[detection(56.0, 50.0, 900.0, 3.0)]);
        assert_eq!(identifier.find_match(&narrow, &tight, 50.0, 50.0, SCALE), None);
    }

    #[test]
    fn test_negative_entry_at_center() {
        let mut document =
            StarDocument::from_detections(100, 100, &[detection(10.0, 10.0, 50.0, 2.0)]);
        let first = catalog_star_at("first", 80.0, 80.0, 1.0);
        let report = identify(&mut document, vec![first], true);
        assert_eq!(report.negatives.len(), 1);
        let prior = document.neg_count();

        let center = catalog_star_at("center", 50.0, 50.0, 1.0);
        let report = identify(&mut document, vec![center], true);
        assert_eq!(report.negatives.len(), 1);
        assert_eq!(report.negatives[0].entry, format!("NEG{}", prior + 1));
        assert_eq!(document.neg_count(), prior + 1);
        let negs = document
            .stars()
            .iter()
            .filter(|s| s.kind() == EntryKind::Neg)
            .count();
        assert_eq!(negs, 2);
    }

    #[test]
    fn test_negative_entry_is_reused() {
        let mut document = StarDocument::new(100, 100);
        identify(&mut document, vec![catalog_star_at("a", 50.0, 50.0, 1.0)], true);
        let star = catalog_star_at("b", 50.5, 50.0, 1.0);
        let report = identify(&mut document, vec![star], true);
        assert_eq!(report.identified.len(), 1);
        assert_eq!(report.identified[0].entry, "NEG1");
        assert_eq!(document.len(), 1);
        assert_eq!(document.stars()[0].records().len(), 2);
    }

    #[test]
    fn test_distant_negative_gets_its_own_entry() {
        let mut document = StarDocument::new(100, 100);
        identify(&mut document, vec![catalog_star_at("a", 50.0, 50.0, 1.0)], true);
        // 3" away, beyond both 1" errors.
        let report = identify(&mut document, vec![catalog_star_at("b", 53.0, 50.0, 1.0)], true);
        assert!(report.identified.is_empty());
        assert_eq!(report.negatives[0].entry, "NEG2");
        assert_eq!(document.len(), 2);
    }

    #[test]
    fn test_nearest_negative_record_wins() {
        let mut document = StarDocument::new(100, 100);
        let first = document.add_negative("TST", catalog_star_at("a", 50.0, 50.0, 1.0), 50.0, 50.0);
        document.star_mut(first).unwrap().add_record(StarRecord::Catalog {
            catalog: "TST".to_string(),
            star: catalog_star_at("a2", 58.0, 50.0, 1.0),
            x: 58.0,
            y: 50.0,
        });
        document.add_negative("TST", catalog_star_at("b", 55.5, 50.0, 1.0), 55.5, 50.0);
        document.rebuild();
        // NEG2 is the nearer entry, but NEG1 holds the nearer record.
        assert_eq!(document.within(57.6, 50.0, 10.0)[0].0, 1);

        let identifier = Identifier::new(IdentificationParams {
            accept_negative: true,
            ..IdentificationParams::default()
        });
        let star = catalog_star_at("c", 57.6, 50.0, 5.0);
        assert_eq!(identifier.find_match(&document, &star, 57.6, 50.0, SCALE), Some(first));
    }

    #[test]
    fn test_close_search_skips_identified_sources() {
        let identifier = Identifier::new(IdentificationParams::default());
        // At 4"/px the 5" radius covers 1.25 px, so both sources are left to the
        // 2.5 px search for unidentified sources.
        let scale = 4.0;
        let sources = [detection(52.0, 50.0, 500.0, 1.0), detection(48.0, 50.0, 10.0, 1.0)];
        let mut document = StarDocument::from_detections(100, 100, &sources);
        document.star_mut(0).unwrap().add_record(StarRecord::Catalog {
            catalog: "OLD".to_string(),
            star: catalog_star_at("old", 52.0, 50.0, 1.0),
            x: 52.0,
            y: 50.0,
        });
        document.rebuild();

        let star = catalog_star_at("c", 50.0, 50.0, 1.0);
        assert_eq!(identifier.find_match(&document, &star, 50.0, 50.0, scale), Some(1));

        document.star_mut(1).unwrap().remove_record(0);
        document.rebuild();
        assert_eq!(document.len(), 1);
        assert_eq!(identifier.find_match(&document, &star, 50.0, 50.0, scale), None);
    }

    #[test]
    fn test_date_limited_catalog_within_range() {
        let mut document =
            StarDocument::from_detections(100, 100, &[detection(50.5, 50.0, 100.0, 2.0)]);
        document.mid_date = Some(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap());
        let range = DateRange {
            start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        };
        let mut reader =
            MemoryCatalogReader::new("EPH", vec![catalog_star_at("e", 50.0, 50.0, 1.0)])
                .with_date_dependence(Some(range));

        let report = Identifier::new(IdentificationParams::default())
            .run(&mut document, &mut reader, &transform(), &mut NullProgress)
            .unwrap();
        assert_eq!(report.identified.len(), 1);
        assert_eq!(document.stars()[0].kind(), EntryKind::Catalog("EPH".to_string()));
    }

    #[test]
    fn test_outside_without_negatives_is_dropped() {
        let mut document = StarDocument::new(100, 100);
        let report = identify(&mut document, vec![catalog_star_at("out", 110.0, 50.0, 1.0)], true);
        assert_eq!(report.unmatched, vec!["out".to_string()]);
        let report = identify(&mut document, vec![catalog_star_at("in", 20.0, 20.0, 1.0)], false);
        assert_eq!(report.unmatched, vec!["in".to_string()]);
        assert!(document.is_empty());
    }

    #[test]
    fn test_preconditions() {
        let identifier = Identifier::new(IdentificationParams::default());
        let mut document = StarDocument::new(100, 100);

        let mut small = MemoryCatalogReader::new("SML", vec![]).with_fov_limit(0.01);
        assert!(matches!(
            identifier.run(&mut document, &mut small, &transform(), &mut NullProgress),
            Err(IdentificationError::FieldTooLarge { .. })
        ));

        let mut dated = MemoryCatalogReader::new("MPC", vec![]).with_date_dependence(None);
        assert!(matches!(
            identifier.run(&mut document, &mut dated, &transform(), &mut NullProgress),
            Err(IdentificationError::MissingDate(_))
        ));

        let range = DateRange {
            start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
        };
        document.mid_date = Some(Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap());
        let mut expired = MemoryCatalogReader::new("OLD", vec![]).with_date_dependence(Some(range));
        assert!(matches!(
            identifier.run(&mut document, &mut expired, &transform(), &mut NullProgress),
            Err(IdentificationError::DateOutOfRange { .. })
        ));

        let mut empty = StarDocument::new(0, 0);
        let mut reader = MemoryCatalogReader::new("TST", vec![]);
        assert!(matches!(
            identifier.run(&mut empty, &mut reader, &transform(), &mut NullProgress),
            Err(IdentificationError::IncompleteDocument(_))
        ));
    }

    struct FailingReader {
        served: usize,
    }

    impl CatalogReader for FailingReader {
        fn acronym(&self) -> &str {
            "BAD"
        }

        fn open(
            &mut self,
            _: SkyCoord,
            _: f64,
            _: Option<DateTime<Utc>>,
        ) -> Result<(), CatalogError> {
            Ok(())
        }

        fn read_next(&mut self) -> Result<Option<CatalogStar>, CatalogError> {
            self.served += 1;
            if self.served == 1 {
                Ok(Some(catalog_star_at("ok", 30.0, 30.0, 1.0)))
            } else {
                Err(CatalogError::Query("connection reset".to_string()))
            }
        }
    }

    #[test]
    fn test_catalog_failure_keeps_partial_work() {
        let identifier = Identifier::new(IdentificationParams {
            accept_negative: true,
            ..IdentificationParams::default()
        });
        let mut document = StarDocument::new(100, 100);
        let mut reader = FailingReader { served: 0 };
        let result = identifier.run(&mut document, &mut reader, &transform(), &mut NullProgress);
        assert!(matches!(result, Err(IdentificationError::Catalog(CatalogError::Query(_)))));
        assert_eq!(document.len(), 1);
        assert_eq!(document.within(30.0, 30.0, 1.0).len(), 1);
    }
}
