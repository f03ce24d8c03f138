use serde::Serialize;

use crate::catalog::CatalogReader;
use crate::document::{StarDocument, StarRecord};
use crate::error::{CatalogError, IdentificationError};
use crate::identification::{check_field, Field, IdentificationParams};
use crate::progress::Progress;
use crate::transform::CoordinateTransform;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    /// Catalog stars whose record was removed.
    pub deleted: Vec<String>,
    /// Catalog stars with no matching record near their position.
    pub not_found: Vec<String>,
}

/// Removes the records a catalog attached to a document.
pub struct IdentificationDeleter {
    params: IdentificationParams,
}

impl IdentificationDeleter {
    pub fn new(params: IdentificationParams) -> Self {
        Self { params }
    }

    pub fn run(
        &self,
        document: &mut StarDocument,
        reader: &mut dyn CatalogReader,
        transform: &dyn CoordinateTransform,
        progress: &mut dyn Progress,
    ) -> Result<DeletionReport, IdentificationError> {
        let field = check_field(document, reader, transform)?;
        let acronym = reader.acronym().to_string();

        let mut report = DeletionReport::default();
        let result = self.delete_all(document, reader, transform, &field, &acronym, &mut report);
        reader.close();
        document.rebuild();

        if let Err(e) = result {
            tracing::error!("Deletion of {} identifications aborted: {}", acronym, e);
            return Err(e.into());
        }

        let message = format!("Deleted: {}", report.deleted.len());
        tracing::info!("{}", message);
        progress.milestone(&message);
        Ok(report)
    }

    fn delete_all(
        &self,
        document: &mut StarDocument,
        reader: &mut dyn CatalogReader,
        transform: &dyn CoordinateTransform,
        field: &Field,
        acronym: &str,
        report: &mut DeletionReport,
    ) -> Result<(), CatalogError> {
        reader.open(field.center, field.query_fov_deg, field.date)?;

        while let Some(star) = reader.read_next()? {
            let Some((x, y)) = transform.sky_to_image(&star.coord) else {
                report.not_found.push(star.name);
                continue;
            };
            let radius = (star.position_error_arcsec.max(self.params.deletion_radius_arcsec)
                / field.arcsec_per_pixel)
                .max(self.params.deletion_floor_px);

            let found = document.within(x, y, radius).into_iter().find_map(|(i, _)| {
                document.stars()[i]
                    .records()
                    .iter()
                    .position(|r| match r {
                        StarRecord::Catalog { catalog, star: s, .. } => {
                            catalog == acronym && s.name == star.name
                        }
                        StarRecord::Detected(_) => false,
                    })
                    .map(|record| (i, record))
            });

            match found.and_then(|(i, record)| document.star_mut(i)?.remove_record(record)) {
                Some(_) => report.deleted.push(star.name),
                None => report.not_found.push(star.name),
            }
        }
        Ok(())
    }
}
