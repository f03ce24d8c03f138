//! Mapping between sky coordinates and image pixels.
//!
//! Plate solving is done elsewhere; identification only needs the fitted solution as
//! a function. [`TangentPlaneTransform`] covers the common case of a linear WCS
//! solution (reference pixel, reference sky position and CD matrix).

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::catalog::SkyCoord;

pub trait CoordinateTransform {
    /// Image position of a sky coordinate, or `None` when it cannot be projected
    /// (behind the tangent plane).
    fn sky_to_image(&self, coord: &SkyCoord) -> Option<(f64, f64)>;

    fn image_to_sky(&self, x: f64, y: f64) -> SkyCoord;

    /// Pixel scale at the field center.
    fn arcsec_per_pixel(&self) -> f64;

    /// Apply the optical distortion model to an ideal image position.
    fn correct_distortion(&self, x: f64, y: f64) -> (f64, f64) {
        (x, y)
    }
}

/// Gnomonic (TAN) projection with a linear pixel mapping.
///
/// `cd` maps pixel offsets from `reference_pixel` to tangent-plane offsets in
/// degrees, as the FITS `CDi_j` keywords do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TangentPlaneTransform {
    pub reference_pixel: (f64, f64),
    pub reference_coord: SkyCoord,
    pub cd: [[f64; 2]; 2],
}

impl TangentPlaneTransform {
    /// North up, east left, square pixels of `arcsec_per_pixel`.
    pub fn north_up(
        reference_pixel: (f64, f64),
        reference_coord: SkyCoord,
        arcsec_per_pixel: f64,
    ) -> Self {
        let scale = arcsec_per_pixel / 3600.0;
        Self {
            reference_pixel,
            reference_coord,
            cd: [[-scale, 0.0], [0.0, -scale]],
        }
    }

    fn cd_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(self.cd[0][0], self.cd[0][1], self.cd[1][0], self.cd[1][1])
    }
}

impl CoordinateTransform for TangentPlaneTransform {
    fn sky_to_image(&self, coord: &SkyCoord) -> Option<(f64, f64)> {
        let (ra, dec) = (coord.ra_deg.to_radians(), coord.dec_deg.to_radians());
        let ra0 = self.reference_coord.ra_deg.to_radians();
        let dec0 = self.reference_coord.dec_deg.to_radians();
        let da = ra - ra0;

        let denom = dec.sin() * dec0.sin() + dec.cos() * dec0.cos() * da.cos();
        if denom <= 1e-12 {
            return None;
        }
        let xi = dec.cos() * da.sin() / denom;
        let eta = (dec.sin() * dec0.cos() - dec.cos() * dec0.sin() * da.cos()) / denom;

        let inverse = self.cd_matrix().try_inverse()?;
        let offset = inverse * Vector2::new(xi.to_degrees(), eta.to_degrees());
        Some(self.correct_distortion(
            self.reference_pixel.0 + offset.x,
            self.reference_pixel.1 + offset.y,
        ))
    }

    fn image_to_sky(&self, x: f64, y: f64) -> SkyCoord {
        let plane = self.cd_matrix()
            * Vector2::new(x - self.reference_pixel.0, y - self.reference_pixel.1);
        let (xi, eta) = (plane.x.to_radians(), plane.y.to_radians());
        let ra0 = self.reference_coord.ra_deg.to_radians();
        let dec0 = self.reference_coord.dec_deg.to_radians();

        let rho = (xi * xi + eta * eta).sqrt();
        if rho < 1e-15 {
            return self.reference_coord;
        }
        let c = rho.atan();
        let dec = (c.cos() * dec0.sin() + eta * c.sin() * dec0.cos() / rho).asin();
        let ra = ra0
            + (xi * c.sin()).atan2(rho * dec0.cos() * c.cos() - eta * dec0.sin() * c.sin());
        SkyCoord::new(ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    fn arcsec_per_pixel(&self) -> f64 {
        self.cd_matrix().determinant().abs().sqrt() * 3600.0
    }
}
