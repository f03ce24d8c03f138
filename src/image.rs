use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use fitrs::{Fits, FitsData, FitsDataArray, HeaderValue};
use std::path::Path;

use crate::error::ImageError;

/// A calibrated monochrome image, row-major, one `f64` per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoImage {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl MonoImage {
    /// Create a zero-filled image.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f64>) -> Result<Self, ImageError> {
        if data.len() != width * height {
            return Err(ImageError::SizeMismatch {
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            None
        } else {
            Some(y as usize * self.width + x as usize)
        }
    }

    /// Pixel value, or `None` outside the image.
    pub fn get(&self, x: i32, y: i32) -> Option<f64> {
        self.index(x, y).map(|i| self.data[i])
    }

    /// Overwrite a pixel; returns false (and does nothing) outside the image.
    pub fn set(&mut self, x: i32, y: i32, value: f64) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    /// Reversing-tiling sample: coordinates outside the image are reflected back
    /// across the nearest edge, so the image behaves like an infinite mirror tiling.
    pub fn get_mirrored(&self, x: i32, y: i32) -> f64 {
        let mx = reflect(x as i64, self.width as i64);
        let my = reflect(y as i64, self.height as i64);
        self.data[my * self.width + mx]
    }

    /// Whether a sub-pixel position falls on the image.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }

    /// Copy out a rectangle; parts outside the image are clipped.
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> MonoImage {
        let x1 = (x + width).min(self.width);
        let y1 = (y + height).min(self.height);
        let x0 = x.min(x1);
        let y0 = y.min(y1);

        let mut data = Vec::with_capacity((x1 - x0) * (y1 - y0));
        for row in y0..y1 {
            data.extend_from_slice(&self.data[row * self.width + x0..row * self.width + x1]);
        }
        MonoImage {
            width: x1 - x0,
            height: y1 - y0,
            data,
        }
    }

    /// Pixel-wise `self - other`, or `None` when the shapes differ.
    pub fn difference(&self, other: &MonoImage) -> Option<MonoImage> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        Some(MonoImage {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a - b)
                .collect(),
        })
    }

    /// Iterate `(x, y, value)` in raster order.
    pub fn pixels(&self) -> impl Iterator<Item = (i32, i32, f64)> + '_ {
        let width = self.width;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| ((i % width) as i32, (i / width) as i32, v))
    }
}

fn reflect(i: i64, n: i64) -> usize {
    if n <= 1 {
        return 0;
    }
    let m = i.rem_euclid(2 * n);
    (if m < n { m } else { 2 * n - 1 - m }) as usize
}

/// An image loaded from disk together with the header values the pipeline needs.
#[derive(Debug, Clone)]
pub struct FitsFrame {
    pub image: MonoImage,
    pub bit_depth: i32,
    /// Middle of the exposure, from DATE-OBS plus half of EXPTIME.
    pub mid_date: Option<DateTime<Utc>>,
}

impl FitsFrame {
    /// Load the primary HDU of a FITS file, applying BZERO/BSCALE.
    pub fn from_file(path: &Path) -> Result<Self, ImageError> {
        let fits = Fits::open(path).map_err(|e| ImageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let hdu = fits.get(0).ok_or(ImageError::MissingHdu)?;

        let integer = |key: &'static str| match hdu.value(key) {
            Some(HeaderValue::IntegerNumber(n)) => Ok(*n),
            _ => Err(ImageError::Header(key)),
        };
        let real = |key: &str, default: f64| match hdu.value(key) {
            Some(HeaderValue::IntegerNumber(n)) => *n as f64,
            Some(HeaderValue::RealFloatingNumber(f)) => *f,
            _ => default,
        };

        let naxis = integer("NAXIS")?;
        if naxis < 2 {
            return Err(ImageError::NotTwoDimensional(naxis));
        }
        let width = integer("NAXIS1")? as usize;
        let height = integer("NAXIS2")? as usize;
        let bit_depth = integer("BITPIX")?;
        let bzero = real("BZERO", 0.0);
        let bscale = real("BSCALE", 1.0);

        let date_obs = match hdu.value("DATE-OBS") {
            Some(HeaderValue::CharacterString(s)) => parse_fits_date(s),
            _ => None,
        };
        let exposure = real("EXPTIME", real("EXPOSURE", 0.0));
        let mid_date = date_obs
            .map(|start| start + Duration::milliseconds((exposure * 500.0).round() as i64));

        let scale = |raw: f64| raw * bscale + bzero;
        let data: Vec<f64> = match hdu.read_data() {
            FitsData::Characters(_) => return Err(ImageError::CharacterData),
            FitsData::IntegersI32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|v| v.map(|n| scale(n as f64)).unwrap_or(0.0))
                .collect(),
            FitsData::IntegersU32(FitsDataArray { data, .. }) => data
                .iter()
                .map(|v| v.map(|n| scale(n as f64)).unwrap_or(0.0))
                .collect(),
            FitsData::FloatingPoint32(FitsDataArray { data, .. }) => {
                data.iter().map(|&v| scale(v as f64)).collect()
            }
            FitsData::FloatingPoint64(FitsDataArray { data, .. }) => {
                data.iter().map(|&v| scale(v)).collect()
            }
        };

        // Only the first plane of a cube is used.
        let plane = width * height;
        if data.len() < plane {
            return Err(ImageError::SizeMismatch {
                expected: plane,
                actual: data.len(),
            });
        }
        let mut data = data;
        data.truncate(plane);

        Ok(FitsFrame {
            image: MonoImage::from_vec(width, height, data)?,
            bit_depth,
            mid_date,
        })
    }
}

fn parse_fits_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
