use serde::{Deserialize, Serialize};

/// A detected point source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarImage {
    pub x: f64,
    pub y: f64,
    /// Brightness under the selected photometry mode.
    pub value: f64,
    /// Highest pixel value of the source, sky subtracted.
    pub peak: f64,
    /// Radius of the circle with the same area as the source's pixel set.
    pub radius: f64,
    pub pixel_count: usize,
    /// Instrumental magnitude, when a zero point is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
}

impl StarImage {
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }

    /// `zero_point - 2.5 log10(value)`, or `None` for non-positive values.
    pub fn magnitude_for(value: f64, zero_point: f64) -> Option<f64> {
        (value > 0.0).then(|| zero_point - 2.5 * value.log10())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_magnitude_scale() {
        assert_relative_eq!(StarImage::magnitude_for(100.0, 20.0).unwrap(), 15.0);
        assert_eq!(StarImage::magnitude_for(0.0, 20.0), None);
    }
}
