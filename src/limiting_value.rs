//! Detection completeness limit from the pairing ratio of a brightness-ordered list.

use bumpalo::Bump;
use serde::{Deserialize, Serialize};

use crate::star_image::StarImage;
use crate::star_pair::StarPair;
use crate::statistics::{median_in, moving_average};

/// Which brightness scale the limiting value is reported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitingMode {
    /// Magnitude of the detection, on a single scale for every counted star.
    #[default]
    Magnitude,
    /// Raw brightness value of the detection.
    Value,
}

impl std::str::FromStr for LimitingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "magnitude" | "mag" => Ok(LimitingMode::Magnitude),
            "value" => Ok(LimitingMode::Value),
            _ => Err(format!("Unknown limiting mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitingValueParams {
    /// Moving-average window; also the minimum list length for the smoothed search.
    pub average_window_size: usize,
    /// Number of moving-average passes over the pairing flags.
    pub smoothing_passes: usize,
    /// The search window ends where the ratio drops below this fraction of its peak.
    pub limiting_ratio: f64,
    /// Target completeness.
    pub threshold_ratio: f64,
    /// Smallest prefix considered by the direct search.
    pub minimum_window_size: usize,
    /// Zero point converting detection values to magnitudes. When unset, the
    /// detections' own magnitudes are used, or a zero point is fitted to the
    /// catalog magnitudes of the paired stars.
    pub magnitude_zero_point: Option<f64>,
}

impl Default for LimitingValueParams {
    fn default() -> Self {
        Self {
            average_window_size: 19,
            smoothing_passes: 2,
            limiting_ratio: 0.5,
            threshold_ratio: 0.7,
            minimum_window_size: 5,
            magnitude_zero_point: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimitingValue {
    /// Index into the counted stars (out-of-area and undetected pairs excluded).
    pub index: usize,
    /// Brightness at `index`; `None` for an empty list, or in magnitude mode when no
    /// magnitude scale can be established.
    pub value: Option<f64>,
    /// Fraction of counted stars up to and including `index` that are paired.
    pub ratio: f64,
    /// Number of counted stars.
    pub counted: usize,
}

pub struct LimitingValueEstimator {
    params: LimitingValueParams,
    mode: LimitingMode,
}

impl LimitingValueEstimator {
    pub fn new(params: LimitingValueParams, mode: LimitingMode) -> Self {
        Self { params, mode }
    }

    /// Estimate the limit over `pairs`, which must be in detection order.
    pub fn run(&self, pairs: &[StarPair]) -> LimitingValue {
        let counted: Vec<&StarPair> = pairs
            .iter()
            .filter(|p| !p.out_of_area && p.first.is_some())
            .collect();
        if counted.is_empty() {
            return LimitingValue {
                index: 0,
                value: None,
                ratio: 0.0,
                counted: 0,
            };
        }

        let paired: Vec<f64> = counted
            .iter()
            .map(|p| if p.is_paired() { 1.0 } else { 0.0 })
            .collect();

        let index = self.limiting_index(&paired).min(paired.len() - 1);
        let ratio = paired[..=index].iter().sum::<f64>() / (index + 1) as f64;
        tracing::debug!(
            "Limiting index {} of {} counted stars, ratio {:.3}",
            index,
            paired.len(),
            ratio
        );
        LimitingValue {
            index,
            value: self.values(&counted).and_then(|values| values[index]),
            ratio,
            counted: paired.len(),
        }
    }

    /// Brightness of every counted star on the selected scale, or `None` when no
    /// magnitude scale covers them all.
    fn values(&self, counted: &[&StarPair]) -> Option<Vec<Option<f64>>> {
        let detections = counted.iter().filter_map(|p| p.first.as_ref());
        if self.mode == LimitingMode::Value {
            return Some(detections.map(|s| Some(s.value)).collect());
        }

        let all_measured = counted
            .iter()
            .all(|p| p.first.as_ref().is_some_and(|s| s.magnitude.is_some()));
        let zero_point = match self.params.magnitude_zero_point {
            Some(zero_point) => zero_point,
            None if all_measured => return Some(detections.map(|s| s.magnitude).collect()),
            None => {
                let fitted = fit_zero_point(counted);
                match fitted {
                    Some(zero_point) => {
                        tracing::debug!("Fitted magnitude zero point {:.3}", zero_point)
                    }
                    None => tracing::warn!(
                        "No magnitude scale: no zero point and no paired catalog magnitudes"
                    ),
                }
                fitted?
            }
        };
        Some(
            detections
                .map(|s| StarImage::magnitude_for(s.value, zero_point))
                .collect(),
        )
    }

    fn limiting_index(&self, paired: &[f64]) -> usize {
        let params = &self.params;
        let mut index = 0;

        if paired.len() >= params.average_window_size {
            let mut ratio = paired.to_vec();
            for _ in 0..params.smoothing_passes {
                ratio = moving_average(&ratio, params.average_window_size);
            }
            index = self.smoothed_crossing(&ratio);
        }

        if index < params.average_window_size {
            index = self.direct_search(paired);
        }
        index
    }

    /// Crossing of the threshold ratio on the smoothed curve, searched between its
    /// peak and the point where it falls below `limiting_ratio` of the peak.
    fn smoothed_crossing(&self, ratio: &[f64]) -> usize {
        let params = &self.params;
        let peak = ratio
            .iter()
            .enumerate()
            .fold(0, |best, (i, &r)| if r > ratio[best] { i } else { best });
        let floor = ratio[peak] * params.limiting_ratio;
        let end = ratio[peak..]
            .iter()
            .position(|&r| r < floor)
            .map_or(ratio.len(), |offset| peak + offset + 1);
        let window = &ratio[peak..end];

        let threshold = params.threshold_ratio;
        let crossings: Vec<f64> = window
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] >= threshold && w[1] < threshold)
            .map(|(i, w)| i as f64 + (w[0] - threshold) / (w[0] - w[1]))
            .collect();

        if !crossings.is_empty() {
            let mean = crossings.iter().sum::<f64>() / crossings.len() as f64;
            return peak + mean.round() as usize;
        }
        if window[0] > threshold {
            peak + window.len() - 1
        } else {
            params.average_window_size.saturating_sub(1)
        }
    }

    /// Largest prefix whose raw pairing ratio still meets the threshold.
    fn direct_search(&self, paired: &[f64]) -> usize {
        let params = &self.params;
        let minimum = params.minimum_window_size.max(1);
        let mut best = None;
        let mut sum: f64 = paired.iter().take(minimum - 1).sum();
        for size in minimum..=paired.len() {
            sum += paired[size - 1];
            if sum / size as f64 >= params.threshold_ratio {
                best = Some(size);
            }
        }
        best.unwrap_or(minimum) - 1
    }
}

/// Median of `catalog magnitude + 2.5 log10(value)` over the paired stars.
fn fit_zero_point(counted: &[&StarPair]) -> Option<f64> {
    let arena = Bump::new();
    median_in(
        &arena,
        counted.iter().filter_map(|p| {
            let value = p.first.as_ref()?.value;
            let magnitude = p.second.as_ref()?.magnitude?;
            (value > 0.0).then(|| magnitude + 2.5 * value.log10())
        }),
    )
}
