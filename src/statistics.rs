use bumpalo::Bump;
use serde::Serialize;

use crate::image::MonoImage;

/// Summary statistics of an image or image region.
#[derive(Debug, Clone, Serialize)]
pub struct ImageStatistics {
    pub width: usize,
    pub height: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl ImageStatistics {
    pub fn of(image: &MonoImage) -> Self {
        let data = image.data();
        if data.is_empty() {
            return Self {
                width: image.width(),
                height: image.height(),
                mean: 0.0,
                median: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }

        let arena = Bump::new();
        let mut sorted = bumpalo::vec![in &arena];
        sorted.extend_from_slice(data);
        sorted.sort_unstable_by(|a: &f64, b: &f64| a.total_cmp(b));

        let mean = data.iter().sum::<f64>() / data.len() as f64;
        let std_dev = if data.len() > 1 {
            (data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (data.len() - 1) as f64).sqrt()
        } else {
            0.0
        };

        Self {
            width: image.width(),
            height: image.height(),
            mean,
            median: median_of_sorted(&sorted),
            std_dev,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median of the values, using `arena` for the scratch copy.
pub fn median_in(arena: &Bump, values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut scratch = bumpalo::collections::Vec::new_in(arena);
    scratch.extend(values.into_iter().filter(|v| v.is_finite()));
    if scratch.is_empty() {
        return None;
    }
    scratch.sort_unstable_by(|a: &f64, b: &f64| a.total_cmp(b));
    Some(median_of_sorted(&scratch))
}

/// Noise deviation measured from the negative side of a sky-subtracted image.
///
/// Only pixels below zero are used: they cannot contain star flux, so their spread
/// around zero (the sky level) is pure noise. Returns 0 when no pixel is negative.
pub fn negative_deviation(values: &[f64]) -> f64 {
    let (sum_sq, count) = values
        .iter()
        .filter(|v| **v < 0.0)
        .fold((0.0, 0usize), |(s, n), v| (s + v * v, n + 1));
    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt()
    }
}

/// Centered moving average; windows are truncated at both ends of the sequence.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if values.is_empty() || window <= 1 {
        return values.to_vec();
    }
    let half_before = (window - 1) / 2;
    let half_after = window - 1 - half_before;

    // Prefix sums keep this linear in the sequence length.
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    for v in values {
        prefix.push(prefix[prefix.len() - 1] + v);
    }

    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half_before);
            let end = (i + half_after + 1).min(values.len());
            (prefix[end] - prefix[start]) / (end - start) as f64
        })
        .collect()
}
