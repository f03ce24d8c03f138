//! Blooming cancellation.
//!
//! Saturated stars spill charge along CCD columns, which drags the centroid of the
//! detected cluster away from the star. A [`BloomingCanceller`] inspects a scratch
//! copy of the frame and reports where the stars behind the blooms really are.

use serde::{Deserialize, Serialize};

use crate::image::MonoImage;

pub trait BloomingCanceller {
    /// Corrected star positions, one per bloom found. The image is a scratch copy and
    /// may be modified freely.
    fn corrected_positions(&self, image: &mut MonoImage) -> Vec<(f64, f64)>;
}

/// Detects vertical runs of saturated pixels and merges runs in adjacent columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationBloomingCanceller {
    /// Pixel values at or above this level count as saturated.
    pub saturation: f64,
    /// Shortest vertical run treated as blooming.
    pub min_run: usize,
}

impl Default for SaturationBloomingCanceller {
    fn default() -> Self {
        Self {
            saturation: 65000.0,
            min_run: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    x: usize,
    y0: usize,
    y1: usize, // inclusive
}

#[derive(Debug, Default)]
struct Bloom {
    runs: Vec<Run>,
}

impl Bloom {
    fn last_x(&self) -> Option<usize> {
        self.runs.last().map(|r| r.x)
    }

    fn touches(&self, run: &Run) -> bool {
        self.runs
            .iter()
            .rev()
            .take_while(|r| r.x + 1 == run.x)
            .any(|r| r.y0 <= run.y1 && run.y0 <= r.y1)
    }

    fn position(&self) -> (f64, f64) {
        let mut weight = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for r in &self.runs {
            let len = (r.y1 - r.y0 + 1) as f64;
            weight += len;
            sx += r.x as f64 * len;
            sy += (r.y0 + r.y1) as f64 / 2.0 * len;
        }
        (sx / weight, sy / weight)
    }
}

impl SaturationBloomingCanceller {
    fn column_runs(&self, image: &MonoImage) -> Vec<Run> {
        let mut runs = Vec::new();
        for x in 0..image.width() {
            let mut start: Option<usize> = None;
            for y in 0..=image.height() {
                let saturated = y < image.height()
                    && image
                        .get(x as i32, y as i32)
                        .is_some_and(|v| v >= self.saturation);
                match (saturated, start) {
                    (true, None) => start = Some(y),
                    (false, Some(y0)) => {
                        if y - y0 >= self.min_run {
                            runs.push(Run { x, y0, y1: y - 1 });
                        }
                        start = None;
                    }
                    _ => {}
                }
            }
        }
        runs
    }
}

impl BloomingCanceller for SaturationBloomingCanceller {
    fn corrected_positions(&self, image: &mut MonoImage) -> Vec<(f64, f64)> {
        let runs = self.column_runs(image);

        let mut blooms: Vec<Bloom> = Vec::new();
        for run in runs {
            match blooms
                .iter_mut()
                .find(|b| b.last_x() == Some(run.x.wrapping_sub(1)) && b.touches(&run))
            {
                Some(bloom) => bloom.runs.push(run),
                None => blooms.push(Bloom { runs: vec![run] }),
            }
        }

        // Flatten the blooms so later transforms on the scratch copy see no spikes.
        for bloom in &blooms {
            for r in &bloom.runs {
                let above = image.get(r.x as i32, r.y0 as i32 - 1);
                let below = image.get(r.x as i32, r.y1 as i32 + 1);
                let fill = match (above, below) {
                    (Some(a), Some(b)) => (a + b) / 2.0,
                    (Some(v), None) | (None, Some(v)) => v,
                    (None, None) => 0.0,
                };
                for y in r.y0..=r.y1 {
                    image.set(r.x as i32, y as i32, fill);
                }
            }
        }

        let positions: Vec<(f64, f64)> = blooms.iter().map(Bloom::position).collect();
        tracing::debug!("Blooming: {} saturated column groups", positions.len());
        positions
    }
}
