//! Pixel clusters ("adjoining pixels") and their deblending into point sources.
//!
//! Clusters are found by a stack-based 4-neighbor flood fill over the pixels above a
//! threshold. The fill overwrites every pixel it takes with `threshold - 1`, so a pixel
//! is visited at most once and no two clusters share a pixel. The image is consumed in
//! the process; clone it first if the original values are still needed.

use std::cmp::Ordering;
use std::f64::consts::PI;

use crate::image::MonoImage;
use crate::star_image::StarImage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
    pub value: f64,
}

impl Pixel {
    fn raster_cmp(&self, other: &Pixel) -> Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }

    fn distance_sq(&self, other: &Pixel) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        dx * dx + dy * dy
    }
}

/// A maximal 4-connected set of pixels above the detection threshold.
#[derive(Debug, Clone)]
pub struct AdjoiningPixel {
    pixels: Vec<Pixel>,
    peak: Pixel,
    threshold: f64,
}

impl AdjoiningPixel {
    fn from_pixels(pixels: Vec<Pixel>, threshold: f64) -> Option<Self> {
        let peak = *pixels.iter().min_by(|a, b| {
            b.value
                .total_cmp(&a.value)
                .then_with(|| a.raster_cmp(b))
        })?;
        Some(Self {
            pixels,
            peak,
            threshold,
        })
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn peak(&self) -> Pixel {
        self.peak
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.pixels.iter().any(|p| p.x == x && p.y == y)
    }

    /// Sum of `value - threshold` over all pixels.
    pub fn amount_over_threshold(&self) -> f64 {
        self.pixels.iter().map(|p| p.value - self.threshold).sum()
    }

    /// Centroid weighted by the flux above threshold.
    pub fn centroid(&self) -> (f64, f64) {
        let mut weight = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for p in &self.pixels {
            let w = (p.value - self.threshold).max(0.0);
            weight += w;
            sx += p.x as f64 * w;
            sy += p.y as f64 * w;
        }
        if weight > 0.0 {
            (sx / weight, sy / weight)
        } else {
            let n = self.pixels.len().max(1) as f64;
            (
                self.pixels.iter().map(|p| p.x as f64).sum::<f64>() / n,
                self.pixels.iter().map(|p| p.y as f64).sum::<f64>() / n,
            )
        }
    }

    /// Radius of the circle with the same area as the cluster.
    pub fn radius(&self) -> f64 {
        (self.pixels.len() as f64 / PI).sqrt()
    }

    /// Point source measured with the pixel-amount-over-threshold brightness.
    pub fn star_image(&self) -> StarImage {
        let (x, y) = self.centroid();
        StarImage {
            x,
            y,
            value: self.amount_over_threshold(),
            peak: self.peak.value,
            radius: self.radius(),
            pixel_count: self.pixels.len(),
            magnitude: None,
        }
    }

    /// Split the cluster into one sub-cluster per resolved point source.
    ///
    /// Local maxima above `minimum_peak` are taken brightest first. A maximum is kept
    /// as a separate source only when it lies farther than `separation` from every
    /// source already kept and the values along the straight line to the nearest of
    /// them dip more than `minimum_dip` below it. Every pixel is then given to the
    /// nearest kept source.
    pub fn deblend(
        self,
        separation: f64,
        minimum_peak: f64,
        minimum_dip: f64,
    ) -> Vec<AdjoiningPixel> {
        if self.pixels.len() < 5 {
            return vec![self];
        }

        let grid = ClusterGrid::new(&self.pixels);
        let mut maxima: Vec<Pixel> = self
            .pixels
            .iter()
            .filter(|p| p.value > minimum_peak && grid.is_local_maximum(p))
            .copied()
            .collect();
        maxima.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.raster_cmp(b)));

        let separation_sq = separation * separation;
        let mut sources: Vec<Pixel> = Vec::new();
        for candidate in maxima {
            let nearest = sources
                .iter()
                .min_by(|a, b| a.distance_sq(&candidate).total_cmp(&b.distance_sq(&candidate)));
            match nearest {
                None => sources.push(candidate),
                Some(nearest) => {
                    if nearest.distance_sq(&candidate) <= separation_sq {
                        continue;
                    }
                    let saddle = grid.minimum_along(&candidate, nearest, self.threshold);
                    if candidate.value - saddle > minimum_dip {
                        sources.push(candidate);
                    }
                }
            }
        }

        if sources.len() <= 1 {
            return vec![self];
        }

        tracing::trace!(
            "Deblending cluster at ({}, {}) into {} sources",
            self.peak.x,
            self.peak.y,
            sources.len()
        );

        let mut groups: Vec<Vec<Pixel>> = vec![Vec::new(); sources.len()];
        for p in self.pixels {
            // Ties go to the brighter source, which comes first.
            let owner = sources
                .iter()
                .enumerate()
                .min_by(|(ia, a), (ib, b)| {
                    a.distance_sq(&p)
                        .total_cmp(&b.distance_sq(&p))
                        .then_with(|| ia.cmp(ib))
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            groups[owner].push(p);
        }

        groups
            .into_iter()
            .filter_map(|g| AdjoiningPixel::from_pixels(g, self.threshold))
            .collect()
    }
}

/// Dense lookup over a cluster's bounding box.
struct ClusterGrid {
    x0: i32,
    y0: i32,
    width: i32,
    height: i32,
    cells: Vec<Option<f64>>,
}

impl ClusterGrid {
    fn new(pixels: &[Pixel]) -> Self {
        let x0 = pixels.iter().map(|p| p.x).min().unwrap_or(0);
        let y0 = pixels.iter().map(|p| p.y).min().unwrap_or(0);
        let x1 = pixels.iter().map(|p| p.x).max().unwrap_or(0);
        let y1 = pixels.iter().map(|p| p.y).max().unwrap_or(0);
        let width = x1 - x0 + 1;
        let height = y1 - y0 + 1;
        let mut cells = vec![None; (width * height) as usize];
        for p in pixels {
            cells[((p.y - y0) * width + (p.x - x0)) as usize] = Some(p.value);
        }
        Self {
            x0,
            y0,
            width,
            height,
            cells,
        }
    }

    fn value(&self, x: i32, y: i32) -> Option<f64> {
        let lx = x - self.x0;
        let ly = y - self.y0;
        if lx < 0 || ly < 0 || lx >= self.width || ly >= self.height {
            return None;
        }
        self.cells[(ly * self.width + lx) as usize]
    }

    /// Strictly brighter than every 8-neighbor, or equal only to neighbors later in
    /// raster order, so a flat top yields a single maximum.
    fn is_local_maximum(&self, p: &Pixel) -> bool {
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if let Some(v) = self.value(p.x + dx, p.y + dy) {
                    let later = dy > 0 || (dy == 0 && dx > 0);
                    if v > p.value || (v == p.value && !later) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Lowest value sampled along the segment; pixels outside the cluster count as
    /// `floor`.
    fn minimum_along(&self, from: &Pixel, to: &Pixel, floor: f64) -> f64 {
        let steps = (to.x - from.x).abs().max((to.y - from.y).abs()).max(1);
        (0..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                let x = (from.x as f64 + (to.x - from.x) as f64 * t).round() as i32;
                let y = (from.y as f64 + (to.y - from.y) as f64 * t).round() as i32;
                self.value(x, y).unwrap_or(floor)
            })
            .fold(f64::INFINITY, f64::min)
    }
}

/// Flood-fill the image into adjoining-pixel clusters.
///
/// Every pixel above `threshold` ends up in exactly one cluster and is overwritten
/// with `threshold - 1`. Clusters whose peak does not exceed `minimum_peak` are
/// dropped.
pub fn detect_adjoining_pixels(
    image: &mut MonoImage,
    threshold: f64,
    minimum_peak: f64,
) -> Vec<AdjoiningPixel> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let cleared = threshold - 1.0;

    let mut clusters = Vec::new();
    let mut stack: Vec<(i32, i32)> = Vec::new();

    for y in 0..height {
        for x in 0..width {
            match image.get(x, y) {
                Some(v) if v > threshold => {}
                _ => continue,
            }

            let mut pixels = Vec::new();
            stack.push((x, y));
            while let Some((px, py)) = stack.pop() {
                let value = match image.get(px, py) {
                    Some(v) if v > threshold => v,
                    _ => continue,
                };
                pixels.push(Pixel {
                    x: px,
                    y: py,
                    value,
                });
                image.set(px, py, cleared);

                if px > 0 {
                    stack.push((px - 1, py));
                }
                if px + 1 < width {
                    stack.push((px + 1, py));
                }
                if py > 0 {
                    stack.push((px, py - 1));
                }
                if py + 1 < height {
                    stack.push((px, py + 1));
                }
            }

            if let Some(cluster) = AdjoiningPixel::from_pixels(pixels, threshold) {
                if cluster.peak.value > minimum_peak {
                    clusters.push(cluster);
                }
            }
        }
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashSet;

    fn plus_image() -> MonoImage {
        let mut image = MonoImage::new(20, 20);
        for (dx, dy) in [(0, 0), (1, 0), (-1, 0), (0, 1), (0, -1)] {
            image.set(10 + dx, 10 + dy, 10.0);
        }
        image
    }

    #[test]
    fn test_plus_shaped_cluster() {
        let mut image = plus_image();
        let clusters = detect_adjoining_pixels(&mut image, 5.0, 8.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].peak().value, 10.0);
        assert_eq!(clusters[0].len(), 5);

        let star = clusters[0].star_image();
        assert_relative_eq!(star.value, 25.0);
        assert_relative_eq!(star.x, 10.0);
        assert_relative_eq!(star.y, 10.0);
    }

    #[test]
    fn test_minimum_peak_filters_cluster() {
        let mut image = plus_image();
        assert!(detect_adjoining_pixels(&mut image, 5.0, 10.0).is_empty());
    }

    #[test]
    fn test_image_is_consumed() {
        let mut image = plus_image();
        detect_adjoining_pixels(&mut image, 5.0, 8.0);
        assert!(image.data().iter().all(|&v| v <= 5.0));
        assert_eq!(image.get(10, 10), Some(4.0));
    }

    #[test]
    fn test_diagonal_pixels_are_separate_clusters() {
        let mut image = MonoImage::new(5, 5);
        image.set(1, 1, 9.0);
        image.set(2, 2, 9.0);
        let clusters = detect_adjoining_pixels(&mut image, 5.0, 8.0);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_closed_loop_single_pass() {
        // A ring of bright pixels around a dark hole; each pixel must be taken once.
        let mut image = MonoImage::new(12, 12);
        for i in 2..=9 {
            image.set(i, 2, 20.0);
            image.set(i, 9, 20.0);
            image.set(2, i, 20.0);
            image.set(9, i, 20.0);
        }
        let clusters = detect_adjoining_pixels(&mut image, 5.0, 8.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 28);
        let unique: HashSet<(i32, i32)> = clusters[0].pixels().iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(unique.len(), 28);
    }

    #[test]
    fn test_union_of_clusters_is_pixels_above_threshold() {
        let values = [
            0.0, 7.0, 7.0, 0.0, 0.0, 6.0, //
            0.0, 0.0, 7.0, 0.0, 0.0, 6.0, //
            9.0, 0.0, 0.0, 0.0, 9.0, 6.0, //
            9.0, 9.0, 0.0, 3.0, 0.0, 0.0, //
        ];
        let original = MonoImage::from_vec(6, 4, values.to_vec()).unwrap();
        let mut image = original.clone();
        let clusters = detect_adjoining_pixels(&mut image, 5.0, 5.0);

        let mut seen = HashSet::new();
        for c in &clusters {
            for p in c.pixels() {
                assert!(seen.insert((p.x, p.y)), "pixel ({}, {}) in two clusters", p.x, p.y);
            }
        }
        let expected: HashSet<(i32, i32)> = original
            .pixels()
            .filter(|(_, _, v)| *v > 5.0)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(clusters.len(), 3);
    }

    fn two_star_cluster(gap_value: f64) -> AdjoiningPixel {
        // Two peaks of 100 at x=3 and x=11 joined by a bridge.
        let mut pixels = Vec::new();
        for x in 0..15 {
            for y in 0..3 {
                let d1 = (x as f64 - 3.0).abs();
                let d2 = (x as f64 - 11.0).abs();
                let bump = (100.0 - 20.0 * d1).max(100.0 - 20.0 * d2);
                let value = bump.max(gap_value) - if y == 1 { 0.0 } else { 5.0 };
                pixels.push(Pixel { x, y, value });
            }
        }
        AdjoiningPixel::from_pixels(pixels, 10.0).unwrap()
    }

    #[test]
    fn test_deblend_splits_two_peaks() {
        let cluster = two_star_cluster(15.0);
        let parts = cluster.deblend(2.0, 20.0, 10.0);
        assert_eq!(parts.len(), 2);
        let mut xs: Vec<f64> = parts.iter().map(|p| p.centroid().0).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        assert!((xs[0] - 3.0).abs() < 1.0);
        assert!((xs[1] - 11.0).abs() < 1.0);
        assert_eq!(parts.iter().map(|p| p.len()).sum::<usize>(), 45);
    }

    #[test]
    fn test_deblend_keeps_close_peaks_together() {
        let cluster = two_star_cluster(15.0);
        let parts = cluster.deblend(10.0, 20.0, 10.0);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_deblend_requires_a_dip() {
        // The bridge is as bright as the peaks: no saddle, one source.
        let cluster = two_star_cluster(95.0);
        let parts = cluster.deblend(2.0, 20.0, 10.0);
        assert_eq!(parts.len(), 1);
    }
}
