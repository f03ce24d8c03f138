/// Per-cell mean star radius over the field.
///
/// The image is split into cells of roughly `cell_size` pixels on a side. Focus and
/// optical aberrations change the stellar profile across the field, so the deblender
/// asks the cell under each cluster how large an isolated star is there.
#[derive(Debug, Clone)]
pub struct MeanRadiusGrid {
    columns: usize,
    rows: usize,
    cell_width: f64,
    cell_height: f64,
    cells: Vec<RadiusCell>,
    default_radius: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RadiusCell {
    sum: f64,
    count: usize,
}

impl MeanRadiusGrid {
    pub fn new(width: usize, height: usize, cell_size: usize, default_radius: f64) -> Self {
        let cell_size = cell_size.max(1) as f64;
        let columns = ((width as f64 / cell_size).round() as usize).max(1);
        let rows = ((height as f64 / cell_size).round() as usize).max(1);
        Self {
            columns,
            rows,
            cell_width: (width.max(1) as f64) / columns as f64,
            cell_height: (height.max(1) as f64) / rows as f64,
            cells: vec![RadiusCell::default(); columns * rows],
            default_radius,
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.columns, self.rows)
    }

    fn cell_index(&self, x: f64, y: f64) -> usize {
        let cx = ((x / self.cell_width).floor().max(0.0) as usize).min(self.columns - 1);
        let cy = ((y / self.cell_height).floor().max(0.0) as usize).min(self.rows - 1);
        cy * self.columns + cx
    }

    pub fn add(&mut self, x: f64, y: f64, radius: f64) {
        let index = self.cell_index(x, y);
        let cell = &mut self.cells[index];
        cell.sum += radius;
        cell.count += 1;
    }

    /// Mean radius of the cell containing `(x, y)`; falls back to the field-wide mean,
    /// then to the default radius, when the cell has no samples.
    pub fn mean_radius(&self, x: f64, y: f64) -> f64 {
        let cell = self.cells[self.cell_index(x, y)];
        if cell.count > 0 {
            return cell.sum / cell.count as f64;
        }
        self.global_mean().unwrap_or(self.default_radius)
    }

    pub fn global_mean(&self) -> Option<f64> {
        let (sum, count) = self
            .cells
            .iter()
            .fold((0.0, 0usize), |(s, n), c| (s + c.sum, n + c.count));
        (count > 0).then(|| sum / count as f64)
    }

    pub fn sample_count(&self) -> usize {
        self.cells.iter().map(|c| c.count).sum()
    }
}
