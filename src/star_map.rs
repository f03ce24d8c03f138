use std::collections::HashMap;

/// Spatial hash over entry positions, keyed by grid cell.
///
/// Holds entry indices only. It reflects the positions passed to [`StarMap::rebuild`]
/// and must be rebuilt after entries move, are added or are removed.
#[derive(Debug, Clone)]
pub struct StarMap {
    cell_size: f64,
    cells: HashMap<(i32, i32), Vec<usize>>,
    positions: Vec<(f64, f64)>,
}

impl Default for StarMap {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CELL_SIZE)
    }
}

impl StarMap {
    pub const DEFAULT_CELL_SIZE: f64 = 16.0;

    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { Self::DEFAULT_CELL_SIZE },
            cells: HashMap::new(),
            positions: Vec::new(),
        }
    }

    fn cell_of(&self, x: f64, y: f64) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }

    /// Replace the indexed positions; entry `i` is at `positions[i]`.
    pub fn rebuild(&mut self, positions: impl IntoIterator<Item = (f64, f64)>) {
        self.cells.clear();
        self.positions = positions.into_iter().collect();
        for (i, &(x, y)) in self.positions.iter().enumerate() {
            let cell = self.cell_of(x, y);
            self.cells.entry(cell).or_default().push(i);
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Entries within `radius` of `(x, y)`, nearest first.
    pub fn within(&self, x: f64, y: f64, radius: f64) -> Vec<(usize, f64)> {
        if radius < 0.0 || self.positions.is_empty() {
            return Vec::new();
        }
        let (cx0, cy0) = self.cell_of(x - radius, y - radius);
        let (cx1, cy1) = self.cell_of(x + radius, y + radius);

        let mut found = Vec::new();
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                let Some(members) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for &i in members {
                    let (px, py) = self.positions[i];
                    let distance = ((px - x).powi(2) + (py - y).powi(2)).sqrt();
                    if distance <= radius {
                        found.push((i, distance));
                    }
                }
            }
        }
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        found
    }
}
