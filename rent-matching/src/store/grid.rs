use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::geo::{BoundingBox, Coordinate};

type Cell = (i32, i32);

/// Uniform lat/lon bucket grid.
///
/// Answers "which ids might lie inside this box" so that exact distance checks
/// only run against nearby entries. A query that cannot be boxed (poles,
/// antimeridian) or that would visit more cells than are populated falls back
/// to walking the populated cells directly.
#[derive(Debug)]
pub struct GridIndex {
    cell_deg: f64,
    cells: HashMap<Cell, HashSet<Uuid>>,
    positions: HashMap<Uuid, (Cell, Coordinate)>,
}

impl GridIndex {
    pub fn new(cell_deg: f64) -> Self {
        let cell_deg = if cell_deg.is_finite() && cell_deg > 0.0 { cell_deg } else { 0.1 };
        Self {
            cell_deg,
            cells: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    fn cell_of(&self, point: &Coordinate) -> Cell {
        (
            (point.lat / self.cell_deg).floor() as i32,
            (point.lon / self.cell_deg).floor() as i32,
        )
    }

    /// Insert or move `id` to `point`.
    pub fn insert(&mut self, id: Uuid, point: Coordinate) {
        self.remove(id);
        let cell = self.cell_of(&point);
        self.cells.entry(cell).or_default().insert(id);
        self.positions.insert(id, (cell, point));
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some((cell, _)) = self.positions.remove(&id) else {
            return false;
        };
        if let Some(bucket) = self.cells.get_mut(&cell) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.cells.remove(&cell);
            }
        }
        true
    }

    pub fn position(&self, id: Uuid) -> Option<Coordinate> {
        self.positions.get(&id).map(|(_, point)| *point)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Entries whose position lies inside `bbox`; every entry when `bbox` is `None`.
    pub fn within(&self, bbox: Option<&BoundingBox>) -> Vec<(Uuid, Coordinate)> {
        let Some(bbox) = bbox else {
            return self.positions.iter().map(|(id, (_, p))| (*id, *p)).collect();
        };

        let lo = self.cell_of(&Coordinate { lat: bbox.min_lat, lon: bbox.min_lon });
        let hi = self.cell_of(&Coordinate { lat: bbox.max_lat, lon: bbox.max_lon });
        let span = (i64::from(hi.0 - lo.0) + 1) * (i64::from(hi.1 - lo.1) + 1);

        let in_range = |cell: &Cell| (lo.0..=hi.0).contains(&cell.0) && (lo.1..=hi.1).contains(&cell.1);
        let mut out = Vec::new();
        let mut collect = |bucket: &HashSet<Uuid>| {
            for id in bucket {
                if let Some((_, point)) = self.positions.get(id) {
                    if bbox.contains(point) {
                        out.push((*id, *point));
                    }
                }
            }
        };

        if span > self.cells.len() as i64 {
            for (cell, bucket) in &self.cells {
                if in_range(cell) {
                    collect(bucket);
                }
            }
        } else {
            for lat in lo.0..=hi.0 {
                for lon in lo.1..=hi.1 {
                    if let Some(bucket) = self.cells.get(&(lat, lon)) {
                        collect(bucket);
                    }
                }
            }
        }
        out
    }
}
