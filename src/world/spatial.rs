//! Spatial hash over the x/y plane for containment and proximity queries
//!
//! Elements are bucketed into square columns of `cell_size` world units. Height
//! is filtered per candidate, which keeps flat shapes (circles, rectangles,
//! polygons without a height range) cheap to query. A query touching more
//! cells than there are indexed elements falls back to a linear scan.

use std::collections::HashMap;

use super::element::{ElementId, ElementType};
use super::math::Vector3;

pub const DEFAULT_CELL_SIZE: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CellCoord {
    x: i32,
    y: i32,
}

#[derive(Debug, Clone, Copy)]
struct IndexedElement {
    position: Vector3,
    element_type: ElementType,
}

/// Axis-aligned query region; use infinite bounds for "any height"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vector3,
    pub max: Vector3,
}

impl Bounds {
    pub fn new(min: Vector3, max: Vector3) -> Self {
        Self { min, max }
    }

    pub fn around(center: Vector3, radius: f32) -> Self {
        let extent = Vector3::new(radius, radius, radius);
        Self::new(center - extent, center + extent)
    }

    pub fn contains(&self, point: &Vector3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }
}

pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<CellCoord, Vec<ElementId>>,
    entries: HashMap<ElementId, IndexedElement>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            cells: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    #[inline]
    fn cell_of(&self, x: f32, y: f32) -> CellCoord {
        CellCoord {
            x: Self::axis_cell(x, self.cell_size),
            y: Self::axis_cell(y, self.cell_size),
        }
    }

    #[inline]
    fn axis_cell(value: f32, cell_size: f32) -> i32 {
        // NaN maps to cell 0, saturating casts keep huge values in range
        (value / cell_size).floor() as i32
    }

    /// Insert or move an element
    pub fn upsert(&mut self, id: ElementId, position: Vector3, element_type: ElementType) {
        let new_cell = self.cell_of(position.x, position.y);

        if let Some(previous) = self.entries.get(&id) {
            let old_cell = self.cell_of(previous.position.x, previous.position.y);
            if old_cell != new_cell {
                self.detach_from_cell(old_cell, id);
                self.cells.entry(new_cell).or_default().push(id);
            }
        } else {
            self.cells.entry(new_cell).or_default().push(id);
        }

        self.entries.insert(
            id,
            IndexedElement {
                position,
                element_type,
            },
        );
    }

    pub fn remove(&mut self, id: ElementId) -> bool {
        match self.entries.remove(&id) {
            Some(entry) => {
                let cell = self.cell_of(entry.position.x, entry.position.y);
                self.detach_from_cell(cell, id);
                true
            }
            None => false,
        }
    }

    fn detach_from_cell(&mut self, cell: CellCoord, id: ElementId) {
        if let Some(ids) = self.cells.get_mut(&cell) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    pub fn position(&self, id: ElementId) -> Option<Vector3> {
        self.entries.get(&id).map(|entry| entry.position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visit every indexed element whose column overlaps the x/y range
    fn for_each_candidate<F>(&self, min_x: f32, min_y: f32, max_x: f32, max_y: f32, mut visit: F)
    where
        F: FnMut(ElementId, &IndexedElement),
    {
        let min_cell = self.cell_of(min_x, min_y);
        let max_cell = self.cell_of(max_x, max_y);
        let columns = (max_cell.x as i64 - min_cell.x as i64 + 1).max(0);
        let rows = (max_cell.y as i64 - min_cell.y as i64 + 1).max(0);

        if columns.saturating_mul(rows) > self.entries.len() as i64 {
            for (&id, entry) in &self.entries {
                visit(id, entry);
            }
            return;
        }

        for y in min_cell.y..=max_cell.y {
            for x in min_cell.x..=max_cell.x {
                if let Some(ids) = self.cells.get(&CellCoord { x, y }) {
                    for id in ids {
                        if let Some(entry) = self.entries.get(id) {
                            visit(*id, entry);
                        }
                    }
                }
            }
        }
    }

    pub fn query_box(&self, bounds: &Bounds) -> Vec<ElementId> {
        let mut result = Vec::new();
        self.for_each_candidate(
            bounds.min.x,
            bounds.min.y,
            bounds.max.x,
            bounds.max.y,
            |id, entry| {
                if bounds.contains(&entry.position) {
                    result.push(id);
                }
            },
        );
        result
    }

    pub fn query_sphere(&self, center: &Vector3, radius: f32) -> Vec<ElementId> {
        let radius_squared = radius * radius;
        let mut result = Vec::new();
        self.for_each_candidate(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
            |id, entry| {
                if entry.position.distance_squared_to(center) <= radius_squared {
                    result.push(id);
                }
            },
        );
        result
    }

    /// Nearest element within `max_radius`, optionally restricted to one type
    pub fn nearest(
        &self,
        point: &Vector3,
        max_radius: f32,
        element_type: Option<ElementType>,
    ) -> Option<(ElementId, f32)> {
        let filter = NearestFilter {
            point: *point,
            max_squared: max_radius * max_radius,
            element_type,
        };
        let max_ring = ((max_radius / self.cell_size)
            .ceil()
            .max(0.0)
            .min(i32::MAX as f32) as i64)
            .saturating_add(1);
        let mut best: Option<(ElementId, f32)> = None;

        let side = max_ring.saturating_mul(2).saturating_add(1);
        let ring_cells = side.saturating_mul(side);
        if !max_radius.is_finite() || ring_cells > self.entries.len() as i64 {
            for (&id, entry) in &self.entries {
                filter.consider(&mut best, id, entry);
            }
            return best.map(|(id, d)| (id, d.sqrt()));
        }

        let center = self.cell_of(point.x, point.y);
        for ring in 0..=max_ring {
            for dy in -ring..=ring {
                for dx in -ring..=ring {
                    if dx.abs() != ring && dy.abs() != ring {
                        continue;
                    }
                    let cell = CellCoord {
                        x: (center.x as i64 + dx) as i32,
                        y: (center.y as i64 + dy) as i32,
                    };
                    if let Some(ids) = self.cells.get(&cell) {
                        for id in ids {
                            if let Some(entry) = self.entries.get(id) {
                                filter.consider(&mut best, *id, entry);
                            }
                        }
                    }
                }
            }

            // Anything in an outer ring is at least `ring * cell_size` away
            let reach = ring as f32 * self.cell_size;
            if let Some((_, distance_squared)) = best {
                if distance_squared <= reach * reach {
                    break;
                }
            }
        }

        best.map(|(id, d)| (id, d.sqrt()))
    }
}

struct NearestFilter {
    point: Vector3,
    max_squared: f32,
    element_type: Option<ElementType>,
}

impl NearestFilter {
    fn consider(&self, best: &mut Option<(ElementId, f32)>, id: ElementId, entry: &IndexedElement) {
        if self.element_type.map_or(false, |t| entry.element_type != t) {
            return;
        }
        let distance_squared = entry.position.distance_squared_to(&self.point);
        if distance_squared <= self.max_squared
            && best.map_or(true, |(_, current)| distance_squared < current)
        {
            *best = Some((id, distance_squared));
        }
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}
