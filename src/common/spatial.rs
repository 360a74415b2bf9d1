//! Grid-bucketed spatial index over axis-aligned bounding boxes.
//!
//! Every item is registered in each grid cell its bounding box touches, so a region query only
//! looks at the handful of cells under the region instead of the whole item set.

use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    hash::Hash,
};

use crate::{
    FlowlinesError, Result,
    model::{Point, Rect},
};

/// Default grid cell size in world units.
pub const DEFAULT_CELL_SIZE: f64 = 100.0;

/// Items covering more cells than this stay out of the grid and are checked on every query.
const MAX_CELLS_PER_ITEM: f64 = 1024.0;

type CellKey = (i64, i64);

/// Inclusive range of grid cells.
#[derive(Debug, Clone, Copy)]
struct CellRange {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl CellRange {
    fn keys(self) -> impl Iterator<Item = CellKey> {
        (self.x0..=self.x1).flat_map(move |gx| (self.y0..=self.y1).map(move |gy| (gx, gy)))
    }
}

/// Counters describing the shape of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpatialStats {
    pub items: usize,
    pub cells: usize,
    /// Largest number of items sharing one cell.
    pub max_cell_load: usize,
    /// Items too large for the grid.
    pub oversized: usize,
    pub queries: u64,
}

#[derive(Debug, Clone)]
pub struct SpatialIndex<K> {
    cell_size: f64,
    cells: HashMap<CellKey, HashSet<K>>,
    items: HashMap<K, Rect>,
    oversized: HashSet<K>,
    queries: Cell<u64>,
}

impl<K> Default for SpatialIndex<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl<K> SpatialIndex<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 { cell_size } else { DEFAULT_CELL_SIZE };
        Self {
            cell_size,
            cells: HashMap::new(),
            items: HashMap::new(),
            oversized: HashSet::new(),
            queries: Cell::new(0),
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(
        &self,
        key: &K,
    ) -> bool {
        self.items.contains_key(key)
    }

    pub fn bounds(
        &self,
        key: &K,
    ) -> Option<Rect> {
        self.items.get(key).copied()
    }

    /// Insert or move an item. Re-inserting an existing key replaces its bounds.
    ///
    /// Bounds with a non-finite coordinate or a negative extent are refused and leave the index
    /// unchanged.
    pub fn insert(
        &mut self,
        key: K,
        bounds: Rect,
    ) -> Result<()> {
        let finite = [bounds.x, bounds.y, bounds.width, bounds.height, bounds.right(), bounds.bottom()].iter().all(|v| v.is_finite());
        if !finite || bounds.width < 0.0 || bounds.height < 0.0 {
            return Err(FlowlinesError::InvalidGeometry(format!("{:?}", bounds)));
        }
        if let Some(old) = self.items.get(&key).copied() {
            if old == bounds {
                return Ok(());
            }
            self.unlink(&key, &old);
        }
        match self.cell_range(&bounds, MAX_CELLS_PER_ITEM) {
            Some(range) => {
                for cell in range.keys() {
                    self.cells.entry(cell).or_default().insert(key.clone());
                }
            }
            None => {
                self.oversized.insert(key.clone());
            }
        }
        self.items.insert(key, bounds);
        Ok(())
    }

    /// Insert a point-sized item.
    pub fn insert_point(
        &mut self,
        key: K,
        p: Point,
    ) -> Result<()> {
        self.insert(key, Rect::from_point(p))
    }

    pub fn remove(
        &mut self,
        key: &K,
    ) -> Option<Rect> {
        let bounds = self.items.remove(key)?;
        self.unlink(key, &bounds);
        Some(bounds)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.items.clear();
        self.oversized.clear();
    }

    /// Items whose bounds overlap `region`.
    pub fn query(
        &self,
        region: &Rect,
    ) -> Vec<K> {
        self.queries.set(self.queries.get() + 1);
        // a region covering more cells than there are items is cheaper to answer by a scan
        let Some(range) = self.cell_range(region, self.items.len() as f64) else {
            return self.items.iter().filter(|(_, b)| b.intersects(region)).map(|(k, _)| k.clone()).collect();
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for cell in range.keys() {
            let Some(bucket) = self.cells.get(&cell) else {
                continue;
            };
            for key in bucket {
                if !seen.insert(key.clone()) {
                    continue;
                }
                if self.items.get(key).is_some_and(|b| b.intersects(region)) {
                    out.push(key.clone());
                }
            }
        }
        for key in &self.oversized {
            if self.items.get(key).is_some_and(|b| b.intersects(region)) {
                out.push(key.clone());
            }
        }
        out
    }

    /// Items whose bounds lie within `radius` of `center`, nearest first.
    pub fn query_radius(
        &self,
        center: Point,
        radius: f64,
    ) -> Vec<(K, f64)> {
        let region = Rect::around(center, radius);
        let mut hits: Vec<(K, f64)> = self
            .query(&region)
            .into_iter()
            .filter_map(|key| {
                let d = self.items.get(&key)?.distance_to(&center);
                (d <= radius).then_some((key, d))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    pub fn stats(&self) -> SpatialStats {
        SpatialStats {
            items: self.items.len(),
            cells: self.cells.len(),
            max_cell_load: self.cells.values().map(|c| c.len()).max().unwrap_or(0),
            oversized: self.oversized.len(),
            queries: self.queries.get(),
        }
    }

    fn unlink(
        &mut self,
        key: &K,
        bounds: &Rect,
    ) {
        if self.oversized.remove(key) {
            return;
        }
        let Some(range) = self.cell_range(bounds, MAX_CELLS_PER_ITEM) else {
            return;
        };
        for cell in range.keys() {
            if let Some(bucket) = self.cells.get_mut(&cell) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.cells.remove(&cell);
                }
            }
        }
    }

    /// Cells covered by `bounds`, or `None` when that is more than `limit` cells or the bounds
    /// are not finite. The span is measured in floating point so far-away coordinates cannot
    /// overflow.
    fn cell_range(
        &self,
        bounds: &Rect,
        limit: f64,
    ) -> Option<CellRange> {
        let x0 = (bounds.x / self.cell_size).floor();
        let y0 = (bounds.y / self.cell_size).floor();
        let x1 = (bounds.right() / self.cell_size).floor();
        let y1 = (bounds.bottom() / self.cell_size).floor();
        let span = (x1 - x0 + 1.0).max(0.0) * (y1 - y0 + 1.0).max(0.0);
        if !span.is_finite() || span > limit {
            return None;
        }
        Some(CellRange {
            x0: x0 as i64,
            y0: y0 as i64,
            x1: x1 as i64,
            y1: y1 as i64,
        })
    }
}
