//! Labeled raster model: stratum id per cell on a flat row-major arena.
//!
//! Row 0 is the northern edge; `y_max` is the top of the grid and cell
//! centres step south by `cell_y`. Nodata cells hold `None` and are excluded
//! from every count and sample.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};

/// Relative tolerance used when comparing the geometry of co-registered layers.
const GEOMETRY_TOLERANCE: f64 = 1e-9;

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Shape, cell size and origin shared by every co-registered layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub rows: usize,
    pub cols: usize,
    /// Cell width in map units.
    pub cell_x: f64,
    /// Cell height in map units.
    pub cell_y: f64,
    /// West edge of column 0.
    pub x_min: f64,
    /// North edge of row 0.
    pub y_max: f64,
}

impl GridGeometry {
    pub fn new(rows: usize, cols: usize, cell_x: f64, cell_y: f64, x_min: f64, y_max: f64) -> Self {
        Self { rows, cols, cell_x, cell_y, x_min, y_max }
    }

    /// Unit cells with the origin at (0, rows).
    pub fn unit(rows: usize, cols: usize) -> Self {
        Self::new(rows, cols, 1.0, 1.0, 0.0, rows as f64)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn row_col(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }

    /// Map coordinates of the centre of cell `index`.
    pub fn cell_center(&self, index: usize) -> (f64, f64) {
        let (r, c) = self.row_col(index);
        (
            self.x_min + (c as f64 + 0.5) * self.cell_x,
            self.y_max - (r as f64 + 0.5) * self.cell_y,
        )
    }

    /// Cell containing (x, y), or `None` outside the extent.
    /// Points on the east or south boundary belong to the last column/row.
    pub fn locate(&self, x: f64, y: f64) -> Option<usize> {
        if self.is_empty() || !x.is_finite() || !y.is_finite() {
            return None;
        }
        let fc = (x - self.x_min) / self.cell_x;
        let fr = (self.y_max - y) / self.cell_y;
        if fc < 0.0 || fr < 0.0 || fc > self.cols as f64 || fr > self.rows as f64 {
            return None;
        }
        let c = (fc.floor() as usize).min(self.cols - 1);
        let r = (fr.floor() as usize).min(self.rows - 1);
        Some(self.index(r, c))
    }

    fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(ConfigurationError::InvalidGrid(format!(
                "grid must have at least one cell, got {}×{}",
                self.rows, self.cols
            )));
        }
        let finite = [self.cell_x, self.cell_y, self.x_min, self.y_max]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.cell_x <= 0.0 || self.cell_y <= 0.0 {
            return Err(ConfigurationError::InvalidGrid(format!(
                "cell size must be positive and origin finite, got ({}, {}) at ({}, {})",
                self.cell_x, self.cell_y, self.x_min, self.y_max
            )));
        }
        Ok(())
    }

    /// Fails with `GeometryMismatch` unless `other` shares shape, cell size and origin.
    pub fn ensure_matches(&self, other: &GridGeometry, layer: &str) -> Result<()> {
        let mismatch = |detail: String| ConfigurationError::GeometryMismatch {
            layer: layer.to_string(),
            detail,
        };
        if self.rows != other.rows || self.cols != other.cols {
            return Err(mismatch(format!(
                "dimensions {}×{} vs {}×{}",
                other.rows, other.cols, self.rows, self.cols
            )));
        }
        if !close(self.cell_x, other.cell_x) || !close(self.cell_y, other.cell_y) {
            return Err(mismatch(format!(
                "cell size ({}, {}) vs ({}, {})",
                other.cell_x, other.cell_y, self.cell_x, self.cell_y
            )));
        }
        // Origin offsets are compared in cell units so large projected
        // coordinates do not swamp the tolerance.
        let dx = (self.x_min - other.x_min) / self.cell_x;
        let dy = (self.y_max - other.y_max) / self.cell_y;
        if dx.abs() > 1e-6 || dy.abs() > 1e-6 {
            return Err(mismatch(format!(
                "origin ({}, {}) vs ({}, {})",
                other.x_min, other.y_max, self.x_min, self.y_max
            )));
        }
        Ok(())
    }

    fn ensure_len(&self, found: usize, layer: &str) -> Result<()> {
        if found != self.len() {
            return Err(ConfigurationError::DataLength {
                layer: layer.to_string(),
                expected: self.len(),
                found,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= GEOMETRY_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

// ── Stratification grid ───────────────────────────────────────────────────────

/// A single-layer categorical raster of stratum ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStrataGrid")]
pub struct StrataGrid {
    pub geometry: GridGeometry,
    /// Row-major stratum ids; `None` is nodata.
    data: Vec<Option<u32>>,
    /// Optional label per stratum id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeMap<u32, String>>,
}

/// Unvalidated serialized form: values may be any integer or null.
#[derive(Deserialize)]
struct RawStrataGrid {
    geometry: GridGeometry,
    data: Vec<Option<i64>>,
    #[serde(default)]
    categories: Option<BTreeMap<u32, String>>,
}

impl TryFrom<RawStrataGrid> for StrataGrid {
    type Error = ConfigurationError;

    fn try_from(raw: RawStrataGrid) -> Result<Self> {
        let mut grid = Self::from_values(raw.geometry, &raw.data)?;
        grid.categories = raw.categories;
        Ok(grid)
    }
}

impl StrataGrid {
    pub fn new(geometry: GridGeometry, data: Vec<Option<u32>>) -> Result<Self> {
        geometry.validate()?;
        geometry.ensure_len(data.len(), "strata")?;
        if let Some(index) = data.iter().position(|v| *v == Some(0)) {
            return Err(ConfigurationError::InvalidStratumValue { index, value: 0 });
        }
        Ok(Self { geometry, data, categories: None })
    }

    /// Build from signed integer values, rejecting anything that is not a
    /// positive `u32`.
    pub fn from_values(geometry: GridGeometry, values: &[Option<i64>]) -> Result<Self> {
        let data = values
            .iter()
            .enumerate()
            .map(|(index, v)| match *v {
                None => Ok(None),
                Some(value) if value > 0 && value <= u32::MAX as i64 => Ok(Some(value as u32)),
                Some(value) => Err(ConfigurationError::InvalidStratumValue { index, value }),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(geometry, data)
    }

    /// Build from row-major rows of values where `0` marks nodata.
    pub fn from_rows(geometry: GridGeometry, rows: &[&[u32]]) -> Result<Self> {
        let data = rows
            .iter()
            .flat_map(|row| row.iter().map(|&v| (v != 0).then_some(v)))
            .collect();
        Self::new(geometry, data)
    }

    pub fn with_categories(mut self, categories: BTreeMap<u32, String>) -> Self {
        self.categories = Some(categories);
        self
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.geometry.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.geometry.cols
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn value(&self, index: usize) -> Option<u32> {
        self.data[index]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<u32> {
        self.data[self.geometry.index(row, col)]
    }

    pub fn values(&self) -> &[Option<u32>] {
        &self.data
    }

    pub fn label(&self, stratum: u32) -> Option<&str> {
        self.categories.as_ref()?.get(&stratum).map(String::as_str)
    }

    /// Distinct non-nodata stratum ids, ascending.
    pub fn strata(&self) -> Vec<u32> {
        self.data
            .iter()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Cell count per stratum, ascending by id.
    pub fn pixel_counts(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for s in self.data.iter().flatten() {
            *counts.entry(*s).or_insert(0) += 1;
        }
        counts
    }

    /// Cell indices holding `stratum`, in row-major order. Cloning the
    /// iterator restarts the scan.
    pub fn cells_for_stratum(&self, stratum: u32) -> impl Iterator<Item = usize> + Clone + '_ {
        self.data
            .iter()
            .enumerate()
            .filter(move |(_, v)| **v == Some(stratum))
            .map(|(i, _)| i)
    }

    /// The `wrow`×`wcol` window around `index`, clipped at the grid edges.
    pub fn neighbors(&self, index: usize, wrow: usize, wcol: usize) -> Window {
        Window::new(&self.geometry, index, wrow, wcol)
    }

    /// Containing cell of (x, y), if inside the extent.
    pub fn locate(&self, x: f64, y: f64) -> Option<usize> {
        self.geometry.locate(x, y)
    }

    pub fn cell_center(&self, index: usize) -> (f64, f64) {
        self.geometry.cell_center(index)
    }
}

// ── Neighbourhood window ──────────────────────────────────────────────────────

/// Iterator over the cell indices of a clipped window.
///
/// Odd sides are centred on the anchor cell. Even sides extend one cell
/// further toward the south/east: a side of 4 covers offsets −1..=+2.
#[derive(Debug, Clone)]
pub struct Window {
    cols: usize,
    r0: usize,
    r1: usize,
    c0: usize,
    c1: usize,
    r: usize,
    c: usize,
}

impl Window {
    fn new(geometry: &GridGeometry, index: usize, wrow: usize, wcol: usize) -> Self {
        let (row, col) = geometry.row_col(index);
        let (r0, r1) = span(row, wrow, geometry.rows);
        let (c0, c1) = span(col, wcol, geometry.cols);
        Self { cols: geometry.cols, r0, r1, c0, c1, r: r0, c: c0 }
    }

    /// Number of cells in the clipped window.
    pub fn size(&self) -> usize {
        (self.r1 - self.r0) * (self.c1 - self.c0)
    }
}

/// Half-open clipped range `[lo, hi)` of a window side centred on `pos`.
fn span(pos: usize, side: usize, limit: usize) -> (usize, usize) {
    let side = side.max(1);
    let before = (side - 1) / 2;
    let after = side / 2;
    (pos.saturating_sub(before), (pos + after + 1).min(limit))
}

impl Iterator for Window {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.r >= self.r1 || self.c0 >= self.c1 {
            return None;
        }
        let idx = self.r * self.cols + self.c;
        self.c += 1;
        if self.c >= self.c1 {
            self.c = self.c0;
            self.r += 1;
        }
        Some(idx)
    }
}

// ── Metric grid ───────────────────────────────────────────────────────────────

/// One continuous layer of a metric grid; NaN is nodata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricLayer {
    pub name: String,
    pub data: Vec<f32>,
}

/// Co-registered continuous raster with one or more named layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetricGrid")]
pub struct MetricGrid {
    pub geometry: GridGeometry,
    layers: Vec<MetricLayer>,
}

#[derive(Deserialize)]
struct RawMetricGrid {
    geometry: GridGeometry,
    layers: Vec<MetricLayer>,
}

impl TryFrom<RawMetricGrid> for MetricGrid {
    type Error = ConfigurationError;

    fn try_from(raw: RawMetricGrid) -> Result<Self> {
        Self::new(raw.geometry, raw.layers)
    }
}

impl MetricGrid {
    pub fn new(geometry: GridGeometry, layers: Vec<MetricLayer>) -> Result<Self> {
        geometry.validate()?;
        if layers.is_empty() {
            return Err(ConfigurationError::InvalidGrid("metric grid has no layers".into()));
        }
        for layer in &layers {
            geometry.ensure_len(layer.data.len(), &layer.name)?;
        }
        Ok(Self { geometry, layers })
    }

    pub fn single(geometry: GridGeometry, name: &str, data: Vec<f32>) -> Result<Self> {
        Self::new(geometry, vec![MetricLayer { name: name.to_string(), data }])
    }

    pub fn layers(&self) -> &[MetricLayer] {
        &self.layers
    }

    /// The named layer, or the only layer when `name` is `None`.
    pub fn select(&self, name: Option<&str>) -> Result<&MetricLayer> {
        match name {
            Some(n) => self
                .layers
                .iter()
                .find(|l| l.name == n)
                .ok_or_else(|| ConfigurationError::UnknownMetricLayer(n.to_string())),
            None if self.layers.len() == 1 => Ok(&self.layers[0]),
            None => Err(ConfigurationError::MultiLayerMetric { layers: self.layers.len() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_3x3() -> StrataGrid {
        StrataGrid::from_rows(
            GridGeometry::unit(3, 3),
            &[&[1, 1, 2], &[1, 0, 2], &[3, 3, 2]],
        )
        .unwrap()
    }

    #[test]
    fn strata_are_distinct_and_ascending() {
        assert_eq!(grid_3x3().strata(), vec![1, 2, 3]);
    }

    #[test]
    fn nodata_excluded_from_counts() {
        let counts = grid_3x3().pixel_counts();
        assert_eq!(counts.values().sum::<usize>(), 8);
        assert_eq!(counts[&1], 3);
        assert_eq!(counts[&2], 3);
        assert_eq!(counts[&3], 2);
    }

    #[test]
    fn cells_for_stratum_is_restartable() {
        let g = grid_3x3();
        let it = g.cells_for_stratum(2);
        let first: Vec<usize> = it.clone().collect();
        let second: Vec<usize> = it.collect();
        assert_eq!(first, vec![2, 5, 8]);
        assert_eq!(first, second);
    }

    #[test]
    fn window_is_clipped_at_corner() {
        let g = grid_3x3();
        let w = g.neighbors(0, 3, 3);
        assert_eq!(w.size(), 4);
        assert_eq!(w.collect::<Vec<_>>(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn window_centred_in_interior() {
        let g = grid_3x3();
        assert_eq!(g.neighbors(4, 3, 3).count(), 9);
        assert_eq!(g.neighbors(4, 1, 1).collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn even_window_extends_south_east() {
        let g = StrataGrid::from_rows(GridGeometry::unit(4, 4), &[&[1; 4], &[1; 4], &[1; 4], &[1; 4]])
            .unwrap();
        // Cell (1, 1), 2×2 window covers rows 1..=2, cols 1..=2.
        let cells: Vec<usize> = g.neighbors(5, 2, 2).collect();
        assert_eq!(cells, vec![5, 6, 9, 10]);
    }

    #[test]
    fn zero_and_negative_values_rejected() {
        let err = StrataGrid::from_values(GridGeometry::unit(1, 2), &[Some(1), Some(-3)]).unwrap_err();
        assert_eq!(err, ConfigurationError::InvalidStratumValue { index: 1, value: -3 });
    }

    #[test]
    fn data_length_must_match_geometry() {
        let err = StrataGrid::new(GridGeometry::unit(2, 2), vec![Some(1); 3]).unwrap_err();
        assert!(matches!(err, ConfigurationError::DataLength { expected: 4, found: 3, .. }));
    }

    #[test]
    fn locate_and_center_agree() {
        let geom = GridGeometry::new(4, 5, 10.0, 20.0, 100.0, 500.0);
        for idx in 0..geom.len() {
            let (x, y) = geom.cell_center(idx);
            assert_eq!(geom.locate(x, y), Some(idx));
        }
        assert_eq!(geom.locate(99.0, 450.0), None);
        assert_eq!(geom.locate(150.0, 420.0), Some(geom.index(3, 4)));
    }

    #[test]
    fn geometry_mismatch_detected() {
        let a = GridGeometry::new(4, 4, 10.0, 10.0, 0.0, 40.0);
        assert!(a.ensure_matches(&a, "metric").is_ok());
        let shifted = GridGeometry::new(4, 4, 10.0, 10.0, 5.0, 40.0);
        assert!(matches!(
            a.ensure_matches(&shifted, "metric"),
            Err(ConfigurationError::GeometryMismatch { .. })
        ));
        let resized = GridGeometry::new(4, 5, 10.0, 10.0, 0.0, 40.0);
        assert!(a.ensure_matches(&resized, "access").is_err());
    }

    #[test]
    fn metric_layer_selection() {
        let geom = GridGeometry::unit(1, 2);
        let grid = MetricGrid::new(
            geom,
            vec![
                MetricLayer { name: "zq90".into(), data: vec![1.0, 2.0] },
                MetricLayer { name: "cover".into(), data: vec![0.5, 0.6] },
            ],
        )
        .unwrap();
        assert_eq!(grid.select(Some("cover")).unwrap().data, vec![0.5, 0.6]);
        assert_eq!(grid.select(None), Err(ConfigurationError::MultiLayerMetric { layers: 2 }));
        assert!(matches!(grid.select(Some("x")), Err(ConfigurationError::UnknownMetricLayer(_))));
    }

    #[test]
    fn deserialize_validates_values() {
        let json = r#"{"geometry":{"rows":1,"cols":3,"cell_x":1.0,"cell_y":1.0,"x_min":0.0,"y_max":1.0},
                       "data":[1,null,2],"categories":{"1":"conifer"}}"#;
        let g: StrataGrid = serde_json::from_str(json).unwrap();
        assert_eq!(g.value(1), None);
        assert_eq!(g.label(1), Some("conifer"));

        let bad = json.replace("[1,null,2]", "[1,0,2]");
        assert!(serde_json::from_str::<StrataGrid>(&bad).is_err());
    }
}
