//! Access-corridor eligibility.
//!
//! A cell is eligible when it carries a stratum and its distance to the
//! nearest corridor lies in `(buff_inner, buff_outer]`. Either bound may be
//! unset. With both unset every non-nodata cell is eligible and no distance
//! layer is needed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigurationError, Result};
use crate::grid::{GridGeometry, StrataGrid};

// ── Distance layer ────────────────────────────────────────────────────────────

/// Per-cell distance (map units) to the nearest access corridor.
/// NaN marks cells with unknown distance; they are never eligible under a buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDistanceLayer")]
pub struct DistanceLayer {
    pub geometry: GridGeometry,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawDistanceLayer {
    geometry: GridGeometry,
    data: Vec<f32>,
}

impl TryFrom<RawDistanceLayer> for DistanceLayer {
    type Error = ConfigurationError;

    fn try_from(raw: RawDistanceLayer) -> Result<Self> {
        Self::new(raw.geometry, raw.data)
    }
}

impl DistanceLayer {
    pub fn new(geometry: GridGeometry, data: Vec<f32>) -> Result<Self> {
        if data.len() != geometry.len() {
            return Err(ConfigurationError::DataLength {
                layer: "access".into(),
                expected: geometry.len(),
                found: data.len(),
                rows: geometry.rows,
                cols: geometry.cols,
            });
        }
        Ok(Self { geometry, data })
    }

    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        self.data[index]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Exact Euclidean distance from every cell centre to the nearest cell
/// flagged in `corridor`, honouring non-square cells.
///
/// Uses the separable lower-envelope transform (Felzenszwalb & Huttenlocher
/// 2012): one pass down each column, then one along each row. Cells are
/// `f32::INFINITY` when `corridor` flags nothing.
pub fn distance_to_corridor(geometry: &GridGeometry, corridor: &[bool]) -> Result<DistanceLayer> {
    if corridor.len() != geometry.len() {
        return Err(ConfigurationError::DataLength {
            layer: "corridor".into(),
            expected: geometry.len(),
            found: corridor.len(),
            rows: geometry.rows,
            cols: geometry.cols,
        });
    }
    let (rows, cols) = (geometry.rows, geometry.cols);
    let mut sq: Vec<f64> = corridor
        .iter()
        .map(|&on| if on { 0.0 } else { f64::INFINITY })
        .collect();

    let n = rows.max(cols);
    let mut line = vec![0.0f64; n];
    let mut out = vec![0.0f64; n];
    let mut sites = vec![0usize; n];
    let mut bounds = vec![0.0f64; n + 1];

    for c in 0..cols {
        for r in 0..rows {
            line[r] = sq[r * cols + c];
        }
        envelope_1d(&line[..rows], geometry.cell_y, &mut out[..rows], &mut sites, &mut bounds);
        for r in 0..rows {
            sq[r * cols + c] = out[r];
        }
    }
    for r in 0..rows {
        let row = &mut sq[r * cols..(r + 1) * cols];
        line[..cols].copy_from_slice(row);
        envelope_1d(&line[..cols], geometry.cell_x, &mut out[..cols], &mut sites, &mut bounds);
        row.copy_from_slice(&out[..cols]);
    }

    let data = sq.into_iter().map(|d| d.sqrt() as f32).collect();
    DistanceLayer::new(*geometry, data)
}

/// 1-D squared distance transform of `f` with sample spacing `step`.
fn envelope_1d(f: &[f64], step: f64, d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    let s2 = step * step;
    // Parabola intersection, in index units.
    let cross = |p: usize, q: usize| -> f64 {
        let (pf, qf) = (p as f64, q as f64);
        ((f[q] + s2 * qf * qf) - (f[p] + s2 * pf * pf)) / (2.0 * s2 * (qf - pf))
    };

    let mut k: Option<usize> = None;
    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        match k {
            None => {
                v[0] = q;
                z[0] = f64::NEG_INFINITY;
                z[1] = f64::INFINITY;
                k = Some(0);
            }
            Some(mut j) => loop {
                let s = cross(v[j], q);
                if s <= z[j] {
                    j -= 1;
                } else {
                    j += 1;
                    v[j] = q;
                    z[j] = s;
                    z[j + 1] = f64::INFINITY;
                    k = Some(j);
                    break;
                }
            },
        }
    }

    if k.is_none() {
        d.iter_mut().for_each(|x| *x = f64::INFINITY);
        return;
    }
    let mut j = 0usize;
    for (q, dq) in d.iter_mut().enumerate() {
        while z[j + 1] < q as f64 {
            j += 1;
        }
        let off = (q as f64 - v[j] as f64) * step;
        *dq = off * off + f[v[j]];
    }
}

// ── Filter ────────────────────────────────────────────────────────────────────

/// Inner (exclusive) and outer (inclusive) corridor buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessFilter {
    pub buff_inner: Option<f64>,
    pub buff_outer: Option<f64>,
}

impl AccessFilter {
    pub fn new(buff_inner: Option<f64>, buff_outer: Option<f64>) -> Result<Self> {
        for (name, b) in [("buff_inner", buff_inner), ("buff_outer", buff_outer)] {
            if let Some(v) = b {
                if !v.is_finite() || v < 0.0 {
                    return Err(ConfigurationError::InvalidBuffer(format!(
                        "{name} must be finite and ≥ 0, got {v}"
                    )));
                }
            }
        }
        if let (Some(inner), Some(outer)) = (buff_inner, buff_outer) {
            if inner >= outer {
                return Err(ConfigurationError::InvalidBuffer(format!(
                    "buff_inner ({inner}) must be less than buff_outer ({outer})"
                )));
            }
        }
        Ok(Self { buff_inner, buff_outer })
    }

    pub fn is_unbounded(&self) -> bool {
        self.buff_inner.is_none() && self.buff_outer.is_none()
    }

    /// Whether a distance value passes both buffers. NaN never passes a set bound.
    #[inline]
    pub fn admits(&self, distance: f64) -> bool {
        self.buff_inner.map_or(true, |inner| distance > inner)
            && self.buff_outer.map_or(true, |outer| distance <= outer)
    }

    /// Eligibility mask over `strata`. A distance layer is required when any
    /// buffer is set and must share the strata geometry.
    pub fn mask(&self, strata: &StrataGrid, distance: Option<&DistanceLayer>) -> Result<AccessMask> {
        let eligible: Vec<bool> = if self.is_unbounded() {
            if let Some(layer) = distance {
                strata.geometry.ensure_matches(&layer.geometry, "access")?;
            }
            strata.values().iter().map(Option::is_some).collect()
        } else {
            let layer = distance.ok_or_else(|| {
                ConfigurationError::InvalidBuffer("buffers are set but no access layer was supplied".into())
            })?;
            strata.geometry.ensure_matches(&layer.geometry, "access")?;
            strata
                .values()
                .iter()
                .zip(layer.data())
                .map(|(v, &d)| v.is_some() && self.admits(d as f64))
                .collect()
        };
        let mask = AccessMask { eligible };
        debug!(eligible = mask.count(), cells = strata.len(), "access mask built");
        Ok(mask)
    }
}

/// Per-cell eligibility; read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessMask {
    eligible: Vec<bool>,
}

impl AccessMask {
    /// Every non-nodata cell of `strata` eligible.
    pub fn all(strata: &StrataGrid) -> Self {
        Self { eligible: strata.values().iter().map(Option::is_some).collect() }
    }

    #[inline]
    pub fn is_eligible(&self, index: usize) -> bool {
        self.eligible[index]
    }

    pub fn count(&self) -> usize {
        self.eligible.iter().filter(|&&e| e).count()
    }

    pub fn len(&self) -> usize {
        self.eligible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn strip(distances: &[f32]) -> (StrataGrid, DistanceLayer) {
        let geom = GridGeometry::unit(1, distances.len());
        let grid = StrataGrid::new(geom, vec![Some(1); distances.len()]).unwrap();
        let layer = DistanceLayer::new(geom, distances.to_vec()).unwrap();
        (grid, layer)
    }

    #[test]
    fn inner_bound_exclusive_outer_inclusive() {
        let (grid, layer) = strip(&[10.0, 50.0, 50.5, 200.0, 200.5]);
        let mask = AccessFilter::new(Some(50.0), Some(200.0))
            .unwrap()
            .mask(&grid, Some(&layer))
            .unwrap();
        let got: Vec<bool> = (0..5).map(|i| mask.is_eligible(i)).collect();
        assert_eq!(got, vec![false, false, true, true, false]);
    }

    #[test]
    fn unset_bounds_admit_everything_but_nodata() {
        let geom = GridGeometry::unit(1, 3);
        let grid = StrataGrid::new(geom, vec![Some(1), None, Some(2)]).unwrap();
        let mask = AccessFilter::default().mask(&grid, None).unwrap();
        assert_eq!(mask.count(), 2);
        assert!(!mask.is_eligible(1));
        assert_eq!(mask, AccessMask::all(&grid));
    }

    #[test]
    fn nan_distance_is_never_eligible_under_a_bound() {
        let (grid, layer) = strip(&[f32::NAN, 30.0]);
        let mask = AccessFilter::new(None, Some(100.0)).unwrap().mask(&grid, Some(&layer)).unwrap();
        assert!(!mask.is_eligible(0));
        assert!(mask.is_eligible(1));
    }

    #[test]
    fn buffers_need_a_layer() {
        let (grid, _) = strip(&[1.0]);
        let err = AccessFilter::new(Some(1.0), None).unwrap().mask(&grid, None).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidBuffer(_)));
    }

    #[test]
    fn inverted_buffers_rejected() {
        assert!(AccessFilter::new(Some(200.0), Some(50.0)).is_err());
        assert!(AccessFilter::new(Some(-1.0), None).is_err());
    }

    #[test]
    fn mismatched_access_geometry_is_fatal() {
        let (grid, _) = strip(&[1.0, 2.0]);
        let other = DistanceLayer::new(GridGeometry::unit(2, 1), vec![1.0, 2.0]).unwrap();
        let err = AccessFilter::new(None, Some(5.0)).unwrap().mask(&grid, Some(&other)).unwrap_err();
        assert!(matches!(err, ConfigurationError::GeometryMismatch { .. }));
    }

    #[test]
    fn distance_transform_matches_brute_force() {
        let geom = GridGeometry::new(17, 23, 30.0, 20.0, 0.0, 340.0);
        let mut rng = StdRng::seed_from_u64(7);
        let corridor: Vec<bool> = (0..geom.len()).map(|_| rng.gen_bool(0.04)).collect();
        let layer = distance_to_corridor(&geom, &corridor).unwrap();

        let roads: Vec<(f64, f64)> = corridor
            .iter()
            .enumerate()
            .filter(|&(_, &on)| on)
            .map(|(i, _)| geom.cell_center(i))
            .collect();
        assert!(!roads.is_empty());
        for i in 0..geom.len() {
            let (x, y) = geom.cell_center(i);
            let best = roads
                .iter()
                .map(|(rx, ry)| ((x - rx).powi(2) + (y - ry).powi(2)).sqrt())
                .fold(f64::INFINITY, f64::min);
            assert_relative_eq!(layer.get(i) as f64, best, max_relative = 1e-5, epsilon = 1e-3);
        }
    }

    #[test]
    fn distance_transform_without_corridor_is_infinite() {
        let geom = GridGeometry::unit(3, 3);
        let layer = distance_to_corridor(&geom, &[false; 9]).unwrap();
        assert!(layer.data().iter().all(|d| d.is_infinite()));
    }
}
