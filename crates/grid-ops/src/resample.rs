//! Resampling of georeferenced source rasters onto the master grid.

use geofuse_common::{Grid2, GridSpec, ResampleMethod};

/// Georeference of a source raster already in the target UTM zone.
///
/// `origin_x`/`origin_y` is the southwest corner; row 0 is the north edge,
/// matching [`GridSpec`].
#[derive(Debug, Clone, Copy)]
pub struct RasterGeo {
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
    pub rows: usize,
    pub cols: usize,
}

impl RasterGeo {
    /// Fractional `(row, col)` of a UTM point in this raster.
    fn frac_coords(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.origin_x) / self.cell_size - 0.5;
        let row = self.rows as f64 - (y - self.origin_y) / self.cell_size - 0.5;
        (row, col)
    }

    fn value(&self, data: &[f32], row: usize, col: usize) -> f32 {
        data[row * self.cols + col]
    }
}

/// Nearest-neighbor sample at a UTM point; NaN outside the raster.
pub fn sample_nearest(data: &[f32], geo: &RasterGeo, x: f64, y: f64) -> f32 {
    let (row, col) = geo.frac_coords(x, y);
    let r = row.round();
    let c = col.round();
    if r < 0.0 || c < 0.0 || r >= geo.rows as f64 || c >= geo.cols as f64 {
        return f32::NAN;
    }
    geo.value(data, r as usize, c as usize)
}

/// Bilinear sample at a UTM point; NaN outside the raster.
///
/// If any of the four neighbors is non-finite the nearest neighbor is used
/// instead, so nodata holes do not bleed into their surroundings.
pub fn sample_bilinear(data: &[f32], geo: &RasterGeo, x: f64, y: f64) -> f32 {
    let (row, col) = geo.frac_coords(x, y);
    if row < -0.5 || col < -0.5 || row > geo.rows as f64 - 0.5 || col > geo.cols as f64 - 0.5 {
        return f32::NAN;
    }

    let r0 = row.floor().clamp(0.0, (geo.rows - 1) as f64) as usize;
    let c0 = col.floor().clamp(0.0, (geo.cols - 1) as f64) as usize;
    let r1 = (r0 + 1).min(geo.rows - 1);
    let c1 = (c0 + 1).min(geo.cols - 1);

    let fr = (row - r0 as f64).clamp(0.0, 1.0);
    let fc = (col - c0 as f64).clamp(0.0, 1.0);

    let v00 = geo.value(data, r0, c0);
    let v01 = geo.value(data, r0, c1);
    let v10 = geo.value(data, r1, c0);
    let v11 = geo.value(data, r1, c1);

    if !(v00.is_finite() && v01.is_finite() && v10.is_finite() && v11.is_finite()) {
        return sample_nearest(data, geo, x, y);
    }

    let top = v00 as f64 * (1.0 - fc) + v01 as f64 * fc;
    let bottom = v10 as f64 * (1.0 - fc) + v11 as f64 * fc;
    (top * (1.0 - fr) + bottom * fr) as f32
}

/// Resample a source raster onto every cell center of the master grid.
pub fn resample_to_spec(
    data: &[f32],
    geo: &RasterGeo,
    spec: &GridSpec,
    method: ResampleMethod,
) -> Grid2 {
    let mut out = Grid2::filled(spec.rows, spec.cols, f32::NAN);
    for row in 0..spec.rows {
        for col in 0..spec.cols {
            let (x, y) = spec.cell_center(row, col);
            let v = match method {
                ResampleMethod::Bilinear => sample_bilinear(data, geo, x, y),
                ResampleMethod::Nearest => sample_nearest(data, geo, x, y),
            };
            out.set(row, col, v);
        }
    }
    out
}

/// Threshold a resampled mask back to binary: >= `threshold` becomes 1.0.
/// Non-finite cells become 0.0.
pub fn threshold_mask(grid: &Grid2, threshold: f32) -> Grid2 {
    let data = grid
        .as_slice()
        .iter()
        .map(|&v| if v.is_finite() && v >= threshold { 1.0 } else { 0.0 })
        .collect();
    Grid2::from_vec(data, grid.rows(), grid.cols()).expect("shape preserved")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_geo(rows: usize, cols: usize) -> RasterGeo {
        RasterGeo {
            origin_x: 0.0,
            origin_y: 0.0,
            cell_size: 1.0,
            rows,
            cols,
        }
    }

    #[test]
    fn test_nearest_picks_cell_value() {
        let geo = unit_geo(2, 2);
        // Row 0 is the north edge: cells (0,0) (0,1) on top.
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(sample_nearest(&data, &geo, 0.5, 1.5), 1.0);
        assert_eq!(sample_nearest(&data, &geo, 1.5, 0.5), 4.0);
        assert!(sample_nearest(&data, &geo, -5.0, 0.5).is_nan());
    }

    #[test]
    fn test_bilinear_midpoint_average() {
        let geo = unit_geo(1, 2);
        let data = [10.0, 20.0];
        // Halfway between the two cell centers.
        let v = sample_bilinear(&data, &geo, 1.0, 0.5);
        assert_relative_eq!(v, 15.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bilinear_skips_nodata_neighbor() {
        let geo = unit_geo(1, 2);
        let data = [10.0, f32::NAN];
        let v = sample_bilinear(&data, &geo, 0.6, 0.5);
        assert_relative_eq!(v, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_resample_constant_is_identity() {
        let geo = RasterGeo {
            origin_x: 100.0,
            origin_y: 200.0,
            cell_size: 30.0,
            rows: 8,
            cols: 8,
        };
        let data = vec![7.5f32; 64];
        let spec = GridSpec {
            origin_x: 130.0,
            origin_y: 230.0,
            cell_size: 10.0,
            rows: 12,
            cols: 12,
            epsg: 32615,
        };
        let out = resample_to_spec(&data, &geo, &spec, ResampleMethod::Bilinear);
        for &v in out.as_slice() {
            assert_relative_eq!(v, 7.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_threshold_mask() {
        let g = Grid2::from_vec(vec![0.2, 0.5, 0.9, f32::NAN], 2, 2).unwrap();
        let m = threshold_mask(&g, 0.5);
        assert_eq!(m.as_slice(), &[0.0, 1.0, 1.0, 0.0]);
    }
}
