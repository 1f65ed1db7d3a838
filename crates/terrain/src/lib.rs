//! Terrain attribute derivation.
//!
//! Pure functions from a harmonized elevation grid (meters, square cells)
//! to derived descriptor grids. All outputs are finite for finite input;
//! a constant elevation field yields slope 0 and aspect 0 everywhere.

use geofuse_common::Grid2;

/// Lower bound on tan(slope) in the wetness index, so flat cells stay finite.
const MIN_TAN_SLOPE: f64 = 1e-3;

/// Gradient components of the elevation field.
///
/// 3x3 Sobel kernels normalized by `8 * cell_size`; borders replicate the
/// edge value. `dx` is positive where elevation increases eastward, `dy`
/// where it increases southward (row order is north to south).
pub fn gradients(dem: &Grid2, cell_size: f64) -> (Grid2, Grid2) {
    let (rows, cols) = dem.shape();
    let mut dx = Grid2::zeros(rows, cols);
    let mut dy = Grid2::zeros(rows, cols);
    let norm = (8.0 * cell_size) as f32;

    let at = |r: isize, c: isize| -> f32 {
        let r = r.clamp(0, rows as isize - 1) as usize;
        let c = c.clamp(0, cols as isize - 1) as usize;
        dem.get(r, c)
    };

    for row in 0..rows {
        for col in 0..cols {
            let (r, c) = (row as isize, col as isize);

            let east = at(r - 1, c + 1) + 2.0 * at(r, c + 1) + at(r + 1, c + 1);
            let west = at(r - 1, c - 1) + 2.0 * at(r, c - 1) + at(r + 1, c - 1);
            dx.set(row, col, (east - west) / norm);

            let south = at(r + 1, c - 1) + 2.0 * at(r + 1, c) + at(r + 1, c + 1);
            let north = at(r - 1, c - 1) + 2.0 * at(r - 1, c) + at(r - 1, c + 1);
            dy.set(row, col, (south - north) / norm);
        }
    }
    (dx, dy)
}

/// Slope in degrees.
pub fn slope(dem: &Grid2, cell_size: f64) -> Grid2 {
    let (dx, dy) = gradients(dem, cell_size);
    slope_from_gradients(&dx, &dy)
}

fn slope_from_gradients(dx: &Grid2, dy: &Grid2) -> Grid2 {
    let data = dx
        .as_slice()
        .iter()
        .zip(dy.as_slice())
        .map(|(&gx, &gy)| {
            let g = ((gx as f64).powi(2) + (gy as f64).powi(2)).sqrt();
            g.atan().to_degrees() as f32
        })
        .collect();
    Grid2::from_vec(data, dx.rows(), dx.cols()).expect("shape preserved")
}

/// Aspect in degrees, wrapped into `[0, 360)`. Flat cells report 0.
pub fn aspect(dem: &Grid2, cell_size: f64) -> Grid2 {
    let (dx, dy) = gradients(dem, cell_size);
    let data = dx
        .as_slice()
        .iter()
        .zip(dy.as_slice())
        .map(|(&gx, &gy)| {
            let mut deg = (-gy as f64).atan2(gx as f64).to_degrees();
            if deg < 0.0 {
                deg += 360.0;
            }
            deg as f32
        })
        .collect();
    Grid2::from_vec(data, dx.rows(), dx.cols()).expect("shape preserved")
}

/// Curvature as the discrete Laplacian of elevation.
pub fn curvature(dem: &Grid2) -> Grid2 {
    let (rows, cols) = dem.shape();
    let mut out = Grid2::zeros(rows, cols);

    let at = |r: isize, c: isize| -> f32 {
        let r = r.clamp(0, rows as isize - 1) as usize;
        let c = c.clamp(0, cols as isize - 1) as usize;
        dem.get(r, c)
    };

    for row in 0..rows {
        for col in 0..cols {
            let (r, c) = (row as isize, col as isize);
            let lap = at(r - 1, c) + at(r + 1, c) + at(r, c - 1) + at(r, c + 1)
                - 4.0 * at(r, c);
            out.set(row, col, lap);
        }
    }
    out
}

/// Roughness: standard deviation of elevation in a local window.
pub fn roughness(dem: &Grid2, window: usize) -> Grid2 {
    window_stat(dem, window, |values| {
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        var.sqrt() as f32
    })
}

/// Topographic Position Index: elevation minus the local window mean.
pub fn tpi(dem: &Grid2, window: usize) -> Grid2 {
    let means = window_stat(dem, window, |values| {
        (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32
    });
    let data = dem
        .as_slice()
        .iter()
        .zip(means.as_slice())
        .map(|(&z, &m)| z - m)
        .collect();
    Grid2::from_vec(data, dem.rows(), dem.cols()).expect("shape preserved")
}

/// Topographic Wetness Index.
///
/// True TWI needs a flow-accumulation model; this uses the wider-window TPI
/// as an upslope-contributing-area proxy and clamps tan(slope) away from
/// zero so flat terrain stays finite.
pub fn twi(dem: &Grid2, cell_size: f64) -> Grid2 {
    let slope_deg = slope(dem, cell_size);
    let position = tpi(dem, 5);

    let data = slope_deg
        .as_slice()
        .iter()
        .zip(position.as_slice())
        .map(|(&s, &p)| {
            let tan_beta = (s as f64).to_radians().tan().max(MIN_TAN_SLOPE);
            let alpha = (p as f64 + 1.0).max(1.0);
            (alpha / tan_beta).ln() as f32
        })
        .collect();
    Grid2::from_vec(data, dem.rows(), dem.cols()).expect("shape preserved")
}

/// Apply a statistic over the clamped `window x window` neighborhood of
/// every cell.
fn window_stat(dem: &Grid2, window: usize, stat: impl Fn(&[f32]) -> f32) -> Grid2 {
    let (rows, cols) = dem.shape();
    let half = (window.max(1) / 2) as isize;
    let mut out = Grid2::zeros(rows, cols);
    let mut values = Vec::with_capacity(window * window);

    for row in 0..rows {
        for col in 0..cols {
            values.clear();
            for dr in -half..=half {
                for dc in -half..=half {
                    let r = (row as isize + dr).clamp(0, rows as isize - 1) as usize;
                    let c = (col as isize + dc).clamp(0, cols as isize - 1) as usize;
                    values.push(dem.get(r, c));
                }
            }
            out.set(row, col, stat(&values));
        }
    }
    out
}
