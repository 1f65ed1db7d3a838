//! Exact Euclidean distance transform.
//!
//! Two-pass squared-distance transform (Felzenszwalb & Huttenlocher):
//! a 1-D lower-envelope pass over every column, then over every row.

use geofuse_common::Grid2;

const INF: f64 = 1e20;

/// Distance in meters from every cell to the nearest masked cell.
///
/// `mask` values >= 0.5 are features (distance 0). Distances grow
/// monotonically away from features; a mask with no features yields `INF`
/// everywhere, which callers replace with their sentinel.
pub fn distance_transform(mask: &Grid2, cell_size: f64) -> Grid2 {
    let (rows, cols) = mask.shape();
    let mut sq = vec![0.0f64; rows * cols];
    for (i, &v) in mask.as_slice().iter().enumerate() {
        sq[i] = if v >= 0.5 { 0.0 } else { INF };
    }

    // Column pass.
    let mut f = vec![0.0f64; rows.max(cols)];
    let mut d = vec![0.0f64; rows.max(cols)];
    let mut v = vec![0usize; rows.max(cols)];
    let mut z = vec![0.0f64; rows.max(cols) + 1];

    for col in 0..cols {
        for row in 0..rows {
            f[row] = sq[row * cols + col];
        }
        edt_1d(&f[..rows], &mut d, &mut v, &mut z);
        for row in 0..rows {
            sq[row * cols + col] = d[row];
        }
    }

    // Row pass.
    for row in 0..rows {
        f[..cols].copy_from_slice(&sq[row * cols..(row + 1) * cols]);
        edt_1d(&f[..cols], &mut d, &mut v, &mut z);
        sq[row * cols..(row + 1) * cols].copy_from_slice(&d[..cols]);
    }

    let data = sq
        .into_iter()
        .map(|s| {
            if s >= INF {
                f32::INFINITY
            } else {
                (s.sqrt() * cell_size) as f32
            }
        })
        .collect();
    Grid2::from_vec(data, rows, cols).expect("shape preserved")
}

/// 1-D squared distance transform via the lower envelope of parabolas.
fn edt_1d(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    let mut k = 0usize;
    v[0] = 0;
    z[0] = -INF;
    z[1] = INF;

    // Intersection of the parabolas rooted at q and p.
    let sect = |q: usize, p: usize| -> f64 {
        ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * (q as f64 - p as f64))
    };

    for q in 1..n {
        let mut s = sect(q, v[k]);
        while s <= z[k] {
            // Parabola at q dominates the one at v[k]; drop it.
            k -= 1;
            s = sect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = INF;
    }

    k = 0;
    for q in 0..n {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let p = v[k];
        let dq = q as f64 - p as f64;
        d[q] = dq * dq + f[p];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_feature_distances() {
        let mut mask = Grid2::zeros(5, 5);
        mask.set(2, 2, 1.0);
        let dist = distance_transform(&mask, 10.0);

        assert_eq!(dist.get(2, 2), 0.0);
        assert_relative_eq!(dist.get(2, 3), 10.0, epsilon = 1e-4);
        assert_relative_eq!(dist.get(1, 2), 10.0, epsilon = 1e-4);
        assert_relative_eq!(dist.get(1, 1), 10.0 * 2f32.sqrt(), epsilon = 1e-3);
        assert_relative_eq!(dist.get(0, 0), 10.0 * 8f32.sqrt(), epsilon = 1e-3);
    }

    #[test]
    fn test_straight_line_monotone_transect() {
        // Vertical feature line in column 1.
        let mut mask = Grid2::zeros(6, 8);
        for row in 0..6 {
            mask.set(row, 1, 1.0);
        }
        let dist = distance_transform(&mask, 5.0);

        // Zero on the feature, strictly increasing perpendicular to it.
        for row in 0..6 {
            assert_eq!(dist.get(row, 1), 0.0);
            let mut prev = 0.0;
            for col in 2..8 {
                let v = dist.get(row, col);
                assert!(v > prev, "distance not increasing at ({}, {})", row, col);
                prev = v;
            }
        }
        // Perpendicular distance is exactly column offset * cell size.
        assert_relative_eq!(dist.get(3, 6), 25.0, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_mask_is_infinite() {
        let mask = Grid2::zeros(4, 4);
        let dist = distance_transform(&mask, 10.0);
        assert!(dist.as_slice().iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_full_mask_is_zero() {
        let mask = Grid2::filled(3, 3, 1.0);
        let dist = distance_transform(&mask, 10.0);
        assert!(dist.as_slice().iter().all(|&v| v == 0.0));
    }
}
