//! Per-cell data-quality scoring.

use geofuse_common::Grid2;

/// Score a cell from which sources contributed valid data there.
///
/// Fixed lookup: all three sources 1.0; elevation+embedding 0.75;
/// elevation+vector 0.5; elevation alone 0.25; no elevation 0.0.
fn score(elevation: bool, embedding: bool, vector: bool) -> f32 {
    if !elevation {
        return 0.0;
    }
    match (embedding, vector) {
        (true, true) => 1.0,
        (true, false) => 0.75,
        (false, true) => 0.5,
        (false, false) => 0.25,
    }
}

/// Build the quality layer from per-source presence masks.
///
/// Each mask is per-cell, so partial spatial coverage (say, elevation
/// missing at a source tile edge) degrades only the affected cells.
pub fn quality_layer(
    rows: usize,
    cols: usize,
    elevation: &[bool],
    embedding: &[bool],
    vector: &[bool],
) -> Grid2 {
    let mut out = Grid2::zeros(rows, cols);
    for i in 0..rows * cols {
        let e = elevation.get(i).copied().unwrap_or(false);
        let m = embedding.get(i).copied().unwrap_or(false);
        let v = vector.get(i).copied().unwrap_or(false);
        out.as_mut_slice()[i] = score(e, m, v);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_table() {
        assert_eq!(score(true, true, true), 1.0);
        assert_eq!(score(true, true, false), 0.75);
        assert_eq!(score(true, false, true), 0.5);
        assert_eq!(score(true, false, false), 0.25);
        assert_eq!(score(false, false, false), 0.0);
        // Without elevation no combination scores above zero.
        assert_eq!(score(false, true, true), 0.0);
        assert_eq!(score(false, true, false), 0.0);
        assert_eq!(score(false, false, true), 0.0);
    }

    #[test]
    fn test_per_cell_independence() {
        let elevation = [true, true, true, false];
        let embedding = [true, true, false, false];
        let vector = [true, false, true, false];
        let q = quality_layer(2, 2, &elevation, &embedding, &vector);
        assert_eq!(q.as_slice(), &[1.0, 0.75, 0.5, 0.0]);
    }

    #[test]
    fn test_short_masks_read_as_absent() {
        let q = quality_layer(1, 2, &[true], &[], &[]);
        assert_eq!(q.as_slice(), &[0.25, 0.0]);
    }
}
