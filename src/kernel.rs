//! Local multiply-accumulate over one worker's tiles.

use crate::error::{alloc_zeroed, element_count, DistError, Result};

/// A worker-owned dense row-major block.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Tile {
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let elements = element_count("tile", rows, cols)?;
        Ok(Self {
            rows,
            cols,
            data: alloc_zeroed("tile", elements)?,
        })
    }

    pub fn from_parts(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(DistError::shape_mismatch(format!(
                "{} values received for a {rows}x{cols} tile",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Backing storage, for in-place replacement during tile exchanges.
    pub fn buffer_mut(&mut self) -> &mut Vec<f64> {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }
}

/// `c += a * b` for an `m x k` tile `a`, a `k x n` tile `b` and an `m x n`
/// tile `c`. A `k x 1` tile `b` gives the matrix-vector case.
///
/// Accumulates into `c`; calling it repeatedly on the same `c` sums the
/// products, which is what the Cannon rounds rely on.
pub fn multiply_accumulate(a: &Tile, b: &Tile, c: &mut Tile) -> Result<()> {
    if a.cols != b.rows || c.rows != a.rows || c.cols != b.cols {
        return Err(DistError::shape_mismatch(format!(
            "cannot accumulate {}x{} * {}x{} into {}x{}",
            a.rows, a.cols, b.rows, b.cols, c.rows, c.cols
        )));
    }
    if b.cols == 1 {
        gemv_acc(&a.data, &b.data, &mut c.data, a.cols);
    } else {
        gemm_acc(&a.data, &b.data, &mut c.data, a.cols, b.cols);
    }
    Ok(())
}

// i-k-j order keeps the inner loop on contiguous rows of b and c.
fn gemm_acc(a: &[f64], b: &[f64], c: &mut [f64], k: usize, n: usize) {
    if k == 0 || n == 0 {
        return;
    }
    for (a_row, c_row) in a.chunks_exact(k).zip(c.chunks_exact_mut(n)) {
        for (&a_ip, b_row) in a_row.iter().zip(b.chunks_exact(n)) {
            for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
}

fn gemv_acc(a: &[f64], x: &[f64], y: &mut [f64], k: usize) {
    if k == 0 {
        return;
    }
    for (a_row, y_i) in a.chunks_exact(k).zip(y.iter_mut()) {
        *y_i += a_row.iter().zip(x).map(|(a, x)| a * x).sum::<f64>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(rows: usize, cols: usize, values: &[f64]) -> Tile {
        Tile::from_parts(rows, cols, values.to_vec()).unwrap()
    }

    #[test]
    fn test_square_product() {
        let a = tile(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = tile(2, 2, &[5.0, 6.0, 7.0, 8.0]);
        let mut c = Tile::zeros(2, 2).unwrap();
        multiply_accumulate(&a, &b, &mut c).unwrap();
        assert_eq!(c.as_slice(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_accumulates_instead_of_overwriting() {
        let a = tile(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let b = tile(2, 2, &[5.0, 6.0, 7.0, 8.0]);
        let mut c = Tile::zeros(2, 2).unwrap();
        multiply_accumulate(&a, &b, &mut c).unwrap();
        multiply_accumulate(&a, &b, &mut c).unwrap();
        assert_eq!(c.as_slice(), &[38.0, 44.0, 86.0, 100.0]);
    }

    #[test]
    fn test_vector_case() {
        // 2x4 row slice times a full vector
        let a = tile(2, 4, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let x = tile(4, 1, &[1.0, 1.0, 1.0, 1.0]);
        let mut y = Tile::zeros(2, 1).unwrap();
        multiply_accumulate(&a, &x, &mut y).unwrap();
        assert_eq!(y.as_slice(), &[10.0, 26.0]);
    }

    #[test]
    fn test_rectangular_product() {
        // 3x2 column slice times a 2x3 row slice
        let a = tile(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = tile(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut c = Tile::zeros(3, 3).unwrap();
        multiply_accumulate(&a, &b, &mut c).unwrap();
        assert_eq!(
            c.as_slice(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 5.0, 7.0, 9.0]
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let a = tile(2, 3, &[0.0; 6]);
        let b = tile(2, 2, &[0.0; 4]);
        let mut c = Tile::zeros(2, 2).unwrap();
        assert!(matches!(
            multiply_accumulate(&a, &b, &mut c),
            Err(DistError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_oversized_tile_is_an_error() {
        assert!(matches!(
            Tile::zeros(usize::MAX, 3),
            Err(DistError::Allocation { .. })
        ));
    }

    #[test]
    fn test_from_parts_checks_length() {
        assert!(Tile::from_parts(2, 2, vec![1.0; 3]).is_err());
    }
}
