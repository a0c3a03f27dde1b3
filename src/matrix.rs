//! Dense row-major matrices held by the coordinator, plus the serial
//! reference products used to check distributed results.

use rand::Rng;
use rayon::prelude::*;

use crate::error::{alloc_zeroed, element_count, DistError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let elements = element_count("matrix", rows, cols)?;
        Ok(Self {
            rows,
            cols,
            data: alloc_zeroed("matrix", elements)?,
        })
    }

    pub fn identity(n: usize) -> Result<Self> {
        let mut m = Self::zeros(n, n)?;
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        Ok(m)
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(DistError::shape_mismatch(format!(
                "{} values cannot fill a {rows}x{cols} matrix",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows. All rows must have the same length.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(DistError::shape_mismatch(format!(
                    "row {i} has {} entries, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// An `n x 1` matrix holding a vector.
    pub fn column_vector(values: Vec<f64>) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values,
        }
    }

    /// Integer-valued entries in `1..=10`, so products stay exact in `f64`.
    pub fn random<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Result<Self> {
        let mut m = Self::zeros(rows, cols)?;
        m.data
            .iter_mut()
            .for_each(|v| *v = rng.gen_range(1..=10) as f64);
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        (i < self.rows && j < self.cols).then(|| self.data[i * self.cols + j])
    }

    /// Serial reference product `self * other`, rows computed in parallel.
    pub fn product(&self, other: &Matrix) -> Result<Matrix> {
        if self.cols != other.rows {
            return Err(DistError::shape_mismatch(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, other.rows, other.cols
            )));
        }
        let (k, n) = (self.cols, other.cols);
        let mut out = Matrix::zeros(self.rows, n)?;
        if n == 0 {
            return Ok(out);
        }
        out.data
            .par_chunks_mut(n)
            .zip(self.data.par_chunks(k.max(1)))
            .for_each(|(c_row, a_row)| {
                for (p, &a) in a_row.iter().enumerate() {
                    let b_row = &other.data[p * n..(p + 1) * n];
                    for (c, &b) in c_row.iter_mut().zip(b_row) {
                        *c += a * b;
                    }
                }
            });
        Ok(out)
    }

    /// Element-wise comparison with a relative tolerance.
    pub fn approx_eq(&self, other: &Matrix, tolerance: f64) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0))
    }

    /// Largest absolute element-wise difference.
    pub fn max_abs_diff(&self, other: &Matrix) -> f64 {
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}
