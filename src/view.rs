//! Strided sub-views of a row-major buffer.
//!
//! A [`BlockView`] names a rectangular region of a larger row-major buffer
//! without copying it:
//!
//! ```text
//!            |<------ row_stride ------>|
//!            |<-- cols -->|
//! offset --> +------------+
//!            | a0 a1 a2   | a3 a4 a5      ^
//!            | b0 b1 b2   | b3 b4 b5     rows
//!            | c0 c1 c2   | c3 c4 c5      v
//!            +------------+
//! ```
//!
//! Tiles are extracted from the coordinator's global buffer and placed back
//! into it through these views. All access is bounds-checked.

use std::mem;

use crate::error::{alloc_zeroed, DistError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView {
    /// Index of the first element in the source buffer.
    pub offset: usize,
    pub rows: usize,
    pub cols: usize,
    /// Distance between the starts of consecutive rows. At least `cols`.
    pub row_stride: usize,
}

impl BlockView {
    pub fn new(offset: usize, rows: usize, cols: usize, row_stride: usize) -> Self {
        debug_assert!(row_stride >= cols || rows <= 1);
        Self {
            offset,
            rows,
            cols,
            row_stride,
        }
    }

    /// A view whose rows are back-to-back in memory.
    pub fn contiguous(offset: usize, rows: usize, cols: usize) -> Self {
        Self::new(offset, rows, cols, cols)
    }

    /// Number of elements covered.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row stride in bytes for `f64` elements.
    pub fn byte_stride(&self) -> usize {
        self.row_stride * mem::size_of::<f64>()
    }

    /// One past the last source index touched by this view.
    pub fn span_end(&self) -> usize {
        if self.is_empty() {
            return self.offset;
        }
        self.offset + (self.rows - 1) * self.row_stride + self.cols
    }

    /// Source index of element `(i, j)`, or `None` when outside the view.
    pub fn index(&self, i: usize, j: usize) -> Option<usize> {
        (i < self.rows && j < self.cols).then(|| self.offset + i * self.row_stride + j)
    }

    pub fn get(&self, buf: &[f64], i: usize, j: usize) -> Option<f64> {
        self.index(i, j).and_then(|idx| buf.get(idx).copied())
    }

    fn check_fits(&self, buf_len: usize) -> Result<()> {
        if self.span_end() > buf_len {
            return Err(DistError::shape_mismatch(format!(
                "{}x{} view at offset {} with stride {} needs {} elements, buffer has {}",
                self.rows,
                self.cols,
                self.offset,
                self.row_stride,
                self.span_end(),
                buf_len
            )));
        }
        Ok(())
    }

    /// Iterate the rows of the view as slices of `buf`.
    pub fn rows_of<'a>(&self, buf: &'a [f64]) -> Result<impl Iterator<Item = &'a [f64]> + 'a> {
        self.check_fits(buf.len())?;
        let view = *self;
        Ok((0..view.rows).map(move |i| {
            let start = view.offset + i * view.row_stride;
            &buf[start..start + view.cols]
        }))
    }

    /// Copy the viewed region into a new contiguous buffer.
    pub fn extract(&self, buf: &[f64]) -> Result<Vec<f64>> {
        let mut tile = alloc_zeroed("tile extraction", self.len())?;
        for (dst, src) in tile.chunks_exact_mut(self.cols.max(1)).zip(self.rows_of(buf)?) {
            dst.copy_from_slice(src);
        }
        Ok(tile)
    }

    /// Write a contiguous `rows x cols` tile into the viewed region of `buf`.
    pub fn place(&self, tile: &[f64], buf: &mut [f64]) -> Result<()> {
        if tile.len() != self.len() {
            return Err(DistError::shape_mismatch(format!(
                "tile has {} elements, view expects {}x{}",
                tile.len(),
                self.rows,
                self.cols
            )));
        }
        self.check_fits(buf.len())?;
        if self.is_empty() {
            return Ok(());
        }
        for (i, src) in tile.chunks_exact(self.cols).enumerate() {
            let start = self.offset + i * self.row_stride;
            buf[start..start + self.cols].copy_from_slice(src);
        }
        Ok(())
    }
}
