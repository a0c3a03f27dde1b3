//! Partition plans: which part of each global operand every rank owns.
//!
//! A plan is a pure function of `(n, workers, strategy, operation)`. The
//! coordinator and every worker compute it independently from the broadcast
//! job header and always arrive at the same value.

use itertools::iproduct;

use crate::error::{DistError, Result};
use crate::strategy::{Operation, Strategy};
use crate::topology::exact_sqrt;
use crate::view::BlockView;

/// How the second operand (B or x) reaches the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandLayout {
    /// Every rank receives the whole `rows x cols` operand.
    Replicated { rows: usize, cols: usize },
    /// Rank `k` receives the region under view `k`.
    Partitioned(Vec<BlockView>),
}

/// How local results combine into the global answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultLayout {
    /// Rank `k`'s tile is placed at view `k`; tiles are disjoint.
    Disjoint(Vec<BlockView>),
    /// Every rank holds a full `rows x cols` partial sum.
    Summed { rows: usize, cols: usize },
    /// Partials are summed along each row of a `dim x dim` grid, then the
    /// row sums are placed at `segments[row]`.
    RowSummed {
        dim: usize,
        segments: Vec<BlockView>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    n: usize,
    workers: usize,
    strategy: Strategy,
    operation: Operation,
    /// Rows or columns per rank (row/column), or block side (block).
    tile_dim: usize,
    a: Vec<BlockView>,
    b: OperandLayout,
    result: ResultLayout,
}

/// Shapes of one rank's local tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalShapes {
    pub a: (usize, usize),
    pub b: (usize, usize),
    pub c: (usize, usize),
}

/// Number of partitions of `n` the strategy needs.
fn partition_count(workers: usize, strategy: Strategy) -> Result<usize> {
    match strategy {
        Strategy::Row | Strategy::Column => Ok(workers),
        Strategy::Block => {
            exact_sqrt(workers).ok_or(DistError::NotPerfectSquare { workers, strategy })
        }
    }
}

pub fn plan(
    n: usize,
    workers: usize,
    strategy: Strategy,
    operation: Operation,
) -> Result<PartitionPlan> {
    if n == 0 {
        return Err(DistError::ZeroDimension);
    }
    if workers == 0 {
        return Err(DistError::NoWorkers);
    }
    if n.checked_mul(n).is_none() {
        return Err(DistError::DimensionTooLarge { n });
    }
    let parts = partition_count(workers, strategy)?;
    if n % parts != 0 {
        return Err(DistError::InvalidPartition { n, parts, strategy });
    }
    let m = n / parts;
    // width of B, x, C and y
    let width = match operation {
        Operation::MatVec => 1,
        Operation::MatMul => n,
    };

    let (a, b, result) = match strategy {
        Strategy::Row => {
            let a = (0..workers)
                .map(|k| BlockView::contiguous(k * m * n, m, n))
                .collect();
            let result = (0..workers)
                .map(|k| BlockView::contiguous(k * m * width, m, width))
                .collect();
            (
                a,
                OperandLayout::Replicated { rows: n, cols: width },
                ResultLayout::Disjoint(result),
            )
        }
        Strategy::Column => {
            let a = (0..workers)
                .map(|k| BlockView::new(k * m, n, m, n))
                .collect();
            let b = (0..workers)
                .map(|k| BlockView::contiguous(k * m * width, m, width))
                .collect();
            (
                a,
                OperandLayout::Partitioned(b),
                ResultLayout::Summed { rows: n, cols: width },
            )
        }
        Strategy::Block => {
            // rank r*d + c owns block (r, c)
            let blocks: Vec<BlockView> = iproduct!(0..parts, 0..parts)
                .map(|(r, c)| BlockView::new(r * m * n + c * m, m, m, n))
                .collect();
            match operation {
                Operation::MatMul => (
                    blocks.clone(),
                    OperandLayout::Partitioned(blocks.clone()),
                    ResultLayout::Disjoint(blocks),
                ),
                Operation::MatVec => {
                    // block (r, c) meets x segment c and contributes to y segment r
                    let x = iproduct!(0..parts, 0..parts)
                        .map(|(_, c)| BlockView::contiguous(c * m, m, 1))
                        .collect();
                    let segments = (0..parts)
                        .map(|r| BlockView::contiguous(r * m, m, 1))
                        .collect();
                    (
                        blocks,
                        OperandLayout::Partitioned(x),
                        ResultLayout::RowSummed {
                            dim: parts,
                            segments,
                        },
                    )
                }
            }
        }
    };

    Ok(PartitionPlan {
        n,
        workers,
        strategy,
        operation,
        tile_dim: m,
        a,
        b,
        result,
    })
}

impl PartitionPlan {
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn tile_dim(&self) -> usize {
        self.tile_dim
    }

    /// Views of A, indexed by rank.
    pub fn a_views(&self) -> &[BlockView] {
        &self.a
    }

    pub fn b_layout(&self) -> &OperandLayout {
        &self.b
    }

    pub fn result_layout(&self) -> &ResultLayout {
        &self.result
    }

    /// Shape of the global result.
    pub fn result_shape(&self) -> (usize, usize) {
        match self.operation {
            Operation::MatVec => (self.n, 1),
            Operation::MatMul => (self.n, self.n),
        }
    }

    /// Shape of the global second operand.
    pub fn b_shape(&self) -> (usize, usize) {
        self.result_shape()
    }

    pub fn local_shapes(&self, rank: usize) -> Result<LocalShapes> {
        let a = self.a.get(rank).ok_or_else(|| {
            DistError::topology(format!("no tile planned for rank {rank}"))
        })?;
        let b = match &self.b {
            OperandLayout::Replicated { rows, cols } => (*rows, *cols),
            OperandLayout::Partitioned(views) => views[rank].shape(),
        };
        let c = match &self.result {
            ResultLayout::Disjoint(views) => views[rank].shape(),
            ResultLayout::Summed { rows, cols } => (*rows, *cols),
            ResultLayout::RowSummed { dim, segments } => segments[rank / dim].shape(),
        };
        Ok(LocalShapes { a: a.shape(), b, c })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_plan() {
        let p = plan(4, 2, Strategy::Row, Operation::MatVec).unwrap();
        assert_eq!(p.tile_dim(), 2);
        assert_eq!(p.a_views()[1], BlockView::contiguous(8, 2, 4));
        assert_eq!(p.b_layout(), &OperandLayout::Replicated { rows: 4, cols: 1 });
        let shapes = p.local_shapes(1).unwrap();
        assert_eq!(shapes.a, (2, 4));
        assert_eq!(shapes.b, (4, 1));
        assert_eq!(shapes.c, (2, 1));
    }

    #[test]
    fn test_column_plan_sums() {
        let p = plan(6, 3, Strategy::Column, Operation::MatVec).unwrap();
        assert_eq!(p.a_views()[2], BlockView::new(4, 6, 2, 6));
        assert_eq!(p.result_layout(), &ResultLayout::Summed { rows: 6, cols: 1 });
        match p.b_layout() {
            OperandLayout::Partitioned(views) => {
                assert_eq!(views[2], BlockView::contiguous(4, 2, 1))
            }
            other => panic!("unexpected layout {other:?}"),
        }
    }

    #[test]
    fn test_column_matmul_splits_b_by_rows() {
        let p = plan(4, 2, Strategy::Column, Operation::MatMul).unwrap();
        let shapes = p.local_shapes(1).unwrap();
        assert_eq!(shapes.a, (4, 2));
        assert_eq!(shapes.b, (2, 4));
        assert_eq!(shapes.c, (4, 4));
    }

    #[test]
    fn test_block_offsets_and_stride() {
        let p = plan(6, 9, Strategy::Block, Operation::MatMul).unwrap();
        assert_eq!(p.tile_dim(), 2);
        // rank 5 is grid (1, 2): rows 2..4, cols 4..6
        let view = p.a_views()[5];
        assert_eq!(view, BlockView::new(2 * 6 + 4, 2, 2, 6));
        assert_eq!(view.byte_stride(), 6 * 8);
    }

    #[test]
    fn test_n_equal_to_workers() {
        let p = plan(4, 4, Strategy::Row, Operation::MatVec).unwrap();
        assert_eq!(p.local_shapes(3).unwrap().a, (1, 4));
        let p = plan(4, 4, Strategy::Column, Operation::MatVec).unwrap();
        assert_eq!(p.local_shapes(3).unwrap().a, (4, 1));
    }

    #[test]
    fn test_indivisible_is_rejected() {
        assert_eq!(
            plan(5, 4, Strategy::Block, Operation::MatMul),
            Err(DistError::InvalidPartition {
                n: 5,
                parts: 2,
                strategy: Strategy::Block
            })
        );
        assert!(matches!(
            plan(6, 4, Strategy::Row, Operation::MatVec),
            Err(DistError::InvalidPartition { parts: 4, .. })
        ));
    }

    #[test]
    fn test_non_square_workers_rejected() {
        assert!(matches!(
            plan(8, 8, Strategy::Block, Operation::MatMul),
            Err(DistError::NotPerfectSquare { workers: 8, .. })
        ));
    }

    #[test]
    fn test_block_matvec_plan() {
        let p = plan(6, 9, Strategy::Block, Operation::MatVec).unwrap();
        // rank 5 is grid (1, 2): block (1, 2) of A, x entries 4..6, y entries 2..4
        let shapes = p.local_shapes(5).unwrap();
        assert_eq!(shapes.a, (2, 2));
        assert_eq!(shapes.b, (2, 1));
        assert_eq!(shapes.c, (2, 1));
        match p.b_layout() {
            OperandLayout::Partitioned(views) => {
                assert_eq!(views[5], BlockView::contiguous(4, 2, 1))
            }
            other => panic!("unexpected layout {other:?}"),
        }
        match p.result_layout() {
            ResultLayout::RowSummed { dim, segments } => {
                assert_eq!(*dim, 3);
                assert_eq!(segments[1], BlockView::contiguous(2, 2, 1));
            }
            other => panic!("unexpected layout {other:?}"),
        }
        assert_eq!(p.result_shape(), (6, 1));
    }

    #[test]
    fn test_unaddressable_dimension() {
        let n = 1usize << (usize::BITS / 2);
        assert_eq!(
            plan(n, 1, Strategy::Row, Operation::MatVec),
            Err(DistError::DimensionTooLarge { n })
        );
        assert!(plan(n, 1, Strategy::Row, Operation::MatVec)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_huge_block_group_is_rejected() {
        assert!(matches!(
            plan(4, usize::MAX, Strategy::Block, Operation::MatMul),
            Err(DistError::NotPerfectSquare { .. })
        ));
    }

    #[test]
    fn test_plan_is_deterministic() {
        for strategy in Strategy::ALL {
            let first = plan(12, 4, strategy, Operation::MatMul).unwrap();
            let second = plan(12, 4, strategy, Operation::MatMul).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_tiles_cover_global_once() {
        for strategy in Strategy::ALL {
            let workers = if strategy == Strategy::Block { 9 } else { 3 };
            let p = plan(6, workers, strategy, Operation::MatMul).unwrap();
            let mut hits = vec![0usize; 36];
            for view in p.a_views() {
                for i in 0..view.rows {
                    for j in 0..view.cols {
                        hits[view.index(i, j).unwrap()] += 1;
                    }
                }
            }
            assert!(hits.iter().all(|&h| h == 1), "{strategy}: {hits:?}");
        }
    }
}
