//! Virtual process topologies.
//!
//! Row and column strategies use a linear ring with rank 0 as coordinator.
//! The block strategy uses a `d x d` torus: ranks are laid out row-major and
//! both axes wrap, so shifting off one edge re-enters on the other. Cannon's
//! rotations are only correct with that wraparound.

use crate::error::{DistError, Result};
use crate::strategy::Strategy;

pub const COORDINATOR: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCoord {
    pub row: usize,
    pub col: usize,
}

/// Direction of a shift on the torus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Along a grid row: changes the column coordinate.
    Row,
    /// Along a grid column: changes the row coordinate.
    Column,
}

/// Ranks at the other end of a periodic shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    /// Rank this rank receives from.
    pub source: usize,
    /// Rank this rank sends to.
    pub dest: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbors {
    Ring {
        predecessor: usize,
        successor: usize,
    },
    Torus {
        left: usize,
        right: usize,
        up: usize,
        down: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Ring,
    Torus { dim: usize },
}

/// Immutable per-run topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTopology {
    workers: usize,
    shape: Shape,
}

/// Integer square root, if `n` is a perfect square.
pub fn exact_sqrt(n: usize) -> Option<usize> {
    let square = |r: usize| r.checked_mul(r);
    let mut root = (n as f64).sqrt() as usize;
    // correct float rounding in either direction; an overflowing square is
    // always above n
    while square(root).map_or(true, |sq| sq > n) {
        root -= 1;
    }
    while square(root + 1).is_some_and(|sq| sq <= n) {
        root += 1;
    }
    (square(root) == Some(n)).then_some(root)
}

impl ProcessTopology {
    pub fn build(workers: usize, strategy: Strategy) -> Result<Self> {
        if workers == 0 {
            return Err(DistError::NoWorkers);
        }
        let shape = match strategy {
            Strategy::Row | Strategy::Column => Shape::Ring,
            Strategy::Block => {
                let dim = exact_sqrt(workers)
                    .ok_or(DistError::NotPerfectSquare { workers, strategy })?;
                Shape::Torus { dim }
            }
        };
        Ok(Self { workers, shape })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_torus(&self) -> bool {
        matches!(self.shape, Shape::Torus { .. })
    }

    /// Side length of the torus.
    pub fn grid_dim(&self) -> Result<usize> {
        match self.shape {
            Shape::Torus { dim } => Ok(dim),
            Shape::Ring => Err(DistError::topology("a ring has no grid dimension")),
        }
    }

    pub fn is_coordinator(&self, rank: usize) -> bool {
        rank == COORDINATOR
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.workers {
            return Err(DistError::topology(format!(
                "rank {rank} outside a group of {}",
                self.workers
            )));
        }
        Ok(())
    }

    pub fn coords(&self, rank: usize) -> Result<GridCoord> {
        self.check_rank(rank)?;
        let dim = self.grid_dim()?;
        Ok(GridCoord {
            row: rank / dim,
            col: rank % dim,
        })
    }

    pub fn rank_of(&self, coord: GridCoord) -> Result<usize> {
        let dim = self.grid_dim()?;
        if coord.row >= dim || coord.col >= dim {
            return Err(DistError::topology(format!(
                "coordinate ({}, {}) outside a {dim}x{dim} grid",
                coord.row, coord.col
            )));
        }
        Ok(coord.row * dim + coord.col)
    }

    /// Periodic shift by `displacement` steps along `axis`.
    ///
    /// A negative displacement moves data toward lower coordinates: with
    /// `Axis::Row` and `-1` every rank sends to its left neighbour and
    /// receives from its right one.
    pub fn shift(&self, rank: usize, axis: Axis, displacement: isize) -> Result<Shift> {
        let GridCoord { row, col } = self.coords(rank)?;
        let dim = self.grid_dim()?;
        let wrap = |base: usize, delta: isize| -> usize {
            (base as isize + delta).rem_euclid(dim as isize) as usize
        };
        let (source, dest) = match axis {
            Axis::Row => (
                GridCoord { row, col: wrap(col, -displacement) },
                GridCoord { row, col: wrap(col, displacement) },
            ),
            Axis::Column => (
                GridCoord { row: wrap(row, -displacement), col },
                GridCoord { row: wrap(row, displacement), col },
            ),
        };
        Ok(Shift {
            source: self.rank_of(source)?,
            dest: self.rank_of(dest)?,
        })
    }

    pub fn neighbors(&self, rank: usize) -> Result<Neighbors> {
        self.check_rank(rank)?;
        match self.shape {
            Shape::Ring => Ok(Neighbors::Ring {
                predecessor: (rank + self.workers - 1) % self.workers,
                successor: (rank + 1) % self.workers,
            }),
            Shape::Torus { .. } => {
                let horizontal = self.shift(rank, Axis::Row, -1)?;
                let vertical = self.shift(rank, Axis::Column, -1)?;
                Ok(Neighbors::Torus {
                    left: horizontal.dest,
                    right: horizontal.source,
                    up: vertical.dest,
                    down: vertical.source,
                })
            }
        }
    }

    /// Check that every rank's neighbour links are in range and mutual.
    ///
    /// Runs once before distribution so no inconsistency can surface in the
    /// middle of a rotation round.
    pub fn validate(&self) -> Result<()> {
        if let Shape::Torus { dim } = self.shape {
            if dim * dim != self.workers {
                return Err(DistError::topology(format!(
                    "{dim}x{dim} grid cannot hold {} workers",
                    self.workers
                )));
            }
        }
        for rank in 0..self.workers {
            match self.neighbors(rank)? {
                Neighbors::Ring {
                    predecessor,
                    successor,
                } => {
                    self.expect_link(rank, successor, |n| match n {
                        Neighbors::Ring { predecessor, .. } => predecessor,
                        _ => usize::MAX,
                    })?;
                    self.expect_link(rank, predecessor, |n| match n {
                        Neighbors::Ring { successor, .. } => successor,
                        _ => usize::MAX,
                    })?;
                }
                Neighbors::Torus {
                    left,
                    right,
                    up,
                    down,
                } => {
                    self.expect_link(rank, left, |n| match n {
                        Neighbors::Torus { right, .. } => right,
                        _ => usize::MAX,
                    })?;
                    self.expect_link(rank, right, |n| match n {
                        Neighbors::Torus { left, .. } => left,
                        _ => usize::MAX,
                    })?;
                    self.expect_link(rank, up, |n| match n {
                        Neighbors::Torus { down, .. } => down,
                        _ => usize::MAX,
                    })?;
                    self.expect_link(rank, down, |n| match n {
                        Neighbors::Torus { up, .. } => up,
                        _ => usize::MAX,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn expect_link(
        &self,
        rank: usize,
        peer: usize,
        back: impl Fn(Neighbors) -> usize,
    ) -> Result<()> {
        let returned = back(self.neighbors(peer)?);
        if returned != rank {
            return Err(DistError::topology(format!(
                "rank {rank} links to {peer}, but {peer} links back to {returned}"
            )));
        }
        Ok(())
    }
}
