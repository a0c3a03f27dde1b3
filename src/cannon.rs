//! Cannon's algorithm on a `d x d` torus.
//!
//! Worker `(r, c)` starts with blocks `A(r, c)` and `B(r, c)`. The skew leaves
//! it holding `A(r, (c + r) mod d)` and `B((r + c) mod d, c)`, so in every
//! round the two local blocks share the same inner index. Each round then
//! accumulates one block product into `C(r, c)` and rotates A one step left
//! and B one step up. After `d` rounds `C(r, c)` is the full block of the
//! product.

use tracing::{debug, trace};

use crate::comm::{Communicator, Tag};
use crate::error::{DistError, Result};
use crate::kernel::{multiply_accumulate, Tile};
use crate::topology::{Axis, GridCoord, ProcessTopology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Skewing,
    /// About to run round `round` (0-based).
    Rotating { round: usize },
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CannonStats {
    pub rounds: usize,
    /// Tile messages this rank sent.
    pub messages: usize,
}

pub struct CannonScheduler<'a> {
    comm: &'a Communicator,
    topo: &'a ProcessTopology,
    coord: GridCoord,
    dim: usize,
    a: Tile,
    b: Tile,
    c: Tile,
    phase: Phase,
    stats: CannonStats,
}

impl<'a> CannonScheduler<'a> {
    pub fn new(
        comm: &'a Communicator,
        topo: &'a ProcessTopology,
        a: Tile,
        b: Tile,
    ) -> Result<Self> {
        if !topo.is_torus() {
            return Err(DistError::topology("Cannon's algorithm needs a torus"));
        }
        let dim = topo.grid_dim()?;
        if dim * dim != comm.size() {
            return Err(DistError::topology(format!(
                "{dim}x{dim} torus for a group of {}",
                comm.size()
            )));
        }
        if a.shape() != b.shape() || a.rows() != a.cols() {
            return Err(DistError::shape_mismatch(format!(
                "Cannon needs equal square blocks, got {}x{} and {}x{}",
                a.rows(),
                a.cols(),
                b.rows(),
                b.cols()
            )));
        }
        let coord = topo.coords(comm.rank())?;
        let c = Tile::zeros(a.rows(), a.cols())?;
        Ok(Self {
            comm,
            topo,
            coord,
            dim,
            a,
            b,
            c,
            phase: Phase::Skewing,
            stats: CannonStats::default(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> CannonStats {
        self.stats
    }

    /// The A block currently held.
    pub fn a_tile(&self) -> &Tile {
        &self.a
    }

    pub fn b_tile(&self) -> &Tile {
        &self.b
    }

    fn expect_phase(&self, expected: &str, ok: bool) -> Result<()> {
        if !ok {
            return Err(DistError::topology(format!(
                "rank {} cannot {expected} in phase {:?}",
                self.comm.rank(),
                self.phase
            )));
        }
        Ok(())
    }

    /// Shift A by `a_steps` along the row and B by `b_steps` along the
    /// column, toward lower coordinates.
    fn rotate(&mut self, a_steps: usize, b_steps: usize, tags: (Tag, Tag)) -> Result<()> {
        let rank = self.comm.rank();
        let row = self.topo.shift(rank, Axis::Row, -(a_steps as isize))?;
        if self
            .comm
            .exchange(row.dest, row.source, tags.0, self.a.buffer_mut())?
        {
            self.stats.messages += 1;
        }
        let col = self.topo.shift(rank, Axis::Column, -(b_steps as isize))?;
        if self
            .comm
            .exchange(col.dest, col.source, tags.1, self.b.buffer_mut())?
        {
            self.stats.messages += 1;
        }
        Ok(())
    }

    /// Initial alignment: A moves left by the row index, B up by the column
    /// index.
    pub fn skew(&mut self) -> Result<()> {
        self.expect_phase("skew", self.phase == Phase::Skewing)?;
        let GridCoord { row, col } = self.coord;
        self.rotate(row, col, (Tag::SkewA, Tag::SkewB))?;
        debug!(row, col, "skewed");
        self.phase = Phase::Rotating { round: 0 };
        Ok(())
    }

    /// One round: accumulate, then rotate unless this was the last round.
    pub fn step(&mut self) -> Result<()> {
        let round = match self.phase {
            Phase::Rotating { round } => round,
            _ => return self.expect_phase("rotate", false),
        };
        multiply_accumulate(&self.a, &self.b, &mut self.c)?;
        self.stats.rounds += 1;
        if round + 1 < self.dim {
            self.rotate(1, 1, (Tag::ShiftA, Tag::ShiftB))?;
            self.phase = Phase::Rotating { round: round + 1 };
        } else {
            self.phase = Phase::Done;
        }
        trace!(round, "round complete");
        Ok(())
    }

    /// Skew, run all `d` rounds, and hand back the finished C block.
    pub fn run(mut self) -> Result<(Tile, CannonStats)> {
        if self.phase == Phase::Skewing {
            self.skew()?;
        }
        while self.phase != Phase::Done {
            self.step()?;
        }
        debug!(rounds = self.stats.rounds, messages = self.stats.messages, "cannon done");
        let stats = self.stats;
        Ok((self.into_result()?, stats))
    }

    /// The C block. Only available once every round has run.
    pub fn into_result(self) -> Result<Tile> {
        self.expect_phase("read its result", self.phase == Phase::Done)?;
        Ok(self.c)
    }
}
