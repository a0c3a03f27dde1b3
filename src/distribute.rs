//! Moving tiles between the coordinator's global buffers and the workers.
//!
//! The [`Role`] trait gives every rank the same collective calls, but only the
//! [`Coordinator`] implementation takes a global buffer as its source and
//! returns one when collecting. A [`Worker`] passes `()` and gets `()` back,
//! so a worker touching global data does not compile.
//!
//! All operations here are collectives: every rank of the world must make the
//! matching call in the same step.

use tracing::debug;

use crate::comm::{Body, Communicator, Tag};
use crate::error::{alloc_zeroed, DistError, Result};
use crate::topology::COORDINATOR;
use crate::view::BlockView;
use crate::world::{Coordinator, Worker};

pub trait Role {
    /// What this role contributes as the source of a scatter or broadcast.
    type Source<'a>: Copy;
    /// What this role ends up with after a gather or reduction.
    type Collected;

    fn comm(&self) -> &Communicator;

    /// Deliver the region under `views[k]` to rank `k`; returns this rank's
    /// tile as a contiguous buffer.
    fn scatter(&self, source: Self::Source<'_>, views: &[BlockView], tag: Tag)
        -> Result<Vec<f64>>;

    /// Deliver all `len` values of the source to every rank.
    fn broadcast(&self, source: Self::Source<'_>, len: usize) -> Result<Vec<f64>>;

    /// Place rank `k`'s tile at `views[k]` of a `global_len` buffer at the
    /// coordinator.
    fn gather(&self, local: Vec<f64>, views: &[BlockView], global_len: usize)
        -> Result<Self::Collected>;

    /// Element-wise sum of every rank's buffer, at the coordinator.
    fn reduce_sum(&self, local: Vec<f64>) -> Result<Self::Collected>;

    /// On a `dim x dim` grid, sum the buffers of each grid row at the row's
    /// first rank, then place row `r`'s sum at `segments[r]` of a
    /// `global_len` buffer at the coordinator.
    fn gather_row_sums(
        &self,
        local: Vec<f64>,
        dim: usize,
        segments: &[BlockView],
        global_len: usize,
    ) -> Result<Self::Collected>;
}

fn check_views(comm: &Communicator, views: &[BlockView]) -> Result<()> {
    if views.len() != comm.size() {
        return Err(DistError::topology(format!(
            "{} tiles planned for a group of {}",
            views.len(),
            comm.size()
        )));
    }
    Ok(())
}

fn check_grid(comm: &Communicator, dim: usize, segments: &[BlockView]) -> Result<()> {
    if dim.checked_mul(dim) != Some(comm.size()) || segments.len() != dim {
        return Err(DistError::topology(format!(
            "{} row segments on a {dim}x{dim} grid for a group of {}",
            segments.len(),
            comm.size()
        )));
    }
    Ok(())
}

/// Sum `local` across this rank's grid row. The row's first rank gets the
/// total; every other rank gets `None`.
fn sum_along_row(comm: &Communicator, dim: usize, local: Vec<f64>) -> Result<Option<Vec<f64>>> {
    let rank = comm.rank();
    let leader = rank - rank % dim;
    if rank != leader {
        comm.send(leader, Tag::RowReduce, Body::Values(local))?;
        return Ok(None);
    }
    let mut total = local;
    for peer in leader + 1..leader + dim {
        let part = comm.recv_values(peer, Tag::RowReduce, total.len())?;
        for (acc, v) in total.iter_mut().zip(&part) {
            *acc += v;
        }
    }
    Ok(Some(total))
}

impl Role for Coordinator {
    type Source<'a> = &'a [f64];
    type Collected = Vec<f64>;

    fn comm(&self) -> &Communicator {
        &self.comm
    }

    fn scatter(&self, source: &[f64], views: &[BlockView], tag: Tag) -> Result<Vec<f64>> {
        check_views(&self.comm, views)?;
        let mut own = None;
        for (rank, view) in views.iter().enumerate() {
            let tile = view.extract(source)?;
            if rank == COORDINATOR {
                own = Some(tile);
            } else {
                self.comm.send(rank, tag, Body::Values(tile))?;
            }
        }
        debug!(%tag, tiles = views.len(), "scattered");
        own.ok_or_else(|| DistError::topology("no tile planned for the coordinator"))
    }

    fn broadcast(&self, source: &[f64], len: usize) -> Result<Vec<f64>> {
        if source.len() != len {
            return Err(DistError::shape_mismatch(format!(
                "broadcast of {len} values from a buffer of {}",
                source.len()
            )));
        }
        for peer in 1..self.comm.size() {
            self.comm
                .send(peer, Tag::Broadcast, Body::Values(source.to_vec()))?;
        }
        Ok(source.to_vec())
    }

    fn gather(&self, local: Vec<f64>, views: &[BlockView], global_len: usize) -> Result<Vec<f64>> {
        check_views(&self.comm, views)?;
        let mut global = alloc_zeroed("gathered result", global_len)?;
        views[COORDINATOR].place(&local, &mut global)?;
        for (rank, view) in views.iter().enumerate().skip(1) {
            let tile = self.comm.recv_values(rank, Tag::Gather, view.len())?;
            view.place(&tile, &mut global)?;
        }
        debug!(tiles = views.len(), "gathered");
        Ok(global)
    }

    fn reduce_sum(&self, local: Vec<f64>) -> Result<Vec<f64>> {
        let mut total = local;
        for rank in 1..self.comm.size() {
            let part = self.comm.recv_values(rank, Tag::Reduce, total.len())?;
            for (acc, v) in total.iter_mut().zip(&part) {
                *acc += v;
            }
        }
        debug!(len = total.len(), "reduced");
        Ok(total)
    }

    fn gather_row_sums(
        &self,
        local: Vec<f64>,
        dim: usize,
        segments: &[BlockView],
        global_len: usize,
    ) -> Result<Vec<f64>> {
        check_grid(&self.comm, dim, segments)?;
        let own = sum_along_row(&self.comm, dim, local)?
            .ok_or_else(|| DistError::topology("the coordinator must lead grid row 0"))?;
        let mut global = alloc_zeroed("gathered result", global_len)?;
        segments[0].place(&own, &mut global)?;
        for (row, segment) in segments.iter().enumerate().skip(1) {
            let sum = self.comm.recv_values(row * dim, Tag::Gather, segment.len())?;
            segment.place(&sum, &mut global)?;
        }
        debug!(rows = dim, "gathered row sums");
        Ok(global)
    }
}

impl Role for Worker {
    type Source<'a> = ();
    type Collected = ();

    fn comm(&self) -> &Communicator {
        &self.comm
    }

    fn scatter(&self, _source: (), views: &[BlockView], tag: Tag) -> Result<Vec<f64>> {
        check_views(&self.comm, views)?;
        let rank = self.comm.rank();
        self.comm.recv_values(COORDINATOR, tag, views[rank].len())
    }

    fn broadcast(&self, _source: (), len: usize) -> Result<Vec<f64>> {
        self.comm.recv_values(COORDINATOR, Tag::Broadcast, len)
    }

    fn gather(&self, local: Vec<f64>, views: &[BlockView], _global_len: usize) -> Result<()> {
        check_views(&self.comm, views)?;
        self.comm.send(COORDINATOR, Tag::Gather, Body::Values(local))
    }

    fn reduce_sum(&self, local: Vec<f64>) -> Result<()> {
        self.comm.send(COORDINATOR, Tag::Reduce, Body::Values(local))
    }

    fn gather_row_sums(
        &self,
        local: Vec<f64>,
        dim: usize,
        segments: &[BlockView],
        _global_len: usize,
    ) -> Result<()> {
        check_grid(&self.comm, dim, segments)?;
        if let Some(sum) = sum_along_row(&self.comm, dim, local)? {
            self.comm.send(COORDINATOR, Tag::Gather, Body::Values(sum))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{plan, OperandLayout};
    use crate::strategy::{Operation, Strategy};
    use crate::world::World;

    fn sequence(len: usize) -> Vec<f64> {
        (0..len).map(|v| v as f64 * 0.5 - 3.0).collect()
    }

    fn round_trip(n: usize, workers: usize, strategy: Strategy) {
        let p = plan(n, workers, strategy, Operation::MatMul).unwrap();
        let global = sequence(n * n);
        let views = p.a_views();

        let (collected, _) = World::new(workers)
            .unwrap()
            .run(
                |root| {
                    let tile = root.scatter(&global, views, Tag::ScatterA)?;
                    root.gather(tile, views, n * n)
                },
                |worker| {
                    let tile = worker.scatter((), views, Tag::ScatterA)?;
                    worker.gather(tile, views, n * n)
                },
            )
            .unwrap();
        assert_eq!(collected, global, "{strategy} n={n} workers={workers}");
    }

    #[test]
    fn test_gather_inverts_scatter() {
        round_trip(6, 3, Strategy::Row);
        round_trip(6, 3, Strategy::Column);
        round_trip(6, 9, Strategy::Block);
        round_trip(4, 4, Strategy::Block);
        round_trip(3, 1, Strategy::Block);
    }

    #[test]
    fn test_scatter_delivers_planned_region() {
        let p = plan(4, 4, Strategy::Block, Operation::MatMul).unwrap();
        let global = sequence(16);
        let views = p.a_views();

        let (own, tiles) = World::new(4)
            .unwrap()
            .run(
                |root| root.scatter(&global, views, Tag::ScatterA),
                |worker| worker.scatter((), views, Tag::ScatterA),
            )
            .unwrap();
        assert_eq!(own, views[0].extract(&global).unwrap());
        for (k, tile) in tiles.iter().enumerate() {
            assert_eq!(tile, &views[k + 1].extract(&global).unwrap());
        }
    }

    #[test]
    fn test_reduce_sums_partials() {
        let (total, _) = World::new(3)
            .unwrap()
            .run(
                |root| root.reduce_sum(vec![1.0, 2.0]),
                |worker| {
                    let r = worker.comm().rank() as f64;
                    worker.reduce_sum(vec![r, 10.0 * r])
                },
            )
            .unwrap();
        assert_eq!(total, vec![4.0, 32.0]);
    }

    #[test]
    fn test_row_sums_land_in_their_segments() {
        // 3x3 grid; rank r*3 + c contributes [r + c, 1]
        let segments: Vec<BlockView> = (0..3)
            .map(|r| BlockView::contiguous(2 * r, 2, 1))
            .collect();
        let partial = |rank: usize| vec![(rank / 3 + rank % 3) as f64, 1.0];

        let (global, _) = World::new(9)
            .unwrap()
            .run(
                |root| root.gather_row_sums(partial(0), 3, &segments, 6),
                |worker| {
                    let rank = worker.comm().rank();
                    worker.gather_row_sums(partial(rank), 3, &segments, 6)
                },
            )
            .unwrap();
        // row r sums to 3r + 3 in the first entry and 3 in the second
        assert_eq!(global, vec![3.0, 3.0, 6.0, 3.0, 9.0, 3.0]);
    }

    #[test]
    fn test_row_sums_reject_non_grid_group() {
        let segments = vec![BlockView::contiguous(0, 1, 1); 2];
        let outcome = World::new(3).unwrap().run(
            |root| root.gather_row_sums(vec![1.0], 2, &segments, 2),
            |worker| worker.gather_row_sums(vec![1.0], 2, &segments, 2),
        );
        assert!(matches!(outcome, Err(DistError::Topology(_))));
    }

    #[test]
    fn test_broadcast_replicates() {
        let p = plan(4, 2, Strategy::Row, Operation::MatVec).unwrap();
        let len = match p.b_layout() {
            OperandLayout::Replicated { rows, cols } => rows * cols,
            other => panic!("unexpected layout {other:?}"),
        };
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let (own, others) = World::new(2)
            .unwrap()
            .run(|root| root.broadcast(&x, len), |worker| worker.broadcast((), len))
            .unwrap();
        assert_eq!(own, x);
        assert_eq!(others, vec![x.clone()]);
    }

    #[test]
    fn test_broadcast_length_mismatch() {
        let outcome = World::new(2).unwrap().run(
            |root| root.broadcast(&[1.0, 2.0], 3),
            |worker| worker.broadcast((), 3),
        );
        assert!(matches!(outcome, Err(DistError::ShapeMismatch(_))));
    }
}
