//! End-to-end runs: validate, announce, distribute, compute, collect.
//!
//! Rank 0 runs [`coordinate`], every other rank runs [`serve`]. Both derive
//! the same topology and plan from the broadcast [`JobHeader`] and then walk
//! through the same collective steps in [`execute`].

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cannon::CannonScheduler;
use crate::comm::{Body, Tag};
use crate::distribute::Role;
use crate::error::{DistError, Result};
use crate::kernel::{multiply_accumulate, Tile};
use crate::matrix::Matrix;
use crate::plan::{plan, OperandLayout, PartitionPlan, ResultLayout};
use crate::strategy::{Operation, Strategy};
use crate::topology::{ProcessTopology, COORDINATOR};
use crate::world::{Coordinator, Worker, World};

/// Everything a worker needs to rebuild the run's topology and plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHeader {
    pub n: usize,
    pub strategy: Strategy,
    pub operation: Operation,
}

/// The global operands, held only by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    a: Matrix,
    /// `n x 1` for a matrix-vector product.
    b: Matrix,
    operation: Operation,
}

impl Problem {
    /// `y = A * x` for a square `A`.
    pub fn mat_vec(a: Matrix, x: Vec<f64>) -> Result<Self> {
        let problem = Self {
            a,
            b: Matrix::column_vector(x),
            operation: Operation::MatVec,
        };
        problem.validate()?;
        Ok(problem)
    }

    /// `C = A * B` for square `A` and `B` of the same order.
    pub fn mat_mul(a: Matrix, b: Matrix) -> Result<Self> {
        let problem = Self {
            a,
            b,
            operation: Operation::MatMul,
        };
        problem.validate()?;
        Ok(problem)
    }

    fn validate(&self) -> Result<()> {
        let n = self.a.rows();
        if n == 0 {
            return Err(DistError::ZeroDimension);
        }
        if !self.a.is_square() {
            return Err(DistError::shape_mismatch(format!(
                "A must be square, got {}x{}",
                self.a.rows(),
                self.a.cols()
            )));
        }
        let expected = match self.operation {
            Operation::MatVec => (n, 1),
            Operation::MatMul => (n, n),
        };
        if (self.b.rows(), self.b.cols()) != expected {
            return Err(DistError::shape_mismatch(format!(
                "A is {n}x{n} but the second operand is {}x{}",
                self.b.rows(),
                self.b.cols()
            )));
        }
        Ok(())
    }

    pub fn n(&self) -> usize {
        self.a.rows()
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn a(&self) -> &Matrix {
        &self.a
    }

    pub fn b(&self) -> &Matrix {
        &self.b
    }

    /// Serial product to check distributed results against.
    pub fn reference(&self) -> Result<Matrix> {
        self.a.product(&self.b)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// `n x n`, or `n x 1` for a matrix-vector product.
    pub result: Matrix,
    /// Wall time at the coordinator between the post-distribution barrier
    /// and the start of collection.
    pub compute_time: Duration,
    pub strategy: Strategy,
    pub workers: usize,
}

fn prepare(header: &JobHeader, workers: usize) -> Result<(ProcessTopology, PartitionPlan)> {
    let plan = plan(header.n, workers, header.strategy, header.operation)?;
    let topo = ProcessTopology::build(workers, header.strategy)?;
    topo.validate()?;
    Ok((topo, plan))
}

/// Rank 0's side of a run.
///
/// Configuration errors are detected here before anything is distributed;
/// workers are sent a cancellation instead of a header and stop without
/// waiting for data.
pub fn coordinate(root: &Coordinator, problem: &Problem, strategy: Strategy) -> Result<RunReport> {
    let comm = root.communicator();
    let workers = comm.size();
    let header = JobHeader {
        n: problem.n(),
        strategy,
        operation: problem.operation(),
    };

    let (topo, plan) = match problem.validate().and_then(|()| prepare(&header, workers)) {
        Ok(prepared) => prepared,
        Err(error) => {
            warn!(%error, "refusing job");
            for peer in 1..workers {
                comm.send(peer, Tag::Job, Body::Cancel(error.to_string()))?;
            }
            return Err(error);
        }
    };
    for peer in 1..workers {
        comm.send(peer, Tag::Job, Body::Job(header))?;
    }
    info!(n = header.n, %strategy, operation = %header.operation, workers, "job started");

    let (collected, compute_time) =
        execute(root, &topo, &plan, problem.a().as_slice(), problem.b().as_slice())?;
    let (rows, cols) = plan.result_shape();
    let result = Matrix::from_vec(rows, cols, collected)?;
    info!(?compute_time, "job finished");

    Ok(RunReport {
        result,
        compute_time,
        strategy,
        workers,
    })
}

/// A worker's side of a run.
pub fn serve(worker: &Worker) -> Result<()> {
    let comm = worker.communicator();
    let header = match comm.recv(COORDINATOR, Tag::Job)? {
        Body::Job(header) => header,
        Body::Cancel(reason) => {
            debug!(%reason, "job cancelled");
            return Err(DistError::aborted(reason));
        }
        other => {
            return Err(DistError::protocol(
                comm.rank(),
                COORDINATOR,
                "a job header",
                other.describe(),
            ))
        }
    };
    let (topo, plan) = prepare(&header, comm.size())?;
    execute(worker, &topo, &plan, (), ())?;
    Ok(())
}

/// The collective steps shared by every rank.
///
/// Returns what this role collects and the local compute time.
pub fn execute<R: Role>(
    role: &R,
    topo: &ProcessTopology,
    plan: &PartitionPlan,
    a: R::Source<'_>,
    b: R::Source<'_>,
) -> Result<(R::Collected, Duration)> {
    let comm = role.comm();
    let shapes = plan.local_shapes(comm.rank())?;

    let a_local = role.scatter(a, plan.a_views(), Tag::ScatterA)?;
    let b_local = match plan.b_layout() {
        OperandLayout::Replicated { rows, cols } => role.broadcast(b, rows * cols)?,
        OperandLayout::Partitioned(views) => role.scatter(b, views, Tag::ScatterB)?,
    };
    let a_tile = Tile::from_parts(shapes.a.0, shapes.a.1, a_local)?;
    let b_tile = Tile::from_parts(shapes.b.0, shapes.b.1, b_local)?;
    comm.barrier()?;

    let started = Instant::now();
    let c_tile = match (plan.strategy(), plan.operation()) {
        (Strategy::Block, Operation::MatMul) => {
            let (c, stats) = CannonScheduler::new(comm, topo, a_tile, b_tile)?.run()?;
            debug!(rounds = stats.rounds, messages = stats.messages, "cannon finished");
            c
        }
        _ => {
            let mut c = Tile::zeros(shapes.c.0, shapes.c.1)?;
            multiply_accumulate(&a_tile, &b_tile, &mut c)?;
            c
        }
    };
    let compute_time = started.elapsed();

    let collected = match plan.result_layout() {
        ResultLayout::Disjoint(views) => {
            let (rows, cols) = plan.result_shape();
            role.gather(c_tile.into_vec(), views, rows * cols)?
        }
        ResultLayout::Summed { .. } => role.reduce_sum(c_tile.into_vec())?,
        ResultLayout::RowSummed { dim, segments } => {
            let (rows, cols) = plan.result_shape();
            role.gather_row_sums(c_tile.into_vec(), *dim, segments, rows * cols)?
        }
    };
    Ok((collected, compute_time))
}

/// Run `problem` on a fresh group of `workers` ranks.
pub fn multiply(problem: &Problem, strategy: Strategy, workers: usize) -> Result<RunReport> {
    let (report, _) = World::new(workers)?.run(
        |root| coordinate(root, problem, strategy),
        serve,
    )?;
    Ok(report)
}
