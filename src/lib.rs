//! Distributed dense matrix-vector and matrix-matrix products.
//!
//! A fixed group of ranks runs as one SPMD [`World`]: rank 0 coordinates and
//! owns the global operands, every other rank only ever sees its own tiles.
//! Three decompositions are available:
//!
//! - [`Strategy::Row`]: row slices of A, B or x replicated, results
//!   concatenated;
//! - [`Strategy::Column`]: column slices of A with matching row slices of B,
//!   partial results summed;
//! - [`Strategy::Block`]: square blocks on a `d x d` torus, multiplied with
//!   Cannon's algorithm for matrices and summed along grid rows for vectors.
//!
//! ```no_run
//! use distmat::{multiply, Matrix, Problem, Strategy};
//!
//! let a = Matrix::identity(4)?;
//! let b = Matrix::identity(4)?;
//! let report = multiply(&Problem::mat_mul(a, b)?, Strategy::Block, 4)?;
//! assert_eq!(report.result, Matrix::identity(4)?);
//! # Ok::<(), distmat::DistError>(())
//! ```

pub mod cannon;
pub mod comm;
pub mod config;
pub mod distribute;
pub mod error;
pub mod kernel;
pub mod matrix;
pub mod orchestrator;
pub mod plan;
pub mod strategy;
pub mod topology;
pub mod view;
pub mod world;

pub use config::{ConfigError, RunConfig};
pub use error::{DistError, ErrorKind, Result};
pub use matrix::Matrix;
pub use orchestrator::{multiply, Problem, RunReport};
pub use strategy::{Operation, Strategy};
pub use world::World;
