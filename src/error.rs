//! Error taxonomy for distributed runs.
//!
//! Every failure here is a structural precondition violation, not a transient
//! fault, so nothing is retried: the run fails and the message names the
//! precondition that did not hold.

use thiserror::Error;

use crate::comm::Tag;
use crate::strategy::Strategy;

/// Broad class of a [`DistError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad sizes or an unsupported combination, detected before distribution.
    Configuration,
    /// A tile or buffer could not be allocated.
    Allocation,
    /// Neighbour computation inconsistent with the worker count.
    Topology,
    /// Message-passing failure between ranks.
    Communication,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistError {
    #[error("matrix dimension must be positive")]
    ZeroDimension,

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("an {n}x{n} matrix has more elements than this platform can address")]
    DimensionTooLarge { n: usize },

    #[error("n = {n} cannot be split evenly into {parts} partitions for the {strategy} strategy")]
    InvalidPartition {
        n: usize,
        parts: usize,
        strategy: Strategy,
    },

    #[error("the {strategy} strategy needs a perfect-square worker count, got {workers}")]
    NotPerfectSquare { workers: usize, strategy: Strategy },

    #[error("operand shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("failed to allocate {elements} elements for {what}")]
    Allocation { what: &'static str, elements: usize },

    #[error("failed to start rank {rank}: {reason}")]
    Spawn { rank: usize, reason: String },

    #[error("topology error: {0}")]
    Topology(String),

    #[error("rank {rank} expected {expected} from rank {peer}, got {actual}")]
    Protocol {
        rank: usize,
        peer: usize,
        expected: String,
        actual: String,
    },

    #[error("rank {rank} lost its link to rank {peer}")]
    Disconnected { rank: usize, peer: usize },

    #[error("run aborted: {reason}")]
    Aborted { reason: String },

    #[error("rank {rank} panicked")]
    WorkerPanicked { rank: usize },
}

impl DistError {
    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }

    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology(message.into())
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// A received message did not carry the tag or length the protocol step
    /// expected.
    pub fn protocol(
        rank: usize,
        peer: usize,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            rank,
            peer,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn unexpected_tag(rank: usize, peer: usize, expected: Tag, actual: Tag) -> Self {
        Self::protocol(rank, peer, expected.to_string(), actual.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ZeroDimension
            | Self::NoWorkers
            | Self::DimensionTooLarge { .. }
            | Self::InvalidPartition { .. }
            | Self::NotPerfectSquare { .. }
            | Self::ShapeMismatch(_) => ErrorKind::Configuration,
            Self::Allocation { .. } | Self::Spawn { .. } => ErrorKind::Allocation,
            Self::Topology(_) => ErrorKind::Topology,
            Self::Protocol { .. }
            | Self::Disconnected { .. }
            | Self::Aborted { .. }
            | Self::WorkerPanicked { .. } => ErrorKind::Communication,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

pub type Result<T> = std::result::Result<T, DistError>;

/// Element count of a `rows x cols` buffer, or an allocation error when it
/// does not fit in `usize`.
pub fn element_count(what: &'static str, rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols).ok_or(DistError::Allocation {
        what,
        elements: usize::MAX,
    })
}

/// Allocate a zero-filled buffer, reporting failure instead of aborting the
/// process.
pub fn alloc_zeroed(what: &'static str, elements: usize) -> Result<Vec<f64>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(elements)
        .map_err(|_| DistError::Allocation { what, elements })?;
    buf.resize(elements, 0.0);
    Ok(buf)
}
