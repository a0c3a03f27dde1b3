//! The fixed SPMD group.
//!
//! A [`World`] wires up `size` ranks once and runs them to completion: rank 0
//! as the [`Coordinator`] on the calling thread, every other rank as a
//! [`Worker`] on its own scoped thread. Membership never changes during a run.
//!
//! When a rank fails with anything other than an abort it rings every peer's
//! alarm, so the rest of the group fails fast instead of blocking on a
//! collective the failed rank will never join. A rank that stalls without
//! failing still hangs the group: there are no timeouts.

use std::thread;

use tracing::{debug, info_span, warn};

use crate::comm::{connect, Communicator};
use crate::error::{DistError, Result};
use crate::topology::COORDINATOR;

/// Rank 0. The only role that may hold global buffers.
#[derive(Debug)]
pub struct Coordinator {
    pub(crate) comm: Communicator,
}

/// Any rank other than 0. Only ever sees its own tiles.
#[derive(Debug)]
pub struct Worker {
    pub(crate) comm: Communicator,
}

impl Coordinator {
    pub fn communicator(&self) -> &Communicator {
        &self.comm
    }
}

impl Worker {
    pub fn communicator(&self) -> &Communicator {
        &self.comm
    }
}

pub struct World {
    comms: Vec<Communicator>,
}

/// Rings the peers' alarms if the owning rank unwinds.
struct AbortOnPanic<'a>(&'a Communicator);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort("panicked");
        }
    }
}

fn raise_alarm<T>(comm: &Communicator, outcome: &Result<T>) {
    if let Err(error) = outcome {
        if !matches!(error, DistError::Aborted { .. }) {
            warn!(rank = comm.rank(), %error, "rank failed, aborting group");
            comm.abort(&error.to_string());
        }
    }
}

/// Errors a rank sees because some other rank failed first.
fn is_consequence(error: &DistError) -> bool {
    matches!(
        error,
        DistError::Aborted { .. } | DistError::Disconnected { .. }
    )
}

/// Prefer the error that started a failure over the ones it caused.
fn root_cause(errors: Vec<DistError>) -> Option<DistError> {
    let mut first = None;
    for error in errors {
        if !is_consequence(&error) {
            return Some(error);
        }
        first.get_or_insert(error);
    }
    first
}

impl World {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(DistError::NoWorkers);
        }
        Ok(Self {
            comms: connect(size),
        })
    }

    pub fn size(&self) -> usize {
        self.comms.len()
    }

    /// Run `coordinator` on rank 0 and `worker` on every other rank.
    ///
    /// Returns the coordinator's value and the workers' values in rank order.
    /// If any rank fails, the error that triggered the failure is returned.
    pub fn run<T, W, FC, FW>(self, coordinator: FC, worker: FW) -> Result<(T, Vec<W>)>
    where
        FC: FnOnce(&Coordinator) -> Result<T>,
        FW: Fn(&Worker) -> Result<W> + Sync,
        W: Send,
    {
        let size = self.comms.len();
        let mut comms = self.comms.into_iter();
        let root = Coordinator {
            comm: comms.next().ok_or(DistError::NoWorkers)?,
        };
        debug!(size, "starting world");

        thread::scope(|s| {
            let worker = &worker;
            let mut handles = Vec::with_capacity(size.saturating_sub(1));
            let mut spawn_error = None;

            for comm in comms {
                let rank = comm.rank();
                let spawned = thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(s, move || {
                        let endpoint = Worker { comm };
                        let _span = info_span!("rank", rank).entered();
                        let _guard = AbortOnPanic(&endpoint.comm);
                        let outcome = worker(&endpoint);
                        raise_alarm(&endpoint.comm, &outcome);
                        outcome
                    });
                match spawned {
                    Ok(handle) => handles.push((rank, handle)),
                    Err(err) => {
                        spawn_error = Some(DistError::Spawn {
                            rank,
                            reason: err.to_string(),
                        });
                        break;
                    }
                }
            }

            let root_outcome = match spawn_error {
                Some(error) => {
                    root.comm.abort(&error.to_string());
                    Err(error)
                }
                None => {
                    let _span = info_span!("rank", rank = COORDINATOR).entered();
                    let _guard = AbortOnPanic(&root.comm);
                    let outcome = coordinator(&root);
                    raise_alarm(&root.comm, &outcome);
                    outcome
                }
            };

            let mut values = Vec::with_capacity(handles.len());
            let mut errors = Vec::new();
            for (rank, handle) in handles {
                match handle.join() {
                    Ok(Ok(value)) => values.push(value),
                    Ok(Err(error)) => errors.push(error),
                    Err(_) => errors.push(DistError::WorkerPanicked { rank }),
                }
            }

            match root_outcome {
                Ok(value) => match root_cause(errors) {
                    Some(error) => Err(error),
                    None => Ok((value, values)),
                },
                Err(error) if is_consequence(&error) => match root_cause(errors) {
                    Some(cause) if !is_consequence(&cause) => Err(cause),
                    _ => Err(error),
                },
                Err(error) => Err(error),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Body, Tag};

    #[test]
    fn test_zero_size_world() {
        assert!(matches!(World::new(0), Err(DistError::NoWorkers)));
    }

    #[test]
    fn test_single_rank_world() {
        let world = World::new(1).unwrap();
        let (value, workers) = world
            .run(|root| Ok(root.communicator().size()), |_: &Worker| Ok(()))
            .unwrap();
        assert_eq!(value, 1);
        assert!(workers.is_empty());
    }

    #[test]
    fn test_values_in_rank_order() {
        let world = World::new(4).unwrap();
        let (_, ranks) = world
            .run(|_| Ok(()), |w| Ok(w.communicator().rank()))
            .unwrap();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_failing_worker_aborts_waiting_coordinator() {
        let world = World::new(3).unwrap();
        let outcome = world.run(
            // waits for rank 2, which fails instead of sending
            |root| root.communicator().recv_values(2, Tag::Gather, 1),
            |w| {
                if w.communicator().rank() == 2 {
                    Err(DistError::Allocation {
                        what: "tile",
                        elements: 1 << 20,
                    })
                } else {
                    Ok(())
                }
            },
        );
        assert!(matches!(outcome, Err(DistError::Allocation { .. })));
    }

    #[test]
    fn test_panicking_worker_is_reported() {
        let world = World::new(2).unwrap();
        let outcome = world.run(
            |root| root.communicator().recv(1, Tag::Gather),
            |_: &Worker| -> Result<Body> { panic!("boom") },
        );
        assert!(matches!(outcome, Err(DistError::WorkerPanicked { rank: 1 })));
    }
}
