//! Point-to-point messaging between the ranks of a [`World`](crate::world::World).
//!
//! Every ordered pair of ranks gets its own unbounded channel, so a send never
//! blocks and a receive names exactly the peer it waits for. Each message
//! carries a [`Tag`] naming the protocol step it belongs to; receiving the
//! wrong tag or the wrong number of values is a fatal protocol error.
//!
//! Each rank also owns an alarm channel. [`Communicator::abort`] rings every
//! peer's alarm, and any receive in progress on those peers fails with
//! [`DistError::Aborted`] instead of waiting forever on a rank that is gone.

use std::fmt;
use std::mem;

use crossbeam::channel::{unbounded, Receiver, Select, Sender};
use tracing::trace;

use crate::error::{DistError, Result};
use crate::orchestrator::JobHeader;
use crate::topology::COORDINATOR;

/// Protocol step a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Job,
    ScatterA,
    ScatterB,
    Broadcast,
    Barrier,
    Gather,
    Reduce,
    RowReduce,
    SkewA,
    SkewB,
    ShiftA,
    ShiftB,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Job => "job header",
            Tag::ScatterA => "scatter of A",
            Tag::ScatterB => "scatter of B",
            Tag::Broadcast => "broadcast",
            Tag::Barrier => "barrier",
            Tag::Gather => "gather",
            Tag::Reduce => "reduction",
            Tag::RowReduce => "grid-row reduction",
            Tag::SkewA => "A skew",
            Tag::SkewB => "B skew",
            Tag::ShiftA => "A shift",
            Tag::ShiftB => "B shift",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Announces the run to every worker.
    Job(JobHeader),
    /// The coordinator refused the run before distribution.
    Cancel(String),
    Values(Vec<f64>),
}

impl Body {
    pub(crate) fn describe(&self) -> String {
        match self {
            Body::Job(_) => "a job header".to_string(),
            Body::Cancel(_) => "a cancellation".to_string(),
            Body::Values(v) => format!("{} values", v.len()),
        }
    }
}

#[derive(Debug)]
pub struct Envelope {
    tag: Tag,
    body: Body,
}

/// One rank's endpoint into the group.
pub struct Communicator {
    rank: usize,
    size: usize,
    /// Indexed by destination rank.
    outboxes: Vec<Sender<Envelope>>,
    /// Indexed by source rank.
    inboxes: Vec<Receiver<Envelope>>,
    /// Alarm channels of every rank, this one included so ours never
    /// disconnects while we are alive.
    alarms: Vec<Sender<String>>,
    alarm: Receiver<String>,
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

/// Wire up a fully connected group of `size` ranks.
pub(crate) fn connect(size: usize) -> Vec<Communicator> {
    let mut outboxes: Vec<Vec<Sender<Envelope>>> =
        (0..size).map(|_| Vec::with_capacity(size)).collect();
    let mut inboxes: Vec<Vec<Receiver<Envelope>>> =
        (0..size).map(|_| Vec::with_capacity(size)).collect();
    for src in 0..size {
        for dst in inboxes.iter_mut() {
            let (tx, rx) = unbounded();
            outboxes[src].push(tx);
            dst.push(rx);
        }
    }

    let (alarm_tx, alarm_rx): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();

    outboxes
        .into_iter()
        .zip(inboxes)
        .zip(alarm_rx)
        .enumerate()
        .map(|(rank, ((outboxes, inboxes), alarm))| Communicator {
            rank,
            size,
            outboxes,
            inboxes,
            alarms: alarm_tx.clone(),
            alarm,
        })
        .collect()
}

impl Communicator {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn check_peer(&self, peer: usize) -> Result<()> {
        if peer >= self.size {
            return Err(DistError::topology(format!(
                "rank {} addressed rank {peer} in a group of {}",
                self.rank, self.size
            )));
        }
        Ok(())
    }

    pub fn send(&self, dest: usize, tag: Tag, body: Body) -> Result<()> {
        self.check_peer(dest)?;
        trace!(rank = self.rank, dest, %tag, "send");
        self.outboxes[dest]
            .send(Envelope { tag, body })
            .map_err(|_| DistError::Disconnected {
                rank: self.rank,
                peer: dest,
            })
    }

    /// Block until `source` delivers the message for step `tag`, or until a
    /// peer aborts the run.
    pub fn recv(&self, source: usize, tag: Tag) -> Result<Body> {
        self.check_peer(source)?;
        let inbox = &self.inboxes[source];

        let mut select = Select::new();
        let data = select.recv(inbox);
        let alarm = select.recv(&self.alarm);
        let op = select.select();

        if op.index() == alarm {
            let reason = op
                .recv(&self.alarm)
                .unwrap_or_else(|_| "alarm channel closed".to_string());
            return Err(DistError::aborted(reason));
        }
        debug_assert_eq!(op.index(), data);

        let envelope = op.recv(inbox).map_err(|_| DistError::Disconnected {
            rank: self.rank,
            peer: source,
        })?;
        trace!(rank = self.rank, source, tag = %envelope.tag, "recv");
        if envelope.tag != tag {
            return Err(DistError::unexpected_tag(
                self.rank,
                source,
                tag,
                envelope.tag,
            ));
        }
        Ok(envelope.body)
    }

    /// Receive exactly `len` values for step `tag`.
    pub fn recv_values(&self, source: usize, tag: Tag, len: usize) -> Result<Vec<f64>> {
        match self.recv(source, tag)? {
            Body::Values(values) if values.len() == len => Ok(values),
            other => Err(DistError::protocol(
                self.rank,
                source,
                format!("{len} values for the {tag}"),
                other.describe(),
            )),
        }
    }

    /// Send `buf` to `dest` and replace it with the same number of values
    /// from `source`, as one step.
    ///
    /// Sends never block, so every rank of a shift can call this at once
    /// without deadlocking regardless of order. Returns `false` when both
    /// peers are this rank and nothing had to move.
    pub fn exchange(
        &self,
        dest: usize,
        source: usize,
        tag: Tag,
        buf: &mut Vec<f64>,
    ) -> Result<bool> {
        if dest == self.rank && source == self.rank {
            self.check_peer(dest)?;
            return Ok(false);
        }
        let outgoing = mem::take(buf);
        let len = outgoing.len();
        self.send(dest, tag, Body::Values(outgoing))?;
        *buf = self.recv_values(source, tag, len)?;
        Ok(true)
    }

    /// Every rank reports to the coordinator, which then releases them all.
    pub fn barrier(&self) -> Result<()> {
        if self.rank == COORDINATOR {
            for peer in 1..self.size {
                self.recv_values(peer, Tag::Barrier, 0)?;
            }
            for peer in 1..self.size {
                self.send(peer, Tag::Barrier, Body::Values(Vec::new()))?;
            }
        } else {
            self.send(COORDINATOR, Tag::Barrier, Body::Values(Vec::new()))?;
            self.recv_values(COORDINATOR, Tag::Barrier, 0)?;
        }
        Ok(())
    }

    /// Ring every peer's alarm. Peers that already finished are skipped.
    pub fn abort(&self, reason: &str) {
        for (peer, alarm) in self.alarms.iter().enumerate() {
            if peer != self.rank {
                let _ = alarm.send(format!("rank {}: {reason}", self.rank));
            }
        }
    }
}
