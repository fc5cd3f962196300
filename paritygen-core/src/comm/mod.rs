// vim: tw=80
//! Message-passing transport seam
//!
//! The protocol is written against the [`Comm`] trait rather than a concrete
//! fabric.  The contract is the usual rank-addressed one: point-to-point
//! messages between a fixed (sender, receiver) pair are delivered in send
//! order, and a non-blocking send's completion future must be awaited before
//! another send is started to the same peer.  Collectives (gather, broadcast)
//! are built on top of the point-to-point primitives and block every
//! participant until the collective completes.
//!
//! [`mem`] provides the in-process fabric used by the CLI harness and the
//! test suite: one tokio task per rank, bounded channels per ordered pair.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::types::*;

pub mod mem;

/// Completion future of a non-blocking send
pub type SendFut = BoxFuture<'static, Result<()>>;

/// Rank-addressed, ordered, bidirectional message passing
pub trait Comm: Send {
    /// This process's rank
    fn rank(&self) -> Rank;

    /// Total number of ranks in the cluster, `1 + 2*T`
    fn nranks(&self) -> usize;

    /// Send `msg` to `to`, completing once the peer can receive it
    fn send(&mut self, to: Rank, msg: Bytes)
        -> impl std::future::Future<Output = Result<()>> + Send;

    /// Start a send without waiting for completion.
    ///
    /// The caller must await the returned future before starting another
    /// send to the same peer.
    fn send_nowait(&self, to: Rank, msg: Bytes) -> SendFut;

    /// Receive the next message from any peer
    fn recv_any(&mut self)
        -> impl std::future::Future<Output = Result<(Rank, Bytes)>> + Send;

    /// Receive the next message from `from` specifically
    fn recv_from(&mut self, from: Rank)
        -> impl std::future::Future<Output = Result<Bytes>> + Send;

    /// Receive one message from each of `from` concurrently.
    ///
    /// `from` must be sorted ascending and free of duplicates; the result is
    /// aligned with it.
    fn recv_each(&mut self, from: &[Rank])
        -> impl std::future::Future<Output = Result<Vec<Bytes>>> + Send;
}

/// A fixed subset of the rank space participating in collectives.
///
/// Scanners leave the cluster after the scan phase, so the work-distribution
/// collectives run over a group that excludes them.
#[derive(Clone, Debug)]
pub struct Group {
    members: Vec<Rank>,
}

impl Group {
    /// `members` in group-rank order
    pub fn new(members: Vec<Rank>) -> Self {
        debug_assert!(members.windows(2).all(|w| w[0] < w[1]));
        Group { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// World rank of group rank `i`
    pub fn member(&self, i: usize) -> Rank {
        self.members[i]
    }

    /// Group rank of world rank `r`, if `r` is a member
    pub fn rank_of(&self, r: Rank) -> Option<usize> {
        self.members.iter().position(|m| *m == r)
    }
}

/// Gather an 8-byte payload from every rank to the coordinator.
///
/// Returns the payloads indexed by rank on the coordinator, `None` elsewhere.
pub async fn gather<C: Comm>(comm: &mut C, root: Rank, payload: Bytes)
    -> Result<Option<Vec<Bytes>>>
{
    if comm.rank() == root {
        let n = comm.nranks();
        let mut all = Vec::with_capacity(n);
        for r in 0..n as Rank {
            if r == root {
                all.push(payload.clone());
            } else {
                all.push(comm.recv_from(r).await?);
            }
        }
        Ok(Some(all))
    } else {
        comm.send(root, payload).await?;
        Ok(None)
    }
}

/// Broadcast from group rank `root` to the whole group.
///
/// The root passes `Some(payload)` and gets it back; every other member
/// passes `None` and receives the root's payload.
pub async fn bcast<C: Comm>(comm: &mut C, group: &Group, root: usize,
                            payload: Option<Bytes>) -> Result<Bytes>
{
    let me = group.rank_of(comm.rank())
        .ok_or(Error::Malformed(comm.rank()))?;
    if me == root {
        let msg = payload.ok_or(Error::Malformed(comm.rank()))?;
        for i in 0..group.len() {
            if i != root {
                comm.send(group.member(i), msg.clone()).await?;
            }
        }
        Ok(msg)
    } else {
        comm.recv_from(group.member(root)).await
    }
}
