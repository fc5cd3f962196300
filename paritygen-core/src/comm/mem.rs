// vim: tw=80
//! In-process cluster fabric
//!
//! Every rank is a tokio task holding one [`Endpoint`].  Each ordered pair of
//! ranks gets its own bounded channel, which gives the per-pair FIFO delivery
//! the protocol relies on.  Dropping an `Endpoint` (a scanner exiting) closes
//! that rank's outgoing channels; peers then see `Error::Disconnected` only
//! if they still expect traffic from it.

use std::task::Poll;

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;

use crate::comm::{Comm, SendFut};
use crate::types::*;

/// Messages a channel buffers before senders block
const CHANNEL_DEPTH: usize = 16;

/// One rank's connection to the in-memory cluster
pub struct Endpoint {
    rank: Rank,
    /// Senders into each peer's queue, indexed by destination rank.  The own
    /// slot is `None`.
    txs: Vec<Option<mpsc::Sender<Bytes>>>,
    /// Receive queues, indexed by source rank.  The own slot is `None`.
    rxs: Vec<Option<mpsc::Receiver<Bytes>>>,
    /// Rotates the polling start so no peer can starve the others
    next_poll: usize,
}

/// Create a fully-connected cluster of `nranks` endpoints
pub fn cluster(nranks: usize) -> Vec<Endpoint> {
    let mut txs = vec![Vec::new(); nranks];
    let mut rxs: Vec<Vec<Option<mpsc::Receiver<Bytes>>>> =
        (0..nranks).map(|_| Vec::new()).collect();
    for to in 0..nranks {
        for from in 0..nranks {
            if from == to {
                txs[from].push(None);
                rxs[to].push(None);
            } else {
                let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
                txs[from].push(Some(tx));
                rxs[to].push(Some(rx));
            }
        }
    }
    // txs[from] is indexed by destination, rxs[to] by source
    txs.into_iter()
        .zip(rxs)
        .enumerate()
        .map(|(rank, (txs, rxs))| Endpoint {
            rank: rank as Rank,
            txs,
            rxs,
            next_poll: 0,
        })
        .collect()
}

impl Comm for Endpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn nranks(&self) -> usize {
        self.txs.len()
    }

    async fn send(&mut self, to: Rank, msg: Bytes) -> Result<()> {
        match self.txs.get(to as usize).and_then(Option::as_ref) {
            Some(tx) => tx.send(msg).await.map_err(|_| Error::Disconnected(to)),
            None => Err(Error::SendFailed(to)),
        }
    }

    fn send_nowait(&self, to: Rank, msg: Bytes) -> SendFut {
        let Some(tx) = self.txs.get(to as usize).and_then(Option::as_ref)
        else {
            return future::err(Error::SendFailed(to)).boxed();
        };
        let tx = tx.clone();
        let task = tokio::spawn(async move {
            tx.send(msg).await.map_err(|_| Error::Disconnected(to))
        });
        async move {
            task.await.map_err(|_| Error::SendFailed(to))?
        }.boxed()
    }

    async fn recv_any(&mut self) -> Result<(Rank, Bytes)> {
        let this = &mut *self;
        future::poll_fn(move |cx| {
            let n = this.rxs.len();
            let mut any_open = false;
            for k in 0..n {
                let i = (this.next_poll + k) % n;
                let Some(rx) = this.rxs[i].as_mut() else { continue };
                match rx.poll_recv(cx) {
                    Poll::Ready(Some(msg)) => {
                        this.next_poll = (i + 1) % n;
                        return Poll::Ready(Ok((i as Rank, msg)));
                    }
                    Poll::Ready(None) => {}
                    Poll::Pending => any_open = true,
                }
            }
            if any_open {
                Poll::Pending
            } else {
                Poll::Ready(Err(Error::Disconnected(this.rank)))
            }
        }).await
    }

    async fn recv_from(&mut self, from: Rank) -> Result<Bytes> {
        let rx = self.rxs.get_mut(from as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::Disconnected(from))?;
        rx.recv().await.ok_or(Error::Disconnected(from))
    }

    async fn recv_each(&mut self, from: &[Rank]) -> Result<Vec<Bytes>> {
        debug_assert!(from.windows(2).all(|w| w[0] < w[1]));
        let mut futs: Vec<BoxFuture<'_, Result<Bytes>>> =
            Vec::with_capacity(from.len());
        for (i, slot) in self.rxs.iter_mut().enumerate() {
            let r = i as Rank;
            if !from.contains(&r) {
                continue;
            }
            match slot.as_mut() {
                Some(rx) => futs.push(async move {
                    rx.recv().await.ok_or(Error::Disconnected(r))
                }.boxed()),
                None => futs.push(future::err(Error::Disconnected(r)).boxed()),
            }
        }
        future::try_join_all(futs).await
    }
}
