// vim: tw=80
//! Buffered async multiplexed sender
//!
//! Multiplexes scatter records from one scanner to up to `ntargets`
//! collectors with bounded memory and at most one outstanding send per
//! destination.  Records accumulate in a per-destination buffer; a send is
//! started early once the buffer passes the send threshold, and a buffer
//! that would overflow forces a blocking drain of the outstanding send
//! first.  The buffer handed to the transport is never touched again: its
//! bytes are moved out when the send begins, and the completion future is
//! awaited before the next send to the same destination starts.

use bytes::Bytes;
use futures::FutureExt;

use crate::comm::{Comm, SendFut};
use crate::types::*;
use crate::wire;

struct Dest {
    rank: Rank,
    buf: Vec<u8>,
    pending: Option<SendFut>,
}

impl Dest {
    /// Complete the outstanding send, if any
    async fn finish_pending(&mut self) -> Result<()> {
        if let Some(fut) = self.pending.take() {
            fut.await?;
        }
        Ok(())
    }

    /// Hand the buffered bytes to the transport.  Must not be called with a
    /// send already outstanding.
    fn begin_send<C: Comm>(&mut self, comm: &C) {
        debug_assert!(self.pending.is_none());
        debug_assert!(!self.buf.is_empty());
        let msg = Bytes::copy_from_slice(&self.buf);
        self.buf.clear();
        self.pending = Some(comm.send_nowait(self.rank, msg));
    }
}

/// Scatter-side sender for the scan phase
pub struct ScatterSender<'a, C: Comm> {
    comm: &'a C,
    dests: Vec<Dest>,
    /// Hard per-destination buffer limit; overflow forces a drain
    capacity: usize,
    /// Buffered bytes that trigger an early batched send
    threshold: usize,
}

impl<'a, C: Comm> ScatterSender<'a, C> {
    /// `dest_ranks` is indexed by target id
    pub fn new(comm: &'a C, dest_ranks: Vec<Rank>, capacity: usize,
               threshold: usize) -> Self
    {
        debug_assert!(threshold <= capacity);
        let dests = dest_ranks.into_iter()
            .map(|rank| Dest { rank, buf: Vec::new(), pending: None })
            .collect();
        ScatterSender { comm, dests, capacity, threshold }
    }

    /// Queue one record for `target`, transmitting as needed.
    ///
    /// Only blocks when the destination buffer would overflow and the
    /// previous send to that destination is still in flight.
    pub async fn push(&mut self, target: TargetId, path: &[u8],
                      byte_size: u64, timestamp: u64) -> Result<()>
    {
        let d = &mut self.dests[target as usize];
        // Reclaim a completed send eagerly so a new one can start below
        if let Some(fut) = d.pending.as_mut() {
            if let Some(r) = (&mut *fut).now_or_never() {
                d.pending = None;
                r?;
            }
        }
        if d.buf.len() + wire::record_len(path.len()) > self.capacity {
            d.finish_pending().await?;
        }
        wire::encode_record(&mut d.buf, path, byte_size, timestamp);
        if d.pending.is_none() && d.buf.len() >= self.threshold {
            d.begin_send(self.comm);
        }
        Ok(())
    }

    /// Flush every destination: complete outstanding sends, transmit any
    /// buffered remainder, and wait for all of it to finish.  After this no
    /// metadata is left behind and each destination has observed the full
    /// stream.
    pub async fn drain_all(mut self) -> Result<()> {
        for d in self.dests.iter_mut() {
            d.finish_pending().await?;
            if !d.buf.is_empty() {
                d.begin_send(self.comm);
            }
        }
        for d in self.dests.iter_mut() {
            d.finish_pending().await?;
        }
        Ok(())
    }
}
