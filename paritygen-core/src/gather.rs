// vim: tw=80
//! Gather phase (collector role, stage 1)
//!
//! Receives scatter blobs from the scanners, accumulating one `ChunkRecord`
//! per path.  Each scanner ends its stream with an empty end-of-stream blob
//! after draining its scatter buffers; per-pair FIFO delivery puts that
//! marker behind every blob the scanner sent, so once all markers are in no
//! metadata can still be in flight.

use std::collections::HashMap;

use tracing::debug;

use crate::comm::Comm;
use crate::record::ChunkRecord;
use crate::runner::ProcessContext;
use crate::types::*;
use crate::wire;

/// Scan-local accumulation of per-path metadata
///
/// Combines the name arena and the associative map of the gather phase:
/// paths are interned once, in arrival order (which later becomes worklist
/// order), under a byte cap.  A record whose path would overflow the arena
/// is dropped without error.
pub struct GatheredInfo {
    /// Interned paths in arrival order
    order: Vec<String>,
    map: HashMap<String, ChunkRecord>,
    name_bytes: usize,
    cap: usize,
}

impl GatheredInfo {
    /// `cap` bounds the total interned path bytes (NUL accounting included,
    /// matching the wire form the worklist is later packed into)
    pub fn new(cap: usize) -> Self {
        GatheredInfo {
            order: Vec::new(),
            map: HashMap::new(),
            name_bytes: 0,
            cap,
        }
    }

    /// Fold one observation in.  Returns false if the record was dropped
    /// (arena full, or the path is not valid UTF-8).
    pub fn upsert(&mut self, path: &[u8], target: TargetId, byte_size: u64,
                  timestamp: u64) -> bool
    {
        let Ok(path) = std::str::from_utf8(path) else {
            return false;
        };
        if let Some(rec) = self.map.get_mut(path) {
            rec.observe(target, byte_size, timestamp);
            return true;
        }
        if self.name_bytes + path.len() + 1 > self.cap {
            return false;
        }
        self.name_bytes += path.len() + 1;
        self.order.push(path.to_string());
        let mut rec = ChunkRecord::new();
        rec.observe(target, byte_size, timestamp);
        self.map.insert(path.to_string(), rec);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drain up to `max` entries in arrival order
    pub fn collect(self, max: usize) -> Vec<(String, ChunkRecord)> {
        let mut map = self.map;
        self.order.into_iter()
            .take(max)
            .filter_map(|p| {
                let rec = map.remove(&p)?;
                Some((p, rec))
            })
            .collect()
    }
}

/// Collector stage 1: accumulate until every scanner's stream has ended
#[tracing::instrument(skip(ctx, comm), fields(rank = comm.rank()))]
pub async fn run_gather<C: Comm>(ctx: &ProcessContext, comm: &mut C)
    -> Result<GatheredInfo>
{
    let mut info = GatheredInfo::new(ctx.config.name_arena_cap);
    let mut open_streams = ctx.topology.ntargets();
    while open_streams > 0 {
        let (src, blob) = comm.recv_any().await?;
        let st = ctx.topology.target_of(src).ok_or(Error::Malformed(src))?;
        if blob.is_empty() {
            debug!(from = src, "scanner stream ended");
            open_streams -= 1;
            continue;
        }
        let mut kept = 0u64;
        let mut dropped = 0u64;
        for r in wire::records(&blob, src) {
            let r = r?;
            if info.upsert(r.path, st, r.byte_size, r.timestamp) {
                kept += 1;
            } else {
                dropped += 1;
            }
        }
        debug!(from = src, bytes = blob.len(), kept, dropped,
               "gathered blob");
    }
    Ok(info)
}
