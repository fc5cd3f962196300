// vim: tw=80
//! Scan phase (scanner role)
//!
//! Runs the external chunk enumerator for this process's storage target,
//! decodes its record stream, and ships each record to the collector owning
//! the chunk's assigned target, chosen by a deterministic hash of the path.
//! When the stream is exhausted the scatter buffers are drained, an empty
//! end-of-stream blob goes to every collector, and a done/failed byte goes
//! to the coordinator.  Per-pair FIFO delivery puts the marker behind all of
//! this scanner's metadata, which is what guarantees that nothing is lost at
//! stage-1 termination.

use std::path::Path;
use std::process::Stdio;

use bytes::Bytes;
use metrohash::MetroHash64;
use std::hash::Hasher;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::comm::Comm;
use crate::runner::{OperationMode, ProcessContext};
use crate::scatter::ScatterSender;
use crate::types::*;
use crate::wire::StreamDecoder;

/// Pieces the enumerator's stdout is read in
const READ_SIZE: usize = 64 * 1024;

/// Deterministic placement hash of a chunk path
pub fn path_hash(path: &[u8]) -> u64 {
    let mut h = MetroHash64::with_seed(0);
    h.write(path);
    h.finish()
}

/// The target whose collector accumulates metadata for this path
pub fn route(path: &[u8], ntargets: usize) -> TargetId {
    (path_hash(path) % ntargets as u64) as TargetId
}

/// Pump one enumerator stream through the scatter sender.
///
/// Returns the number of records shipped.
async fn feed_stream<C, R>(sender: &mut ScatterSender<'_, C>, mut input: R,
                           ntargets: usize) -> Result<u64>
    where C: Comm, R: tokio::io::AsyncRead + Unpin
{
    let mut decoder = StreamDecoder::new();
    let mut piece = vec![0u8; READ_SIZE];
    let mut entries = Vec::new();
    let mut shipped = 0;
    loop {
        let n = input.read(&mut piece).await?;
        if n == 0 {
            break;
        }
        decoder.feed(&piece[..n], &mut entries);
        for e in entries.drain(..) {
            let st = route(&e.path, ntargets);
            sender.push(st, &e.path, e.byte_size, e.timestamp).await?;
            shipped += 1;
        }
    }
    let dropped = decoder.finish();
    if dropped > 0 {
        debug!(dropped, "discarding incomplete trailing record");
    }
    Ok(shipped)
}

/// Build the enumerator command for this operation mode, if any
fn enumerator(mode: &OperationMode, chunks_dir: &Path) -> Option<Command> {
    match mode {
        OperationMode::Complete => {
            let mut cmd = Command::new("bp-find-all-chunks");
            cmd.arg(chunks_dir);
            Some(cmd)
        }
        OperationMode::Partial { from, to } => {
            let mut cmd = Command::new("audit-find-between");
            cmd.arg(from.to_string()).arg(to.to_string()).arg(chunks_dir);
            Some(cmd)
        }
        OperationMode::Empty => None,
    }
}

async fn feed<C: Comm>(ctx: &ProcessContext, store_root: &Path, comm: &C)
    -> Result<u64>
{
    let ntargets = ctx.topology.ntargets();
    let dest_ranks = (0..ntargets as TargetId)
        .map(|st| ctx.topology.collector_rank(st))
        .collect();
    let mut sender = ScatterSender::new(
        comm,
        dest_ranks,
        ctx.config.scatter_capacity,
        ctx.config.send_threshold,
    );
    let mut shipped = 0;
    if let Some(mut cmd) = enumerator(&ctx.config.mode, &store_root.join("chunks"))
    {
        let mut child = cmd.stdout(Stdio::piped()).spawn()?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Io(std::io::ErrorKind::BrokenPipe.into())
        })?;
        shipped = feed_stream(&mut sender, stdout, ntargets).await?;
        let status = child.wait().await?;
        if !status.success() {
            warn!(%status, "chunk enumerator exited abnormally");
        }
    }
    sender.drain_all().await?;
    Ok(shipped)
}

/// Scanner entry point: feed the collectors, end every stream, then report
/// to the coordinator
#[tracing::instrument(skip(ctx, comm), fields(rank = comm.rank()))]
pub async fn run_scanner<C: Comm>(ctx: &ProcessContext, store_root: &Path,
                                  comm: &mut C) -> Result<()>
{
    let failed = match feed(ctx, store_root, &*comm).await {
        Ok(shipped) => {
            debug!(shipped, "scan complete");
            0u8
        }
        Err(e) => {
            warn!(error = %e, "scan failed");
            1u8
        }
    };
    // End-of-stream markers, even after a failed scan, so no collector
    // waits forever on this scanner
    for st in 0..ctx.topology.ntargets() as TargetId {
        let to = ctx.topology.collector_rank(st);
        comm.send(to, Bytes::new()).await?;
    }
    comm.send(COORDINATOR, Bytes::copy_from_slice(&[failed])).await
}
