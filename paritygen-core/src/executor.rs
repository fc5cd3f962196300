// vim: tw=80
//! Task execution (collector role, stage 2)
//!
//! For each broadcast worklist item a collector is either the parity owner,
//! a source, or uninvolved.  Sources stream their replica to the owner in
//! fixed-size windows, zero filling past EOF and on read failure so the
//! exchange never stalls.  The owner XOR-reduces one window from every
//! source at a time into the parity object, which starts with an 8-byte
//! little-endian sum of the true source sizes.
//!
//! Parity objects live in a `parity/` namespace parallel to `chunks/`.  A
//! chunk path with no `chunks/` component has nowhere to put its parity;
//! the owner still drains the exchange but discards the result.

use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;

use crate::comm::Comm;
use crate::record::ChunkRecord;
use crate::runner::ProcessContext;
use crate::topology::Role;
use crate::types::*;

const CHUNK_DIR: &str = "/chunks/";
const PARITY_DIR: &str = "/parity/";

/// This collector's part in one task
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Involvement {
    /// Receives every source's windows and writes the parity object
    Owner,
    /// Streams its replica of the chunk to the owner
    Source,
    Uninvolved,
}

/// Owner status takes precedence: a target that both holds a replica and
/// owns the parity acts as the owner, never as a source.  A record with no
/// owner involves nobody.
pub fn involvement(rec: &ChunkRecord, target: TargetId) -> Involvement {
    match rec.locations.owner() {
        Some(o) if o == target => Involvement::Owner,
        Some(_) if rec.locations.contains(target) => Involvement::Source,
        _ => Involvement::Uninvolved,
    }
}

/// Bytes moved per window of the exchange.  Identical on every participant
/// because it only depends on the broadcast record and the shared config.
fn window_size(transfer_buffer: usize, max_chunk_size: u64) -> usize {
    transfer_buffer.min(max_chunk_size as usize).max(1)
}

fn nwindows(max_chunk_size: u64, window: usize) -> u64 {
    max_chunk_size.div_ceil(window as u64)
}

/// The parity object's path: the first `chunks/` path component swaps for
/// `parity/`
fn parity_path(path: &str) -> Option<PathBuf> {
    path.find(CHUNK_DIR).map(|i| {
        let mut s = String::with_capacity(path.len());
        s.push_str(&path[..i]);
        s.push_str(PARITY_DIR);
        s.push_str(&path[i + CHUNK_DIR.len()..]);
        PathBuf::from(s)
    })
}

fn xor_acc(acc: &mut [u8], src: &[u8]) {
    for (a, s) in acc.iter_mut().zip(src) {
        *a ^= s;
    }
}

/// Read until `buf` is full or EOF.  `buf` must be zeroed on entry.
async fn fill_window<R>(f: &mut R, buf: &mut [u8]) -> std::io::Result<()>
    where R: tokio::io::AsyncRead + Unpin
{
    let mut off = 0;
    while off < buf.len() {
        let n = f.read(&mut buf[off..]).await?;
        if n == 0 {
            break;
        }
        off += n;
    }
    Ok(())
}

/// Source side: report the replica's true size, then stream exactly
/// `nwindows` windows.  A replica that cannot be opened or read reports
/// size 0 and keeps the exchange fed with zeroed windows.
async fn stream_chunk<C: Comm>(comm: &mut C, owner: Rank, path: &str,
                               max_chunk_size: u64, window: usize)
    -> Result<()>
{
    let mut file = match File::open(path).await {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(path, error = %e, "cannot open chunk replica");
            None
        }
    };
    let size = match file.as_ref() {
        Some(f) => match f.metadata().await {
            Ok(m) => m.len(),
            Err(e) => {
                warn!(path, error = %e, "cannot stat chunk replica");
                0
            }
        },
        None => 0,
    };
    let mut hdr = [0u8; 8];
    LittleEndian::write_u64(&mut hdr, size);
    comm.send(owner, Bytes::copy_from_slice(&hdr)).await?;

    let mut buf = vec![0u8; window];
    for _ in 0..nwindows(max_chunk_size, window) {
        buf.fill(0);
        let mut broken = false;
        if let Some(f) = file.as_mut() {
            if let Err(e) = fill_window(f, &mut buf).await {
                warn!(path, error = %e, "chunk read failed, zero filling");
                broken = true;
            }
        }
        if broken {
            file = None;
        }
        comm.send(owner, Bytes::copy_from_slice(&buf)).await?;
    }
    Ok(())
}

/// Create the parity object, or `None` if it has nowhere to live.  Local
/// failures never abort the exchange.
async fn open_parity(path: &str) -> Option<File> {
    let Some(pp) = parity_path(path) else {
        warn!(path, "chunk path has no parity namespace, discarding output");
        return None;
    };
    if let Some(parent) = pp.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(path, error = %e, "cannot create parity directory");
            return None;
        }
    }
    match File::create(&pp).await {
        Ok(f) => Some(f),
        Err(e) => {
            warn!(path, error = %e, "cannot create parity object");
            None
        }
    }
}

/// Write to the parity object if it is still healthy; drop it on failure
/// so the remaining windows are drained but discarded.
async fn write_or_drop(out: &mut Option<File>, path: &str, bytes: &[u8]) {
    let ok = match out.as_mut() {
        Some(f) => match f.write_all(bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path, error = %e,
                      "parity write failed, discarding the rest");
                false
            }
        },
        None => true,
    };
    if !ok {
        *out = None;
    }
}

/// Owner side: collect every source's size, then XOR-reduce the windows
/// into the parity object.
async fn build_parity<C: Comm>(ctx: &ProcessContext, comm: &mut C,
                               path: &str, rec: &ChunkRecord, window: usize)
    -> Result<()>
{
    let owner = rec.locations.owner();
    let mut sources = rec.locations.members()
        .filter(|st| Some(*st) != owner)
        .map(|st| ctx.topology.collector_rank(st))
        .collect::<Vec<_>>();
    sources.sort_unstable();
    if sources.is_empty() {
        return Ok(());
    }

    let sizes = comm.recv_each(&sources).await?;
    let mut total = 0u64;
    for (r, b) in sources.iter().zip(&sizes) {
        if b.len() != 8 {
            return Err(Error::Malformed(*r));
        }
        total += LittleEndian::read_u64(b);
    }

    let mut out = open_parity(path).await;
    let mut hdr = [0u8; 8];
    LittleEndian::write_u64(&mut hdr, total);
    write_or_drop(&mut out, path, &hdr).await;

    let mut acc = vec![0u8; window];
    for _ in 0..nwindows(rec.max_chunk_size, window) {
        let blobs = comm.recv_each(&sources).await?;
        acc.fill(0);
        for (r, b) in sources.iter().zip(&blobs) {
            if b.len() != window {
                return Err(Error::Malformed(*r));
            }
            xor_acc(&mut acc, b);
        }
        write_or_drop(&mut out, path, &acc).await;
    }
    if let Some(f) = out.as_mut() {
        if let Err(e) = f.flush().await {
            warn!(path, error = %e, "parity flush failed");
        }
    }
    Ok(())
}

/// Execute one worklist item.  Returns whether this process took part.
pub async fn process_task<C: Comm>(ctx: &ProcessContext, comm: &mut C,
                                   path: &str, rec: &ChunkRecord)
    -> Result<bool>
{
    let Role::Collector(st) = ctx.role else {
        return Ok(false);
    };
    let window = window_size(ctx.config.transfer_buffer, rec.max_chunk_size);
    match involvement(rec, st) {
        Involvement::Uninvolved => Ok(false),
        Involvement::Owner => {
            build_parity(ctx, comm, path, rec, window).await?;
            Ok(true)
        }
        Involvement::Source => {
            let Some(owner) = rec.locations.owner() else {
                return Ok(false);
            };
            let to = ctx.topology.collector_rank(owner);
            stream_chunk(comm, to, path, rec.max_chunk_size, window).await?;
            Ok(true)
        }
    }
}
