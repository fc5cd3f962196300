// vim: tw=80
//! Per-rank orchestration
//!
//! One call to [`run_rank`] drives a process through the whole protocol:
//! topology resolution, then the role-specific phase sequence.  Scanners
//! return after the scan phase; collectors and the coordinator continue
//! through planning, the distribution ring, and task execution.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::comm::Comm;
use crate::executor;
use crate::gather;
use crate::placement;
use crate::scan;
use crate::store::{FileStore, MetadataStore};
use crate::topology::{self, Role};
use crate::types::*;
use crate::worklist;

/// What a run covers
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationMode {
    /// Enumerate every chunk on every target
    Complete,
    /// Enumerate chunks modified in `[from, to]` seconds
    Partial { from: u64, to: u64 },
    /// Skip enumeration; plan and execute from persisted metadata only
    Empty,
}

/// Tunables shared by every rank of a run
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub mode: OperationMode,
    /// Per-destination scatter buffer capacity, in bytes
    pub scatter_capacity: usize,
    /// Scatter buffer fill level that triggers an eager send
    pub send_threshold: usize,
    /// Upper bound on the chunk-transfer window, in bytes
    pub transfer_buffer: usize,
    /// Upper bound on interned path bytes per collector
    pub name_arena_cap: usize,
    /// Upper bound on worklist entries per collector
    pub max_work_items: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: OperationMode::Complete,
            scatter_capacity: 10 * 1024 * 1024,
            send_threshold: 1024 * 1024,
            transfer_buffer: 1024 * 1024,
            name_arena_cap: 64 * 1024 * 1024,
            max_work_items: 1_000_000,
        }
    }
}

/// Everything a phase needs to know about the process it runs in
pub struct ProcessContext {
    pub rank: Rank,
    pub role: Role,
    pub topology: topology::RankTopology,
    pub config: Arc<RunConfig>,
    pub store_root: Option<PathBuf>,
}

/// What the coordinator learned by the end of the run
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunOutcome {
    /// Scanners that reported a failed enumeration.  Failures never abort
    /// the run; the remaining targets' metadata is still processed.
    pub scan_failures: usize,
}

/// Drive one rank through the whole protocol.  Collective: every rank of
/// the cluster must call this exactly once.
pub async fn run_rank<C: Comm>(mut comm: C, config: Arc<RunConfig>,
                               store_root: Option<PathBuf>)
    -> Result<RunOutcome>
{
    if comm.rank() != COORDINATOR && store_root.is_none() {
        return Err(Error::NoStoreRoot(comm.rank()));
    }
    let topology = topology::resolve(&mut comm, store_root.as_deref()).await?;
    let role = topology.role_of(comm.rank());
    let ctx = ProcessContext {
        rank: comm.rank(),
        role,
        topology,
        config,
        store_root,
    };
    match role {
        Role::Coordinator => run_coordinator(&ctx, &mut comm).await,
        Role::Scanner(_) => {
            let root = ctx.store_root.as_deref()
                .ok_or(Error::NoStoreRoot(ctx.rank))?;
            scan::run_scanner(&ctx, root, &mut comm).await?;
            Ok(RunOutcome::default())
        }
        Role::Collector(_) => run_collector(&ctx, &mut comm).await,
    }
}

/// Coordinator: count scanner completions, then ride along in the
/// distribution ring so its collectives complete.
#[tracing::instrument(skip(ctx, comm))]
async fn run_coordinator<C: Comm>(ctx: &ProcessContext, comm: &mut C)
    -> Result<RunOutcome>
{
    let ntargets = ctx.topology.ntargets();
    let mut scan_failures = 0;
    for _ in 0..ntargets {
        let (src, blob) = comm.recv_any().await?;
        let Role::Scanner(target) = ctx.topology.role_of(src) else {
            return Err(Error::Malformed(src));
        };
        let failed = *blob.first().ok_or(Error::Malformed(src))? != 0;
        if failed {
            scan_failures += 1;
        }
        info!(scanner = src, target, failed, "scanner finished");
    }

    let group = ctx.topology.collector_group();
    for i in 1..group.len() {
        let wl = worklist::bcast_list(comm, &group, i, None).await?;
        debug!(collector = group.member(i), items = wl.len(),
               "worklist distributed");
    }
    info!(scan_failures, "run complete");
    Ok(RunOutcome { scan_failures })
}

/// Collector: gather, plan, take one turn broadcasting, execute every
/// worklist in group order, persist.
#[tracing::instrument(skip(ctx, comm), fields(rank = ctx.rank))]
async fn run_collector<C: Comm>(ctx: &ProcessContext, comm: &mut C)
    -> Result<RunOutcome>
{
    let root = ctx.store_root.as_deref()
        .ok_or(Error::NoStoreRoot(ctx.rank))?;
    let gathered = gather::run_gather(ctx, comm).await?;

    let mut store = FileStore::open(root)?;
    let mine = placement::plan(
        gathered,
        &mut store,
        ctx.topology.ntargets(),
        ctx.config.max_work_items,
    )?;
    debug!(items = mine.len(), "worklist planned");

    let group = ctx.topology.collector_group();
    let me = group.rank_of(ctx.rank).ok_or(Error::Malformed(ctx.rank))?;
    for i in 1..group.len() {
        let wl = worklist::bcast_list(comm, &group, i,
            (i == me).then_some(&mine)).await?;
        for (path, rec) in &wl {
            executor::process_task(ctx, comm, path, rec).await?;
        }
    }
    store.flush()?;
    Ok(RunOutcome::default())
}
