// vim: tw=80
//! Rank topology resolution
//!
//! Every non-coordinator process reads an 8-byte opaque identity at startup:
//! the numeric id from its storage root's `targetID` file in the high 32
//! bits, its own rank in the low 32.  All identities are gathered to the
//! coordinator, which checks that each collector/scanner pair agrees on its
//! target identity (fatal if not), sorts the target identities, assigns
//! target index by sort order, and broadcasts the finished tables so every
//! rank owns an identical copy.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use serde_derive::{Deserialize, Serialize};

use crate::comm::{self, Comm, Group};
use crate::types::*;

/// What a process does for a living, assigned once at startup
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Counts scanner completions and sequences the distribution ring
    Coordinator,
    /// Owns one target's metadata; merges, plans, executes
    Collector(TargetId),
    /// Enumerates one target's chunk store and reports metadata
    Scanner(TargetId),
}

/// Bidirectional target-id ↔ rank tables, identical on every rank
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RankTopology {
    /// Collector rank per target id
    st2rank: Vec<Rank>,
    /// Target id per rank; `None` for the coordinator
    rank2st: Vec<Option<TargetId>>,
}

impl RankTopology {
    pub fn ntargets(&self) -> usize {
        self.st2rank.len()
    }

    pub fn nranks(&self) -> usize {
        self.rank2st.len()
    }

    pub fn collector_rank(&self, target: TargetId) -> Rank {
        self.st2rank[target as usize]
    }

    pub fn scanner_rank(&self, target: TargetId) -> Rank {
        self.st2rank[target as usize] + 1
    }

    /// The target served by `rank`, whether it is a collector or a scanner
    pub fn target_of(&self, rank: Rank) -> Option<TargetId> {
        self.rank2st.get(rank as usize).copied().flatten()
    }

    pub fn role_of(&self, rank: Rank) -> Role {
        match self.target_of(rank) {
            None => Role::Coordinator,
            Some(st) if rank % 2 == 1 => Role::Collector(st),
            Some(st) => Role::Scanner(st),
        }
    }

    /// The work-distribution group: coordinator plus all collectors, in
    /// world-rank order.  Scanners have exited by the time this is used.
    pub fn collector_group(&self) -> Group {
        let mut members = vec![COORDINATOR];
        members.extend(
            (0..self.ntargets()).map(|i| (1 + 2 * i) as Rank)
        );
        Group::new(members)
    }
}

/// Compute the tables from the gathered identities, coordinator side.
///
/// `idents` is indexed by rank.  Ranks `2i+1` (collector) and `2i+2`
/// (scanner) must agree on the identity's high 32 bits.
fn build_tables(idents: &[u64], ntargets: usize) -> Result<RankTopology> {
    let mut collectors = Vec::with_capacity(ntargets);
    for i in 0..ntargets {
        let collector = (1 + 2 * i) as Rank;
        let scanner = collector + 1;
        if idents[collector as usize] >> 32 != idents[scanner as usize] >> 32 {
            return Err(Error::IdentityMismatch { collector, scanner });
        }
        collectors.push(idents[collector as usize]);
    }
    collectors.sort_unstable();
    let mut st2rank = Vec::with_capacity(ntargets);
    let mut rank2st = vec![None; 1 + 2 * ntargets];
    for (st, ident) in collectors.iter().enumerate() {
        let rank = (ident & 0xFFFF_FFFF) as Rank;
        st2rank.push(rank);
        rank2st[rank as usize] = Some(st as TargetId);
        rank2st[rank as usize + 1] = Some(st as TargetId);
    }
    Ok(RankTopology { st2rank, rank2st })
}

/// Trivial topology for in-process tests: target `i` served by ranks
/// `1 + 2i` and `2 + 2i`
#[cfg(test)]
pub(crate) fn flat(ntargets: usize) -> RankTopology {
    let mut idents = vec![0u64];
    for i in 0..ntargets {
        let collector = (1 + 2 * i) as u64;
        idents.push(((i as u64) << 32) | collector);
        idents.push(((i as u64) << 32) | (collector + 1));
    }
    match build_tables(&idents, ntargets) {
        Ok(topo) => topo,
        Err(_) => unreachable!(),
    }
}

/// Read the numeric target identity persisted at a storage root
async fn read_identity(store_root: &Path) -> Result<u64> {
    let path = store_root.join("targetID");
    let s = tokio::fs::read_to_string(&path)
        .await
        .map_err(|_| Error::TargetIdentity(path.clone()))?;
    s.trim().parse::<u64>()
        .map_err(|_| Error::TargetIdentity(path))
}

/// Resolve the cluster topology.  Collective: every rank must call this.
pub async fn resolve<C: Comm>(comm: &mut C, store_root: Option<&Path>)
    -> Result<RankTopology>
{
    let nranks = comm.nranks();
    let ntargets = (nranks - 1) / 2;
    if ntargets > MAX_TARGETS {
        return Err(Error::TooManyTargets(ntargets));
    }
    let identity = match store_root {
        Some(root) if comm.rank() != COORDINATOR => {
            (read_identity(root).await? << 32) | comm.rank() as u64
        }
        _ => 0,
    };
    let mut payload = [0u8; 8];
    LittleEndian::write_u64(&mut payload, identity);
    let gathered =
        comm::gather(comm, COORDINATOR, Bytes::copy_from_slice(&payload))
            .await?;
    let world = Group::new((0..nranks as Rank).collect());
    match gathered {
        Some(raw) => {
            let mut idents = Vec::with_capacity(nranks);
            for (r, b) in raw.iter().enumerate() {
                if b.len() != 8 {
                    return Err(Error::Malformed(r as Rank));
                }
                idents.push(LittleEndian::read_u64(b));
            }
            let topo = build_tables(&idents, ntargets)?;
            let blob = bincode::serialize(&topo)?;
            comm::bcast(comm, &world, 0, Some(blob.into())).await?;
            Ok(topo)
        }
        None => {
            let blob = comm::bcast(comm, &world, 0, None).await?;
            Ok(bincode::deserialize(&blob)?)
        }
    }
}
