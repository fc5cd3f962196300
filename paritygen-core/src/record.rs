// vim: tw=80
//! Per-chunk metadata: location sets and the persisted `ChunkRecord`

use serde_derive::{Deserialize, Serialize};

use crate::types::*;

const LOCATION_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;
const OWNER_SHIFT: u32 = 56;
const NO_OWNER: u64 = 0xFF;

/// The set of storage targets known to hold a replica of a chunk, plus the
/// target designated to hold its parity.
///
/// Packed into a single word: the low 56 bits are a membership mask indexed
/// by target id, and the top byte holds the parity owner (`0xFF` when
/// unassigned).  This is the canonical representation; it is what gets
/// persisted and broadcast.  Translation to a rank list happens just before
/// task execution, via [`LocationSet::members`] and the topology tables.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LocationSet(u64);

impl LocationSet {
    pub fn new() -> Self {
        LocationSet(NO_OWNER << OWNER_SHIFT)
    }

    pub fn from_bits(bits: u64) -> Self {
        LocationSet(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn insert(&mut self, target: TargetId) {
        debug_assert!((target as usize) < MAX_TARGETS);
        self.0 |= 1 << target;
    }

    pub fn contains(&self, target: TargetId) -> bool {
        (target as usize) < MAX_TARGETS && self.0 & (1 << target) != 0
    }

    /// Number of targets holding a replica
    pub fn len(&self) -> usize {
        (self.0 & LOCATION_MASK).count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 & LOCATION_MASK == 0
    }

    /// Member target ids, ascending
    pub fn members(&self) -> impl Iterator<Item = TargetId> + '_ {
        let mask = self.0 & LOCATION_MASK;
        (0..MAX_TARGETS as TargetId).filter(move |t| mask & (1 << t) != 0)
    }

    /// Targets in `[0, ntargets)` that do *not* hold a replica, ascending.
    ///
    /// The placement planner selects the parity owner from this set; an empty
    /// complement means no assignment is possible.
    pub fn complement(&self, ntargets: usize) -> Vec<TargetId> {
        debug_assert!(ntargets <= MAX_TARGETS);
        (0..ntargets as TargetId).filter(|t| !self.contains(*t)).collect()
    }

    pub fn owner(&self) -> Option<TargetId> {
        let o = self.0 >> OWNER_SHIFT;
        if o == NO_OWNER {
            None
        } else {
            Some(o as TargetId)
        }
    }

    pub fn set_owner(&mut self, owner: TargetId) {
        debug_assert!((owner as usize) < MAX_TARGETS);
        self.0 = (self.0 & LOCATION_MASK) | ((owner as u64) << OWNER_SHIFT);
    }
}

impl Default for LocationSet {
    fn default() -> Self {
        LocationSet::new()
    }
}

/// Metadata for one chunk path, mutable over a run
///
/// Created during the gather phase, merged against any persisted record for
/// the same path, finalized with a placement decision, then broadcast
/// read-only for the execution phase.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChunkRecord {
    /// Largest byte length observed for any replica of this chunk
    pub max_chunk_size: u64,
    /// Most recent modification time observed, in seconds
    pub last_seen: u64,
    pub locations: LocationSet,
}

impl ChunkRecord {
    pub fn new() -> Self {
        ChunkRecord {
            max_chunk_size: 0,
            last_seen: 0,
            locations: LocationSet::new(),
        }
    }

    /// Fold another revision of this chunk's record into this one.
    ///
    /// Location sets are unioned and the larger `max_chunk_size` wins.  A
    /// parity owner, once assigned, is never reassigned: `other`'s owner is
    /// only taken when this record has none.
    pub fn merge(&mut self, other: &ChunkRecord) {
        self.max_chunk_size = self.max_chunk_size.max(other.max_chunk_size);
        self.last_seen = self.last_seen.max(other.last_seen);
        let owner = self.locations.owner().or(other.locations.owner());
        let union = (self.locations.bits() | other.locations.bits())
            & LOCATION_MASK;
        let mut merged = LocationSet::from_bits(union | (NO_OWNER << OWNER_SHIFT));
        if let Some(o) = owner {
            merged.set_owner(o);
        }
        self.locations = merged;
    }

    /// Record one observation from the scan phase
    pub fn observe(&mut self, target: TargetId, byte_size: u64, timestamp: u64)
    {
        self.locations.insert(target);
        self.max_chunk_size = self.max_chunk_size.max(byte_size);
        self.last_seen = timestamp;
    }
}

impl Default for ChunkRecord {
    fn default() -> Self {
        ChunkRecord::new()
    }
}
