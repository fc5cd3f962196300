// vim: tw=80
//! Placement planner
//!
//! Runs once per collector after stage 1.  Each gathered record is merged
//! with any persisted history for the same path, given a parity owner if it
//! still lacks one, persisted, and queued for broadcast.

use crate::gather::GatheredInfo;
use crate::record::LocationSet;
use crate::scan::path_hash;
use crate::store::MetadataStore;
use crate::types::*;
use crate::worklist::Worklist;

/// Choose a parity owner outside `locations`, deterministically.
///
/// The path's hash is re-hashed until it lands on a free target, like the
/// original collision-avoiding walk, but termination is explicit: an empty
/// complement means no assignment is possible, and after a bounded number of
/// probes the walk falls back to indexing the complement directly.
pub fn select_owner(path: &str, locations: &LocationSet, ntargets: usize)
    -> Option<TargetId>
{
    let complement = locations.complement(ntargets);
    if complement.is_empty() {
        return None;
    }
    let mut h = path_hash(path.as_bytes());
    for _ in 0..8 * ntargets {
        h ^= path_hash(&h.to_le_bytes());
        let p = (h % ntargets as u64) as TargetId;
        if !locations.contains(p) {
            return Some(p);
        }
    }
    Some(complement[(h % complement.len() as u64) as usize])
}

/// Merge, place, persist.  Returns the worklist in gather-arrival order,
/// capped at `max_items`.
pub fn plan(gathered: GatheredInfo, store: &mut dyn MetadataStore,
            ntargets: usize, max_items: usize) -> Result<Worklist>
{
    let mut worklist = Vec::with_capacity(gathered.len().min(max_items));
    for (path, mut rec) in gathered.collect(max_items) {
        if let Some(prev) = store.get(&path)? {
            rec.merge(&prev);
        }
        if rec.locations.owner().is_none() {
            if let Some(p) = select_owner(&path, &rec.locations, ntargets) {
                rec.locations.set_owner(p);
            }
        }
        store.set(&path, &rec)?;
        worklist.push((path, rec));
    }
    Ok(worklist)
}
