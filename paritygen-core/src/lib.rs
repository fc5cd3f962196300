// vim: tw=80
//! Distributed XOR-parity maintenance for a chunked object store.
//!
//! A cluster of `1 + 2*T` cooperating processes keeps one parity object per
//! chunk across `T` storage targets: scanners enumerate each target's chunk
//! store and scatter per-chunk metadata to collectors by path hash,
//! collectors merge it with persisted history and pick a parity owner, and a
//! sequential broadcast ring distributes every collector's worklist before
//! the owners XOR-reduce the source replicas window by window.

pub mod comm;
pub mod executor;
pub mod gather;
pub mod placement;
pub mod record;
pub mod runner;
pub mod scan;
pub mod scatter;
pub mod store;
pub mod topology;
pub mod types;
pub mod wire;
pub mod worklist;

pub use crate::types::{Error, Rank, Result, TargetId, COORDINATOR,
                       MAX_TARGETS};
