// vim: tw=80
//! Common type definitions used throughout paritygen

use std::{io, path::PathBuf};

use thiserror::Error;

/// Identifies a process within the cluster.
///
/// The rank space has size `1 + 2*T` for `T` storage targets: rank 0 is the
/// coordinator, odd ranks are collectors and even nonzero ranks are scanners.
/// Each collector/scanner pair `(2i+1, 2i+2)` serves the same storage target.
pub type Rank = u16;

/// Identifies a physical storage target.  Always in `[0, ntargets)`.
pub type TargetId = u16;

/// The rank of the single coordinator process.
pub const COORDINATOR: Rank = 0;

/// Upper bound on the number of storage targets in one cluster.
///
/// The location set of a chunk is persisted as a 56-bit mask, with the parity
/// owner packed into the top byte.
pub const MAX_TARGETS: usize = 56;

/// paritygen's error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// A peer's message queue closed while we still expected traffic from it.
    #[error("rank {0} disconnected")]
    Disconnected(Rank),

    /// A message that cannot be decoded.  The protocol has no recovery for
    /// this; the run aborts.
    #[error("malformed message from rank {0}")]
    Malformed(Rank),

    /// A collector and its paired scanner reported different target
    /// identities.  Fatal: the target cannot be addressed consistently.
    #[error("target identity mismatch between collector rank {collector} \
             and scanner rank {scanner}")]
    IdentityMismatch { collector: Rank, scanner: Rank },

    #[error("cannot read target identity from {0}")]
    TargetIdentity(PathBuf),

    /// A collector or scanner was started without a storage root.
    #[error("rank {0} requires a storage root")]
    NoStoreRoot(Rank),

    #[error("cluster supports at most {} targets, got {0}", MAX_TARGETS)]
    TooManyTargets(usize),

    #[error("send to rank {0} failed")]
    SendFailed(Rank),
}

pub type Result<T = ()> = std::result::Result<T, Error>;

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn error_display() {
        let e = Error::IdentityMismatch { collector: 3, scanner: 4 };
        assert_eq!(format!("{e}"),
            "target identity mismatch between collector rank 3 and scanner \
             rank 4");
        assert_eq!(format!("{}", Error::TooManyTargets(99)),
            "cluster supports at most 56 targets, got 99");
    }
}
