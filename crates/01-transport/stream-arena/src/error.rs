//! Error surface for the arena and the channel built on top of it.
//!
//! Every arena operation reports through [`ArenaError`]. Three variants are
//! ordinary backpressure (`NoSpace`, `Empty`, `Incomplete`) and callers are
//! expected to retry them; the rest describe a caller that broke the
//! open/close protocol or handed in a bad configuration.

use std::io;

use thiserror::Error;

/// Convenience result alias for fallible arena operations.
pub type ArenaResult<T, E = ArenaError> = Result<T, E>;

/// Status codes surfaced by [`RingArena`](crate::RingArena) and
/// [`SyncChannel`](crate::SyncChannel).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// A zero-length open was requested; nothing was reserved.
    #[error("zero-length request")]
    NothingRequested,

    /// No placement strategy can fit the requested write right now.
    #[error("no space for a {requested}-byte write")]
    NoSpace { requested: usize },

    /// The arena holds no data.
    #[error("arena is empty")]
    Empty,

    /// An exact read asked for more bytes than are buffered.
    #[error("exact read of {requested} bytes but only {available} buffered")]
    Incomplete { requested: usize, available: usize },

    /// A write session is already open.
    #[error("write session already open")]
    WriteInProgress,

    /// A read session is already open.
    #[error("read session already open")]
    ReadInProgress,

    /// No matching write session is open (never opened, already closed, or
    /// invalidated by a reset).
    #[error("no matching write session is open")]
    WriteNotStarted,

    /// No matching read session is open.
    #[error("no matching read session is open")]
    ReadNotStarted,

    /// A write referenced bytes outside the reserved region.
    #[error("write of {len} bytes at offset {offset} leaves the {region}-byte region")]
    OutOfBounds {
        offset: usize,
        len: usize,
        region: usize,
    },

    /// A read asked for more than the consolidation prefix can serve.
    #[error("read of {requested} bytes exceeds the {max}-byte read block limit")]
    ReadTooLarge { requested: usize, max: usize },

    /// Capacity must be strictly larger than the largest read block, which
    /// itself must be non-zero.
    #[error("capacity {capacity} must exceed max read block {max_read_block} (> 0)")]
    InvalidConfig {
        capacity: usize,
        max_read_block: usize,
    },

    /// A producer and consumer from different channels were paired.
    #[error("producer and consumer belong to different channels")]
    MismatchedHalves,

    /// Allocation of the backing region failed for the given size/alignment.
    #[error("failed to allocate {size}-byte region aligned to {alignment}")]
    AllocationFailed { size: usize, alignment: usize },
}

impl ArenaError {
    /// Expected capacity conditions; retry later rather than treating as a bug.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArenaError::NoSpace { .. } | ArenaError::Empty | ArenaError::Incomplete { .. }
        )
    }

    /// Outcomes that indicate a bug in the calling code.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ArenaError::WriteInProgress
                | ArenaError::ReadInProgress
                | ArenaError::WriteNotStarted
                | ArenaError::ReadNotStarted
                | ArenaError::OutOfBounds { .. }
                | ArenaError::ReadTooLarge { .. }
                | ArenaError::InvalidConfig { .. }
                | ArenaError::MismatchedHalves
        )
    }
}

/// Errors raised while moving bytes between a channel and an I/O collaborator.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl PumpError {
    /// Returns the arena status if this error came from the arena.
    pub fn arena(&self) -> Option<ArenaError> {
        match self {
            PumpError::Arena(err) => Some(*err),
            PumpError::Io(_) => None,
        }
    }
}
