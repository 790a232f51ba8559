//! Zero-copy byte streaming over a fixed circular arena.
//!
//! * [`RingArena`] – single-threaded circular byte store. Writers reserve a
//!   contiguous region, fill it in place, and publish it; readers borrow a
//!   contiguous view, stitching wrapped data into the prefix when needed.
//! * [`SyncChannel`] – blocking single-producer/single-consumer wrapper with
//!   timeouts, split into [`Producer`] and [`Consumer`] handles.
//! * [`ByteSource`] / [`ByteSink`] – stream adapters for pumping bytes in and
//!   out without staging copies.
//! * [`SharedRegion`] – storage backing an arena, allocated once or adopted
//!   from the caller.

mod arena;
mod channel;
mod config;
mod error;
mod pump;
mod region;
mod wait;

pub use arena::{ArenaSnapshot, ArenaStats, Placement, ReadSession, RingArena, WriteSession};
pub use channel::{
    channel, ChannelMetricsSnapshot, Consumer, Producer, ReadGrant, SyncChannel, WriteGrant,
};
pub use config::ArenaConfig;
pub use error::{ArenaError, ArenaResult, PumpError};
pub use pump::{ByteSink, ByteSource};
pub use region::{RegionInit, SharedRegion, REGION_ALIGNMENT};
pub use wait::{deadline_after, Signal, WaitResult};
