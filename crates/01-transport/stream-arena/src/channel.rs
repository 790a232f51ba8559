//! Blocking single-producer/single-consumer channel over one [`RingArena`].
//!
//! The arena bookkeeping sits behind a lock; payload bytes do not. A grant
//! returned by `write_open`/`read_open` points at a region that the other side
//! cannot touch until the grant is closed, so filling or consuming it happens
//! outside the critical section. Only the opens block: they retry after every
//! readiness signal until a region is produced or the timeout expires.

use std::ops::Deref;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::arena::{ArenaSnapshot, ArenaStats, Placement, ReadSession, RingArena, WriteSession};
use crate::wait::{deadline_after, Signal, WaitResult};
use crate::{ArenaConfig, ArenaError, ArenaResult};

/// Blocking single-producer/single-consumer channel over one [`RingArena`].
#[derive(Debug)]
pub struct SyncChannel {
    arena: Mutex<RingArena>,
    space_available: Signal,
    data_available: Signal,
    max_read_block: usize,
    writable_capacity: usize,
    metrics: ChannelMetrics,
}

impl SyncChannel {
    pub fn new(arena: RingArena) -> Self {
        Self {
            max_read_block: arena.max_read_block(),
            writable_capacity: arena.writable_capacity(),
            arena: Mutex::new(arena),
            space_available: Signal::new(),
            data_available: Signal::new(),
            metrics: ChannelMetrics::default(),
        }
    }

    pub fn with_config(config: &ArenaConfig) -> ArenaResult<Self> {
        Ok(Self::new(RingArena::with_config(config)?))
    }

    /// Hands out single-owner producer and consumer handles.
    pub fn split(self) -> (Producer, Consumer) {
        let shared = Arc::new(self);
        (
            Producer {
                shared: Arc::clone(&shared),
            },
            Consumer { shared },
        )
    }

    pub fn max_read_block(&self) -> usize {
        self.max_read_block
    }

    pub fn writable_capacity(&self) -> usize {
        self.writable_capacity
    }

    /// Non-blocking write open, usable where blocking is not allowed.
    pub fn try_write_open(&self, len: usize) -> ArenaResult<WriteGrant<'_>> {
        let mut arena = self.arena.lock();
        match arena.write_open(len) {
            Ok(session) => Ok(WriteGrant::new(self, &arena, session)),
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Reserves `len` bytes, waiting up to `timeout` for the consumer to free
    /// space. On timeout the last status (`NoSpace`) is returned.
    pub fn write_open(&self, len: usize, timeout: Duration) -> ArenaResult<WriteGrant<'_>> {
        let deadline = deadline_after(timeout);
        loop {
            let mut arena = self.arena.lock();
            let err = match arena.write_open(len) {
                Ok(session) => return Ok(WriteGrant::new(self, &arena, session)),
                // Larger than the whole ring: no release can ever make room.
                Err(err @ ArenaError::NoSpace { .. }) if len > self.writable_capacity => {
                    return Err(err)
                }
                Err(err @ ArenaError::NoSpace { .. }) => err,
                Err(err) => return Err(self.reject(err)),
            };
            // Cleared under the arena lock: a release that frees space after
            // this point raises the signal again.
            self.space_available.clear();
            drop(arena);

            self.metrics.write_waits.fetch_add(1, Ordering::Relaxed);
            debug!(len, "write_open waiting for space");
            if self.space_available.wait_until(deadline) == WaitResult::TimedOut {
                self.metrics.write_timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(len, "write_open timed out");
                return Err(err);
            }
        }
    }

    /// Non-blocking read open.
    pub fn try_read_open(&self, len: usize, exact: bool) -> ArenaResult<ReadGrant<'_>> {
        let mut arena = self.arena.lock();
        match arena.read_open(len, exact) {
            Ok(session) => Ok(ReadGrant::new(self, &arena, session)),
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Borrows up to `len` bytes (exactly `len` with `exact`), waiting up to
    /// `timeout` for the producer. On timeout the last status (`Empty` or
    /// `Incomplete`) is returned.
    pub fn read_open(
        &self,
        len: usize,
        exact: bool,
        timeout: Duration,
    ) -> ArenaResult<ReadGrant<'_>> {
        let deadline = deadline_after(timeout);
        loop {
            let mut arena = self.arena.lock();
            let err = match arena.read_open(len, exact) {
                Ok(session) => return Ok(ReadGrant::new(self, &arena, session)),
                Err(err @ (ArenaError::Empty | ArenaError::Incomplete { .. })) => err,
                Err(err) => return Err(self.reject(err)),
            };
            self.data_available.clear();
            drop(arena);

            self.metrics.read_waits.fetch_add(1, Ordering::Relaxed);
            debug!(len, exact, "read_open waiting for data");
            if self.data_available.wait_until(deadline) == WaitResult::TimedOut {
                self.metrics.read_timeouts.fetch_add(1, Ordering::Relaxed);
                debug!(len, exact, "read_open timed out");
                return Err(err);
            }
        }
    }

    /// Drops all buffered data. Exclusive access guarantees no grant is live.
    pub fn reset(&mut self) {
        self.arena.get_mut().reset();
        self.clear_signals();
    }

    /// Resets through the lock. Callers must rule out live grants.
    fn reset_shared(&self) {
        self.arena.lock().reset();
        self.clear_signals();
    }

    fn clear_signals(&self) {
        self.space_available.clear();
        self.data_available.clear();
    }

    pub fn snapshot(&self) -> ArenaSnapshot {
        self.arena.lock().snapshot()
    }

    pub fn stats(&self) -> ArenaStats {
        self.arena.lock().stats()
    }

    pub fn len(&self) -> usize {
        self.arena.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.lock().is_empty()
    }

    pub fn metrics(&self) -> ChannelMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn reject(&self, err: ArenaError) -> ArenaError {
        if err.is_contract_violation() {
            warn!(%err, "arena contract violation");
        }
        err
    }
}

/// Writable region reserved through a [`SyncChannel`].
///
/// Dropping the grant closes it, publishing whatever was accounted through
/// [`write`](Self::write) or [`fill_from`](Self::fill_from).
#[must_use = "dropping a write grant immediately publishes nothing"]
pub struct WriteGrant<'a> {
    channel: &'a SyncChannel,
    session: Option<WriteSession>,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'a> WriteGrant<'a> {
    fn new(channel: &'a SyncChannel, arena: &RingArena, session: WriteSession) -> Self {
        Self {
            channel,
            ptr: arena.write_ptr(&session),
            len: session.len(),
            session: Some(session),
        }
    }

    /// Bytes reserved at open.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes accounted so far.
    pub fn filled(&self) -> usize {
        self.session.as_ref().map_or(0, WriteSession::committed)
    }

    pub fn placement(&self) -> Option<Placement> {
        self.session.as_ref().map(WriteSession::placement)
    }

    /// The whole reserved region.
    pub fn region(&mut self) -> &mut [u8] {
        // SAFETY: the region is reserved for this grant until it closes; the
        // consumer and the consolidation copy never touch it.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// The part of the region after the accounted bytes.
    pub fn unfilled(&mut self) -> &mut [u8] {
        let filled = self.filled();
        &mut self.region()[filled..]
    }

    /// Accounts `len` bytes placed at `offset` within the region.
    pub fn write(&mut self, offset: usize, len: usize) -> ArenaResult<()> {
        let channel = self.channel;
        let session = self.session.as_mut().ok_or(ArenaError::WriteNotStarted)?;
        let result = channel.arena.lock().write(session, offset, len);
        result.map_err(|err| channel.reject(err))
    }

    /// Copies as much of `bytes` as fits after the accounted bytes and accounts
    /// it. Returns the number of bytes taken.
    pub fn fill_from(&mut self, bytes: &[u8]) -> ArenaResult<usize> {
        let filled = self.filled();
        let n = bytes.len().min(self.len - filled);
        self.unfilled()[..n].copy_from_slice(&bytes[..n]);
        self.write(filled, n)?;
        Ok(n)
    }

    /// Publishes the accounted bytes and wakes the consumer.
    pub fn close(mut self) -> ArenaResult<usize> {
        self.finish()
    }

    fn finish(&mut self) -> ArenaResult<usize> {
        let channel = self.channel;
        let session = self.session.take().ok_or(ArenaError::WriteNotStarted)?;
        let result = channel.arena.lock().write_close(session);
        match result {
            Ok(committed) => {
                channel.metrics.writes.fetch_add(1, Ordering::Relaxed);
                channel
                    .metrics
                    .bytes_written
                    .fetch_add(committed as u64, Ordering::Relaxed);
                channel.data_available.raise();
                Ok(committed)
            }
            Err(err) => Err(channel.reject(err)),
        }
    }
}

impl Drop for WriteGrant<'_> {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.finish();
        }
    }
}

/// Readable region borrowed through a [`SyncChannel`]. Dropping the grant
/// releases it.
#[must_use = "dropping a read grant immediately releases the bytes unread"]
pub struct ReadGrant<'a> {
    channel: &'a SyncChannel,
    session: Option<ReadSession>,
    ptr: NonNull<u8>,
    len: usize,
    consolidated: bool,
}

impl<'a> ReadGrant<'a> {
    fn new(channel: &'a SyncChannel, arena: &RingArena, session: ReadSession) -> Self {
        Self {
            channel,
            ptr: arena.read_ptr(&session),
            len: session.len(),
            consolidated: session.is_consolidated(),
            session: Some(session),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the region holds committed bytes that the producer cannot
        // overwrite until this grant is released.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// True when the bytes were stitched together across the wrap boundary.
    pub fn is_consolidated(&self) -> bool {
        self.consolidated
    }

    /// Releases the bytes and wakes the producer.
    pub fn close(mut self) -> ArenaResult<usize> {
        self.finish()
    }

    fn finish(&mut self) -> ArenaResult<usize> {
        let channel = self.channel;
        let session = self.session.take().ok_or(ArenaError::ReadNotStarted)?;
        let result = channel.arena.lock().read_close(session);
        match result {
            Ok(released) => {
                channel.metrics.reads.fetch_add(1, Ordering::Relaxed);
                channel
                    .metrics
                    .bytes_read
                    .fetch_add(released as u64, Ordering::Relaxed);
                channel.space_available.raise();
                Ok(released)
            }
            Err(err) => Err(channel.reject(err)),
        }
    }
}

impl Deref for ReadGrant<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl Drop for ReadGrant<'_> {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.finish();
        }
    }
}

/// Producing half of a split channel. Not `Clone`: one producer per channel.
#[derive(Debug)]
pub struct Producer {
    shared: Arc<SyncChannel>,
}

impl Producer {
    pub fn write_open(&mut self, len: usize, timeout: Duration) -> ArenaResult<WriteGrant<'_>> {
        self.shared.write_open(len, timeout)
    }

    pub fn try_write_open(&mut self, len: usize) -> ArenaResult<WriteGrant<'_>> {
        self.shared.try_write_open(len)
    }

    /// Drops all buffered data of a split channel. Holding both halves
    /// mutably guarantees no grant is live on either side.
    pub fn reset(&mut self, consumer: &mut Consumer) -> ArenaResult<()> {
        if !Arc::ptr_eq(&self.shared, &consumer.shared) {
            return Err(self.shared.reject(ArenaError::MismatchedHalves));
        }
        self.shared.reset_shared();
        Ok(())
    }

    /// Writes all of `bytes` as one contiguous record.
    pub fn send(&mut self, bytes: &[u8], timeout: Duration) -> ArenaResult<()> {
        let mut grant = self.write_open(bytes.len(), timeout)?;
        grant.fill_from(bytes)?;
        grant.close()?;
        Ok(())
    }

    pub fn channel(&self) -> &SyncChannel {
        &self.shared
    }
}

/// Consuming half of a split channel. Not `Clone`: one consumer per channel.
#[derive(Debug)]
pub struct Consumer {
    shared: Arc<SyncChannel>,
}

impl Consumer {
    pub fn read_open(
        &mut self,
        len: usize,
        exact: bool,
        timeout: Duration,
    ) -> ArenaResult<ReadGrant<'_>> {
        self.shared.read_open(len, exact, timeout)
    }

    pub fn try_read_open(&mut self, len: usize, exact: bool) -> ArenaResult<ReadGrant<'_>> {
        self.shared.try_read_open(len, exact)
    }

    /// Copies up to `buf.len()` bytes out of the channel (all of them with
    /// `exact`). `buf` may not be larger than the max read block.
    pub fn recv(&mut self, buf: &mut [u8], exact: bool, timeout: Duration) -> ArenaResult<usize> {
        let grant = self.read_open(buf.len(), exact, timeout)?;
        let n = grant.len();
        buf[..n].copy_from_slice(&grant);
        grant.close()
    }

    pub fn channel(&self) -> &SyncChannel {
        &self.shared
    }
}

/// Builds a channel with freshly allocated storage and splits it.
pub fn channel(config: &ArenaConfig) -> ArenaResult<(Producer, Consumer)> {
    Ok(SyncChannel::with_config(config)?.split())
}

#[derive(Debug, Default)]
struct ChannelMetrics {
    writes: AtomicU64,
    bytes_written: AtomicU64,
    reads: AtomicU64,
    bytes_read: AtomicU64,
    write_waits: AtomicU64,
    read_waits: AtomicU64,
    write_timeouts: AtomicU64,
    read_timeouts: AtomicU64,
}

impl ChannelMetrics {
    fn snapshot(&self) -> ChannelMetricsSnapshot {
        ChannelMetricsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            write_waits: self.write_waits.load(Ordering::Relaxed),
            read_waits: self.read_waits.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelMetricsSnapshot {
    pub writes: u64,
    pub bytes_written: u64,
    pub reads: u64,
    pub bytes_read: u64,
    pub write_waits: u64,
    pub read_waits: u64,
    pub write_timeouts: u64,
    pub read_timeouts: u64,
}
