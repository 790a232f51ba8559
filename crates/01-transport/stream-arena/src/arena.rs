//! Single-threaded circular byte arena with zero-copy open/commit sessions.
//!
//! Layout:
//!
//! ```text
//! +------------------------+------------------------------------------------+
//! | consolidation prefix   | ring (writable_capacity bytes, logical 0..W)   |
//! | (max_read_block bytes) |                                                |
//! +------------------------+------------------------------------------------+
//!              ^                 ^            ^               ^
//!              |                 tail         head            tail_skip
//!   wrapped reads are            (lap 2)      (lap 1)         (end of lap 1)
//!   consolidated here
//! ```
//!
//! Writers reserve a contiguous region with [`RingArena::write_open`], fill it
//! in place (possibly in several short passes), then publish it with
//! [`RingArena::write_close`]. Readers borrow a contiguous region with
//! [`RingArena::read_open`] and release it with [`RingArena::read_close`].
//! Payload bytes are copied only when a read straddles the wrap boundary: the
//! tail of lap one is moved into the prefix so the caller still sees a single
//! slice.
//!
//! Sessions are tokens rather than borrows so that one write session and one
//! read session can be open at the same time. Every token carries a serial
//! number; tokens from before a [`RingArena::reset`] are rejected.

use crate::region::SharedRegion;
use crate::{ArenaConfig, ArenaError, ArenaResult};
use std::ptr::{self, NonNull};
use std::slice;
use tracing::trace;

/// Where a write session's region was placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// After the tail of non-wrapped data, before the end of the ring.
    AppendAtTail,
    /// Between the tail of lap two and the head of lap one.
    FillGap,
    /// At logical offset 0; the old tail becomes the wrap boundary on close.
    WrapToZero,
}

/// An open write transaction. Must be handed back to
/// [`RingArena::write_close`].
#[must_use = "an open write session must be closed with `write_close`"]
#[derive(Debug)]
pub struct WriteSession {
    serial: u64,
    placement: Placement,
    start: usize,
    len: usize,
    committed: usize,
    wrap_boundary: usize,
}

impl WriteSession {
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Number of bytes reserved at open.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes accounted through [`RingArena::write`] so far.
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Reserved bytes not yet accounted.
    pub fn remaining(&self) -> usize {
        self.len - self.committed
    }
}

/// An open read transaction. Must be handed back to
/// [`RingArena::read_close`].
#[must_use = "an open read session must be released with `read_close`"]
#[derive(Debug)]
pub struct ReadSession {
    serial: u64,
    start: usize,
    len: usize,
    new_head: usize,
    consolidated: bool,
}

impl ReadSession {
    /// Bytes visible through this session; released on close.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the region was assembled in the consolidation prefix.
    pub fn is_consolidated(&self) -> bool {
        self.consolidated
    }
}

/// Point-in-time view of the ring bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaSnapshot {
    pub head: usize,
    pub tail: usize,
    pub tail_skip: usize,
    pub size: usize,
    pub writable_capacity: usize,
    pub write_open: bool,
    pub read_open: bool,
}

/// Counters accumulated since construction or the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub wraps: u64,
    pub consolidations: u64,
    pub consolidated_bytes: u64,
    pub bytes_committed: u64,
    pub bytes_released: u64,
}

/// Fixed-capacity circular byte arena. Not synchronized; see
/// [`SyncChannel`](crate::SyncChannel) for the blocking, thread-safe wrapper.
#[derive(Debug)]
pub struct RingArena {
    region: SharedRegion,
    prefix_len: usize,
    writable: usize,
    head: usize,
    tail: usize,
    tail_skip: usize,
    size: usize,
    next_serial: u64,
    write_session: Option<u64>,
    read_session: Option<u64>,
    stats: ArenaStats,
}

impl RingArena {
    /// Builds an arena over caller-provided storage. The first
    /// `max_read_block` bytes become the consolidation prefix.
    pub fn new(storage: impl Into<SharedRegion>, max_read_block: usize) -> ArenaResult<Self> {
        let region = storage.into();
        ArenaConfig::new(region.len(), max_read_block).validate()?;

        let writable = region.len() - max_read_block;
        let mut arena = Self {
            region,
            prefix_len: max_read_block,
            writable,
            head: 0,
            tail: 0,
            tail_skip: writable,
            size: 0,
            next_serial: 0,
            write_session: None,
            read_session: None,
            stats: ArenaStats::default(),
        };
        arena.reset();
        Ok(arena)
    }

    /// Allocates zeroed backing storage once and builds an arena over it.
    pub fn with_config(config: &ArenaConfig) -> ArenaResult<Self> {
        config.validate()?;
        let region = SharedRegion::zeroed(config.capacity)?;
        Self::new(region, config.max_read_block)
    }

    /// Drops all buffered data and closes any open sessions. Outstanding
    /// session tokens become stale.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.tail_skip = self.writable;
        self.size = 0;
        self.write_session = None;
        self.read_session = None;
        self.stats = ArenaStats::default();
    }

    /// Total storage, consolidation prefix included.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    pub fn writable_capacity(&self) -> usize {
        self.writable
    }

    pub fn max_read_block(&self) -> usize {
        self.prefix_len
    }

    /// Buffered bytes, including bytes held by an open read session.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Largest write that [`write_open`](Self::write_open) could place now.
    pub fn max_write(&self) -> usize {
        if self.size == 0 {
            self.writable
        } else if self.is_wrapped() {
            self.head - self.tail
        } else {
            (self.writable - self.tail).max(self.head)
        }
    }

    pub fn snapshot(&self) -> ArenaSnapshot {
        ArenaSnapshot {
            head: self.head,
            tail: self.tail,
            tail_skip: self.tail_skip,
            size: self.size,
            writable_capacity: self.writable,
            write_open: self.write_session.is_some(),
            read_open: self.read_session.is_some(),
        }
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// Reserves `len` contiguous bytes for writing.
    ///
    /// Placement precedence: append at the tail, fill the gap before the head
    /// of a wrapped ring, wrap to logical 0. An empty ring whose cursors sit
    /// too far into the buffer is re-based to 0 first.
    pub fn write_open(&mut self, len: usize) -> ArenaResult<WriteSession> {
        if self.write_session.is_some() {
            return Err(ArenaError::WriteInProgress);
        }
        if len == 0 {
            return Err(ArenaError::NothingRequested);
        }

        let (placement, start) = match self.place(len) {
            Some(found) => found,
            None if self.size == 0 && len <= self.writable => {
                // An empty ring holds no read session, so the cursors can move.
                self.head = 0;
                self.tail = 0;
                self.tail_skip = self.writable;
                (Placement::AppendAtTail, 0)
            }
            None => return Err(ArenaError::NoSpace { requested: len }),
        };

        let serial = self.next_serial();
        self.write_session = Some(serial);
        Ok(WriteSession {
            serial,
            placement,
            start,
            len,
            committed: 0,
            wrap_boundary: self.tail,
        })
    }

    /// Mutable view of the region reserved by `session`.
    pub fn write_region(&mut self, session: &WriteSession) -> ArenaResult<&mut [u8]> {
        self.check_write(session)?;
        let ptr = self.write_ptr(session);
        // SAFETY: the region lies inside the ring and is exclusively reserved
        // for this session; the `&mut self` borrow rules out other views.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), session.len) })
    }

    /// Accounts `len` bytes found at `offset` within the session's region.
    ///
    /// Bytes beyond the already-committed prefix are moved down so committed
    /// data stays contiguous, which lets a producer fill the region in several
    /// short passes.
    pub fn write(&mut self, session: &mut WriteSession, offset: usize, len: usize) -> ArenaResult<()> {
        self.check_write(session)?;
        let out_of_bounds = ArenaError::OutOfBounds {
            offset,
            len,
            region: session.len,
        };
        let end = offset.checked_add(len).ok_or(out_of_bounds)?;
        if offset < session.committed || end > session.len {
            return Err(out_of_bounds);
        }

        if len > 0 && offset != session.committed {
            let base = self.write_ptr(session).as_ptr();
            unsafe {
                // SAFETY: both ranges lie inside the reserved region; `copy`
                // tolerates the overlap.
                ptr::copy(base.add(offset), base.add(session.committed), len);
            }
        }
        session.committed += len;
        Ok(())
    }

    /// Publishes the committed bytes of `session`. The session is consumed
    /// whatever the outcome.
    pub fn write_close(&mut self, session: WriteSession) -> ArenaResult<usize> {
        self.check_write(&session)?;
        self.write_session = None;

        let committed = session.committed;
        if committed == 0 {
            return Ok(0);
        }

        match session.placement {
            Placement::AppendAtTail | Placement::FillGap => self.tail += committed,
            Placement::WrapToZero if self.size == 0 => {
                // The reader drained lap one while the session was open.
                self.head = 0;
                self.tail = committed;
                self.tail_skip = self.writable;
            }
            Placement::WrapToZero => {
                self.tail_skip = session.wrap_boundary;
                self.tail = committed;
                self.stats.wraps += 1;
                trace!(
                    boundary = session.wrap_boundary,
                    committed,
                    "write wrapped to ring start"
                );
            }
        }
        self.size += committed;
        self.stats.bytes_committed += committed as u64;
        Ok(committed)
    }

    /// Borrows up to `len` buffered bytes as one contiguous region.
    ///
    /// With `exact`, fails with `Incomplete` unless `len` bytes are buffered.
    /// A request that straddles the wrap boundary is consolidated into the
    /// prefix; that copy is bounded by `max_read_block`.
    pub fn read_open(&mut self, len: usize, exact: bool) -> ArenaResult<ReadSession> {
        if self.read_session.is_some() {
            return Err(ArenaError::ReadInProgress);
        }
        if len > self.prefix_len {
            return Err(ArenaError::ReadTooLarge {
                requested: len,
                max: self.prefix_len,
            });
        }
        if len == 0 {
            return Err(ArenaError::NothingRequested);
        }
        if self.size == 0 {
            return Err(ArenaError::Empty);
        }
        if exact && len > self.size {
            return Err(ArenaError::Incomplete {
                requested: len,
                available: self.size,
            });
        }

        let (start, count, new_head, consolidated) = if !self.is_wrapped() {
            let count = len.min(self.tail - self.head);
            (self.prefix_len + self.head, count, self.head + count, false)
        } else {
            let avail = self.tail_skip - self.head;
            if len <= avail {
                (self.prefix_len + self.head, len, self.head + len, false)
            } else {
                let count = len.min(self.size);
                let start = self.prefix_len - avail;
                if avail > 0 {
                    let base = self.region.base();
                    unsafe {
                        // SAFETY: source is the end of lap one inside the ring,
                        // destination is the prefix just before logical 0.
                        ptr::copy_nonoverlapping(
                            base.add(self.prefix_len + self.head),
                            base.add(start),
                            avail,
                        );
                    }
                }
                self.stats.consolidations += 1;
                self.stats.consolidated_bytes += avail as u64;
                trace!(avail, count, "consolidated read across wrap");
                (start, count, count - avail, true)
            }
        };

        let serial = self.next_serial();
        self.read_session = Some(serial);
        Ok(ReadSession {
            serial,
            start,
            len: count,
            new_head,
            consolidated,
        })
    }

    /// Immutable view of the region borrowed by `session`.
    pub fn read_region(&self, session: &ReadSession) -> ArenaResult<&[u8]> {
        self.check_read(session)?;
        let ptr = self.read_ptr(session);
        // SAFETY: the region holds committed bytes no writer may touch until
        // the session is released.
        Ok(unsafe { slice::from_raw_parts(ptr.as_ptr(), session.len) })
    }

    /// Releases the bytes borrowed by `session`.
    pub fn read_close(&mut self, session: ReadSession) -> ArenaResult<usize> {
        self.check_read(&session)?;
        self.read_session = None;

        self.head = session.new_head;
        self.size -= session.len;
        if session.consolidated {
            self.tail_skip = self.writable;
        } else if self.size > 0 && self.head == self.tail_skip {
            // Lap one fully consumed; what remains starts at logical 0.
            self.head = 0;
            self.tail_skip = self.writable;
        }
        self.stats.bytes_released += session.len as u64;
        Ok(session.len)
    }

    pub(crate) fn write_ptr(&self, session: &WriteSession) -> NonNull<u8> {
        self.ptr_at(self.prefix_len + session.start)
    }

    pub(crate) fn read_ptr(&self, session: &ReadSession) -> NonNull<u8> {
        self.ptr_at(session.start)
    }

    pub(crate) fn check_write(&self, session: &WriteSession) -> ArenaResult<()> {
        match self.write_session {
            Some(serial) if serial == session.serial => Ok(()),
            _ => Err(ArenaError::WriteNotStarted),
        }
    }

    pub(crate) fn check_read(&self, session: &ReadSession) -> ArenaResult<()> {
        match self.read_session {
            Some(serial) if serial == session.serial => Ok(()),
            _ => Err(ArenaError::ReadNotStarted),
        }
    }

    fn is_wrapped(&self) -> bool {
        self.size > 0 && self.head >= self.tail
    }

    fn place(&self, len: usize) -> Option<(Placement, usize)> {
        let end = self.tail.checked_add(len)?;
        if self.is_wrapped() {
            return (end <= self.head).then_some((Placement::FillGap, self.tail));
        }
        if end <= self.writable {
            Some((Placement::AppendAtTail, self.tail))
        } else if len <= self.head {
            Some((Placement::WrapToZero, 0))
        } else {
            None
        }
    }

    fn ptr_at(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index <= self.region.len());
        // SAFETY: `index` is within the region, and the base is non-null.
        unsafe { NonNull::new_unchecked(self.region.base().add(index)) }
    }

    fn next_serial(&mut self) -> u64 {
        self.next_serial = self.next_serial.wrapping_add(1);
        self.next_serial
    }
}

#[cfg(test)]
mod tests {
    //! Unit coverage for placement, consolidation, and session bookkeeping.
    use super::*;
    use rand::prelude::*;
    use std::collections::VecDeque;

    fn arena(capacity: usize, max_read: usize) -> RingArena {
        RingArena::new(vec![0u8; capacity], max_read).expect("create arena")
    }

    fn push(arena: &mut RingArena, bytes: &[u8]) -> Placement {
        let mut session = arena.write_open(bytes.len()).expect("write_open");
        arena.write_region(&session).unwrap()[..bytes.len()].copy_from_slice(bytes);
        arena.write(&mut session, 0, bytes.len()).unwrap();
        let placement = session.placement();
        assert_eq!(arena.write_close(session).unwrap(), bytes.len());
        placement
    }

    fn pull(arena: &mut RingArena, len: usize, exact: bool) -> Vec<u8> {
        let session = arena.read_open(len, exact).expect("read_open");
        let bytes = arena.read_region(&session).unwrap().to_vec();
        arena.read_close(session).unwrap();
        bytes
    }

    fn assert_invariants(arena: &RingArena) {
        let s = arena.snapshot();
        assert!(s.size <= s.writable_capacity);
        if s.size == 0 {
            assert_eq!(s.head, s.tail, "empty ring must have head == tail: {s:?}");
        } else if s.head < s.tail {
            assert_eq!(s.tail - s.head, s.size, "{s:?}");
        } else {
            assert_eq!((s.tail_skip - s.head) + s.tail, s.size, "{s:?}");
        }
    }

    /// Capacity 11 / max read 3: a read across the wrap comes back contiguous.
    #[test]
    fn consolidated_read_across_wrap_fixture() {
        let mut arena = arena(11, 3);
        assert_eq!(arena.writable_capacity(), 8);

        assert_eq!(push(&mut arena, &[0, 1, 2]), Placement::AppendAtTail);
        assert_eq!(push(&mut arena, &[3, 4, 5, 6, 7]), Placement::AppendAtTail);
        assert_eq!(arena.len(), 8);

        assert_eq!(pull(&mut arena, 3, false), vec![0, 1, 2]);
        assert_eq!(pull(&mut arena, 3, false), vec![3, 4, 5]);

        assert_eq!(push(&mut arena, &[8, 9, 10, 11, 12]), Placement::WrapToZero);
        let s = arena.snapshot();
        assert_eq!((s.head, s.tail, s.tail_skip, s.size), (6, 5, 8, 7));
        assert_invariants(&arena);

        let session = arena.read_open(3, true).unwrap();
        assert!(session.is_consolidated());
        assert_eq!(arena.read_region(&session).unwrap(), &[6, 7, 8]);
        arena.read_close(session).unwrap();
        assert_invariants(&arena);

        assert_eq!(pull(&mut arena, 3, true), vec![9, 10, 11]);
        assert_eq!(pull(&mut arena, 3, false), vec![12]);
        assert_eq!(arena.read_open(1, false).unwrap_err(), ArenaError::Empty);

        let stats = arena.stats();
        assert_eq!(stats.wraps, 1);
        assert_eq!(stats.consolidations, 1);
        assert_eq!(stats.consolidated_bytes, 2);
        assert_eq!(stats.bytes_committed, 13);
        assert_eq!(stats.bytes_released, 13);
    }

    #[test]
    fn zero_length_requests_do_not_mutate() {
        let mut arena = arena(16, 4);
        push(&mut arena, &[1, 2, 3]);
        let before = arena.snapshot();

        assert_eq!(arena.write_open(0).unwrap_err(), ArenaError::NothingRequested);
        assert_eq!(
            arena.read_open(0, true).unwrap_err(),
            ArenaError::NothingRequested
        );
        assert_eq!(
            arena.read_open(0, false).unwrap_err(),
            ArenaError::NothingRequested
        );
        assert_eq!(arena.snapshot(), before);
    }

    #[test]
    fn exact_read_short_of_data_is_incomplete() {
        let mut arena = arena(16, 4);
        push(&mut arena, &[1, 2]);
        let before = arena.snapshot();

        assert_eq!(
            arena.read_open(3, true).unwrap_err(),
            ArenaError::Incomplete {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(arena.snapshot(), before);
        assert_eq!(pull(&mut arena, 3, false), vec![1, 2]);
    }

    #[test]
    fn reset_matches_fresh_arena() {
        let fresh = arena(11, 3).snapshot();

        let mut arena = arena(11, 3);
        arena.reset();
        assert_eq!(arena.snapshot(), fresh);

        push(&mut arena, &[0, 1, 2, 3, 4, 5, 6]);
        pull(&mut arena, 3, true);
        push(&mut arena, &[7, 8]);
        let write = arena.write_open(1).unwrap();
        let read = arena.read_open(2, true).unwrap();
        arena.reset();
        assert_eq!(arena.snapshot(), fresh);
        assert_eq!(arena.stats(), ArenaStats::default());

        // Tokens from before the reset are stale.
        assert_eq!(arena.write_close(write).unwrap_err(), ArenaError::WriteNotStarted);
        assert_eq!(arena.read_close(read).unwrap_err(), ArenaError::ReadNotStarted);

        arena.reset();
        assert_eq!(arena.snapshot(), fresh);
    }

    #[test]
    fn one_session_per_direction() {
        let mut arena = arena(16, 4);
        push(&mut arena, &[9; 4]);

        let write = arena.write_open(2).unwrap();
        assert_eq!(arena.write_open(2).unwrap_err(), ArenaError::WriteInProgress);
        let read = arena.read_open(2, true).unwrap();
        assert_eq!(arena.read_open(2, true).unwrap_err(), ArenaError::ReadInProgress);

        arena.read_close(read).unwrap();
        arena.write_close(write).unwrap();
        assert!(!arena.snapshot().write_open);
        assert!(!arena.snapshot().read_open);
    }

    #[test]
    fn read_larger_than_prefix_is_rejected() {
        let mut arena = arena(16, 4);
        push(&mut arena, &[1; 8]);
        assert_eq!(
            arena.read_open(5, false).unwrap_err(),
            ArenaError::ReadTooLarge {
                requested: 5,
                max: 4
            }
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            RingArena::new(vec![0u8; 4], 4),
            Err(ArenaError::InvalidConfig { .. })
        ));
        assert!(matches!(
            RingArena::new(vec![0u8; 4], 0),
            Err(ArenaError::InvalidConfig { .. })
        ));
        let arena = RingArena::with_config(&ArenaConfig::for_blocks(32, 4).unwrap()).unwrap();
        assert_eq!(arena.capacity(), 160);
        assert_eq!(arena.max_read_block(), 32);
    }

    /// Short writes in several passes end up contiguous at the region start.
    #[test]
    fn partial_writes_compact_toward_region_start() {
        let mut arena = arena(20, 4);
        let mut session = arena.write_open(8).unwrap();
        {
            let region = arena.write_region(&session).unwrap();
            region[3..6].copy_from_slice(&[10, 11, 12]);
        }
        arena.write(&mut session, 3, 3).unwrap();
        assert_eq!(session.committed(), 3);

        {
            let region = arena.write_region(&session).unwrap();
            region[5..7].copy_from_slice(&[13, 14]);
        }
        arena.write(&mut session, 5, 2).unwrap();
        arena.write(&mut session, 7, 0).unwrap();
        assert_eq!(session.remaining(), 3);
        assert_eq!(arena.write_close(session).unwrap(), 5);

        assert_eq!(pull(&mut arena, 4, true), vec![10, 11, 12, 13]);
        assert_eq!(pull(&mut arena, 4, false), vec![14]);
    }

    #[test]
    fn writes_outside_the_region_are_rejected() {
        let mut arena = arena(20, 4);
        let mut session = arena.write_open(4).unwrap();
        assert!(matches!(
            arena.write(&mut session, 2, 3),
            Err(ArenaError::OutOfBounds {
                offset: 2,
                len: 3,
                region: 4
            })
        ));
        assert!(matches!(
            arena.write(&mut session, usize::MAX, 2),
            Err(ArenaError::OutOfBounds { .. })
        ));
        arena.write(&mut session, 0, 2).unwrap();
        // Committed bytes cannot be claimed twice.
        assert!(matches!(
            arena.write(&mut session, 1, 1),
            Err(ArenaError::OutOfBounds { .. })
        ));
        assert_eq!(arena.write_close(session).unwrap(), 2);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn full_wrapped_ring_reports_no_space() {
        let mut arena = arena(12, 4);
        push(&mut arena, &[0, 1, 2, 3, 4, 5]);
        pull(&mut arena, 4, true);
        assert_eq!(push(&mut arena, &[6, 7, 8]), Placement::WrapToZero);
        assert_eq!(push(&mut arena, &[9]), Placement::FillGap);

        let s = arena.snapshot();
        assert_eq!(s.head, s.tail);
        assert_eq!(s.size, 6);
        assert_eq!(arena.max_write(), 0);
        assert_eq!(
            arena.write_open(1).unwrap_err(),
            ArenaError::NoSpace { requested: 1 }
        );
        assert_invariants(&arena);

        // Draining lap one un-wraps the ring.
        assert_eq!(pull(&mut arena, 2, true), vec![4, 5]);
        let s = arena.snapshot();
        assert_eq!((s.head, s.tail, s.tail_skip), (0, 4, 8));
        assert_eq!(pull(&mut arena, 4, true), vec![6, 7, 8, 9]);
    }

    #[test]
    fn wrap_session_without_bytes_leaves_state_alone() {
        let mut arena = arena(12, 4);
        push(&mut arena, &[0; 7]);
        pull(&mut arena, 4, true);
        let before = arena.snapshot();

        let session = arena.write_open(3).unwrap();
        assert_eq!(session.placement(), Placement::WrapToZero);
        assert_eq!(arena.write_close(session).unwrap(), 0);
        assert_eq!(arena.snapshot(), before);
    }

    #[test]
    fn drained_ring_rebases_oversized_write() {
        let mut arena = arena(12, 4);
        push(&mut arena, &[0; 5]);
        pull(&mut arena, 4, true);
        pull(&mut arena, 1, true);
        assert!(arena.is_empty());

        let session = arena.write_open(8).unwrap();
        assert_eq!(session.placement(), Placement::AppendAtTail);
        arena.write_close(session).unwrap();
        assert_eq!(arena.snapshot().head, 0);
        assert_eq!(arena.snapshot().tail, 0);
    }

    #[test]
    fn concurrent_sessions_interleave() {
        let mut arena = arena(12, 4);
        push(&mut arena, &[1, 2, 3, 4, 5, 6]);

        let read = arena.read_open(4, true).unwrap();
        let mut write = arena.write_open(2).unwrap();
        assert_eq!(write.placement(), Placement::AppendAtTail);
        arena.write_region(&write).unwrap().copy_from_slice(&[7, 8]);
        arena.write(&mut write, 0, 2).unwrap();
        arena.write_close(write).unwrap();

        assert_eq!(arena.read_region(&read).unwrap(), &[1, 2, 3, 4]);
        arena.read_close(read).unwrap();
        assert_eq!(pull(&mut arena, 4, true), vec![5, 6, 7, 8]);
    }

    /// A fill-gap write stays valid while a consolidated read un-wraps the ring.
    #[test]
    fn fill_gap_write_survives_consolidated_read() {
        let mut arena = arena(11, 3);
        push(&mut arena, &[0, 1, 2, 3, 4, 5, 6, 7]);
        pull(&mut arena, 3, true);
        pull(&mut arena, 3, true);
        assert_eq!(push(&mut arena, &[8, 9, 10]), Placement::WrapToZero);

        let mut write = arena.write_open(2).unwrap();
        assert_eq!(write.placement(), Placement::FillGap);
        arena.write_region(&write).unwrap().copy_from_slice(&[11, 12]);
        arena.write(&mut write, 0, 2).unwrap();

        let read = arena.read_open(3, true).unwrap();
        assert!(read.is_consolidated());
        assert_eq!(arena.read_region(&read).unwrap(), &[6, 7, 8]);
        arena.read_close(read).unwrap();
        let s = arena.snapshot();
        assert_eq!((s.head, s.tail, s.tail_skip, s.size), (1, 3, 8, 2));

        assert_eq!(arena.write_close(write).unwrap(), 2);
        let s = arena.snapshot();
        assert_eq!((s.head, s.tail, s.tail_skip, s.size), (1, 5, 8, 4));
        assert_invariants(&arena);

        assert_eq!(pull(&mut arena, 3, true), vec![9, 10, 11]);
        assert_eq!(pull(&mut arena, 3, false), vec![12]);
        assert!(arena.is_empty());
    }

    /// A wrap write that closes after the reader drained lap one re-bases.
    #[test]
    fn wrap_write_closing_on_drained_ring_rebases() {
        let mut arena = arena(11, 3);
        push(&mut arena, &[0, 1, 2, 3, 4, 5, 6]);
        pull(&mut arena, 3, true);

        let mut write = arena.write_open(3).unwrap();
        assert_eq!(write.placement(), Placement::WrapToZero);
        arena.write_region(&write).unwrap().copy_from_slice(&[7, 8, 9]);
        arena.write(&mut write, 0, 3).unwrap();

        assert_eq!(pull(&mut arena, 3, true), vec![3, 4, 5]);
        assert_eq!(pull(&mut arena, 3, false), vec![6]);
        assert!(arena.is_empty());

        assert_eq!(arena.write_close(write).unwrap(), 3);
        let s = arena.snapshot();
        assert_eq!((s.head, s.tail, s.tail_skip, s.size), (0, 3, 8, 3));
        assert_eq!(arena.stats().wraps, 0);
        assert_invariants(&arena);

        assert_eq!(pull(&mut arena, 3, true), vec![7, 8, 9]);
    }

    /// Randomised stress covering wrap placements, consolidation, and FIFO order.
    #[test]
    fn random_chunking_round_trip() {
        let mut arena = arena(64, 13);
        let mut rng = StdRng::seed_from_u64(0x5EED_A7E4A);
        let mut expected = VecDeque::<u8>::new();
        let mut next = 0u8;

        for _ in 0..20_000 {
            if rng.gen_bool(0.5) {
                let want = rng.gen_range(1..=arena.writable_capacity());
                let mut session = match arena.write_open(want) {
                    Ok(session) => session,
                    Err(err) => {
                        assert_eq!(err, ArenaError::NoSpace { requested: want });
                        continue;
                    }
                };
                let short = rng.gen_range(0..=want);
                let region = arena.write_region(&session).unwrap();
                for byte in region.iter_mut().take(short) {
                    *byte = next;
                    expected.push_back(next);
                    next = next.wrapping_add(1);
                }
                arena.write(&mut session, 0, short).unwrap();
                assert_eq!(arena.write_close(session).unwrap(), short);
            } else {
                let want = rng.gen_range(1..=arena.max_read_block());
                let exact = rng.gen_bool(0.5);
                match arena.read_open(want, exact) {
                    Ok(session) => {
                        let bytes = arena.read_region(&session).unwrap();
                        assert!(!bytes.is_empty() && bytes.len() <= want);
                        for byte in bytes {
                            assert_eq!(Some(*byte), expected.pop_front());
                        }
                        arena.read_close(session).unwrap();
                    }
                    Err(ArenaError::Empty) => assert!(expected.is_empty()),
                    Err(ArenaError::Incomplete { available, .. }) => {
                        assert!(exact);
                        assert_eq!(available, expected.len());
                    }
                    Err(err) => panic!("unexpected read error {err:?}"),
                }
            }
            assert_eq!(arena.len(), expected.len());
            assert_invariants(&arena);
        }

        let stats = arena.stats();
        assert!(stats.wraps > 0);
        assert!(stats.consolidations > 0);
        assert_eq!(
            stats.bytes_committed - stats.bytes_released,
            expected.len() as u64
        );
    }
}
