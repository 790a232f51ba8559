use crate::{ArenaError, ArenaResult};

/// Construction parameters for a [`RingArena`](crate::RingArena).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Total backing storage in bytes, consolidation prefix included.
    pub capacity: usize,
    /// Largest single read request; also the size of the consolidation prefix.
    pub max_read_block: usize,
}

impl ArenaConfig {
    pub const fn new(capacity: usize, max_read_block: usize) -> Self {
        Self {
            capacity,
            max_read_block,
        }
    }

    /// Sizes an arena that buffers `blocks` reads of `block` bytes each, plus
    /// the consolidation prefix for one block. Fails with `InvalidConfig`
    /// (reporting `usize::MAX` as the capacity) when the size overflows.
    pub const fn for_blocks(block: usize, blocks: usize) -> ArenaResult<Self> {
        let capacity = match blocks.checked_add(1) {
            Some(total) => block.checked_mul(total),
            None => None,
        };
        match capacity {
            Some(capacity) => Ok(Self {
                capacity,
                max_read_block: block,
            }),
            None => Err(ArenaError::InvalidConfig {
                capacity: usize::MAX,
                max_read_block: block,
            }),
        }
    }

    /// Bytes addressable by the ring itself.
    pub fn writable_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.max_read_block)
    }

    pub fn validate(&self) -> ArenaResult<()> {
        if self.max_read_block == 0 || self.capacity <= self.max_read_block {
            return Err(ArenaError::InvalidConfig {
                capacity: self.capacity,
                max_read_block: self.max_read_block,
            });
        }
        Ok(())
    }
}
