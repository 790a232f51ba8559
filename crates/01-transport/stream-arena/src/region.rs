//! Backing storage for ring arenas.
//!
//! An arena never allocates after construction. Its bytes live in a
//! [`SharedRegion`], which either allocates once (anonymous `mmap` on native
//! targets, aligned heap otherwise) or adopts a buffer the caller already owns,
//! including `'static` buffers placed by a linker script.
//!
//! The region hands out raw pointers from `&self`. Producer and consumer grants
//! each derive slices over disjoint byte ranges from that pointer, so no
//! reference to the whole buffer may be created while grants are live.

use crate::{ArenaError, ArenaResult};
use std::alloc::{alloc, alloc_zeroed, dealloc, Layout};
use std::ptr::{self, NonNull};

/// Alignment used when the arena allocates its own region.
pub const REGION_ALIGNMENT: usize = 64;

/// Specifies how memory in a [`SharedRegion`] should be initialised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionInit {
    /// Zero the entire region after allocation.
    Zeroed,
    /// Leave the region uninitialised.
    Uninitialized,
}

#[derive(Debug)]
enum Backing {
    #[cfg(not(target_arch = "wasm32"))]
    Native {
        _map: memmap2::MmapMut,
        ptr: NonNull<u8>,
    },
    Owned {
        ptr: NonNull<u8>,
        layout: Layout,
    },
    Boxed {
        ptr: NonNull<u8>,
    },
    Static {
        ptr: NonNull<u8>,
    },
}

impl Backing {
    fn as_ptr(&self) -> *mut u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Native { ptr, .. } => ptr.as_ptr(),
            Backing::Owned { ptr, .. } => ptr.as_ptr(),
            Backing::Boxed { ptr } => ptr.as_ptr(),
            Backing::Static { ptr } => ptr.as_ptr(),
        }
    }
}

/// Fixed-size byte storage owned by exactly one arena.
#[derive(Debug)]
pub struct SharedRegion {
    len: usize,
    backing: Backing,
}

// SAFETY: the region is the unique owner of its bytes; the raw pointer is never
// shared outside the arena that owns the region.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Allocates a new region of `len` bytes aligned to `alignment`.
    ///
    /// Native builds first try an anonymous `mmap`; if the mapping is not
    /// suitably aligned the heap path is used instead.
    pub fn new_aligned(len: usize, alignment: usize, init: RegionInit) -> ArenaResult<Self> {
        if len == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(ArenaError::AllocationFailed {
                size: len,
                alignment,
            });
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Some(backing) = Self::mmap_backed(len, alignment, init)? {
                return Ok(Self { len, backing });
            }
        }

        Self::heap_backed(len, alignment, init)
    }

    /// Allocates a zeroed region with [`REGION_ALIGNMENT`].
    pub fn zeroed(len: usize) -> ArenaResult<Self> {
        Self::new_aligned(len, REGION_ALIGNMENT, RegionInit::Zeroed)
    }

    fn heap_backed(len: usize, alignment: usize, init: RegionInit) -> ArenaResult<Self> {
        let layout =
            Layout::from_size_align(len, alignment).map_err(|_| ArenaError::AllocationFailed {
                size: len,
                alignment,
            })?;

        let ptr = unsafe {
            // SAFETY: `len` is non-zero, checked by the caller.
            match init {
                RegionInit::Zeroed => alloc_zeroed(layout),
                RegionInit::Uninitialized => alloc(layout),
            }
        };

        let ptr = NonNull::new(ptr).ok_or(ArenaError::AllocationFailed {
            size: len,
            alignment,
        })?;
        Ok(Self {
            len,
            backing: Backing::Owned { ptr, layout },
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn mmap_backed(
        len: usize,
        alignment: usize,
        init: RegionInit,
    ) -> ArenaResult<Option<Backing>> {
        let mut map = memmap2::MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|_| ArenaError::AllocationFailed {
                size: len,
                alignment,
            })?;

        let raw = map.as_mut_ptr();
        if raw as usize % alignment != 0 {
            return Ok(None);
        }

        if matches!(init, RegionInit::Zeroed) {
            unsafe {
                // SAFETY: the anonymous mapping exposes `len` writable bytes.
                ptr::write_bytes(raw, 0, len)
            };
        }

        let ptr = NonNull::new(raw).ok_or(ArenaError::AllocationFailed {
            size: len,
            alignment,
        })?;
        Ok(Some(Backing::Native { _map: map, ptr }))
    }

    /// Total number of bytes managed by this region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer of the region. Stable for the lifetime of the region, even
    /// if the region value itself is moved.
    pub(crate) fn base(&self) -> *mut u8 {
        self.backing.as_ptr()
    }
}

impl From<Box<[u8]>> for SharedRegion {
    fn from(buf: Box<[u8]>) -> Self {
        let len = buf.len();
        let raw = Box::into_raw(buf) as *mut u8;
        // SAFETY: `Box::into_raw` never returns null; for zero-length boxes the
        // pointer is dangling but non-null and is never dereferenced.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self {
            len,
            backing: Backing::Boxed { ptr },
        }
    }
}

impl From<Vec<u8>> for SharedRegion {
    fn from(buf: Vec<u8>) -> Self {
        Self::from(buf.into_boxed_slice())
    }
}

impl From<&'static mut [u8]> for SharedRegion {
    fn from(buf: &'static mut [u8]) -> Self {
        let len = buf.len();
        let ptr = NonNull::from(buf).cast::<u8>();
        Self {
            len,
            backing: Backing::Static { ptr },
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        match &self.backing {
            Backing::Owned { ptr, layout } => unsafe {
                dealloc(ptr.as_ptr(), *layout);
            },
            Backing::Boxed { ptr } => unsafe {
                // SAFETY: reconstructs the box leaked in `From<Box<[u8]>>`.
                let slice = ptr::slice_from_raw_parts_mut(ptr.as_ptr(), self.len);
                drop(Box::from_raw(slice));
            },
            _ => {}
        }
    }
}
