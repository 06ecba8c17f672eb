use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The allocator contract the data structures are written against:
/// allocate, reallocate, free, and report the usable size of an
/// allocation. Failure is `None`; callers propagate it.
///
/// Allocations made through this trait are raw byte buffers (alignment 1).
pub trait ByteAllocator {
    /// Allocate `size` bytes. Returns `None` when out of memory.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Grow or shrink an allocation to `new_size` bytes. May relocate; the
    /// old pointer must not be used afterwards on success.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc`/`realloc` on this allocator with size
    /// `old_size`.
    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;

    /// Release an allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc`/`realloc` on this allocator with size
    /// `size`, and must not be used afterwards.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize);

    /// Bytes actually obtainable from an allocation of `requested` bytes.
    /// Always at least `requested`.
    fn usable_size(&self, requested: usize) -> usize {
        requested
    }
}

fn layout(size: usize) -> Layout {
    // Zero-size requests are bumped to one byte so the system allocator
    // always hands back a real allocation.
    Layout::from_size_align(size.max(1), 1).expect("allocation size overflow")
}

/// The process allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysAlloc;

impl ByteAllocator for SysAlloc {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: the layout has non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout(size)) })
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        NonNull::new(std::alloc::realloc(
            ptr.as_ptr(),
            layout(old_size),
            new_size.max(1),
        ))
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize) {
        std::alloc::dealloc(ptr.as_ptr(), layout(size));
    }
}

/// An allocator that tracks the number of live bytes it has handed out.
///
/// Clones share the counter, so a structure can be built with one handle
/// while a test (or a stats report) watches the other.
#[derive(Debug, Default, Clone)]
pub struct CountingAlloc {
    live: Arc<AtomicUsize>,
    inner: SysAlloc,
}

impl CountingAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently allocated and not yet freed.
    pub fn live_bytes(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl ByteAllocator for CountingAlloc {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.inner.alloc(size)?;
        self.live.fetch_add(size, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let ptr = self.inner.realloc(ptr, old_size, new_size)?;
        self.live.fetch_add(new_size, Ordering::Relaxed);
        self.live.fetch_sub(old_size, Ordering::Relaxed);
        Some(ptr)
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize) {
        self.inner.dealloc(ptr, size);
        self.live.fetch_sub(size, Ordering::Relaxed);
    }
}
