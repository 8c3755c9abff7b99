//! Allocation-counting stand-in for the native heap.

use std::{
    ffi::{c_char, CString},
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::marshal::{HeapAllocator, NativeAllocator};

/// Counts every allocation and release, delegating the memory itself to [`HeapAllocator`].
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl CountingAllocator {
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.allocated() - self.released()
    }
}

impl NativeAllocator for CountingAllocator {
    fn allocate(&self, value: CString) -> NonNull<c_char> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        HeapAllocator.allocate(value)
    }

    unsafe fn release(&self, ptr: NonNull<c_char>) {
        let released = self.released.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(
            released <= self.allocated(),
            "released more buffers than were allocated"
        );
        HeapAllocator.release(ptr);
    }
}
