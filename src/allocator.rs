//! ArrayBuffer allocator that tracks external memory per isolate.
//!
//! V8 heap limits (`CreateParams::heap_limits`) don't cover ArrayBuffer
//! backing stores, which is where internal field payloads live while a blob
//! is being built and after it is restored. Every isolate the harness
//! creates gets one of these so tests can observe that memory.
//!
//! Allocations past the budget return NULL and V8 throws
//! `RangeError: Array buffer allocation failed`.

use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use v8::{RustAllocatorVtable, UniqueRef};

pub struct TrackingAllocator {
    /// Maximum allowed bytes for ArrayBuffer allocations
    max: usize,
    /// Bytes currently handed out to V8
    count: AtomicUsize,
    /// Highest value `count` reached
    peak: AtomicUsize,
    /// Set when an allocation was denied
    limit_hit: AtomicBool,
}

impl TrackingAllocator {
    pub fn new(max_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            max: max_bytes,
            count: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            limit_hit: AtomicBool::new(false),
        })
    }

    /// Convert to a V8 allocator for use in `CreateParams`.
    ///
    /// The returned allocator holds its own strong reference.
    pub fn into_v8_allocator(self: Arc<Self>) -> UniqueRef<v8::Allocator> {
        let vtable: &'static RustAllocatorVtable<TrackingAllocator> = &RustAllocatorVtable {
            allocate,
            allocate_uninitialized,
            free,
            drop,
        };

        unsafe { v8::new_rust_allocator(Arc::into_raw(self), vtable) }
    }

    /// Bytes currently allocated for ArrayBuffers.
    pub fn current_usage(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Highest number of bytes allocated at once.
    pub fn peak_usage(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Whether an allocation has been denied.
    pub fn limit_hit(&self) -> bool {
        self.limit_hit.load(Ordering::SeqCst)
    }

    /// Reserve `n` bytes. Returns false (and rolls back) past the budget.
    fn reserve(&self, n: usize) -> bool {
        let total = self.count.fetch_add(n, Ordering::SeqCst) + n;

        if total > self.max {
            // Roll back, a denied allocation must not consume the budget
            self.count.fetch_sub(n, Ordering::SeqCst);
            self.limit_hit.store(true, Ordering::SeqCst);
            log::warn!(
                "ArrayBuffer allocation denied: {} bytes would exceed limit of {} bytes",
                total,
                self.max
            );
            return false;
        }

        self.peak.fetch_max(total, Ordering::SeqCst);
        true
    }

    fn release(&self, n: usize) {
        self.count.fetch_sub(n, Ordering::SeqCst);
    }
}

#[allow(clippy::unnecessary_cast)]
unsafe extern "C" fn allocate(allocator: &TrackingAllocator, n: usize) -> *mut c_void {
    if !allocator.reserve(n) {
        return std::ptr::null_mut();
    }

    Box::into_raw(vec![0u8; n].into_boxed_slice()) as *mut [u8] as *mut c_void
}

#[allow(clippy::unnecessary_cast)]
#[allow(clippy::uninit_vec)]
unsafe extern "C" fn allocate_uninitialized(
    allocator: &TrackingAllocator,
    n: usize,
) -> *mut c_void {
    if !allocator.reserve(n) {
        return std::ptr::null_mut();
    }

    let mut store = Vec::with_capacity(n);
    // SAFETY: capacity is n bytes and V8 initializes them before reading
    unsafe { store.set_len(n) };

    Box::into_raw(store.into_boxed_slice()) as *mut [u8] as *mut c_void
}

unsafe extern "C" fn free(allocator: &TrackingAllocator, data: *mut c_void, n: usize) {
    allocator.release(n);
    // SAFETY: data was allocated by allocate/allocate_uninitialized with size n
    let _ = unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(data as *mut u8, n)) };
}

unsafe extern "C" fn drop(allocator: *const TrackingAllocator) {
    // SAFETY: allocator was created via Arc::into_raw in into_v8_allocator
    let _ = unsafe { Arc::from_raw(allocator) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_within_budget() {
        let allocator = TrackingAllocator::new(1024);

        assert!(allocator.reserve(512));
        assert!(allocator.reserve(512));
        assert_eq!(allocator.current_usage(), 1024);
        assert_eq!(allocator.peak_usage(), 1024);
        assert!(!allocator.limit_hit());
    }

    #[test]
    fn test_denied_reservation_rolls_back() {
        let allocator = TrackingAllocator::new(1024);

        assert!(allocator.reserve(1000));
        assert!(!allocator.reserve(100));
        assert_eq!(allocator.current_usage(), 1000);
        assert!(allocator.limit_hit());

        allocator.release(1000);
        assert_eq!(allocator.current_usage(), 0);
        assert_eq!(allocator.peak_usage(), 1000);
    }
}
