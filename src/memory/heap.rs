/*
 * Kernel Heap Allocator
 *
 * Dynamic memory allocation for thread control blocks, stacks, and wait
 * queues, backed by the linked_list_allocator crate. No paging or physical
 * frame allocator in this kernel: the heap is a plain static byte array
 * linked into the kernel image, which is enough for the fixed thread/stack
 * budget this scheduler runs with.
 */

use linked_list_allocator::LockedHeap;

/// Size of the kernel heap in bytes.
/// MAX_THREADS stacks at THREAD_STACK_SIZE each, plus slack for TCBs,
/// wait queues, and the run queue's own bookkeeping.
pub const HEAP_SIZE: usize =
    crate::scheduler::MAX_THREADS * crate::scheduler::THREAD_STACK_SIZE + 1024 * 1024;

#[repr(align(16))]
struct HeapArea([u8; HEAP_SIZE]);

static mut HEAP_AREA: HeapArea = HeapArea([0; HEAP_SIZE]);

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Initialize the kernel heap. Must be called exactly once, before any
/// allocation (`Box`, `Vec`, ...) is attempted.
#[cfg(not(test))]
pub fn init() {
    log::info!("Initializing kernel heap ({} KiB)...", HEAP_SIZE / 1024);

    unsafe {
        let area = &raw mut HEAP_AREA;
        ALLOCATOR.lock().init((*area).0.as_mut_ptr(), HEAP_SIZE);
    }

    log::info!("Kernel heap initialized successfully");
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("Kernel heap allocation failed: {:?}", layout);
}

#[cfg(test)]
pub fn init() {}
