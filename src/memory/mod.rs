/*
 * Memory Management
 *
 * This kernel has no virtual memory: one flat address space, no paging, no
 * per-process frame accounting. The only job here is bringing up the kernel
 * heap that thread stacks, TCBs, and wait-queue nodes are allocated from.
 */

pub mod heap;

pub fn init() {
    log::info!("Initializing memory management...");
    heap::init();
}
