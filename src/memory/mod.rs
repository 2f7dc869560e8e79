//! Per-frame memory: a linear arena over one buffer, and a heap-backed variant for resources
//! that must be individually bindable.

pub mod arena;
pub mod heap;

pub use arena::{ARENA_ALIGNMENT, BumpAllocator};
pub use heap::{HEAP_ALIGNMENT, HeapAllocator};
