mod allocator;

pub use allocator::CountingAllocator;
pub use host::{take_delegate_flags, FakeHost, FakeLoader};
