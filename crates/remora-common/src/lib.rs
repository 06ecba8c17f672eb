//! Shared plumbing for the remora data-structure crates: the byte allocator
//! contract every structure allocates through, and the keyed hash function
//! the store hashes with.

mod alloc;
mod hash;

pub use alloc::{ByteAllocator, CountingAlloc, SysAlloc};
pub use hash::{hash_bytes, hash_bytes_nocase, seeded_hasher, HashSeed};

use thiserror::Error;

/// The underlying allocator reported out of memory.
///
/// Every operation that can return this leaves its inputs valid and
/// unchanged; the caller decides how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("allocation failed")]
pub struct AllocError;

impl From<std::collections::TryReserveError> for AllocError {
    fn from(_: std::collections::TryReserveError) -> Self {
        AllocError
    }
}
