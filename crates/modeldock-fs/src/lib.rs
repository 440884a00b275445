//! Filesystem primitives shared by the store and fetch crates.

mod atomic;
mod error;
mod space;

pub use atomic::{atomic_write, remove_if_exists, AtomicWriteOptions};
pub use error::{FsError, Result};
pub use space::{dir_size, DiskProbe, SystemDiskProbe};
