//! SHA-256 primitives for download verification.
//!
//! Everything the downloader hashes goes through this crate: chunk bodies as
//! they stream in, chunk files during revalidation, and the assembled
//! artifact. File hashing reads in fixed 1 MiB buffers so peak memory stays
//! bounded regardless of artifact size.

mod error;
mod hasher;
mod writer;

pub use error::{Result, VerifyError};
pub use hasher::{sha256_file, sha256_hex, verify_file, StreamingHasher};
pub use writer::HashingWriter;
