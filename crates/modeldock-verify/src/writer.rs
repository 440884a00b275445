use std::io::{self, Write};

use sha2::{Digest, Sha256};

/// Writer adapter that feeds every written byte into a SHA-256 digest.
///
/// Lets the assembly step hash the composite artifact in the same pass that
/// writes it, instead of re-reading the finished file.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Flush the underlying writer and return it together with the digest as
    /// lowercase hex.
    pub fn finalize(mut self) -> io::Result<(W, String)> {
        self.inner.flush()?;
        Ok((self.inner, hex::encode(self.hasher.finalize())))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
