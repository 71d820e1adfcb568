use std::io::{self, Read};

use sha2::Digest;

/// Wraps a reader and computes the SHA256 hash of the bytes read through it.
pub struct HashingReader<R: Read>(R, sha2::Sha256);

impl<R: Read> HashingReader<R> {
    pub fn new(reader: R) -> Self {
        Self(reader, sha2::Sha256::new())
    }

    pub fn hash(&self) -> String {
        format!("{:x}", self.1.clone().finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.0.read(buf)?;
        self.1.update(&buf[..n]);
        Ok(n)
    }
}
