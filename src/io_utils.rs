use std::io::{self, prelude::*};

use adler32::RollingAdler32;

/// The format's 32-bit checksum: Adler-32, seed 1.
///
/// This is the checksum every descriptor, payload header, and raw chunk
/// carries, and it is the reason a zlib stream's trailing word can be reused
/// as a chunk checksum.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = RollingAdler32::new();
    hasher.update_buffer(bytes);
    hasher.hash()
}

/// Counts how many bytes have been written and keeps a running checksum.
pub struct CountingChecksumWriter<W> {
    inner: W,
    hasher: RollingAdler32,
    count: u64,
}

impl<W: Write> CountingChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: RollingAdler32::new(),
            count: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.count
    }

    /// Consumes the writer and returns the inner writer and the checksum
    pub fn finalize(self) -> (W, u32) {
        (self.inner, self.hasher.hash())
    }
}

impl<W: Write> Write for CountingChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.inner.write(buf)?;
        self.count += res as u64;
        self.hasher.update_buffer(&buf[..res]);
        Ok(res)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_one() {
        // Adler-32 of the empty input is the seed itself.
        assert_eq!(checksum(&[]), 1);
        assert_eq!(checksum(b"a"), 0x0062_0062);
    }

    #[test]
    fn writer_matches_one_shot() {
        let mut writer = CountingChecksumWriter::new(Vec::new());
        writer.write_all(b"evidence").unwrap();
        writer.write_all(b" bytes").unwrap();
        assert_eq!(writer.position(), 14);
        let (buf, sum) = writer.finalize();
        assert_eq!(buf, b"evidence bytes");
        assert_eq!(sum, checksum(b"evidence bytes"));
    }
}
