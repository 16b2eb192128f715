//! # Record Framing
//!
//! Reads and writes length-delimited record files in TFRecord framing:
//!
//! ```text
//! u64 length (LE) | u32 masked crc32c(length) | payload | u32 masked crc32c(payload)
//! ```
//!
//! Both checksums are verified on read. A truncated frame or checksum
//! mismatch is fatal.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{PlungerError, Result};

const MASK_DELTA: u32 = 0xa282_ead8;

/// CRC-32C (Castagnoli) of `data`.
pub fn crc32c(data: &[u8]) -> u32 {
    ::crc32c::crc32c(data)
}

/// Masked CRC as stored in record frames.
pub fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Sequential reader over the raw payloads of a record file.
pub struct RecordReader<R> {
    inner: R,
    offset: u64,
}

impl RecordReader<BufReader<File>> {
    /// Open a record file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Read the next payload, or `None` at a clean end of stream.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let start = self.offset;
        let corrupt = |reason: &str| PlungerError::CorruptRecord {
            offset: start,
            reason: reason.to_string(),
        };

        let mut len_buf = [0u8; 8];
        match read_full(&mut self.inner, &mut len_buf)? {
            0 => return Ok(None),
            8 => {}
            _ => return Err(corrupt("truncated length")),
        }

        let mut crc_buf = [0u8; 4];
        if read_full(&mut self.inner, &mut crc_buf)? != 4 {
            return Err(corrupt("truncated length checksum"));
        }
        if u32::from_le_bytes(crc_buf) != masked_crc32c(&len_buf) {
            return Err(corrupt("length checksum mismatch"));
        }

        let len = u64::from_le_bytes(len_buf);
        let len = usize::try_from(len).map_err(|_| corrupt("length overflows usize"))?;
        let mut payload = Vec::new();
        (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut payload)?;
        if payload.len() != len {
            return Err(corrupt("truncated payload"));
        }

        if read_full(&mut self.inner, &mut crc_buf)? != 4 {
            return Err(corrupt("truncated payload checksum"));
        }
        if u32::from_le_bytes(crc_buf) != masked_crc32c(&payload) {
            return Err(corrupt("payload checksum mismatch"));
        }

        self.offset += 16 + len as u64;
        Ok(Some(payload))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Read until `buf` is full or EOF; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes payloads in record framing.
pub struct RecordWriter<W: Write> {
    inner: W,
    written: usize,
}

impl RecordWriter<BufWriter<File>> {
    /// Create (or truncate) a record file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        let len = (payload.len() as u64).to_le_bytes();
        self.inner.write_all(&len)?;
        self.inner.write_all(&masked_crc32c(&len).to_le_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.write_all(&masked_crc32c(payload).to_le_bytes())?;
        self.written += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut w = RecordWriter::new(Vec::new());
        for p in payloads {
            w.write_record(p).unwrap();
        }
        w.finish().unwrap()
    }

    #[test]
    fn crc32c_known_vector() {
        // RFC 3720 test vector: 32 bytes of zeros.
        assert_eq!(crc32c(&[0u8; 32]), 0x8a91_36aa);
        assert_eq!(crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn reads_back_payloads_in_order() {
        let bytes = framed(&[b"first", b"", b"third"]);
        let reader = RecordReader::new(Cursor::new(bytes));
        let payloads: Vec<Vec<u8>> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(payloads, vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]);
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let mut bytes = framed(&[b"payload"]);
        bytes[12] ^= 0x01;
        let mut reader = RecordReader::new(Cursor::new(bytes));
        let err = reader.read_record().unwrap_err();
        assert!(err.to_string().contains("payload checksum mismatch"));
    }

    #[test]
    fn truncated_frame_is_detected() {
        let mut bytes = framed(&[b"one", b"two"]);
        bytes.truncate(bytes.len() - 2);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_record().unwrap().unwrap(), b"one");
        let err = reader.read_record().unwrap_err();
        match err {
            PlungerError::CorruptRecord { offset, .. } => assert_eq!(offset, 19),
            other => panic!("unexpected error: {other}"),
        }
    }
}
