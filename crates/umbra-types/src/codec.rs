//! Binary codec for storage and wire blobs.
//!
//! Fixed-width big-endian integers, length-prefixed variable data. Every
//! read is bounds-checked; a truncated blob surfaces as a [`CodecError`]
//! rather than a panic.

use crate::Hash;
use curve25519_dalek_ng::scalar::Scalar;
use thiserror::Error;

/// Decoding errors.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unexpected end of blob at offset {0}")]
    UnexpectedEof(usize),

    #[error("Trailing bytes after decode: {0}")]
    TrailingBytes(usize),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Collected length caps so a hostile blob cannot request absurd allocations.
const MAX_VEC_LEN: u32 = 1 << 24;

/// Append-only blob writer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u128(&mut self, v: u128) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bytes32(&mut self, v: &[u8; 32]) {
        self.buf.extend_from_slice(v);
    }

    pub fn put_hash(&mut self, v: &Hash) {
        self.put_bytes32(&v.0);
    }

    pub fn put_scalar(&mut self, v: &Scalar) {
        self.put_bytes32(&v.to_bytes());
    }

    /// `u32` length prefix followed by the raw bytes.
    pub fn put_var_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn put_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Bounds-checked blob reader.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Fails unless the entire blob has been consumed.
    pub fn finish(self) -> CodecResult<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes(self.data.len() - self.pos))
        }
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof(self.pos));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> CodecResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> CodecResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn get_u128(&mut self) -> CodecResult<u128> {
        let b = self.take(16)?;
        Ok(u128::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn get_bytes32(&mut self) -> CodecResult<[u8; 32]> {
        let b = self.take(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(b);
        Ok(arr)
    }

    pub fn get_hash(&mut self) -> CodecResult<Hash> {
        Ok(Hash(self.get_bytes32()?))
    }

    pub fn get_scalar(&mut self) -> CodecResult<Scalar> {
        let bytes = self.get_bytes32()?;
        Scalar::from_canonical_bytes(bytes)
            .ok_or_else(|| CodecError::Invalid("non-canonical scalar".into()))
    }

    /// Length used for a following sequence of items; capped.
    pub fn get_len(&mut self) -> CodecResult<usize> {
        let n = self.get_u32()?;
        if n > MAX_VEC_LEN {
            return Err(CodecError::Invalid(format!("length {} exceeds cap", n)));
        }
        Ok(n as usize)
    }

    pub fn get_var_bytes(&mut self) -> CodecResult<Vec<u8>> {
        let n = self.get_len()?;
        Ok(self.take(n)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_primitives() {
        let mut w = ByteWriter::new();
        w.put_u8(7);
        w.put_u32(0xdead_beef);
        w.put_u64(u64::MAX - 1);
        w.put_var_bytes(b"hello");
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.get_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.get_var_bytes().unwrap(), b"hello");
        r.finish().unwrap();
    }

    #[test]
    fn test_truncated_blob_fails() {
        let mut w = ByteWriter::new();
        w.put_u64(1);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes[..4]);
        assert!(matches!(r.get_u64(), Err(CodecError::UnexpectedEof(_))));
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let mut w = ByteWriter::new();
        w.put_u32(1);
        w.put_u8(9);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        let _ = r.get_u32().unwrap();
        assert!(matches!(r.finish(), Err(CodecError::TrailingBytes(1))));
    }
}
