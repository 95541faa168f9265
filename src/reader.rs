//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use std::result::Result;
use std::str;

use crate::error::bad_protocol;
use crate::error::TunnelError;

// Reader walks a borrowed byte slice and decodes the little-endian
// primitives used by the plain buffer row format and the token envelope.
// It never copies the underlying bytes except when asked for an owned value.
pub struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn is_at_end(&self) -> bool {
        self.offset >= self.buf.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], TunnelError> {
        if n > self.remaining() {
            return Err(bad_protocol!(
                "{} reached end of byte buffer: need {} bytes at offset {}, have {}",
                what,
                n,
                self.offset,
                self.remaining()
            ));
        }
        let s = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(s)
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.offset).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, TunnelError> {
        Ok(self.take(1, "read_u8")?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, TunnelError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, TunnelError> {
        let b = self.take(4, "read_u32")?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, TunnelError> {
        let b = self.take(4, "read_i32")?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, TunnelError> {
        let b = self.take(8, "read_i64")?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    pub fn read_f64(&mut self) -> Result<f64, TunnelError> {
        let b = self.take(8, "read_f64")?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }

    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], TunnelError> {
        self.take(len, "read_raw")
    }

    // Length-prefixed (i32) bytes
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, TunnelError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(bad_protocol!("negative byte length {}", len));
        }
        Ok(self.take(len as usize, "read_bytes")?.to_vec())
    }

    // Length-prefixed (i32) utf8 string
    pub fn read_string(&mut self) -> Result<String, TunnelError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(bad_protocol!("negative string length {}", len));
        }
        let raw = self.take(len as usize, "read_string")?;
        match str::from_utf8(raw) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(bad_protocol!("invalid utf8 in read_string")),
        }
    }

    /// Consume the next byte and verify it is the expected tag.
    pub fn expect_tag(&mut self, tag: u8) -> Result<(), TunnelError> {
        let b = self.read_u8()?;
        if b != tag {
            return Err(bad_protocol!(
                "expected tag {:#04x}, found {:#04x} at offset {}",
                tag,
                b,
                self.offset - 1
            ));
        }
        Ok(())
    }

    /// Consume the next byte if it equals `tag`.
    pub fn check_tag(&mut self, tag: u8) -> bool {
        if self.peek_u8() == Some(tag) {
            self.offset += 1;
            return true;
        }
        false
    }
}
