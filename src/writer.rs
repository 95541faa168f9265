//
// Copyright (c) 2024 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//

// Writer encodes little-endian primitives into an owned buffer. It is the
// inverse of Reader and is used to produce plain buffer rows and token
// envelopes.
#[derive(Debug, Default)]
pub struct Writer {
    // The underlying byte buffer.
    pub buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer {
            buf: Vec::with_capacity(256),
        }
    }

    pub fn write_u8(&mut self, val: u8) {
        self.buf.push(val);
    }

    pub fn write_bool(&mut self, val: bool) {
        self.write_u8(val as u8);
    }

    pub fn write_u32(&mut self, val: u32) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_i32(&mut self, val: i32) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_i64(&mut self, val: i64) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_f64(&mut self, val: f64) {
        self.buf.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_raw(&mut self, val: &[u8]) {
        self.buf.extend_from_slice(val);
    }

    // Length-prefixed (i32) bytes
    pub fn write_bytes(&mut self, val: &[u8]) {
        self.write_i32(val.len() as i32);
        self.buf.extend_from_slice(val);
    }

    pub fn write_string(&mut self, val: &str) {
        self.write_bytes(val.as_bytes());
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
