//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Plain buffer row codec.
//!
//! Tunnel records carry each changed row in the store's "plain buffer"
//! format: a little-endian, tag-delimited layout with CRC-8 checksums per
//! cell and per row. The record decoder only depends on the [`RowCodec`]
//! trait; [`PlainBufferCodec`] is the implementation used by default.
//!
//! Layout of one row (after the 4-byte header):
//! ```text
//! ROW_PK  { CELL NAME VALUE CELL_CHECKSUM }*
//! [ROW_DATA { CELL NAME [VALUE] [CELL_TYPE] [CELL_TIMESTAMP] CELL_CHECKSUM }*]
//! [DELETE_ROW_MARKER]
//! [EXTENSION len { SEQ_INFO len EPOCH ts ROW_INDEX }]
//! ROW_CHECKSUM
//! ```
use num_enum::TryFromPrimitive;
use std::fmt::Debug;
use std::result::Result;

use crate::error::TunnelErrorCode::ChecksumMismatch;
use crate::error::{bad_protocol, TunnelError};
use crate::reader::Reader;
use crate::record::SequenceInfo;
use crate::types::{ColumnValue, PrimaryKey, PrimaryKeyColumn};
use crate::writer::Writer;

pub const HEADER: u32 = 0x75;

// tags
pub const TAG_ROW_PK: u8 = 0x01;
pub const TAG_ROW_DATA: u8 = 0x02;
pub const TAG_CELL: u8 = 0x03;
pub const TAG_CELL_NAME: u8 = 0x04;
pub const TAG_CELL_VALUE: u8 = 0x05;
pub const TAG_CELL_TYPE: u8 = 0x06;
pub const TAG_CELL_TIMESTAMP: u8 = 0x07;
pub const TAG_DELETE_ROW_MARKER: u8 = 0x08;
pub const TAG_ROW_CHECKSUM: u8 = 0x09;
pub const TAG_CELL_CHECKSUM: u8 = 0x0A;
pub const TAG_EXTENSION: u8 = 0x0B;
pub const TAG_SEQ_INFO: u8 = 0x0C;
pub const TAG_SEQ_INFO_EPOCH: u8 = 0x0D;
pub const TAG_SEQ_INFO_TS: u8 = 0x0E;
pub const TAG_SEQ_INFO_ROW_INDEX: u8 = 0x0F;

// value types
pub const VT_INTEGER: u8 = 0x0;
pub const VT_DOUBLE: u8 = 0x1;
pub const VT_BOOLEAN: u8 = 0x2;
pub const VT_STRING: u8 = 0x3;
pub const VT_NULL: u8 = 0x6;
pub const VT_BLOB: u8 = 0x7;
pub const VT_INF_MIN: u8 = 0x9;
pub const VT_INF_MAX: u8 = 0xa;
pub const VT_AUTO_INCREMENT: u8 = 0xb;

/// Operation tag of a data cell. A cell without a type tag is a put.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum CellType {
    DeleteAllVersions = 0x1,
    DeleteOneVersion = 0x3,
}

/// One decoded attribute cell.
#[derive(Debug, Clone, PartialEq)]
pub struct PlainBufferCell {
    pub name: String,
    pub value: Option<ColumnValue>,
    pub cell_type: Option<CellType>,
    pub timestamp: Option<i64>,
}

/// Row-level metadata carried after the cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowExtension {
    pub sequence_info: Option<SequenceInfo>,
}

/// One decoded row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlainBufferRow {
    pub primary_key: PrimaryKey,
    pub cells: Vec<PlainBufferCell>,
    pub delete_marker: bool,
    pub extension: Option<RowExtension>,
}

/// The byte-level row decoder used by the record decoder.
pub trait RowCodec: Send + Sync + Debug {
    /// Decode the first row of a header-prefixed plain buffer.
    fn decode_row(&self, data: &[u8]) -> Result<PlainBufferRow, TunnelError>;
}

/// Default [`RowCodec`] implementing the plain buffer format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainBufferCodec;

impl RowCodec for PlainBufferCodec {
    fn decode_row(&self, data: &[u8]) -> Result<PlainBufferRow, TunnelError> {
        let mut rows = read_rows_with_header(data)?;
        if rows.is_empty() {
            return Err(bad_protocol!("plain buffer contains no rows"));
        }
        Ok(rows.swap_remove(0))
    }
}

/// Decode every row of a header-prefixed plain buffer.
pub fn read_rows_with_header(data: &[u8]) -> Result<Vec<PlainBufferRow>, TunnelError> {
    let mut r = Reader::new(data);
    let header = r.read_u32()?;
    if header != HEADER {
        return Err(bad_protocol!(
            "invalid plain buffer header {:#x}, expected {:#x}",
            header,
            HEADER
        ));
    }
    let mut rows = Vec::new();
    while !r.is_at_end() {
        rows.push(read_row(&mut r)?);
    }
    Ok(rows)
}

/// Encode a single row, including the header.
pub fn encode_row(row: &PlainBufferRow) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(HEADER);
    write_row(&mut w, row);
    w.into_bytes()
}

fn read_row(r: &mut Reader) -> Result<PlainBufferRow, TunnelError> {
    let mut row = PlainBufferRow::default();
    let mut row_checksum: u8 = 0;

    r.expect_tag(TAG_ROW_PK)?;
    while r.check_tag(TAG_CELL) {
        let (cell, checksum) = read_cell(r)?;
        let value = match cell.value {
            Some(v) => v,
            None => {
                return Err(bad_protocol!(
                    "primary key column '{}' has no value",
                    cell.name
                ))
            }
        };
        row.primary_key.columns.push(PrimaryKeyColumn {
            name: cell.name,
            value,
        });
        row_checksum = crc8_u8(row_checksum, checksum);
    }

    if r.check_tag(TAG_ROW_DATA) {
        while r.check_tag(TAG_CELL) {
            let (cell, checksum) = read_cell(r)?;
            row.cells.push(cell);
            row_checksum = crc8_u8(row_checksum, checksum);
        }
    }

    row.delete_marker = r.check_tag(TAG_DELETE_ROW_MARKER);
    row_checksum = crc8_u8(row_checksum, row.delete_marker as u8);

    if r.check_tag(TAG_EXTENSION) {
        row.extension = Some(read_extension(r)?);
    }

    r.expect_tag(TAG_ROW_CHECKSUM)?;
    let stored = r.read_u8()?;
    if stored != row_checksum {
        return Err(TunnelError::new(
            ChecksumMismatch,
            &format!(
                "row checksum mismatch: stored={:#04x} computed={:#04x}",
                stored, row_checksum
            ),
        ));
    }
    Ok(row)
}

fn read_cell(r: &mut Reader) -> Result<(PlainBufferCell, u8), TunnelError> {
    r.expect_tag(TAG_CELL_NAME)?;
    let name_len = r.read_u32()? as usize;
    let name = match std::str::from_utf8(r.read_raw(name_len)?) {
        Ok(s) => s.to_string(),
        Err(_) => return Err(bad_protocol!("invalid utf8 in cell name")),
    };
    let mut checksum = crc8_bytes(0, name.as_bytes());

    let mut value = None;
    if r.check_tag(TAG_CELL_VALUE) {
        let v = read_value(r)?;
        checksum = value_checksum(checksum, &v);
        value = Some(v);
    }

    let mut cell_type = None;
    if r.check_tag(TAG_CELL_TYPE) {
        let b = r.read_u8()?;
        let ct = CellType::try_from(b)
            .map_err(|_| bad_protocol!("unrecognized cell type {:#04x} for '{}'", b, name))?;
        cell_type = Some(ct);
    }

    let mut timestamp = None;
    if r.check_tag(TAG_CELL_TIMESTAMP) {
        let ts = r.read_i64()?;
        checksum = crc8_bytes(checksum, &ts.to_le_bytes());
        timestamp = Some(ts);
    }

    if let Some(ct) = cell_type {
        checksum = crc8_u8(checksum, ct as u8);
    }

    r.expect_tag(TAG_CELL_CHECKSUM)?;
    let stored = r.read_u8()?;
    if stored != checksum {
        return Err(TunnelError::new(
            ChecksumMismatch,
            &format!(
                "cell checksum mismatch for '{}': stored={:#04x} computed={:#04x}",
                name, stored, checksum
            ),
        ));
    }
    Ok((
        PlainBufferCell {
            name,
            value,
            cell_type,
            timestamp,
        },
        checksum,
    ))
}

fn read_value(r: &mut Reader) -> Result<ColumnValue, TunnelError> {
    let prefix_len = r.read_u32()? as usize;
    let start = r.offset();
    let vt = r.read_u8()?;
    let v = match vt {
        VT_INTEGER => ColumnValue::Integer(r.read_i64()?),
        VT_DOUBLE => ColumnValue::Double(r.read_f64()?),
        VT_BOOLEAN => ColumnValue::Boolean(r.read_bool()?),
        VT_STRING => {
            let len = r.read_u32()? as usize;
            match std::str::from_utf8(r.read_raw(len)?) {
                Ok(s) => ColumnValue::String(s.to_string()),
                Err(_) => return Err(bad_protocol!("invalid utf8 in string value")),
            }
        }
        VT_BLOB => {
            let len = r.read_u32()? as usize;
            ColumnValue::Binary(r.read_raw(len)?.to_vec())
        }
        VT_NULL => ColumnValue::Null,
        VT_INF_MIN => ColumnValue::InfMin,
        VT_INF_MAX => ColumnValue::InfMax,
        VT_AUTO_INCREMENT => ColumnValue::AutoIncrement,
        _ => return Err(bad_protocol!("unrecognized value type {:#04x}", vt)),
    };
    if r.offset() - start != prefix_len {
        return Err(bad_protocol!(
            "value length mismatch: prefix says {}, consumed {}",
            prefix_len,
            r.offset() - start
        ));
    }
    Ok(v)
}

fn read_extension(r: &mut Reader) -> Result<RowExtension, TunnelError> {
    let len = r.read_u32()? as usize;
    let end = r.offset() + len;
    if len > r.remaining() {
        return Err(bad_protocol!("extension length {} exceeds buffer", len));
    }
    let mut ext = RowExtension::default();
    while r.offset() < end {
        if r.check_tag(TAG_SEQ_INFO) {
            let seq_len = r.read_u32()? as usize;
            let seq_start = r.offset();
            if seq_len != SEQ_INFO_LEN || seq_start + seq_len > end {
                return Err(bad_protocol!(
                    "sequence info length {} does not fit extension ending at {}",
                    seq_len,
                    end
                ));
            }
            r.expect_tag(TAG_SEQ_INFO_EPOCH)?;
            let epoch = r.read_i32()?;
            r.expect_tag(TAG_SEQ_INFO_TS)?;
            let timestamp = r.read_i64()?;
            r.expect_tag(TAG_SEQ_INFO_ROW_INDEX)?;
            let row_index = r.read_i32()?;
            ext.sequence_info = Some(SequenceInfo {
                epoch,
                timestamp,
                row_index,
            });
        } else {
            // unknown extension entries are skipped
            let _ = r.read_raw(end - r.offset())?;
        }
    }
    Ok(ext)
}

fn write_row(w: &mut Writer, row: &PlainBufferRow) {
    let mut row_checksum: u8 = 0;
    w.write_u8(TAG_ROW_PK);
    for pk in &row.primary_key.columns {
        let cs = write_cell(w, &pk.name, Some(&pk.value), None, None);
        row_checksum = crc8_u8(row_checksum, cs);
    }
    if !row.cells.is_empty() {
        w.write_u8(TAG_ROW_DATA);
        for c in &row.cells {
            let cs = write_cell(w, &c.name, c.value.as_ref(), c.cell_type, c.timestamp);
            row_checksum = crc8_u8(row_checksum, cs);
        }
    }
    if row.delete_marker {
        w.write_u8(TAG_DELETE_ROW_MARKER);
    }
    row_checksum = crc8_u8(row_checksum, row.delete_marker as u8);
    if let Some(ext) = &row.extension {
        write_extension(w, ext);
    }
    w.write_u8(TAG_ROW_CHECKSUM);
    w.write_u8(row_checksum);
}

fn write_cell(
    w: &mut Writer,
    name: &str,
    value: Option<&ColumnValue>,
    cell_type: Option<CellType>,
    timestamp: Option<i64>,
) -> u8 {
    w.write_u8(TAG_CELL);
    w.write_u8(TAG_CELL_NAME);
    w.write_u32(name.len() as u32);
    w.write_raw(name.as_bytes());
    let mut checksum = crc8_bytes(0, name.as_bytes());
    if let Some(v) = value {
        w.write_u8(TAG_CELL_VALUE);
        write_value(w, v);
        checksum = value_checksum(checksum, v);
    }
    if let Some(ct) = cell_type {
        w.write_u8(TAG_CELL_TYPE);
        w.write_u8(ct as u8);
    }
    if let Some(ts) = timestamp {
        w.write_u8(TAG_CELL_TIMESTAMP);
        w.write_i64(ts);
        checksum = crc8_bytes(checksum, &ts.to_le_bytes());
    }
    if let Some(ct) = cell_type {
        checksum = crc8_u8(checksum, ct as u8);
    }
    w.write_u8(TAG_CELL_CHECKSUM);
    w.write_u8(checksum);
    checksum
}

fn write_value(w: &mut Writer, v: &ColumnValue) {
    match v {
        ColumnValue::Integer(i) => {
            w.write_u32(1 + 8);
            w.write_u8(VT_INTEGER);
            w.write_i64(*i);
        }
        ColumnValue::Double(d) => {
            w.write_u32(1 + 8);
            w.write_u8(VT_DOUBLE);
            w.write_f64(*d);
        }
        ColumnValue::Boolean(b) => {
            w.write_u32(1 + 1);
            w.write_u8(VT_BOOLEAN);
            w.write_bool(*b);
        }
        ColumnValue::String(s) => {
            w.write_u32(1 + 4 + s.len() as u32);
            w.write_u8(VT_STRING);
            w.write_u32(s.len() as u32);
            w.write_raw(s.as_bytes());
        }
        ColumnValue::Binary(b) => {
            w.write_u32(1 + 4 + b.len() as u32);
            w.write_u8(VT_BLOB);
            w.write_u32(b.len() as u32);
            w.write_raw(b);
        }
        ColumnValue::Null => {
            w.write_u32(1);
            w.write_u8(VT_NULL);
        }
        ColumnValue::InfMin => {
            w.write_u32(1);
            w.write_u8(VT_INF_MIN);
        }
        ColumnValue::InfMax => {
            w.write_u32(1);
            w.write_u8(VT_INF_MAX);
        }
        ColumnValue::AutoIncrement => {
            w.write_u32(1);
            w.write_u8(VT_AUTO_INCREMENT);
        }
    }
}

// epoch tag + i32, ts tag + i64, row index tag + i32
const SEQ_INFO_LEN: usize = 1 + 4 + 1 + 8 + 1 + 4;

fn write_extension(w: &mut Writer, ext: &RowExtension) {
    let mut body = Writer::new();
    if let Some(seq) = &ext.sequence_info {
        body.write_u8(TAG_SEQ_INFO);
        body.write_u32(SEQ_INFO_LEN as u32);
        body.write_u8(TAG_SEQ_INFO_EPOCH);
        body.write_i32(seq.epoch);
        body.write_u8(TAG_SEQ_INFO_TS);
        body.write_i64(seq.timestamp);
        body.write_u8(TAG_SEQ_INFO_ROW_INDEX);
        body.write_i32(seq.row_index);
    }
    w.write_u8(TAG_EXTENSION);
    w.write_u32(body.size() as u32);
    w.write_raw(body.bytes());
}

fn value_checksum(crc: u8, v: &ColumnValue) -> u8 {
    match v {
        ColumnValue::Integer(i) => crc8_bytes(crc8_u8(crc, VT_INTEGER), &i.to_le_bytes()),
        ColumnValue::Double(d) => crc8_bytes(crc8_u8(crc, VT_DOUBLE), &d.to_le_bytes()),
        ColumnValue::Boolean(b) => crc8_u8(crc8_u8(crc, VT_BOOLEAN), *b as u8),
        ColumnValue::String(s) => {
            let c = crc8_bytes(crc8_u8(crc, VT_STRING), &(s.len() as u32).to_le_bytes());
            crc8_bytes(c, s.as_bytes())
        }
        ColumnValue::Binary(b) => {
            let c = crc8_bytes(crc8_u8(crc, VT_BLOB), &(b.len() as u32).to_le_bytes());
            crc8_bytes(c, b)
        }
        ColumnValue::Null => crc8_u8(crc, VT_NULL),
        ColumnValue::InfMin => crc8_u8(crc, VT_INF_MIN),
        ColumnValue::InfMax => crc8_u8(crc, VT_INF_MAX),
        ColumnValue::AutoIncrement => crc8_u8(crc, VT_AUTO_INCREMENT),
    }
}

// CRC-8, polynomial 0x07
const CRC8_TABLE: [u8; 256] = build_crc8_table();

const fn build_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u8;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 0x80 != 0 { (c << 1) ^ 0x07 } else { c << 1 };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

pub(crate) fn crc8_u8(crc: u8, b: u8) -> u8 {
    CRC8_TABLE[(crc ^ b) as usize]
}

pub(crate) fn crc8_bytes(crc: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(crc, |c, b| crc8_u8(c, *b))
}
