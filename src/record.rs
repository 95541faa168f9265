//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::result::Result;

use crate::error::{bad_protocol, TunnelError};
use crate::plain_buffer::{CellType, RowCodec};
use crate::types::{micros_to_datetime, millis_to_datetime, ActionType, ColumnValue, PrimaryKey};

/// Ordering metadata attached to incremental (stream) records.
///
/// Records are totally ordered by `(epoch, timestamp, row_index)`, which
/// allows consumers to detect duplicate or out-of-order delivery when a
/// partition splits or merges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceInfo {
    /// Partition generation.
    pub epoch: i32,
    /// Commit time, in microseconds since the epoch.
    pub timestamp: i64,
    /// Tiebreak within the same timestamp.
    pub row_index: i32,
}

/// The operation applied to one column of a changed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordColumnType {
    Put,
    DeleteOneVersion,
    DeleteAllVersions,
}

/// One changed column of a [`Record`].
///
/// `value` is present only for [`RecordColumnType::Put`]. `timestamp` is
/// present for `Put` and `DeleteOneVersion`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordColumn {
    pub name: String,
    pub column_type: RecordColumnType,
    pub value: Option<ColumnValue>,
    pub timestamp: Option<i64>,
}

/// A single change record read from a tunnel channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub action_type: ActionType,
    /// Commit time in milliseconds. Zero for base data records.
    pub timestamp: i64,
    /// Present only for stream (incremental) records.
    pub sequence_info: Option<SequenceInfo>,
    pub primary_key: PrimaryKey,
    pub columns: Vec<RecordColumn>,
}

impl Record {
    /// Record commit time as a UTC datetime, if the record carries one.
    pub fn timestamp_datetime(&self) -> Option<DateTime<Utc>> {
        if self.timestamp == 0 {
            return None;
        }
        millis_to_datetime(self.timestamp)
    }

    /// Commit time from the sequence info, at microsecond precision.
    pub fn sequence_datetime(&self) -> Option<DateTime<Utc>> {
        self.sequence_info
            .as_ref()
            .and_then(|s| micros_to_datetime(s.timestamp))
    }

    pub fn column(&self, name: &str) -> Option<&RecordColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A record as returned on the wire: the action type and its encoded row.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub action_type: ActionType,
    pub record: Bytes,
}

impl RawRecord {
    pub fn new(action_type: ActionType, record: impl Into<Bytes>) -> Self {
        RawRecord {
            action_type,
            record: record.into(),
        }
    }
}

/// Decode one encoded row into a [`Record`].
///
/// A failure here is fatal for the whole batch the row belongs to; callers
/// must not skip it, since that would let a later checkpoint cover a record
/// that was never delivered.
pub fn decode_record(
    codec: &dyn RowCodec,
    data: &[u8],
    action_type: ActionType,
) -> Result<Record, TunnelError> {
    let row = codec.decode_row(data)?;

    let mut record = Record {
        action_type,
        timestamp: 0,
        sequence_info: None,
        primary_key: row.primary_key,
        columns: Vec::with_capacity(row.cells.len()),
    };
    if let Some(seq) = row.extension.and_then(|e| e.sequence_info) {
        record.timestamp = seq.timestamp / 1000;
        record.sequence_info = Some(seq);
    }

    for cell in row.cells {
        let column = match cell.cell_type {
            None => {
                let value = match cell.value {
                    Some(v) => v,
                    None => return Err(bad_protocol!("put column '{}' has no value", cell.name)),
                };
                RecordColumn {
                    name: cell.name,
                    column_type: RecordColumnType::Put,
                    value: Some(value),
                    timestamp: cell.timestamp,
                }
            }
            Some(CellType::DeleteOneVersion) => {
                if cell.timestamp.is_none() {
                    return Err(bad_protocol!(
                        "delete-one-version column '{}' has no timestamp",
                        cell.name
                    ));
                }
                RecordColumn {
                    name: cell.name,
                    column_type: RecordColumnType::DeleteOneVersion,
                    value: None,
                    timestamp: cell.timestamp,
                }
            }
            Some(CellType::DeleteAllVersions) => RecordColumn {
                name: cell.name,
                column_type: RecordColumnType::DeleteAllVersions,
                value: None,
                timestamp: None,
            },
        };
        record.columns.push(column);
    }
    Ok(record)
}

/// Decode a whole batch, in order. The first bad record fails the batch.
pub fn decode_records(
    codec: &dyn RowCodec,
    batch: &[RawRecord],
) -> Result<Vec<Record>, TunnelError> {
    let mut records = Vec::with_capacity(batch.len());
    for (i, raw) in batch.iter().enumerate() {
        let rec = decode_record(codec, &raw.record, raw.action_type).map_err(|e| TunnelError {
            code: e.code,
            message: format!("record {} of {}: {}", i, batch.len(), e.message),
        })?;
        records.push(rec);
    }
    Ok(records)
}
