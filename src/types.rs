//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use chrono::{DateTime, Utc};
use num_enum::TryFromPrimitive;
use std::fmt;
use std::result::Result;

use crate::error::TunnelError;
use crate::error::TunnelErrorCode::BadProtocolMessage;

/// A single typed value of a primary key column or an attribute column.
///
/// The type system mirrors the value types of the wide-column store. `InfMin`,
/// `InfMax` and `AutoIncrement` only ever appear in primary key columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Integer(i64),
    Double(f64),
    Boolean(bool),
    String(String),
    Binary(Vec<u8>),
    Null,
    InfMin,
    InfMax,
    AutoIncrement,
}

impl ColumnValue {
    pub fn as_i64(&self) -> Option<i64> {
        if let ColumnValue::Integer(i) = self {
            return Some(*i);
        }
        None
    }
    pub fn as_f64(&self) -> Option<f64> {
        if let ColumnValue::Double(d) = self {
            return Some(*d);
        }
        None
    }
    pub fn as_bool(&self) -> Option<bool> {
        if let ColumnValue::Boolean(b) = self {
            return Some(*b);
        }
        None
    }
    pub fn as_str(&self) -> Option<&str> {
        if let ColumnValue::String(s) = self {
            return Some(s.as_str());
        }
        None
    }
    pub fn as_binary(&self) -> Option<&[u8]> {
        if let ColumnValue::Binary(b) = self {
            return Some(b.as_slice());
        }
        None
    }
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Integer(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Integer(v as i64)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Double(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Boolean(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::String(v)
    }
}

impl From<Vec<u8>> for ColumnValue {
    fn from(v: Vec<u8>) -> Self {
        ColumnValue::Binary(v)
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ColumnValue::Integer(i) => write!(f, "{}", i),
            ColumnValue::Double(d) => write!(f, "{}", d),
            ColumnValue::Boolean(b) => write!(f, "{}", b),
            ColumnValue::String(s) => write!(f, "\"{}\"", s),
            ColumnValue::Binary(b) => write!(f, "<{} bytes>", b.len()),
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::InfMin => write!(f, "INF_MIN"),
            ColumnValue::InfMax => write!(f, "INF_MAX"),
            ColumnValue::AutoIncrement => write!(f, "AUTO_INCREMENT"),
        }
    }
}

/// One named column of a primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyColumn {
    pub name: String,
    pub value: ColumnValue,
}

/// An ordered list of primary key columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimaryKey {
    pub columns: Vec<PrimaryKeyColumn>,
}

impl PrimaryKey {
    pub fn new() -> Self {
        PrimaryKey {
            columns: Vec::new(),
        }
    }

    /// Append a column, builder style:
    /// ```
    /// use tablestore_tunnel_sdk::types::PrimaryKey;
    /// let pk = PrimaryKey::new().column("user_id", 10).column("region", "eu");
    /// assert_eq!(pk.len(), 2);
    /// ```
    pub fn column<T: Into<ColumnValue>>(mut self, name: &str, value: T) -> Self {
        self.columns.push(PrimaryKeyColumn {
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// The kind of row change carried by a tunnel record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, TryFromPrimitive)]
#[repr(i32)]
pub enum ActionType {
    Put = 1,
    Update = 2,
    Delete = 3,
}

impl ActionType {
    pub(crate) fn try_from_i32(val: i32) -> Result<Self, TunnelError> {
        ActionType::try_from(val).map_err(|_| {
            TunnelError::new(
                BadProtocolMessage,
                &format!("unrecognized record action type {}", val),
            )
        })
    }
}

/// Protocol-level channel status, as issued by the server in directives.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, TryFromPrimitive)]
#[repr(i32)]
pub enum ChannelStatus {
    Open = 1,
    Closing = 2,
    Close = 3,
    Terminated = 4,
}

impl ChannelStatus {
    pub fn try_from_i32(val: i32) -> Result<Self, TunnelError> {
        ChannelStatus::try_from(val).map_err(|_| {
            TunnelError::new(
                BadProtocolMessage,
                &format!("unrecognized channel status {}", val),
            )
        })
    }
}

/// A channel directive: the state a partition should be in, stamped with a version.
///
/// Directives flow from the server (via heartbeats) to channel actors, and
/// status reports flow from actors back to the coordinator in the same shape.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Channel {
    pub channel_id: String,
    pub version: i64,
    pub status: ChannelStatus,
}

impl Channel {
    pub fn new(channel_id: &str, version: i64, status: ChannelStatus) -> Self {
        Channel {
            channel_id: channel_id.to_string(),
            version,
            status,
        }
    }

    // The report an actor sends upstream when it changes this channel's status
    pub(crate) fn successor(&self, status: ChannelStatus) -> Self {
        Channel {
            channel_id: self.channel_id.clone(),
            version: self.version + 1,
            status,
        }
    }
}

pub(crate) fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

pub(crate) fn micros_to_datetime(us: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(us)
}
