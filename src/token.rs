//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Resumption token codec.
//!
//! The server hands out an opaque token with every batch. It is a base64
//! string wrapping a versioned envelope; the envelope's payload describes
//! where the channel's read position is. Version 1 payloads predate the
//! `total_count` field and are upgraded in memory to the version 2 shape.
use base64::prelude::{Engine as _, BASE64_STANDARD};
use std::result::Result;

use crate::error::TunnelErrorCode::InvalidToken;
use crate::error::{ia_err, TunnelError};
use crate::reader::Reader;
use crate::writer::Writer;

/// The terminal token. Once checkpointed, a channel has been fully consumed.
pub const FINISH_TAG: &str = "finished";

pub const TOKEN_VERSION_1: i64 = 1;
pub const TOKEN_VERSION_2: i64 = 2;

// envelope tags
const TAG_VERSION: u8 = 0x01;
const TAG_CONTENT: u8 = 0x02;
// payload tags
const TAG_PRIMARY_KEY: u8 = 0x11;
const TAG_ITERATOR: u8 = 0x12;
const TAG_TIMESTAMP: u8 = 0x13;
const TAG_TOTAL_COUNT: u8 = 0x14;

/// The decoded payload of a resumption token, always in the version 2 shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenContent {
    /// Encoded primary key of the scan position (base data channels).
    pub primary_key: Vec<u8>,
    /// Stream iterator. Non-empty only for stream channels.
    pub iterator: String,
    pub timestamp: i64,
    /// Number of records consumed so far. Zero for upgraded version 1 tokens.
    pub total_count: i64,
}

fn invalid(msg: String) -> TunnelError {
    TunnelError::new(InvalidToken, &msg)
}

/// Parse a resumption token into its payload.
pub fn parse_token(token: &str) -> Result<TokenContent, TunnelError> {
    let raw = BASE64_STANDARD.decode(token)?;
    let mut r = Reader::new(&raw);
    r.expect_tag(TAG_VERSION)
        .map_err(|e| invalid(format!("token envelope: {}", e.message)))?;
    let version = r
        .read_i64()
        .map_err(|e| invalid(format!("token version: {}", e.message)))?;
    r.expect_tag(TAG_CONTENT)
        .map_err(|e| invalid(format!("token envelope: {}", e.message)))?;
    let payload = r
        .read_bytes()
        .map_err(|e| invalid(format!("token content: {}", e.message)))?;

    match version {
        TOKEN_VERSION_1 => parse_payload(&payload, false),
        TOKEN_VERSION_2 => parse_payload(&payload, true),
        _ => Err(invalid(format!("unknown token version {}", version))),
    }
}

fn parse_payload(payload: &[u8], has_total_count: bool) -> Result<TokenContent, TunnelError> {
    let mut r = Reader::new(payload);
    let mut content = TokenContent::default();
    while !r.is_at_end() {
        let tag = r.read_u8()?;
        match tag {
            TAG_PRIMARY_KEY => content.primary_key = r.read_bytes()?,
            TAG_ITERATOR => content.iterator = r.read_string()?,
            TAG_TIMESTAMP => content.timestamp = r.read_i64()?,
            TAG_TOTAL_COUNT if has_total_count => content.total_count = r.read_i64()?,
            _ => {
                return Err(invalid(format!(
                    "unexpected tag {:#04x} in token payload",
                    tag
                )))
            }
        }
    }
    Ok(content)
}

/// Serialize a token payload using the given envelope version.
pub fn serialize_token(content: &TokenContent, version: i64) -> Result<String, TunnelError> {
    if version != TOKEN_VERSION_1 && version != TOKEN_VERSION_2 {
        return ia_err!("cannot serialize token with unknown version {}", version);
    }
    let mut payload = Writer::new();
    if !content.primary_key.is_empty() {
        payload.write_u8(TAG_PRIMARY_KEY);
        payload.write_bytes(&content.primary_key);
    }
    if !content.iterator.is_empty() {
        payload.write_u8(TAG_ITERATOR);
        payload.write_string(&content.iterator);
    }
    payload.write_u8(TAG_TIMESTAMP);
    payload.write_i64(content.timestamp);
    if version == TOKEN_VERSION_2 {
        payload.write_u8(TAG_TOTAL_COUNT);
        payload.write_i64(content.total_count);
    }

    let mut w = Writer::new();
    w.write_u8(TAG_VERSION);
    w.write_i64(version);
    w.write_u8(TAG_CONTENT);
    w.write_bytes(payload.bytes());
    Ok(BASE64_STANDARD.encode(w.bytes()))
}

/// Returns true if the token positions a stream (incremental) channel.
///
/// Base data channels carry no iterator and can be read back to back; stream
/// channels need backoff between polls.
pub fn is_stream_token(token: &str) -> Result<bool, TunnelError> {
    let content = parse_token(token)?;
    Ok(!content.iterator.is_empty())
}

/// Returns true for the terminal token, including the empty token the server
/// returns once a channel has no more data.
pub fn is_finished_token(token: &str) -> bool {
    token.is_empty() || token == FINISH_TAG
}
