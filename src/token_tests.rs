//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::TunnelErrorCode;
use crate::token::*;
use crate::writer::Writer;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use std::error::Error;
use std::result::Result;

fn stream_content() -> TokenContent {
    TokenContent {
        primary_key: vec![],
        iterator: "shard-3:00000172".to_string(),
        timestamp: 1700000000000,
        total_count: 12345,
    }
}

#[test]
fn test_v2_token() -> Result<(), Box<dyn Error>> {
    let content = stream_content();
    let token = serialize_token(&content, TOKEN_VERSION_2)?;
    assert_eq!(parse_token(&token)?, content);
    assert!(is_stream_token(&token)?);
    Ok(())
}

#[test]
fn test_v1_token_is_upgraded() -> Result<(), Box<dyn Error>> {
    let content = TokenContent {
        primary_key: vec![0x75, 0, 0, 0, 1],
        iterator: String::new(),
        timestamp: 42,
        total_count: 999,
    };
    let token = serialize_token(&content, TOKEN_VERSION_1)?;
    let parsed = parse_token(&token)?;
    assert_eq!(parsed.primary_key, content.primary_key);
    assert_eq!(parsed.timestamp, 42);
    // version 1 has no count
    assert_eq!(parsed.total_count, 0);
    assert!(!is_stream_token(&token)?);
    Ok(())
}

#[test]
fn test_unknown_version() {
    let mut payload = Writer::new();
    payload.write_u8(0x13);
    payload.write_i64(1);
    let mut w = Writer::new();
    w.write_u8(0x01);
    w.write_i64(7);
    w.write_u8(0x02);
    w.write_bytes(payload.bytes());
    let token = BASE64_STANDARD.encode(w.bytes());

    let err = parse_token(&token).unwrap_err();
    assert_eq!(err.code, TunnelErrorCode::InvalidToken);
    assert!(err.message.contains("version 7"));
    assert!(is_stream_token(&token).is_err());
    assert!(serialize_token(&stream_content(), 7).is_err());
}

#[test]
fn test_garbage_tokens() {
    let err = parse_token("not base64 at all!").unwrap_err();
    assert_eq!(err.code, TunnelErrorCode::InvalidToken);

    // valid base64, truncated envelope
    let err = parse_token(&BASE64_STANDARD.encode([0x01u8, 2, 0])).unwrap_err();
    assert_eq!(err.code, TunnelErrorCode::InvalidToken);

    // the terminal token is not a parseable envelope
    assert!(parse_token(FINISH_TAG).is_err());
}

#[test]
fn test_finished_token() {
    assert!(is_finished_token(FINISH_TAG));
    assert!(is_finished_token(""));
    assert!(!is_finished_token("finished2"));
}
