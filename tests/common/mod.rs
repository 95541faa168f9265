//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use tablestore_tunnel_sdk::plain_buffer::{encode_row, PlainBufferCell, PlainBufferRow};
use tablestore_tunnel_sdk::token::{serialize_token, TokenContent, TOKEN_VERSION_2};
use tablestore_tunnel_sdk::types::{ActionType, Channel, PrimaryKey};
use tablestore_tunnel_sdk::{
    CheckpointRequest, GetCheckpointRequest, GetCheckpointResponse, RawRecord,
    ReadRecordsRequest, ReadRecordsResponse, StatusReporter, TunnelApi, TunnelError,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_ansi(false)
        .compact()
        .with_test_writer()
        .try_init();
}

/// Token positioning a stream (incremental) channel.
pub fn stream_token(n: i64) -> String {
    serialize_token(
        &TokenContent {
            iterator: format!("iter-{}", n),
            timestamp: n,
            ..Default::default()
        },
        TOKEN_VERSION_2,
    )
    .unwrap()
}

/// Token positioning a base data channel.
pub fn base_token(n: i64) -> String {
    serialize_token(
        &TokenContent {
            primary_key: vec![0x75, 0, 0, 0, n as u8],
            timestamp: n,
            ..Default::default()
        },
        TOKEN_VERSION_2,
    )
    .unwrap()
}

pub fn raw_record(id: i64) -> RawRecord {
    let row = PlainBufferRow {
        primary_key: PrimaryKey::new().column("id", id),
        cells: vec![PlainBufferCell {
            name: "value".to_string(),
            value: Some(format!("row-{}", id).into()),
            cell_type: None,
            timestamp: Some(1000 + id),
        }],
        ..Default::default()
    };
    RawRecord::new(ActionType::Put, encode_row(&row))
}

pub fn page(ids: std::ops::Range<i64>, next_token: &str) -> Result<ReadRecordsResponse, TunnelError> {
    let records: Vec<RawRecord> = ids.map(raw_record).collect();
    let byte_size = records.iter().map(|r| r.record.len()).sum();
    Ok(ReadRecordsResponse {
        records,
        next_token: next_token.to_string(),
        trace_id: "trace".to_string(),
        byte_size,
    })
}

/// Scripted tunnel service. Reads past the end of the script never complete.
#[derive(Debug)]
pub struct MockApi {
    checkpoint: Mutex<GetCheckpointResponse>,
    reads: Mutex<VecDeque<Result<ReadRecordsResponse, TunnelError>>>,
    pub read_times: Mutex<Vec<Instant>>,
    pub read_tokens: Mutex<Vec<String>>,
    pub checkpoints: Mutex<Vec<(String, i64)>>,
    pub get_checkpoint_calls: AtomicUsize,
}

impl MockApi {
    pub fn new(start_token: &str) -> Self {
        MockApi {
            checkpoint: Mutex::new(GetCheckpointResponse {
                checkpoint: start_token.to_string(),
                sequence_number: 0,
            }),
            reads: Mutex::new(VecDeque::new()),
            read_times: Mutex::new(Vec::new()),
            read_tokens: Mutex::new(Vec::new()),
            checkpoints: Mutex::new(Vec::new()),
            get_checkpoint_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_read(&self, r: Result<ReadRecordsResponse, TunnelError>) -> &Self {
        self.reads.lock().unwrap().push_back(r);
        self
    }

    pub fn read_count(&self) -> usize {
        self.read_times.lock().unwrap().len()
    }

    pub fn last_checkpoint(&self) -> Option<String> {
        self.checkpoints.lock().unwrap().last().map(|c| c.0.clone())
    }

    pub fn read_gaps(&self) -> Vec<Duration> {
        let times = self.read_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl TunnelApi for MockApi {
    async fn read_records(&self, req: ReadRecordsRequest) -> Result<ReadRecordsResponse, TunnelError> {
        self.read_times.lock().unwrap().push(Instant::now());
        self.read_tokens.lock().unwrap().push(req.token);
        let next = self.reads.lock().unwrap().pop_front();
        match next {
            Some(r) => r,
            None => std::future::pending().await,
        }
    }

    async fn checkpoint(&self, req: CheckpointRequest) -> Result<(), TunnelError> {
        self.checkpoints
            .lock()
            .unwrap()
            .push((req.token, req.sequence_number));
        Ok(())
    }

    async fn get_checkpoint(&self, _req: GetCheckpointRequest) -> Result<GetCheckpointResponse, TunnelError> {
        self.get_checkpoint_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.checkpoint.lock().unwrap().clone())
    }
}

/// Collects status reports.
#[derive(Debug, Default)]
pub struct Reports {
    pub reports: Mutex<Vec<Channel>>,
}

impl Reports {
    pub fn all(&self) -> Vec<Channel> {
        self.reports.lock().unwrap().clone()
    }
}

impl StatusReporter for Reports {
    fn update_status(&self, channel: Channel) {
        self.reports.lock().unwrap().push(channel);
    }
}

/// Poll `f` until it returns true, sleeping between polls.
pub async fn wait_until<F: Fn() -> bool>(what: &str, f: F) {
    for _ in 0..2000 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
