//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Remote operations consumed by the tunnel worker.
//!
//! Transport, signing and message marshaling live behind [`TunnelApi`];
//! applications plug in their own client for the service.
use async_trait::async_trait;
use std::fmt::Debug;
use std::result::Result;

use crate::error::TunnelError;
use crate::record::RawRecord;

/// Identifies one channel of one tunnel, as seen by one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub tunnel_id: String,
    pub client_id: String,
    pub channel_id: String,
}

impl ChannelKey {
    pub fn new(tunnel_id: &str, client_id: &str, channel_id: &str) -> Self {
        ChannelKey {
            tunnel_id: tunnel_id.to_string(),
            client_id: client_id.to_string(),
            channel_id: channel_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadRecordsRequest {
    pub key: ChannelKey,
    pub token: String,
}

/// One page of records.
#[derive(Debug, Clone, Default)]
pub struct ReadRecordsResponse {
    pub records: Vec<RawRecord>,
    /// Token to pass on the next read. Empty or `"finished"` at end of data.
    pub next_token: String,
    pub trace_id: String,
    /// Serialized size of the page, used by the backoff reset heuristic.
    pub byte_size: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointRequest {
    pub key: ChannelKey,
    pub token: String,
    pub sequence_number: i64,
}

#[derive(Debug, Clone)]
pub struct GetCheckpointRequest {
    pub key: ChannelKey,
}

#[derive(Debug, Clone, Default)]
pub struct GetCheckpointResponse {
    pub checkpoint: String,
    pub sequence_number: i64,
}

/// The read/checkpoint RPCs of the tunnel service.
#[async_trait]
pub trait TunnelApi: Send + Sync + Debug {
    /// Read the next page of records after `token`.
    async fn read_records(
        &self,
        req: ReadRecordsRequest,
    ) -> Result<ReadRecordsResponse, TunnelError>;

    /// Persist consumption progress for a channel.
    async fn checkpoint(&self, req: CheckpointRequest) -> Result<(), TunnelError>;

    /// Fetch the last persisted checkpoint of a channel.
    async fn get_checkpoint(
        &self,
        req: GetCheckpointRequest,
    ) -> Result<GetCheckpointResponse, TunnelError>;
}
