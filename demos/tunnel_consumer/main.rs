//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//

// This is an example program showing how a tunnel client drives channel
// consumption. It does not talk to a real tunnel service: an in-memory
// service hands out a few pages of base data per channel and then ends each
// channel. A real client would send heartbeats to the service instead of
// the loop in main().

// To run this example:
//    cargo run --example tunnel_consumer
//
// for extra output:
//    RUST_LOG=debug cargo run --example tunnel_consumer
//
// or, for a LOT of tracing output:
//    RUST_LOG=trace cargo run --example tunnel_consumer

// Number of channels the fake service assigns to this client
const CHANNELS: usize = 3;
// Pages served per channel before the channel ends
const PAGES: i64 = 4;
// Records per page
const PAGE_SIZE: i64 = 5;

use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use tablestore_tunnel_sdk::plain_buffer::{encode_row, PlainBufferCell, PlainBufferRow};
use tablestore_tunnel_sdk::token::{parse_token, serialize_token, TokenContent, TOKEN_VERSION_2};
use tablestore_tunnel_sdk::types::{ActionType, Channel, ChannelStatus, PrimaryKey};
use tablestore_tunnel_sdk::{
    CheckpointRequest, DefaultChannelDialer, GetCheckpointRequest, GetCheckpointResponse,
    RawRecord, ReadRecordsRequest, ReadRecordsResponse, SimpleProcessorFactory, TunnelApi,
    TunnelError, TunnelStateMachine, TunnelWorkerConfig,
};

// In-memory stand-in for the tunnel service
#[derive(Debug, Default)]
struct FakeTunnelService {
    // channel id -> (token, sequence number)
    checkpoints: Mutex<HashMap<String, (String, i64)>>,
}

fn page_token(page: i64) -> Result<String, TunnelError> {
    serialize_token(
        &TokenContent {
            primary_key: page.to_be_bytes().to_vec(),
            timestamp: page,
            ..Default::default()
        },
        TOKEN_VERSION_2,
    )
}

fn page_of(token: &str) -> Result<i64, TunnelError> {
    let content = parse_token(token)?;
    let mut buf = [0u8; 8];
    if content.primary_key.len() == 8 {
        buf.copy_from_slice(&content.primary_key);
    }
    Ok(i64::from_be_bytes(buf))
}

#[async_trait]
impl TunnelApi for FakeTunnelService {
    async fn read_records(
        &self,
        req: ReadRecordsRequest,
    ) -> Result<ReadRecordsResponse, TunnelError> {
        let page = page_of(&req.token)?;
        let records: Vec<RawRecord> = (page * PAGE_SIZE..(page + 1) * PAGE_SIZE)
            .map(|id| {
                let row = PlainBufferRow {
                    primary_key: PrimaryKey::new()
                        .column("channel", req.key.channel_id.as_str())
                        .column("id", id),
                    cells: vec![PlainBufferCell {
                        name: "name".to_string(),
                        value: Some(format!("name-{}", id).into()),
                        cell_type: None,
                        timestamp: Some(id),
                    }],
                    ..Default::default()
                };
                RawRecord::new(ActionType::Put, encode_row(&row))
            })
            .collect();
        let next_token = if page + 1 >= PAGES {
            String::new()
        } else {
            page_token(page + 1)?
        };
        // pretend the service takes a little while
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(ReadRecordsResponse {
            byte_size: records.iter().map(|r| r.record.len()).sum(),
            records,
            next_token,
            trace_id: format!("{}-{}", req.key.channel_id, page),
        })
    }

    async fn checkpoint(&self, req: CheckpointRequest) -> Result<(), TunnelError> {
        debug!(
            "checkpoint {} seq={}",
            req.key.channel_id, req.sequence_number
        );
        let mut ckpts = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        ckpts.insert(req.key.channel_id, (req.token, req.sequence_number));
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        req: GetCheckpointRequest,
    ) -> Result<GetCheckpointResponse, TunnelError> {
        let ckpts = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        match ckpts.get(&req.key.channel_id) {
            Some((token, seq)) => Ok(GetCheckpointResponse {
                checkpoint: token.clone(),
                sequence_number: *seq,
            }),
            None => Ok(GetCheckpointResponse {
                checkpoint: page_token(0)?,
                sequence_number: 0,
            }),
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<(), Box<dyn Error>> {
    // Set up a tracing subscriber to see output based on RUST_LOG environment setting
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_ansi(false)
        .compact()
        .init();

    let service = Arc::new(FakeTunnelService::default());

    // Defaults, overridden by TABLESTORE_TUNNEL_* environment variables
    let config = TunnelWorkerConfig::new()
        .checkpoint_interval(Duration::from_millis(200))?
        .from_environment()?;

    let processed = Arc::new(AtomicUsize::new(0));
    let counter = processed.clone();
    let factory = SimpleProcessorFactory::new(move |ctx, records| {
        for r in records {
            debug!("{} {:?} {:?}", ctx.channel_id, r.action_type, r.primary_key);
        }
        counter.fetch_add(records.len(), Ordering::SeqCst);
        Ok(())
    })
    .on_shutdown(|ctx| info!("channel {} shut down", ctx.channel_id));

    let dialer = DefaultChannelDialer::new(service.clone(), Arc::new(factory), config)?;
    let sm = TunnelStateMachine::new("demo-tunnel", "demo-client", Arc::new(dialer));

    // The server's view of each channel; a real client gets this from heartbeats
    let mut directives: Vec<Channel> = (0..CHANNELS)
        .map(|i| Channel::new(&format!("channel-{}", i), 0, ChannelStatus::Open))
        .collect();

    loop {
        sm.batch_update_status(directives.clone()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Acknowledge whatever the client reported, like the server would
        let report = sm.batch_get_status();
        info!("heartbeat: {:?}", report);
        if report.iter().all(|c| c.status == ChannelStatus::Terminated) {
            break;
        }
        directives = report;
    }

    sm.close().await;
    info!(
        "processed {} records from {} channels",
        processed.load(Ordering::SeqCst),
        CHANNELS
    );
    Ok(())
}
