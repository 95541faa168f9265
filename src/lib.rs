//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Tablestore Tunnel Rust SDK
//!
//! This crate consumes change data from a Tablestore tunnel. A tunnel splits
//! a table's data into channels (one per partition); the tunnel service
//! assigns channels to clients and tells each client, with every heartbeat,
//! what state each of its channels should be in. For every channel it owns,
//! the SDK runs a small pipeline that reads record batches, decodes them,
//! hands them to application code and checkpoints progress.
//!
//! This SDK uses Rust `async` methods throughout, on the [tokio](https://crates.io/crates/tokio) runtime.
//!
//! The general flow for an application is:
//! - Implement [`TunnelApi`] on top of a client for the tunnel service (or use one provided by the service integration)
//! - Choose a [`ProcessorFactory`]: [`SimpleProcessorFactory`] for blocking callbacks, [`AsyncProcessorFactory`] for async ones
//! - Create a [`TunnelStateMachine`] with a [`DefaultChannelDialer`] and a [`TunnelWorkerConfig`]
//! - On each heartbeat, pass the server's channel directives to [`TunnelStateMachine::batch_update_status()`] and send back [`TunnelStateMachine::batch_get_status()`]
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use tablestore_tunnel_sdk::{
//!     DefaultChannelDialer, SimpleProcessorFactory, TunnelApi, TunnelStateMachine,
//!     TunnelWorkerConfig,
//! };
//! use tablestore_tunnel_sdk::types::{Channel, ChannelStatus};
//!
//! async fn consume(api: Arc<dyn TunnelApi>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TunnelWorkerConfig::new().from_environment()?;
//!     let factory = SimpleProcessorFactory::new(|ctx, records| {
//!         for r in records {
//!             println!("{} {:?} {:?}", ctx.channel_id, r.action_type, r.primary_key);
//!         }
//!         Ok(())
//!     });
//!     let dialer = DefaultChannelDialer::new(api, Arc::new(factory), config)?;
//!     let sm = TunnelStateMachine::new("tunnel-id", "client-id", Arc::new(dialer));
//!
//!     // directives from a heartbeat response
//!     sm.batch_update_status(vec![Channel::new("channel-0", 0, ChannelStatus::Open)]).await;
//!     // statuses for the next heartbeat request
//!     let report = sm.batch_get_status();
//!     println!("{:?}", report);
//!     sm.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Channel lifecycle
//!
//! Each channel is driven by a [`ChannelActor`]. Directives carry a version;
//! an actor ignores directives older than the last one it applied. When a
//! channel is fully consumed the actor reports `TERMINATED` upstream; when
//! it stops because of an error, or after draining in response to
//! `CLOSING`, it reports `CLOSE`. Reports always carry the version of the
//! last directive plus one.
//!
//! ## Checkpoints
//!
//! Progress is recorded as an opaque token. A processor submits the token of
//! every batch it handled; the channel's [`Checkpointer`] writes the newest
//! one at a fixed interval and once more on shutdown, so a restarted client
//! resumes after the last batch that was processed successfully.
//!
//! ## Configuration
//!
//! See [`TunnelWorkerConfig`]. Settings can come from code, from
//! `TABLESTORE_TUNNEL_*` environment variables or from a JSON file.
//!
//! ## Logging
//!
//! The SDK logs through [tracing](https://crates.io/crates/tracing). Channel
//! tasks run inside a span carrying `tunnel_id`, `client_id` and
//! `channel_id`.

pub(crate) mod api;
pub use crate::api::{
    ChannelKey, CheckpointRequest, GetCheckpointRequest, GetCheckpointResponse,
    ReadRecordsRequest, ReadRecordsResponse, TunnelApi,
};

pub(crate) mod backoff;
pub use crate::backoff::{BackoffConfig, ExponentialBackoff};

pub(crate) mod channel;
pub use crate::channel::{ChannelActor, ChannelActorStatus, ChannelDialer, DefaultChannelDialer};

pub(crate) mod checkpointer;
pub use crate::checkpointer::Checkpointer;

#[cfg(test)]
pub(crate) mod checkpointer_tests;

pub(crate) mod config;
pub use crate::config::TunnelWorkerConfig;

pub(crate) mod error;
pub use crate::error::{TunnelError, TunnelErrorCode};

pub mod plain_buffer;

pub(crate) mod processor;
pub use crate::processor::{
    AsyncProcessorFactory, ChannelContext, ChannelProcessor, ProcessBatch, ProcessorFactory,
    RecordHandler, SimpleProcessorFactory,
};

pub(crate) mod reader;

pub(crate) mod record;
pub use crate::record::{
    decode_record, decode_records, RawRecord, Record, RecordColumn, RecordColumnType,
    SequenceInfo,
};

pub(crate) mod registry;
pub use crate::registry::{ChannelRegistry, StatusReporter};

pub(crate) mod replay;
pub use crate::replay::{replay_records, PutColumn, RowChange, TableWriter};

pub(crate) mod state_machine;
pub use crate::state_machine::TunnelStateMachine;

pub mod token;

#[cfg(test)]
pub(crate) mod token_tests;

pub mod types;

pub(crate) mod writer;
