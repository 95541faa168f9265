//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Record consumers.
//!
//! A channel actor hands each decoded batch to a [`ChannelProcessor`]. The
//! processor runs application code on the records and then records the
//! batch's token with the channel's [`Checkpointer`]. Applications normally
//! do not implement [`ChannelProcessor`] themselves; they supply callbacks
//! through [`SimpleProcessorFactory`] (blocking code) or
//! [`AsyncProcessorFactory`] (async code).
use async_trait::async_trait;
use std::fmt;
use std::fmt::Debug;
use std::result::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::ChannelKey;
use crate::checkpointer::Checkpointer;
use crate::error::TunnelError;
use crate::record::Record;
use crate::token::{is_finished_token, FINISH_TAG};

/// Information about the channel a batch was read from.
#[derive(Debug, Clone, Default)]
pub struct ChannelContext {
    pub tunnel_id: String,
    pub client_id: String,
    pub channel_id: String,
    /// Request id of the read that produced the batch.
    pub trace_id: String,
    /// Token that resumes reading after this batch.
    pub next_token: String,
    /// True if the channel carries incremental (stream) data.
    pub stream_channel: bool,
}

impl ChannelContext {
    fn new(key: &ChannelKey) -> Self {
        ChannelContext {
            tunnel_id: key.tunnel_id.clone(),
            client_id: key.client_id.clone(),
            channel_id: key.channel_id.clone(),
            ..Default::default()
        }
    }
}

/// One batch of decoded records and the token that follows it.
#[derive(Debug, Clone, Default)]
pub struct ProcessBatch {
    pub records: Vec<Record>,
    pub next_token: String,
    pub trace_id: String,
    pub stream_channel: bool,
}

impl ProcessBatch {
    /// An empty batch carrying the terminal token.
    pub fn finish() -> Self {
        ProcessBatch {
            next_token: FINISH_TAG.to_string(),
            ..Default::default()
        }
    }
}

/// The consumer side of a channel pipeline.
#[async_trait]
pub trait ChannelProcessor: Send + Sync + Debug {
    /// Consume one batch. On success the batch's token becomes eligible for
    /// checkpointing.
    async fn process(&self, batch: ProcessBatch) -> Result<(), TunnelError>;

    /// Release resources and flush the last checkpoint. Idempotent.
    async fn shutdown(&self);

    /// True once processing has failed.
    fn error(&self) -> bool;

    /// True once the terminal token has been processed.
    fn finished(&self) -> bool;
}

/// Creates one processor per channel actor.
pub trait ProcessorFactory: Send + Sync + Debug {
    fn new_processor(&self, key: &ChannelKey, checkpointer: Checkpointer)
        -> Box<dyn ChannelProcessor>;
}

/// Blocking record callback, run on tokio's blocking thread pool.
pub type ProcessFn = dyn Fn(&ChannelContext, &[Record]) -> Result<(), TunnelError> + Send + Sync;

/// Called once when a channel's processor shuts down.
pub type ShutdownFn = dyn Fn(&ChannelContext) + Send + Sync;

/// Async record handler for [`AsyncProcessorFactory`].
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn process(&self, ctx: &ChannelContext, records: &[Record]) -> Result<(), TunnelError>;

    async fn shutdown(&self, _ctx: &ChannelContext) {}
}

/// Processor factory for blocking callbacks.
///
///```no_run
/// # use tablestore_tunnel_sdk::SimpleProcessorFactory;
/// let factory = SimpleProcessorFactory::new(|ctx, records| {
///     println!("{}: {} records", ctx.channel_id, records.len());
///     Ok(())
/// })
/// .on_shutdown(|ctx| println!("{} shut down", ctx.channel_id));
///```
#[derive(Clone)]
pub struct SimpleProcessorFactory {
    process: Arc<ProcessFn>,
    shutdown: Option<Arc<ShutdownFn>>,
}

impl SimpleProcessorFactory {
    pub fn new<F>(process: F) -> Self
    where
        F: Fn(&ChannelContext, &[Record]) -> Result<(), TunnelError> + Send + Sync + 'static,
    {
        SimpleProcessorFactory {
            process: Arc::new(process),
            shutdown: None,
        }
    }

    pub fn on_shutdown<F>(mut self, shutdown: F) -> Self
    where
        F: Fn(&ChannelContext) + Send + Sync + 'static,
    {
        self.shutdown = Some(Arc::new(shutdown));
        self
    }
}

impl Debug for SimpleProcessorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleProcessorFactory")
            .field("shutdown", &self.shutdown.is_some())
            .finish()
    }
}

impl ProcessorFactory for SimpleProcessorFactory {
    fn new_processor(
        &self,
        key: &ChannelKey,
        checkpointer: Checkpointer,
    ) -> Box<dyn ChannelProcessor> {
        Box::new(BatchProcessor::new(
            key,
            checkpointer,
            Handler::Blocking {
                process: self.process.clone(),
                shutdown: self.shutdown.clone(),
            },
        ))
    }
}

/// Processor factory for an async [`RecordHandler`].
#[derive(Clone)]
pub struct AsyncProcessorFactory {
    handler: Arc<dyn RecordHandler>,
}

impl AsyncProcessorFactory {
    pub fn new(handler: Arc<dyn RecordHandler>) -> Self {
        AsyncProcessorFactory { handler }
    }
}

impl Debug for AsyncProcessorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncProcessorFactory")
    }
}

impl ProcessorFactory for AsyncProcessorFactory {
    fn new_processor(
        &self,
        key: &ChannelKey,
        checkpointer: Checkpointer,
    ) -> Box<dyn ChannelProcessor> {
        Box::new(BatchProcessor::new(
            key,
            checkpointer,
            Handler::Async(self.handler.clone()),
        ))
    }
}

enum Handler {
    Blocking {
        process: Arc<ProcessFn>,
        shutdown: Option<Arc<ShutdownFn>>,
    },
    Async(Arc<dyn RecordHandler>),
}

// The processor behind both factories
struct BatchProcessor {
    key: ChannelKey,
    checkpointer: Checkpointer,
    handler: Handler,
    failed: AtomicBool,
    finished: AtomicBool,
    shut_down: AtomicBool,
}

impl Debug for BatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("key", &self.key)
            .field("failed", &self.failed)
            .field("finished", &self.finished)
            .finish()
    }
}

impl BatchProcessor {
    fn new(key: &ChannelKey, checkpointer: Checkpointer, handler: Handler) -> Self {
        BatchProcessor {
            key: key.clone(),
            checkpointer,
            handler,
            failed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    async fn run_handler(
        &self,
        ctx: ChannelContext,
        records: Vec<Record>,
    ) -> Result<(), TunnelError> {
        match &self.handler {
            Handler::Blocking { process, .. } => {
                let process = process.clone();
                tokio::task::spawn_blocking(move || process(&ctx, &records)).await?
            }
            Handler::Async(h) => h.process(&ctx, &records).await,
        }
    }
}

#[async_trait]
impl ChannelProcessor for BatchProcessor {
    async fn process(&self, batch: ProcessBatch) -> Result<(), TunnelError> {
        if !batch.records.is_empty() {
            let mut ctx = ChannelContext::new(&self.key);
            ctx.trace_id = batch.trace_id;
            ctx.next_token = batch.next_token.clone();
            ctx.stream_channel = batch.stream_channel;
            if let Err(e) = self.run_handler(ctx, batch.records).await {
                warn!(
                    channel_id = %self.key.channel_id,
                    "record processing failed: {}", e
                );
                self.failed.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
        if is_finished_token(&batch.next_token) {
            self.checkpointer.submit(FINISH_TAG);
            self.finished.store(true, Ordering::SeqCst);
        } else {
            self.checkpointer.submit(&batch.next_token);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.checkpointer.shutdown().await {
            warn!(
                channel_id = %self.key.channel_id,
                "final checkpoint failed: {}", e
            );
        }
        let mut ctx = ChannelContext::new(&self.key);
        ctx.next_token = self.checkpointer.last_flushed().unwrap_or_default();
        match &self.handler {
            Handler::Blocking {
                shutdown: Some(f), ..
            } => f(&ctx),
            Handler::Blocking { shutdown: None, .. } => {}
            Handler::Async(h) => h.shutdown(&ctx).await,
        }
        debug!(channel_id = %self.key.channel_id, "processor shut down");
    }

    fn error(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
