//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Per-channel actor.
//!
//! A [`ChannelActor`] follows the directives the server issues for one
//! channel. On `OPEN` it starts two tasks connected by a bounded queue: a
//! reader that pulls pages from the tunnel service and a consumer that
//! hands them to the channel's [`ChannelProcessor`]. When the channel ends,
//! the actor shuts the processor down and reports the outcome upstream.
use num_enum::TryFromPrimitive;
use std::fmt::Debug;
use std::result::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::api::{ChannelKey, GetCheckpointRequest, ReadRecordsRequest, TunnelApi};
use crate::backoff::ExponentialBackoff;
use crate::checkpointer::Checkpointer;
use crate::config::TunnelWorkerConfig;
use crate::error::TunnelError;
use crate::error::TunnelErrorCode::ResourceNotFound;
use crate::plain_buffer::{PlainBufferCodec, RowCodec};
use crate::processor::{ChannelProcessor, ProcessBatch, ProcessorFactory};
use crate::record::decode_records;
use crate::registry::StatusReporter;
use crate::token::{is_finished_token, is_stream_token, FINISH_TAG};
use crate::types::{Channel, ChannelStatus};

/// Local lifecycle of a channel actor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ChannelActorStatus {
    /// Created, waiting for the first `OPEN`.
    Wait = 0,
    /// Reader and consumer tasks are active.
    Running = 1,
    /// Draining after a `CLOSING` directive.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

// What the reader hands to the consumer
#[derive(Debug)]
enum PipeResult {
    Batch(ProcessBatch),
    Finished,
    Error(TunnelError),
}

/// Drives one channel through its lifecycle.
///
/// Note: cloning this struct returns a handle to the same actor.
#[derive(Clone, Debug)]
pub struct ChannelActor {
    inner: Arc<ChannelActorRef>,
}

#[derive(Debug)]
struct ChannelActorRef {
    key: ChannelKey,
    api: Arc<dyn TunnelApi>,
    codec: Arc<dyn RowCodec>,
    processor: Arc<dyn ChannelProcessor>,
    checkpointer: Checkpointer,
    reporter: Arc<dyn StatusReporter>,
    config: TunnelWorkerConfig,
    // tokio Mutex: closing awaits the processor shutdown while holding it
    state: Mutex<ActorState>,
    // written only with `state` held; read without it
    status: AtomicU8,
    cancel_tx: watch::Sender<bool>,
    // set by the consumer task once it will not call the processor again
    consumer_exited: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct ActorState {
    // last directive applied
    current: Option<Channel>,
    pipeline_error: Option<TunnelError>,
    // reader and consumer tasks were spawned
    started: bool,
    // the consumer loop has exited
    drained: bool,
}

impl ChannelActor {
    /// Create an actor in the `Wait` state. Fails if `config` is invalid.
    pub fn new(
        key: ChannelKey,
        api: Arc<dyn TunnelApi>,
        codec: Arc<dyn RowCodec>,
        processor: Box<dyn ChannelProcessor>,
        checkpointer: Checkpointer,
        reporter: Arc<dyn StatusReporter>,
        config: TunnelWorkerConfig,
    ) -> Result<ChannelActor, TunnelError> {
        config.validate()?;
        let (cancel_tx, _) = watch::channel(false);
        let (consumer_exited, _) = watch::channel(false);
        Ok(ChannelActor {
            inner: Arc::new(ChannelActorRef {
                key,
                api,
                codec,
                processor: Arc::from(processor),
                checkpointer,
                reporter,
                config,
                state: Mutex::new(ActorState::default()),
                status: AtomicU8::new(ChannelActorStatus::Wait as u8),
                cancel_tx,
                consumer_exited,
            }),
        })
    }

    pub fn key(&self) -> &ChannelKey {
        &self.inner.key
    }

    pub fn status(&self) -> ChannelActorStatus {
        self.inner.status()
    }

    /// Returns true once the actor has reached its terminal state. Never blocks.
    pub fn closed(&self) -> bool {
        self.inner.status() == ChannelActorStatus::Closed
    }

    /// The last directive the actor applied.
    pub async fn current(&self) -> Option<Channel> {
        self.inner.state.lock().await.current.clone()
    }

    /// Apply a server directive for this channel.
    ///
    /// Directives older than the last one applied are discarded. Repeating a
    /// directive is harmless.
    pub async fn notify_status(&self, directive: Channel) {
        let inner = &self.inner;
        let mut st = inner.state.lock().await;
        if let Some(cur) = &st.current {
            if directive.version < cur.version {
                debug!(
                    channel_id = %inner.key.channel_id,
                    "ignoring stale directive v{} {:?}, current v{}",
                    directive.version, directive.status, cur.version
                );
                return;
            }
        }
        let status = inner.status();
        trace!(
            channel_id = %inner.key.channel_id,
            "directive v{} {:?} in {:?}", directive.version, directive.status, status
        );
        let target = directive.status;
        st.current = Some(directive);

        use ChannelActorStatus::*;
        match (status, target) {
            (Closed, _) => {}
            (Wait, ChannelStatus::Open) => {
                st.started = true;
                inner.set_status(Running);
                self.start_pipeline();
            }
            (Wait, ChannelStatus::Closing) => {
                inner.close_locked(&mut st, Some(ChannelStatus::Close)).await;
            }
            (Wait, ChannelStatus::Close | ChannelStatus::Terminated)
            | (Running, ChannelStatus::Close | ChannelStatus::Terminated) => {
                inner.close_locked(&mut st, None).await;
            }
            (Running, ChannelStatus::Open) => inner.check_completion(&mut st).await,
            (Running, ChannelStatus::Closing) => {
                inner.set_status(Closing);
                inner.cancel();
                inner.check_completion(&mut st).await;
            }
            (Closing, _) => inner.check_completion(&mut st).await,
        }
    }

    /// Stop the channel without reporting upstream. Idempotent.
    pub async fn close(&self) {
        let mut st = self.inner.state.lock().await;
        self.inner.close_locked(&mut st, None).await;
    }

    fn start_pipeline(&self) {
        let inner = &self.inner;
        let (tx, rx) = mpsc::channel(inner.config.channel_buffer_size);
        let span = info_span!(
            "channel",
            tunnel_id = %inner.key.tunnel_id,
            client_id = %inner.key.client_id,
            channel_id = %inner.key.channel_id
        );
        let reader = run_reader(inner.clone(), tx, inner.cancel_tx.subscribe());
        let consumer = run_consumer(inner.clone(), rx, inner.cancel_tx.subscribe());
        tokio::spawn(reader.instrument(span.clone()));
        tokio::spawn(consumer.instrument(span));
        info!(channel_id = %inner.key.channel_id, "channel pipeline started");
    }
}

impl ChannelActorRef {
    fn status(&self) -> ChannelActorStatus {
        ChannelActorStatus::try_from(self.status.load(Ordering::SeqCst))
            .unwrap_or(ChannelActorStatus::Closed)
    }

    fn set_status(&self, status: ChannelActorStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    // Must be called with the state lock held
    async fn close_locked(&self, st: &mut ActorState, report: Option<ChannelStatus>) {
        if self.status() == ChannelActorStatus::Closed {
            return;
        }
        self.cancel();
        if st.started {
            // a batch already handed to the processor is finished first
            let mut exited = self.consumer_exited.subscribe();
            let _ = exited.wait_for(|e| *e).await;
        }
        self.processor.shutdown().await;
        self.set_status(ChannelActorStatus::Closed);
        if let Some(status) = report {
            match &st.current {
                Some(cur) => {
                    let next = cur.successor(status);
                    info!(
                        channel_id = %self.key.channel_id,
                        "reporting {:?} v{}", next.status, next.version
                    );
                    self.reporter.update_status(next);
                }
                None => warn!(
                    channel_id = %self.key.channel_id,
                    "no directive seen, not reporting {:?}", status
                ),
            }
        }
        info!(channel_id = %self.key.channel_id, "channel closed");
    }

    async fn check_completion(&self, st: &mut ActorState) {
        if self.processor.finished() {
            self.close_locked(st, Some(ChannelStatus::Terminated)).await;
        } else if self.processor.error() || st.pipeline_error.is_some() {
            self.close_locked(st, Some(ChannelStatus::Close)).await;
        } else if self.status() == ChannelActorStatus::Closing && st.drained {
            self.close_locked(st, Some(ChannelStatus::Close)).await;
        }
    }

    async fn on_pipeline_exit(&self, err: Option<TunnelError>) {
        let mut st = self.state.lock().await;
        st.drained = true;
        if let Some(e) = err {
            warn!(
                channel_id = %self.key.channel_id,
                retryable = e.is_retryable(),
                "channel pipeline failed: {}", e
            );
            st.pipeline_error = Some(e);
        }
        if self.status() == ChannelActorStatus::Closed {
            return;
        }
        self.check_completion(&mut st).await;
        self.close_locked(&mut st, None).await;
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

// Returns false if the pipeline was cancelled or the consumer is gone
async fn forward(
    tx: &mpsc::Sender<PipeResult>,
    cancel: &mut watch::Receiver<bool>,
    msg: PipeResult,
) -> bool {
    tokio::select! {
        _ = cancel.wait_for(|c| *c) => false,
        res = tx.send(msg) => res.is_ok(),
    }
}

async fn run_reader(
    inner: Arc<ChannelActorRef>,
    tx: mpsc::Sender<PipeResult>,
    mut cancel: watch::Receiver<bool>,
) {
    if let Err(e) = read_loop(&inner, &tx, &mut cancel).await {
        forward(&tx, &mut cancel, PipeResult::Error(e)).await;
    }
}

async fn read_loop(
    inner: &ChannelActorRef,
    tx: &mpsc::Sender<PipeResult>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), TunnelError> {
    let ckpt = inner
        .api
        .get_checkpoint(GetCheckpointRequest {
            key: inner.key.clone(),
        })
        .await?;
    if ckpt.checkpoint.is_empty() {
        return Err(TunnelError::new(
            ResourceNotFound,
            &format!("channel {} has no checkpoint", inner.key.channel_id),
        ));
    }
    inner.checkpointer.set_sequence_number(ckpt.sequence_number);
    debug!(
        "starting from checkpoint seq={} finished={}",
        ckpt.sequence_number,
        ckpt.checkpoint == FINISH_TAG
    );
    if ckpt.checkpoint == FINISH_TAG {
        forward(tx, cancel, PipeResult::Finished).await;
        return Ok(());
    }

    let mut backoff = ExponentialBackoff::new(inner.config.backoff.clone())?;
    let mut token = ckpt.checkpoint;
    let mut first = true;
    loop {
        let stream = is_stream_token(&token).unwrap_or_else(|e| {
            debug!("cannot classify token, assuming stream: {}", e);
            true
        });
        if stream && !first {
            let delay = backoff
                .next_backoff()
                .unwrap_or(backoff.config().max_delay);
            tokio::select! {
                _ = cancel.wait_for(|c| *c) => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        first = false;
        if is_cancelled(cancel) {
            return Ok(());
        }

        let resp = inner
            .api
            .read_records(ReadRecordsRequest {
                key: inner.key.clone(),
                token: token.clone(),
            })
            .await?;
        let records = decode_records(inner.codec.as_ref(), &resp.records)?;
        if inner.config.is_full_batch(resp.records.len(), resp.byte_size) {
            backoff.reset();
        }
        let done = is_finished_token(&resp.next_token);
        trace!(
            "read {} records ({} bytes), trace_id={} done={}",
            records.len(),
            resp.byte_size,
            resp.trace_id,
            done
        );

        if !records.is_empty() {
            let next_token = if done {
                FINISH_TAG.to_string()
            } else {
                resp.next_token.clone()
            };
            let batch = ProcessBatch {
                records,
                next_token,
                trace_id: resp.trace_id,
                stream_channel: stream,
            };
            if !forward(tx, cancel, PipeResult::Batch(batch)).await {
                return Ok(());
            }
        }
        if done {
            forward(tx, cancel, PipeResult::Finished).await;
            return Ok(());
        }
        token = resp.next_token;
    }
}

async fn run_consumer(
    inner: Arc<ChannelActorRef>,
    mut rx: mpsc::Receiver<PipeResult>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut err = None;
    loop {
        if inner.status() != ChannelActorStatus::Running {
            break;
        }
        let msg = tokio::select! {
            biased;
            _ = cancel.wait_for(|c| *c) => break,
            m = rx.recv() => m,
        };
        match msg {
            None => break,
            Some(PipeResult::Error(e)) => {
                err = Some(e);
                break;
            }
            Some(PipeResult::Finished) => {
                if !inner.processor.finished() {
                    if let Err(e) = inner.processor.process(ProcessBatch::finish()).await {
                        err = Some(e);
                    }
                }
                break;
            }
            Some(PipeResult::Batch(batch)) => {
                if inner.processor.process(batch).await.is_err() {
                    break;
                }
            }
        }
    }
    drop(rx);
    inner.consumer_exited.send_replace(true);
    inner.on_pipeline_exit(err).await;
}

/// Creates the actor for a newly discovered channel.
pub trait ChannelDialer: Send + Sync + Debug {
    fn dial(
        &self,
        key: ChannelKey,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<ChannelActor, TunnelError>;
}

/// Dialer wiring each actor to a tunnel client, a processor from the given
/// factory, and its own [`Checkpointer`].
#[derive(Debug, Clone)]
pub struct DefaultChannelDialer {
    api: Arc<dyn TunnelApi>,
    codec: Arc<dyn RowCodec>,
    factory: Arc<dyn ProcessorFactory>,
    config: TunnelWorkerConfig,
}

impl DefaultChannelDialer {
    pub fn new(
        api: Arc<dyn TunnelApi>,
        factory: Arc<dyn ProcessorFactory>,
        config: TunnelWorkerConfig,
    ) -> Result<Self, TunnelError> {
        config.validate()?;
        Ok(DefaultChannelDialer {
            api,
            codec: Arc::new(PlainBufferCodec),
            factory,
            config,
        })
    }

    /// Use a different row codec than the default plain buffer codec.
    pub fn codec(mut self, codec: Arc<dyn RowCodec>) -> Self {
        self.codec = codec;
        self
    }
}

impl ChannelDialer for DefaultChannelDialer {
    fn dial(
        &self,
        key: ChannelKey,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<ChannelActor, TunnelError> {
        let checkpointer =
            Checkpointer::start(self.api.clone(), key.clone(), self.config.checkpoint_interval)?;
        let processor = self.factory.new_processor(&key, checkpointer.clone());
        ChannelActor::new(
            key,
            self.api.clone(),
            self.codec.clone(),
            processor,
            checkpointer,
            reporter,
            self.config.clone(),
        )
    }
}
