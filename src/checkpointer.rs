//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use std::result::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::api::{ChannelKey, CheckpointRequest, TunnelApi};
use crate::error::{ia_err, TunnelError};
use crate::token::FINISH_TAG;

/// Coalescing checkpoint flusher for one channel.
///
/// [`submit()`](Checkpointer::submit) only records the newest token; a
/// background ticker hands it to a write task at most once per interval.
/// [`shutdown()`](Checkpointer::shutdown) stops both tasks and synchronously
/// writes whatever is still pending.
///
/// Note: cloning this struct returns a handle to the same flusher.
#[derive(Clone, Debug)]
pub struct Checkpointer {
    inner: Arc<CheckpointerRef>,
}

#[derive(Debug)]
struct CheckpointerRef {
    api: Arc<dyn TunnelApi>,
    key: ChannelKey,
    // never held across awaits
    state: Mutex<FlushState>,
    // held across the checkpoint write so writes happen one at a time, in order
    write_lock: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    shut_down: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct FlushState {
    pending: Option<String>,
    // bumped on every submit; a token is flushed only if its generation is newer
    pending_gen: u64,
    flushed: Option<String>,
    flushed_gen: u64,
    sequence_number: i64,
    finished: bool,
}

impl Checkpointer {
    /// Create the flusher and start its ticker and write tasks.
    ///
    /// Must be called from within a tokio runtime. `interval` must be non-zero.
    pub fn start(
        api: Arc<dyn TunnelApi>,
        key: ChannelKey,
        interval: Duration,
    ) -> Result<Checkpointer, TunnelError> {
        if interval.is_zero() {
            return ia_err!("checkpoint interval must be greater than zero");
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(CheckpointerRef {
            api,
            key,
            state: Mutex::new(FlushState::default()),
            write_lock: tokio::sync::Mutex::new(()),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
            tasks: Mutex::new(Vec::with_capacity(2)),
        });

        // rendezvous between the ticker and the writer
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<u64>(1);
        let ticker = tokio::spawn(ticker_loop(
            inner.clone(),
            interval,
            dispatch_tx,
            shutdown_rx,
        ));
        let writer = tokio::spawn(write_loop(inner.clone(), dispatch_rx));
        inner.lock_tasks().extend([ticker, writer]);
        debug!(
            channel_id = %inner.key.channel_id,
            "checkpointer started, interval={:?}", interval
        );
        Ok(Checkpointer { inner })
    }

    /// Record `token` as the newest progress marker. Never blocks.
    ///
    /// Earlier pending tokens are overwritten. Once the terminal token has
    /// been submitted, later submissions are ignored.
    pub fn submit(&self, token: &str) {
        let mut st = self.inner.lock_state();
        if st.finished {
            trace!(
                channel_id = %self.inner.key.channel_id,
                "ignoring checkpoint {} after finish", token
            );
            return;
        }
        st.pending = Some(token.to_string());
        st.pending_gen += 1;
        if token == FINISH_TAG {
            st.finished = true;
        }
    }

    /// Set the sequence number of the last persisted checkpoint.
    pub fn set_sequence_number(&self, sequence_number: i64) {
        self.inner.lock_state().sequence_number = sequence_number;
    }

    pub fn sequence_number(&self) -> i64 {
        self.inner.lock_state().sequence_number
    }

    /// The last token successfully written.
    pub fn last_flushed(&self) -> Option<String> {
        self.inner.lock_state().flushed.clone()
    }

    /// The newest submitted token, whether or not it has been written.
    pub fn pending(&self) -> Option<String> {
        self.inner.lock_state().pending.clone()
    }

    /// Write the pending token now, if it is newer than the last one written.
    ///
    /// Returns true if a write happened.
    pub async fn flush(&self) -> Result<bool, TunnelError> {
        self.inner.flush_pending().await
    }

    /// Stop the background tasks and write any pending token.
    ///
    /// Only the first call does any work.
    pub async fn shutdown(&self) -> Result<(), TunnelError> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.inner.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.inner.lock_tasks());
        for t in tasks {
            t.await?;
        }
        let flushed = self.inner.flush_pending().await?;
        debug!(
            channel_id = %self.inner.key.channel_id,
            "checkpointer shut down, final flush={}", flushed
        );
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

impl CheckpointerRef {
    fn lock_state(&self) -> MutexGuard<'_, FlushState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn has_unflushed(&self) -> Option<u64> {
        let st = self.lock_state();
        if st.pending_gen > st.flushed_gen {
            return Some(st.pending_gen);
        }
        None
    }

    async fn flush_pending(&self) -> Result<bool, TunnelError> {
        let _w = self.write_lock.lock().await;
        let (token, generation, seq) = {
            let st = self.lock_state();
            if st.pending_gen <= st.flushed_gen {
                return Ok(false);
            }
            match &st.pending {
                Some(t) => (t.clone(), st.pending_gen, st.sequence_number),
                None => return Ok(false),
            }
        };
        self.api
            .checkpoint(CheckpointRequest {
                key: self.key.clone(),
                token: token.clone(),
                sequence_number: seq + 1,
            })
            .await?;
        trace!(
            channel_id = %self.key.channel_id,
            "checkpointed token={} seq={}", token, seq + 1
        );
        let mut st = self.lock_state();
        if generation > st.flushed_gen {
            st.flushed = Some(token);
            st.flushed_gen = generation;
            st.sequence_number = seq + 1;
        }
        Ok(true)
    }
}

async fn ticker_loop(
    inner: Arc<CheckpointerRef>,
    interval: Duration,
    dispatch: mpsc::Sender<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        let stop = tokio::select! {
            r = shutdown.wait_for(|s| *s) => {
                drop(r);
                true
            }
            _ = ticker.tick() => false,
        };
        if stop {
            break;
        }
        if let Some(generation) = inner.has_unflushed() {
            let stop = tokio::select! {
                r = shutdown.wait_for(|s| *s) => {
                    drop(r);
                    true
                }
                res = dispatch.send(generation) => res.is_err(),
            };
            if stop {
                break;
            }
        }
    }
}

async fn write_loop(inner: Arc<CheckpointerRef>, mut dispatch: mpsc::Receiver<u64>) {
    while let Some(generation) = dispatch.recv().await {
        match inner.flush_pending().await {
            Ok(_) => {}
            Err(e) => {
                // the token stays pending and is retried on the next tick
                warn!(
                    channel_id = %inner.key.channel_id,
                    "checkpoint write (generation {}) failed: {}", generation, e
                );
            }
        }
    }
}
