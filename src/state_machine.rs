//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::ChannelKey;
use crate::channel::{ChannelActor, ChannelDialer};
use crate::error::user_agent;
use crate::registry::{ChannelRegistry, StatusReporter};
use crate::types::{Channel, ChannelStatus};

/// Tracks every channel assigned to one tunnel client.
///
/// Each heartbeat response from the server is passed to
/// [`batch_update_status()`](TunnelStateMachine::batch_update_status), which
/// creates actors for new channels, forwards directives to existing ones,
/// and closes actors whose channels are no longer assigned to this client.
/// The statuses to send with the next heartbeat come from
/// [`batch_get_status()`](TunnelStateMachine::batch_get_status).
///
/// Note: cloning this struct returns a handle to the same state machine.
#[derive(Clone, Debug)]
pub struct TunnelStateMachine {
    inner: Arc<TunnelStateMachineRef>,
}

#[derive(Debug)]
struct TunnelStateMachineRef {
    tunnel_id: String,
    client_id: String,
    registry: Arc<ChannelRegistry>,
    dialer: Arc<dyn ChannelDialer>,
    // held across actor notifications, which await
    actors: tokio::sync::Mutex<HashMap<String, ChannelActor>>,
    closed: AtomicBool,
}

impl TunnelStateMachine {
    pub fn new(tunnel_id: &str, client_id: &str, dialer: Arc<dyn ChannelDialer>) -> Self {
        debug!(
            tunnel_id = %tunnel_id,
            client_id = %client_id,
            "creating tunnel state machine, {}", user_agent()
        );
        TunnelStateMachine {
            inner: Arc::new(TunnelStateMachineRef {
                tunnel_id: tunnel_id.to_string(),
                client_id: client_id.to_string(),
                registry: Arc::new(ChannelRegistry::new()),
                dialer,
                actors: tokio::sync::Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn tunnel_id(&self) -> &str {
        &self.inner.tunnel_id
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.inner.registry
    }

    /// Apply the full set of directives from one heartbeat.
    pub async fn batch_update_status(&self, channels: Vec<Channel>) {
        if self.inner.closed.load(Ordering::SeqCst) {
            debug!(tunnel_id = %self.inner.tunnel_id, "state machine closed, ignoring directives");
            return;
        }
        self.inner.registry.apply_directives(&channels);

        let mut actors = self.inner.actors.lock().await;
        // a closed actor is replaced if the server assigns its channel again
        actors.retain(|_, a| !a.closed());
        let stale: Vec<String> = actors
            .keys()
            .filter(|id| !channels.iter().any(|c| &c.channel_id == *id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(actor) = actors.remove(&id) {
                info!(
                    tunnel_id = %self.inner.tunnel_id,
                    channel_id = %id,
                    "channel no longer assigned, closing"
                );
                actor.close().await;
            }
        }

        for ch in channels {
            let actor = match actors.get(&ch.channel_id) {
                Some(a) => a.clone(),
                // nothing to stop for a channel this client never ran
                None if matches!(ch.status, ChannelStatus::Close | ChannelStatus::Terminated) => {
                    continue
                }
                None => {
                    let key = ChannelKey::new(
                        &self.inner.tunnel_id,
                        &self.inner.client_id,
                        &ch.channel_id,
                    );
                    let reporter: Arc<dyn StatusReporter> = self.inner.registry.clone();
                    match self.inner.dialer.dial(key, reporter) {
                        Ok(a) => {
                            actors.insert(ch.channel_id.clone(), a.clone());
                            a
                        }
                        Err(e) => {
                            warn!(
                                tunnel_id = %self.inner.tunnel_id,
                                channel_id = %ch.channel_id,
                                "cannot start channel: {}", e
                            );
                            continue;
                        }
                    }
                }
            };
            actor.notify_status(ch).await;
        }

        actors.retain(|_, a| !a.closed());
    }

    /// Apply a single status change. Succeeds only if it is newer than what
    /// the registry holds for that channel.
    pub fn update_status(&self, channel: Channel) -> bool {
        let expected = match self.inner.registry.get(&channel.channel_id) {
            Some(cur) => cur.version,
            None => return false,
        };
        self.inner.registry.compare_and_set(expected, channel)
    }

    /// Current status of every channel, to be sent with the next heartbeat.
    pub fn batch_get_status(&self) -> Vec<Channel> {
        self.inner.registry.snapshot()
    }

    pub fn get(&self, channel_id: &str) -> Option<Channel> {
        self.inner.registry.get(channel_id)
    }

    /// The live actor for a channel, if any.
    pub async fn actor(&self, channel_id: &str) -> Option<ChannelActor> {
        self.inner.actors.lock().await.get(channel_id).cloned()
    }

    pub async fn active_channels(&self) -> usize {
        self.inner.actors.lock().await.len()
    }

    /// Close every actor. Later directives are ignored.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut actors = self.inner.actors.lock().await;
        for (_, actor) in actors.drain() {
            actor.close().await;
        }
        info!(tunnel_id = %self.inner.tunnel_id, "tunnel state machine closed");
    }
}
