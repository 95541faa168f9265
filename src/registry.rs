//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::types::Channel;

/// Receives the status changes a channel actor reports upstream.
pub trait StatusReporter: Send + Sync + Debug {
    /// Report a new channel state. Implementations must ignore reports
    /// whose version is not newer than the state they hold.
    fn update_status(&self, channel: Channel);
}

/// Versioned view of the channels owned by one client.
///
/// Server directives and actor reports both land here; the contents are what
/// the client sends back with its next heartbeat.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, channel_id: &str) -> Option<Channel> {
        self.lock().get(channel_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Replace the entry for `channel.channel_id` if it currently holds
    /// `expected_version` and the new version is larger.
    ///
    /// Returns true if the entry was replaced.
    pub fn compare_and_set(&self, expected_version: i64, channel: Channel) -> bool {
        let mut map = self.lock();
        match map.get_mut(&channel.channel_id) {
            Some(cur) if cur.version == expected_version && channel.version > cur.version => {
                trace!(
                    "channel {} v{} {:?} -> v{} {:?}",
                    channel.channel_id,
                    cur.version,
                    cur.status,
                    channel.version,
                    channel.status
                );
                *cur = channel;
                true
            }
            _ => false,
        }
    }

    /// Install the server's view of this client's channels.
    ///
    /// Entries are replaced unless the registry already holds a newer version
    /// for the channel. Channels absent from `channels` are removed.
    pub fn apply_directives(&self, channels: &[Channel]) {
        let mut map = self.lock();
        map.retain(|id, _| channels.iter().any(|c| &c.channel_id == id));
        for ch in channels {
            match map.get(&ch.channel_id) {
                Some(cur) if cur.version > ch.version => {
                    debug!(
                        "keeping channel {} v{}, directive has older v{}",
                        ch.channel_id, cur.version, ch.version
                    );
                }
                _ => {
                    map.insert(ch.channel_id.clone(), ch.clone());
                }
            }
        }
    }

    pub fn remove(&self, channel_id: &str) -> Option<Channel> {
        self.lock().remove(channel_id)
    }

    /// All channels, ordered by id.
    pub fn snapshot(&self) -> Vec<Channel> {
        let mut v: Vec<Channel> = self.lock().values().cloned().collect();
        v.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        v
    }
}

impl StatusReporter for ChannelRegistry {
    fn update_status(&self, channel: Channel) {
        let expected = channel.version - 1;
        let id = channel.channel_id.clone();
        let version = channel.version;
        if !self.compare_and_set(expected, channel) {
            debug!(
                "dropping status report for channel {} v{}: registry holds {:?}",
                id,
                version,
                self.get(&id).map(|c| c.version)
            );
        }
    }
}
