//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
mod common;

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use tablestore_tunnel_sdk::token::FINISH_TAG;
use tablestore_tunnel_sdk::types::{Channel, ChannelStatus};
use tablestore_tunnel_sdk::{
    DefaultChannelDialer, SimpleProcessorFactory, TunnelError, TunnelErrorCode,
    TunnelStateMachine, TunnelWorkerConfig,
};

struct Counters {
    records: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

fn state_machine(api: &Arc<MockApi>) -> Result<(TunnelStateMachine, Counters), Box<dyn Error>> {
    let counters = Counters {
        records: Arc::new(AtomicUsize::new(0)),
        shutdowns: Arc::new(AtomicUsize::new(0)),
    };
    let records = counters.records.clone();
    let shutdowns = counters.shutdowns.clone();
    let factory = SimpleProcessorFactory::new(move |_ctx, batch| {
        records.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    })
    .on_shutdown(move |_ctx| {
        shutdowns.fetch_add(1, Ordering::SeqCst);
    });
    let config = TunnelWorkerConfig::new().checkpoint_interval(Duration::from_millis(50))?;
    let dialer = DefaultChannelDialer::new(api.clone(), Arc::new(factory), config)?;
    let sm = TunnelStateMachine::new("tunnel", "client", Arc::new(dialer));
    Ok((sm, counters))
}

fn open(id: &str, v: i64) -> Channel {
    Channel::new(id, v, ChannelStatus::Open)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heartbeat_dials_and_terminates() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let api = Arc::new(MockApi::new(&base_token(0)));
    api.push_read(page(0..3, &base_token(1)))
        .push_read(page(3..5, ""));
    let (sm, counters) = state_machine(&api)?;

    sm.batch_update_status(vec![open("ch-0", 1)]).await;
    assert_eq!(sm.active_channels().await, 1);
    wait_until("terminated", || {
        sm.get("ch-0") == Some(Channel::new("ch-0", 2, ChannelStatus::Terminated))
    })
    .await;

    assert_eq!(
        sm.batch_get_status(),
        vec![Channel::new("ch-0", 2, ChannelStatus::Terminated)]
    );
    assert_eq!(counters.records.load(Ordering::SeqCst), 5);
    assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(api.last_checkpoint().as_deref(), Some(FINISH_TAG));

    // the server acknowledges; the finished actor is dropped and not re-dialed
    sm.batch_update_status(vec![Channel::new("ch-0", 2, ChannelStatus::Terminated)])
        .await;
    assert_eq!(sm.active_channels().await, 0);
    assert_eq!(api.get_checkpoint_calls.load(Ordering::SeqCst), 1);
    sm.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn vanished_channel_is_closed() -> Result<(), Box<dyn Error>> {
    let api = Arc::new(MockApi::new(&base_token(0)));
    let (sm, counters) = state_machine(&api)?;

    sm.batch_update_status(vec![open("a", 1), open("b", 1)]).await;
    let b = sm.actor("b").await.ok_or("no actor for b")?;
    assert!(!b.closed());

    sm.batch_update_status(vec![open("a", 1)]).await;
    assert!(b.closed());
    assert_eq!(sm.active_channels().await, 1);
    assert_eq!(sm.batch_get_status(), vec![open("a", 1)]);
    assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);

    sm.close().await;
    assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_status_is_compare_and_set() -> Result<(), Box<dyn Error>> {
    let api = Arc::new(MockApi::new(&base_token(0)));
    let (sm, _counters) = state_machine(&api)?;
    sm.batch_update_status(vec![open("a", 1)]).await;

    assert!(sm.update_status(Channel::new("a", 2, ChannelStatus::Closing)));
    assert!(!sm.update_status(Channel::new("a", 2, ChannelStatus::Open)));
    assert!(!sm.update_status(Channel::new("a", 1, ChannelStatus::Close)));
    assert!(!sm.update_status(open("unknown", 5)));
    assert_eq!(
        sm.get("a"),
        Some(Channel::new("a", 2, ChannelStatus::Closing))
    );

    // an older heartbeat does not roll the registry back
    sm.batch_update_status(vec![open("a", 1)]).await;
    assert_eq!(sm.get("a").map(|c| c.version), Some(2));
    sm.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_channel_is_redialed() -> Result<(), Box<dyn Error>> {
    let api = Arc::new(MockApi::new(&base_token(0)));
    api.push_read(Err(TunnelError::new(
        TunnelErrorCode::ServiceUnavailable,
        "unavailable",
    )))
    .push_read(page(0..2, ""));
    let (sm, counters) = state_machine(&api)?;

    sm.batch_update_status(vec![open("a", 1)]).await;
    wait_until("closed", || {
        sm.get("a") == Some(Channel::new("a", 2, ChannelStatus::Close))
    })
    .await;

    // the server hands the channel out again
    sm.batch_update_status(vec![open("a", 3)]).await;
    wait_until("terminated", || {
        sm.get("a") == Some(Channel::new("a", 4, ChannelStatus::Terminated))
    })
    .await;
    assert_eq!(api.get_checkpoint_calls.load(Ordering::SeqCst), 2);
    assert_eq!(counters.records.load(Ordering::SeqCst), 2);
    assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 2);
    sm.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_stops_all_channels() -> Result<(), Box<dyn Error>> {
    let api = Arc::new(MockApi::new(&base_token(0)));
    let (sm, counters) = state_machine(&api)?;
    sm.batch_update_status(vec![open("a", 1), open("b", 1), open("c", 1)])
        .await;
    let a = sm.actor("a").await.ok_or("no actor for a")?;

    sm.close().await;
    sm.close().await;
    assert!(a.closed());
    assert_eq!(sm.active_channels().await, 0);
    assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 3);

    sm.batch_update_status(vec![open("d", 1)]).await;
    assert_eq!(sm.active_channels().await, 0);
    Ok(())
}
