//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use async_trait::async_trait;
use std::error::Error;
use std::result::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::api::*;
use crate::checkpointer::Checkpointer;
use crate::error::{TunnelError, TunnelErrorCode};
use crate::token::FINISH_TAG;

#[derive(Debug, Default)]
struct CheckpointLog {
    writes: Mutex<Vec<(String, i64)>>,
    // number of upcoming writes to fail
    failures: AtomicUsize,
}

impl CheckpointLog {
    fn writes(&self) -> Vec<(String, i64)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelApi for CheckpointLog {
    async fn read_records(&self, _req: ReadRecordsRequest) -> Result<ReadRecordsResponse, TunnelError> {
        Ok(ReadRecordsResponse::default())
    }

    async fn checkpoint(&self, req: CheckpointRequest) -> Result<(), TunnelError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TunnelError::new(TunnelErrorCode::ServerBusy, "try later"));
        }
        self.writes
            .lock()
            .unwrap()
            .push((req.token, req.sequence_number));
        Ok(())
    }

    async fn get_checkpoint(&self, _req: GetCheckpointRequest) -> Result<GetCheckpointResponse, TunnelError> {
        Ok(GetCheckpointResponse::default())
    }
}

fn start(log: &Arc<CheckpointLog>) -> Checkpointer {
    Checkpointer::start(
        log.clone(),
        ChannelKey::new("t", "c", "ch"),
        Duration::from_secs(1),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_tick_flushes_newest_token() -> Result<(), Box<dyn Error>> {
    let log = Arc::new(CheckpointLog::default());
    let cp = start(&log);
    cp.submit("t1");
    cp.submit("t2");
    cp.submit("t3");
    assert!(log.writes().is_empty());

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(log.writes(), vec![("t3".to_string(), 1)]);

    cp.submit("t4");
    sleep(Duration::from_secs(1)).await;
    assert_eq!(log.writes().len(), 2);
    assert_eq!(cp.last_flushed().as_deref(), Some("t4"));

    // nothing new, nothing written
    sleep(Duration::from_secs(3)).await;
    assert_eq!(log.writes().len(), 2);
    cp.shutdown().await?;
    assert_eq!(log.writes().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_once() -> Result<(), Box<dyn Error>> {
    let log = Arc::new(CheckpointLog::default());
    let cp = start(&log);
    cp.set_sequence_number(41);
    cp.submit("t1");
    cp.shutdown().await?;
    assert_eq!(log.writes(), vec![("t1".to_string(), 42)]);
    assert!(cp.is_shut_down());

    cp.submit("t2");
    cp.shutdown().await?;
    assert_eq!(log.writes().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_is_retried() -> Result<(), Box<dyn Error>> {
    let log = Arc::new(CheckpointLog::default());
    log.failures.store(1, Ordering::SeqCst);
    let cp = start(&log);
    cp.set_sequence_number(10);
    cp.submit("t1");

    sleep(Duration::from_millis(1500)).await;
    assert!(log.writes().is_empty());
    assert_eq!(cp.sequence_number(), 10);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(log.writes(), vec![("t1".to_string(), 11)]);
    assert_eq!(cp.sequence_number(), 11);
    cp.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_finish_token_is_absorbing() -> Result<(), Box<dyn Error>> {
    let log = Arc::new(CheckpointLog::default());
    let cp = start(&log);
    cp.submit("t1");
    cp.submit(FINISH_TAG);
    cp.submit("t2");
    assert_eq!(cp.pending().as_deref(), Some(FINISH_TAG));
    cp.shutdown().await?;
    assert_eq!(log.writes(), vec![(FINISH_TAG.to_string(), 1)]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_explicit_flush() -> Result<(), Box<dyn Error>> {
    let log = Arc::new(CheckpointLog::default());
    let cp = start(&log);
    assert!(!cp.flush().await?);
    cp.submit("t1");
    assert!(cp.flush().await?);
    assert!(!cp.flush().await?);
    cp.shutdown().await?;
    assert_eq!(log.writes(), vec![("t1".to_string(), 1)]);
    Ok(())
}

#[tokio::test]
async fn test_zero_interval_rejected() {
    let log = Arc::new(CheckpointLog::default());
    let err = Checkpointer::start(log, ChannelKey::new("t", "c", "ch"), Duration::ZERO)
        .unwrap_err();
    assert_eq!(err.code, TunnelErrorCode::IllegalArgument);
}
