//! Batched timestamp allocation.
//!
//! Producers enqueue one request per `get_ts` call into a bounded queue; a
//! single consumer task merges everything pending at the moment it wakes into
//! one allocation rpc and fans the reserved range back out in enqueue order.
//! The queue bound is the only flow control: once it fills, enqueueing blocks
//! until the consumer drains, throttling callers to the server's pace.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::cluster::Timestamp;
use crate::error::{Error, Result};
use crate::leader::LeaderTracker;
use crate::transport::{RequestHeader, TsoResponse};

/// One caller waiting for a timestamp. Fulfilled exactly once, never reused.
pub(crate) struct TsRequest {
    pub(crate) done: oneshot::Sender<Result<Timestamp>>,
}

/// Consumer loop. Owns the receiving end of the queue and is the only entity
/// that issues allocation rpcs. Returns the receiver on shutdown so the
/// facade can drain whatever is still queued.
pub(crate) async fn ts_loop(
    mut rx: mpsc::Receiver<TsRequest>,
    tracker: Arc<LeaderTracker>,
    header: RequestHeader,
    rpc_timeout: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> mpsc::Receiver<TsRequest> {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return rx,
            maybe = rx.recv() => match maybe {
                Some(first) => process_batch(&mut rx, first, &tracker, header, rpc_timeout).await,
                None => return rx,
            },
        }
    }
}

/// Serve one batch: the oldest request plus everything queued behind it at
/// this instant. Requests arriving after the snapshot wait for the next
/// round trip.
async fn process_batch(
    rx: &mut mpsc::Receiver<TsRequest>,
    first: TsRequest,
    tracker: &LeaderTracker,
    header: RequestHeader,
    rpc_timeout: Duration,
) {
    let mut batch = vec![first];
    while let Ok(req) = rx.try_recv() {
        batch.push(req);
    }
    let count = batch.len() as u32;

    match allocate(tracker, header, count, rpc_timeout).await {
        Ok(resp) => fan_out(batch, resp.physical, resp.logical),
        Err(err) => {
            tracing::warn!(count, error = %err, "timestamp batch failed");
            tracker.schedule_recheck();
            for req in batch {
                let _ = req.done.send(Err(err.clone()));
            }
        }
    }
}

async fn allocate(
    tracker: &LeaderTracker,
    header: RequestHeader,
    count: u32,
    rpc_timeout: Duration,
) -> Result<TsoResponse> {
    let Some(conn) = tracker.leader_conn() else {
        return Err(Error::LeaderUnavailable);
    };
    let resp = tokio::time::timeout(rpc_timeout, conn.alloc_timestamps(header, count))
        .await
        .map_err(|_| Error::Rpc {
            op: "alloc_timestamps",
            message: "timed out".to_string(),
        })?
        .map_err(|err| Error::Rpc {
            op: "alloc_timestamps",
            message: err.to_string(),
        })?;
    if resp.count != count {
        return Err(Error::TimestampCount {
            requested: count,
            returned: resp.count,
        });
    }
    Ok(resp)
}

/// Hand the reserved range back out in enqueue order: the oldest request
/// takes the server-reported high logical value and each later request takes
/// the next one down.
fn fan_out(batch: Vec<TsRequest>, physical: i64, high_logical: i64) {
    let mut logical = high_logical;
    for req in batch {
        // A caller that gave up waiting dropped its receiver; its reserved
        // value goes unread.
        let _ = req.done.send(Ok(Timestamp { physical, logical }));
        logical -= 1;
    }
}

/// Fail every request still queued after the consumer has stopped. Returns
/// how many were failed.
pub(crate) fn drain(rx: &mut mpsc::Receiver<TsRequest>) -> usize {
    let mut failed = 0;
    while let Ok(req) = rx.try_recv() {
        let _ = req.done.send(Err(Error::Closing));
        failed += 1;
    }
    failed
}
