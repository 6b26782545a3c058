//! Client for a placement-driver control plane.
//!
//! The driver tracks cluster metadata for a distributed database and hands
//! out globally ordered timestamps. This client:
//! - discovers the cluster id at startup and stamps it on every later call
//! - follows the current driver leader across failovers
//! - merges concurrent timestamp requests into batched allocation rpcs
//!
//! The wire transport is pluggable through [`Connector`] and [`DriverConn`];
//! everything above that boundary (batching, leader tracking, shutdown) lives
//! here.

mod cluster;
mod error;
mod leader;
mod transport;
mod tso;

pub use cluster::{Peer, Region, RegionEpoch, Store, StoreState, Timestamp};
pub use error::{Error, Result};
pub use transport::{
    Connector, DriverConn, GetRegionResponse, GetStoreResponse, RequestHeader, TsoResponse,
};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use leader::LeaderTracker;
use tso::TsRequest;

/// Tuning knobs for the client.
#[derive(Clone, Copy, Debug)]
pub struct ClientConfig {
    /// Budget for each rpc against the driver, dials included.
    pub rpc_timeout: Duration,
    /// Full passes over the endpoint list before cluster-id discovery gives
    /// up and construction fails.
    pub bootstrap_max_passes: usize,
    /// Pause between bootstrap passes.
    pub bootstrap_retry_interval: Duration,
    /// Leader re-resolution period when nothing forces an earlier recheck.
    pub leader_recheck_interval: Duration,
    /// Bound on queued timestamp requests; enqueueing past it blocks callers
    /// until the consumer catches up.
    pub max_pending_timestamps: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(3),
            bootstrap_max_passes: 100,
            bootstrap_retry_interval: Duration::from_secs(1),
            leader_recheck_interval: Duration::from_secs(60),
            max_pending_timestamps: 10_000,
        }
    }
}

/// Handles to the background loops, surrendered on close.
struct Background {
    leader_stop: oneshot::Sender<()>,
    ts_stop: oneshot::Sender<()>,
    leader_task: JoinHandle<()>,
    ts_task: JoinHandle<mpsc::Receiver<TsRequest>>,
}

/// A placement-driver client. Cheap to share behind an `Arc`; all operations
/// take `&self`. Must not be used after [`Client::close`].
pub struct Client {
    cluster_id: u64,
    config: ClientConfig,
    tracker: Arc<LeaderTracker>,
    ts_tx: mpsc::Sender<TsRequest>,
    background: Mutex<Option<Background>>,
}

impl Client {
    /// Create a client with default tuning. Resolves the cluster id and the
    /// initial leader synchronously; fails if either cannot complete within
    /// its retry budget.
    pub async fn new(connector: Arc<dyn Connector>, endpoints: &[String]) -> Result<Self> {
        Self::with_config(connector, endpoints, ClientConfig::default()).await
    }

    pub async fn with_config(
        connector: Arc<dyn Connector>,
        endpoints: &[String],
        config: ClientConfig,
    ) -> Result<Self> {
        let urls = endpoints_to_urls(endpoints);
        tracing::info!(endpoints = ?urls, "creating placement driver client");

        let cluster_id = leader::discover_cluster_id(&connector, &urls, &config).await?;
        let tracker = Arc::new(LeaderTracker::new(
            urls,
            connector,
            cluster_id,
            config.rpc_timeout,
        ));
        tracker.resolve_leader().await?;
        tracing::info!(cluster_id, "placement driver client initialized");

        let (ts_tx, ts_rx) = mpsc::channel(config.max_pending_timestamps);
        let (leader_stop, leader_stop_rx) = oneshot::channel();
        let (ts_stop, ts_stop_rx) = oneshot::channel();
        let leader_task = tokio::spawn(leader::leader_loop(
            tracker.clone(),
            config.leader_recheck_interval,
            leader_stop_rx,
        ));
        let ts_task = tokio::spawn(tso::ts_loop(
            ts_rx,
            tracker.clone(),
            RequestHeader { cluster_id },
            config.rpc_timeout,
            ts_stop_rx,
        ));

        Ok(Self {
            cluster_id,
            config,
            tracker,
            ts_tx,
            background: Mutex::new(Some(Background {
                leader_stop,
                ts_stop,
                leader_task,
                ts_task,
            })),
        })
    }

    /// Cluster id resolved at construction. Never changes and costs no
    /// remote call.
    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    /// Address currently believed to lead the cluster.
    pub fn leader_url(&self) -> String {
        self.tracker.leader_url()
    }

    /// Fetch one timestamp, waiting at most `deadline`.
    ///
    /// Callers queued at the same time share a single allocation round trip;
    /// results preserve enqueue order within each batch.
    pub async fn get_ts(&self, deadline: Duration) -> Result<Timestamp> {
        match tokio::time::timeout(deadline, self.get_ts_inner()).await {
            Ok(res) => res,
            // Giving up leaves the queued slot in place; a later batch will
            // assign it a timestamp nobody reads. Wasteful but deadlock-free.
            Err(_) => Err(Error::DeadlineExceeded),
        }
    }

    async fn get_ts_inner(&self) -> Result<Timestamp> {
        let (done, slot) = oneshot::channel();
        self.ts_tx
            .send(TsRequest { done })
            .await
            .map_err(|_| Error::Closing)?;
        match slot.await {
            Ok(res) => res,
            Err(_) => Err(Error::Closing),
        }
    }

    /// Look up the region covering `key` and its current leader peer.
    ///
    /// `Ok((None, _))` means the driver knows no region for the key yet;
    /// callers should retry later rather than treat it as failure.
    pub async fn get_region(
        &self,
        key: &[u8],
        deadline: Duration,
    ) -> Result<(Option<Region>, Option<Peer>)> {
        let resp = self
            .lookup("get_region", deadline, |conn, header| async move {
                conn.get_region_by_key(header, key).await
            })
            .await?;
        Ok((resp.region, resp.leader))
    }

    /// Look up a store by id.
    ///
    /// `Ok(None)` means the store exists only as a tombstone and should be
    /// treated as absent.
    pub async fn get_store(&self, store_id: u64, deadline: Duration) -> Result<Option<Store>> {
        let resp = self
            .lookup("get_store", deadline, |conn, header| async move {
                conn.get_store_by_id(header, store_id).await
            })
            .await?;
        let store = resp.store.ok_or(Error::MalformedResponse {
            op: "get_store",
            field: "store",
        })?;
        if store.state == StoreState::Tombstone {
            return Ok(None);
        }
        Ok(Some(store))
    }

    /// One lookup rpc against the current leader, bounded by the smaller of
    /// the caller's deadline and the per-rpc budget. Any failure schedules a
    /// leader recheck before surfacing.
    async fn lookup<T, F, Fut>(&self, op: &'static str, deadline: Duration, call: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn DriverConn>, RequestHeader) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let Some(conn) = self.tracker.leader_conn() else {
            self.tracker.schedule_recheck();
            return Err(Error::LeaderUnavailable);
        };
        let header = RequestHeader {
            cluster_id: self.cluster_id,
        };
        let budget = deadline.min(self.config.rpc_timeout);
        match tokio::time::timeout(budget, call(conn, header)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(err)) => {
                self.tracker.schedule_recheck();
                Err(Error::Rpc {
                    op,
                    message: err.to_string(),
                })
            }
            Err(_) => {
                self.tracker.schedule_recheck();
                Err(Error::DeadlineExceeded)
            }
        }
    }

    /// Shut down: stop both background loops, wait for them to finish, then
    /// fail every timestamp request still queued. Later calls fail with
    /// [`Error::Closing`]. Safe to call more than once.
    pub async fn close(&self) {
        let Some(background) = self.background.lock().await.take() else {
            return;
        };
        let _ = background.leader_stop.send(());
        let _ = background.ts_stop.send(());

        if let Err(err) = background.leader_task.await {
            tracing::warn!(error = ?err, "leader loop exited abnormally");
        }
        match background.ts_task.await {
            Ok(mut rx) => {
                // Close first so producers racing the drain fail fast
                // instead of parking in the queue forever.
                rx.close();
                let failed = tso::drain(&mut rx);
                if failed > 0 {
                    tracing::info!(failed, "failed queued timestamp requests during shutdown");
                }
            }
            Err(err) => tracing::warn!(error = ?err, "timestamp loop exited abnormally"),
        }
        tracing::info!("placement driver client closed");
    }
}

/// Prefix the default scheme onto bare `host:port` endpoints.
fn endpoints_to_urls(endpoints: &[String]) -> Vec<String> {
    endpoints
        .iter()
        .map(|endpoint| {
            if endpoint.contains("://") {
                endpoint.clone()
            } else {
                format!("http://{endpoint}")
            }
        })
        .collect()
}
