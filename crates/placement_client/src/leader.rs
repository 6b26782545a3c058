//! Cluster-id bootstrap and leader discovery.
//!
//! The tracker owns the route table: every connection established so far plus
//! the address currently believed to lead the cluster. Only the resolution
//! path mutates it; everything else takes read access.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};

use crate::error::{Error, Result};
use crate::transport::{Connector, DriverConn, RequestHeader};
use crate::ClientConfig;

/// Leader address plus every connection established so far.
///
/// Connections are created once per distinct address and kept for the
/// client's lifetime; a leader change only repoints `leader`, it never tears
/// down the previous connection.
struct RouteTable {
    conns: HashMap<String, Arc<dyn DriverConn>>,
    leader: String,
}

/// Probe the configured endpoints until one reports the cluster id.
///
/// Each pass tries every endpoint in order with a short-lived connection; a
/// full pass without an answer sleeps briefly before the next. Gives up after
/// the configured number of passes.
pub(crate) async fn discover_cluster_id(
    connector: &Arc<dyn Connector>,
    urls: &[String],
    config: &ClientConfig,
) -> Result<u64> {
    for _ in 0..config.bootstrap_max_passes {
        for url in urls {
            let conn = match connector.connect(url, config.rpc_timeout).await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(endpoint = %url, error = ?err, "failed to reach endpoint for cluster id");
                    continue;
                }
            };
            match conn.get_cluster_id().await {
                Ok(id) => return Ok(id),
                Err(err) => {
                    tracing::warn!(endpoint = %url, error = ?err, "failed to load cluster id");
                }
            }
        }
        tokio::time::sleep(config.bootstrap_retry_interval).await;
    }
    Err(Error::ClusterBootstrap)
}

pub(crate) struct LeaderTracker {
    urls: Vec<String>,
    connector: Arc<dyn Connector>,
    cluster_id: u64,
    routes: RwLock<RouteTable>,
    recheck: Notify,
    connect_timeout: Duration,
}

impl LeaderTracker {
    pub(crate) fn new(
        urls: Vec<String>,
        connector: Arc<dyn Connector>,
        cluster_id: u64,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            urls,
            connector,
            cluster_id,
            routes: RwLock::new(RouteTable {
                conns: HashMap::new(),
                leader: String::new(),
            }),
            recheck: Notify::new(),
            connect_timeout,
        }
    }

    /// Connection to the current leader, if one has been resolved.
    pub(crate) fn leader_conn(&self) -> Option<Arc<dyn DriverConn>> {
        let routes = self.routes.read().unwrap();
        routes.conns.get(&routes.leader).cloned()
    }

    /// Address currently believed to lead the cluster. Empty before the first
    /// successful resolution.
    pub(crate) fn leader_url(&self) -> String {
        self.routes.read().unwrap().leader.clone()
    }

    /// Ask the background loop to re-resolve the leader soon. Repeated calls
    /// while a recheck is already pending collapse into one wakeup.
    pub(crate) fn schedule_recheck(&self) {
        self.recheck.notify_one();
    }

    /// Probe the known endpoints for the currently reported leader and
    /// repoint the route table if it moved. Any answering endpoint will do;
    /// the first one wins.
    pub(crate) async fn resolve_leader(&self) -> Result<()> {
        let header = RequestHeader {
            cluster_id: self.cluster_id,
        };
        for url in &self.urls {
            let conn = match self.connector.connect(url, self.connect_timeout).await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::debug!(endpoint = %url, error = ?err, "endpoint unreachable during leader resolution");
                    continue;
                }
            };
            let leader = match conn.get_leader(header).await {
                Ok(leader) => leader,
                Err(err) => {
                    tracing::debug!(endpoint = %url, error = ?err, "endpoint failed to report a leader");
                    continue;
                }
            };
            let changed = self.routes.read().unwrap().leader != leader;
            if changed {
                self.switch_leader(&leader).await?;
            }
            return Ok(());
        }
        Err(Error::LeaderUnavailable)
    }

    /// Point the route table at `url`, dialing it first if this is the first
    /// time the address has been seen.
    ///
    /// The dial happens outside the lock; only the resolution path calls
    /// this, so it cannot race another writer.
    async fn switch_leader(&self, url: &str) -> Result<()> {
        let known = self.routes.read().unwrap().conns.contains_key(url);
        let dialed = if known {
            None
        } else {
            let conn = self
                .connector
                .connect(url, self.connect_timeout)
                .await
                .map_err(|err| Error::Connect {
                    url: url.to_string(),
                    message: err.to_string(),
                })?;
            Some(conn)
        };

        let mut routes = self.routes.write().unwrap();
        tracing::info!(leader = %url, previous = %routes.leader, "cluster leader switched");
        if let Some(conn) = dialed {
            routes.conns.insert(url.to_string(), conn);
        }
        routes.leader = url.to_string();
        Ok(())
    }
}

/// Background leader-resolution loop.
///
/// Wakes on whichever comes first: an explicit recheck request, the periodic
/// timer, or shutdown. Resolution failures are logged and retried on the next
/// wake; they never end the loop.
pub(crate) async fn leader_loop(
    tracker: Arc<LeaderTracker>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            _ = tracker.recheck.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(err) = tracker.resolve_leader().await {
            tracing::warn!(error = ?err, "leader resolution failed");
        }
    }
}
