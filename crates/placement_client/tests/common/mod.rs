//! Shared helpers for integration tests: an in-memory placement driver with
//! scripted responses, gating, and call recording.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use placement_client::{
    ClientConfig, Connector, DriverConn, GetRegionResponse, GetStoreResponse, Peer, Region,
    RegionEpoch, RequestHeader, Store, StoreState, TsoResponse,
};

/// Client tuning used by most tests: real protocol defaults are far too slow
/// for a test suite.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        rpc_timeout: Duration::from_secs(5),
        bootstrap_max_passes: 3,
        bootstrap_retry_interval: Duration::from_millis(10),
        leader_recheck_interval: Duration::from_secs(60),
        max_pending_timestamps: 64,
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

struct DriverState {
    /// Per-endpoint cluster-id answers; endpoints absent here fail bootstrap
    /// probes.
    cluster_ids: HashMap<String, u64>,
    leader: String,
    /// Scripted timestamp responses, consumed in order. When empty, responses
    /// are synthesized with a fresh physical tick per call.
    tso_script: VecDeque<Result<TsoResponse, String>>,
    next_physical: i64,
    stores: HashMap<u64, Store>,
    region: Option<(Region, Peer)>,
    fail_lookups: usize,
    fail_leader_queries: usize,
    tso_calls: Vec<(String, u32)>,
    lookups: Vec<String>,
}

/// Scripted in-memory placement driver.
pub struct FakeDriver {
    inner: Mutex<DriverState>,
    tso_gate: Semaphore,
    gated: AtomicBool,
    leader_queries: AtomicUsize,
}

impl FakeDriver {
    /// A driver where every endpoint answers with the same cluster id.
    pub fn new(endpoints: &[&str], leader: &str, cluster_id: u64) -> Arc<Self> {
        let ids = endpoints
            .iter()
            .map(|endpoint| (*endpoint, cluster_id))
            .collect::<Vec<_>>();
        Self::with_cluster_ids(&ids, leader)
    }

    /// A driver where only the listed endpoints answer cluster-id probes.
    pub fn with_cluster_ids(ids: &[(&str, u64)], leader: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(DriverState {
                cluster_ids: ids
                    .iter()
                    .map(|(endpoint, id)| (endpoint.to_string(), *id))
                    .collect(),
                leader: leader.to_string(),
                tso_script: VecDeque::new(),
                next_physical: 100,
                stores: HashMap::new(),
                region: None,
                fail_lookups: 0,
                fail_leader_queries: 0,
                tso_calls: Vec::new(),
                lookups: Vec::new(),
            }),
            tso_gate: Semaphore::new(0),
            gated: AtomicBool::new(false),
            leader_queries: AtomicUsize::new(0),
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            driver: self.clone(),
        })
    }

    pub fn set_leader(&self, leader: &str) {
        self.inner.lock().unwrap().leader = leader.to_string();
    }

    /// Make every timestamp rpc wait for one [`FakeDriver::release_tso`]
    /// permit before answering.
    pub fn gate_tso(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release_tso(&self, permits: usize) {
        self.tso_gate.add_permits(permits);
    }

    /// Stop gating and unblock anything still waiting.
    pub fn ungate_tso(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.tso_gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn script_tso(&self, response: Result<TsoResponse, &str>) {
        self.inner
            .lock()
            .unwrap()
            .tso_script
            .push_back(response.map_err(str::to_string));
    }

    pub fn set_store(&self, store: Store) {
        self.inner.lock().unwrap().stores.insert(store.id, store);
    }

    pub fn set_region(&self, region: Region, leader: Peer) {
        self.inner.lock().unwrap().region = Some((region, leader));
    }

    /// Fail the next `n` region/store lookups.
    pub fn fail_lookups(&self, n: usize) {
        self.inner.lock().unwrap().fail_lookups = n;
    }

    /// Fail the next `n` leader queries across all endpoints.
    pub fn fail_leader_queries(&self, n: usize) {
        self.inner.lock().unwrap().fail_leader_queries = n;
    }

    /// Every timestamp rpc observed so far: `(endpoint, count)`.
    pub fn tso_calls(&self) -> Vec<(String, u32)> {
        self.inner.lock().unwrap().tso_calls.clone()
    }

    /// The endpoint that served each lookup rpc, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.inner.lock().unwrap().lookups.clone()
    }

    pub fn leader_queries(&self) -> usize {
        self.leader_queries.load(Ordering::SeqCst)
    }
}

struct FakeConnector {
    driver: Arc<FakeDriver>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str, _timeout: Duration) -> anyhow::Result<Arc<dyn DriverConn>> {
        Ok(Arc::new(FakeConn {
            driver: self.driver.clone(),
            endpoint: url.to_string(),
        }))
    }
}

struct FakeConn {
    driver: Arc<FakeDriver>,
    endpoint: String,
}

#[async_trait]
impl DriverConn for FakeConn {
    async fn get_cluster_id(&self) -> anyhow::Result<u64> {
        let state = self.driver.inner.lock().unwrap();
        state
            .cluster_ids
            .get(&self.endpoint)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("{} has no cluster id", self.endpoint))
    }

    async fn get_leader(&self, _header: RequestHeader) -> anyhow::Result<String> {
        self.driver.leader_queries.fetch_add(1, Ordering::SeqCst);
        let mut state = self.driver.inner.lock().unwrap();
        if state.fail_leader_queries > 0 {
            state.fail_leader_queries -= 1;
            anyhow::bail!("injected leader query failure");
        }
        Ok(state.leader.clone())
    }

    async fn alloc_timestamps(
        &self,
        _header: RequestHeader,
        count: u32,
    ) -> anyhow::Result<TsoResponse> {
        // Record before gating so tests can wait for "rpc started".
        self.driver
            .inner
            .lock()
            .unwrap()
            .tso_calls
            .push((self.endpoint.clone(), count));

        if self.driver.gated.load(Ordering::SeqCst) {
            let permit = self.driver.tso_gate.acquire().await.expect("gate closed");
            permit.forget();
        }

        let mut state = self.driver.inner.lock().unwrap();
        match state.tso_script.pop_front() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => {
                let physical = state.next_physical;
                state.next_physical += 1;
                Ok(TsoResponse {
                    count,
                    physical,
                    logical: i64::from(count) - 1,
                })
            }
        }
    }

    async fn get_region_by_key(
        &self,
        _header: RequestHeader,
        _key: &[u8],
    ) -> anyhow::Result<GetRegionResponse> {
        let mut state = self.driver.inner.lock().unwrap();
        state.lookups.push(self.endpoint.clone());
        if state.fail_lookups > 0 {
            state.fail_lookups -= 1;
            anyhow::bail!("injected lookup failure");
        }
        let (region, leader) = match &state.region {
            Some((region, leader)) => (Some(region.clone()), Some(leader.clone())),
            None => (None, None),
        };
        Ok(GetRegionResponse { region, leader })
    }

    async fn get_store_by_id(
        &self,
        _header: RequestHeader,
        store_id: u64,
    ) -> anyhow::Result<GetStoreResponse> {
        let mut state = self.driver.inner.lock().unwrap();
        state.lookups.push(self.endpoint.clone());
        if state.fail_lookups > 0 {
            state.fail_lookups -= 1;
            anyhow::bail!("injected lookup failure");
        }
        Ok(GetStoreResponse {
            store: state.stores.get(&store_id).cloned(),
        })
    }
}

/// A region spanning `[start, end)` with a single peer on `store_id`.
pub fn sample_region(id: u64, start: &[u8], end: &[u8], store_id: u64) -> (Region, Peer) {
    let peer = Peer {
        id: id * 10,
        store_id,
    };
    let region = Region {
        id,
        start_key: start.to_vec(),
        end_key: end.to_vec(),
        epoch: RegionEpoch {
            conf_ver: 1,
            version: 1,
        },
        peers: vec![peer.clone()],
    };
    (region, peer)
}

pub fn sample_store(id: u64, state: StoreState) -> Store {
    Store {
        id,
        address: format!("store-{id}:20160"),
        state,
    }
}
