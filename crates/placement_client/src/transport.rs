//! Remote-call surface of the placement driver.
//!
//! The wire protocol lives behind the [`Connector`] and [`DriverConn`] traits
//! so the client core can be exercised against in-memory fakes; a deployment
//! plugs in whatever transport it uses to reach the driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::{Peer, Region, Store};

/// Header attached to every call after bootstrap so the server can reject
/// clients that are talking to the wrong cluster.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestHeader {
    pub cluster_id: u64,
}

/// Response to a batched timestamp allocation.
#[derive(Clone, Copy, Debug)]
pub struct TsoResponse {
    /// Number of timestamps the server actually reserved.
    pub count: u32,
    /// Physical component shared by the whole batch.
    pub physical: i64,
    /// Highest logical value of the reserved range.
    pub logical: i64,
}

/// Response to a region lookup. `region: None` means the driver knows no
/// region for the key yet.
#[derive(Clone, Debug, Default)]
pub struct GetRegionResponse {
    pub region: Option<Region>,
    pub leader: Option<Peer>,
}

/// Response to a store lookup. A well-formed reply always carries the store;
/// `None` here is a protocol violation the caller surfaces as an error.
#[derive(Clone, Debug, Default)]
pub struct GetStoreResponse {
    pub store: Option<Store>,
}

/// One established connection to a single placement-driver endpoint.
#[async_trait]
pub trait DriverConn: Send + Sync + 'static {
    /// Ask this endpoint for the cluster id. Used only during bootstrap,
    /// before any header can be stamped.
    async fn get_cluster_id(&self) -> anyhow::Result<u64>;

    /// Ask this endpoint which address currently leads the cluster.
    async fn get_leader(&self, header: RequestHeader) -> anyhow::Result<String>;

    /// Reserve `count` timestamps under one physical tick, returning the
    /// highest logical value of the reserved range.
    async fn alloc_timestamps(
        &self,
        header: RequestHeader,
        count: u32,
    ) -> anyhow::Result<TsoResponse>;

    /// Look up the region covering `key` and its current leader peer.
    async fn get_region_by_key(
        &self,
        header: RequestHeader,
        key: &[u8],
    ) -> anyhow::Result<GetRegionResponse>;

    /// Look up a store by id.
    async fn get_store_by_id(
        &self,
        header: RequestHeader,
        store_id: u64,
    ) -> anyhow::Result<GetStoreResponse>;
}

/// Dials placement-driver endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connection to `url`, giving up after `timeout`.
    async fn connect(&self, url: &str, timeout: Duration) -> anyhow::Result<Arc<dyn DriverConn>>;
}
