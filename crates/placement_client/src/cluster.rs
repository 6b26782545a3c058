//! Cluster metadata reported by the placement driver.

use serde::{Deserialize, Serialize};

/// A `(physical, logical)` hybrid timestamp.
///
/// Ordering is lexicographic: physical ticks dominate and the logical
/// component breaks ties within one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub physical: i64,
    pub logical: i64,
}

/// One replica of a region, pinned to a store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub store_id: u64,
}

/// Version pair tracking region membership and boundary changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEpoch {
    pub conf_ver: u64,
    pub version: u64,
}

/// A contiguous key range and the peers replicating it.
///
/// Key ranges are lexicographic and end-exclusive; an empty end key means the
/// range is unbounded on the right. Regions may split or move after being
/// returned; callers own caching and invalidation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub epoch: RegionEpoch,
    pub peers: Vec<Peer>,
}

/// Store lifecycle state as reported by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreState {
    Up,
    Offline,
    Tombstone,
}

/// A storage node registered with the placement driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: u64,
    pub address: String,
    pub state: StoreState,
}
