//! Error taxonomy for the client.
//!
//! A failed allocation round trip fans one error out to every caller waiting
//! on that batch, so every variant is cheaply cloneable.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// No configured endpoint reported a cluster id within the retry budget.
    /// Fatal: the client is never constructed.
    #[error("failed to load cluster id from any configured endpoint")]
    ClusterBootstrap,

    /// No endpoint reported a leader, or no leader connection is established
    /// yet. Recoverable; the leader loop keeps retrying.
    #[error("no placement driver leader available")]
    LeaderUnavailable,

    /// Dialing a newly reported leader address failed.
    #[error("failed to connect to leader {url}: {message}")]
    Connect { url: String, message: String },

    /// A remote call failed or timed out in transit.
    #[error("{op} rpc failed: {message}")]
    Rpc { op: &'static str, message: String },

    /// The server reserved a different number of timestamps than requested.
    #[error("timestamp rpc reserved {returned} timestamps, expected {requested}")]
    TimestampCount { requested: u32, returned: u32 },

    /// A response was missing a field the protocol requires.
    #[error("{op} rpc response is missing the {field} field")]
    MalformedResponse {
        op: &'static str,
        field: &'static str,
    },

    /// The caller-supplied deadline elapsed before a result arrived.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The client is shutting down or already closed.
    #[error("client is closing")]
    Closing,
}
