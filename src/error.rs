use crate::types::Feed;
use thiserror::Error;

/// Error taxonomy for the dashboard core.
///
/// Access and connection-lost errors are user-visible; fetch and stream
/// errors surface as transient status text; persist errors are logged only.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Wallet connected but present in neither allow-list
    #[error("wallet {wallet} has no access to any feed")]
    AccessDenied { wallet: String },

    /// Upstream feed unreachable or non-2xx
    #[error("{feed} feed fetch failed: {reason}")]
    Fetch { feed: Feed, reason: String },

    /// Response parsed but the shape was not an array of snapshots
    #[error("{feed} feed returned a malformed response: {reason}")]
    MalformedResponse { feed: Feed, reason: String },

    /// Metrics write failed; never surfaced to the user
    #[error("metrics persistence failed: {0}")]
    Persist(#[from] sqlx::Error),

    /// Push-stream or socket transport failure, retried with backoff
    #[error("stream transport error: {0}")]
    Stream(String),

    /// Reconnect attempts exhausted; requires manual restart
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },
}

impl DashboardError {
    pub fn fetch(feed: Feed, reason: impl Into<String>) -> Self {
        DashboardError::Fetch {
            feed,
            reason: reason.into(),
        }
    }

    pub fn malformed(feed: Feed, reason: impl Into<String>) -> Self {
        DashboardError::MalformedResponse {
            feed,
            reason: reason.into(),
        }
    }
}
