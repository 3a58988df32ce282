//! Error types for the BorealDB broker

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the BorealDB broker
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The placement store delivered a value that could not be parsed
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    /// An instance in the placement carries no shard assignment
    #[error("instance {0} has no shard assignment")]
    InstanceHasNoShards(String),
    /// A shard ID expected by the placement is missing
    #[error("shard {0} is missing from the placement")]
    MissingShard(u32),
    /// A shard ID outside the expected keyspace appeared in the placement
    #[error("unexpected shard {0} in the placement")]
    UnexpectedShard(u32),
    /// A shard has fewer replicas than the replication factor requires
    #[error("shard {shard} has {actual} replicas, expected at least {expected}")]
    NotEnoughReplicas {
        shard: u32,
        actual: usize,
        expected: usize,
    },
    /// No available replica covers a shard; retry against a fresher snapshot
    #[error("no available replica covers shard {0}")]
    IncompleteCoverage(u32),
    /// A datanode call failed after exhausting its retry budget
    #[error("datanode query to {host} failed after {attempts} attempts: {message}")]
    DataNodeQuery {
        host: String,
        attempts: usize,
        message: String,
    },
    /// Partial aggregate results could not be merged
    #[error("result shape mismatch {0}")]
    ShapeMismatch(String),
    /// The query context was cancelled
    #[error("query was cancelled")]
    Cancelled,
    /// Writing the response body failed; the response is truncated
    #[error("response write failed: {0}")]
    Write(#[from] std::io::Error),
    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
    /// Query error
    #[error("query error: {0}")]
    Query(String),
    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
