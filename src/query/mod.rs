//! AQL query model shared between the broker and the datanode client.
//!
//! The broker treats queries as opaque beyond the fields modeled here; the
//! AQL compiler and the per-datanode execution engine live elsewhere.

pub mod hll;
pub mod result;

pub use hll::HllSketch;
pub use result::ResultNode;

use serde::{Deserialize, Serialize};

/// A dimension expression. The raw expression doubles as the response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub expr: String,
}

/// A measure expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub expr: String,
}

/// An analytic query as accepted by the broker and forwarded to datanodes.
///
/// The broker populates `shards` per fan-out leg; everything else passes
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AQLQuery {
    pub table: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    /// Maximum number of rows in the response; negative means unlimited.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Request binary HLL sketch output for distinct-count measures.
    #[serde(default)]
    pub hll: bool,
    /// Shard restriction for one fan-out leg, set by the broker.
    #[serde(default)]
    pub shards: Vec<u32>,
}

fn default_limit() -> i64 {
    -1
}

/// Aggregation operator applied when merging partial results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggType {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    Hll,
}

/// Key-set policy the merge engine applies at every interior level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapePolicy {
    /// Keys present on only one side pass through unchanged.
    Lenient,
    /// Both sides must carry identical key sets.
    Strict,
}

impl AggType {
    pub fn shape(&self) -> ShapePolicy {
        match self {
            AggType::Avg => ShapePolicy::Strict,
            _ => ShapePolicy::Lenient,
        }
    }

    pub(crate) fn mismatch_hint(&self) -> &'static str {
        match self {
            AggType::Avg => "error calculating avg",
            AggType::Hll => "error merging hll sketches",
            _ => "partial results have incompatible shapes",
        }
    }

    /// Recognize the aggregate call heading a measure expression, e.g.
    /// `sum(fare)` or `countDistinctHLL(driver_id)`. Returns `None` for the
    /// non-aggregate marker measure `1` and anything unrecognized.
    pub fn from_call(expr: &str) -> Option<AggType> {
        let head = expr.trim().split('(').next()?.trim().to_ascii_lowercase();
        match head.as_str() {
            "sum" => Some(AggType::Sum),
            "count" => Some(AggType::Count),
            "min" => Some(AggType::Min),
            "max" => Some(AggType::Max),
            "avg" => Some(AggType::Avg),
            "countdistincthll" | "hll" => Some(AggType::Hll),
            _ => None,
        }
    }
}
