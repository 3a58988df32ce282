//! Query brokering: classification, planning, fan-out, and reduction.
//!
//! A query enters as an [`AQLQuery`], is classified into a [`QueryContext`],
//! and executes as either an aggregate plan (deep merge of partial result
//! trees) or a streaming non-aggregate plan (row pass-through with a global
//! limit). Both plans read one topology snapshot for their whole lifetime.

pub mod agg_plan;
pub mod merge;
pub mod non_agg_plan;
pub mod telemetry;

pub use agg_plan::AggQueryPlan;
pub use merge::{finalize, merge};
pub use non_agg_plan::NonAggQueryPlan;
pub use telemetry::BrokerTelemetry;

use crate::cluster::{calculate_shard_assignment, Host, TopologySnapshot};
use crate::query::{AQLQuery, AggType};
use crate::Result;

/// A query plus everything the broker derived from it.
///
/// The full AQL compiler lives upstream; the broker only needs to know which
/// plan to run, the response headers, and whether sketches should survive
/// finalization.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: AQLQuery,
    /// `None` selects the streaming non-aggregate plan.
    pub agg: Option<AggType>,
    /// Return serialized sketches instead of cardinality estimates.
    pub return_hll_binary: bool,
}

impl QueryContext {
    /// Classify an incoming query by the leading call of its first measure
    /// expression. The literal measure `1` marks a non-aggregate scan.
    pub fn build(query: AQLQuery) -> Result<Self> {
        let agg = query
            .measures
            .first()
            .and_then(|m| AggType::from_call(&m.expr));
        let return_hll_binary = query.hll && agg == Some(AggType::Hll);
        Ok(Self {
            query,
            agg,
            return_hll_binary,
        })
    }

    pub fn is_aggregate(&self) -> bool {
        self.agg.is_some()
    }

    /// Response headers: the dimension expressions, in query order.
    pub fn headers(&self) -> Vec<String> {
        self.query
            .dimensions
            .iter()
            .map(|d| d.expr.clone())
            .collect()
    }
}

/// One sub-query per assigned host, with the shard restriction populated.
/// Sorted by host ID so plans are deterministic for a given snapshot.
pub(crate) fn build_sub_queries(
    query: &AQLQuery,
    snapshot: &TopologySnapshot,
) -> Result<Vec<(Host, AQLQuery)>> {
    let assignment = calculate_shard_assignment(snapshot)?;
    let mut subs: Vec<(Host, AQLQuery)> = assignment
        .into_iter()
        .map(|(host, mut shards)| {
            shards.sort_unstable();
            let mut sub = query.clone();
            sub.shards = shards;
            (host, sub)
        })
        .collect();
    subs.sort_by(|a, b| a.0.id.cmp(&b.0.id));
    Ok(subs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{PlacementInstance, PlacementShard, ServicePlacement, ShardState};
    use crate::query::{Dimension, Measure};

    fn query(measure: &str) -> AQLQuery {
        AQLQuery {
            table: "trips".to_string(),
            dimensions: vec![
                Dimension {
                    expr: "city_id".to_string(),
                },
                Dimension {
                    expr: "status".to_string(),
                },
            ],
            measures: vec![Measure {
                expr: measure.to_string(),
            }],
            limit: -1,
            hll: false,
            shards: Vec::new(),
        }
    }

    #[test]
    fn classifies_aggregate_queries() {
        let qc = QueryContext::build(query("sum(fare)")).unwrap();
        assert_eq!(qc.agg, Some(AggType::Sum));
        assert!(qc.is_aggregate());
        assert_eq!(qc.headers(), vec!["city_id", "status"]);
    }

    #[test]
    fn classifies_non_aggregate_queries() {
        let qc = QueryContext::build(query("1")).unwrap();
        assert_eq!(qc.agg, None);
        assert!(!qc.is_aggregate());
    }

    #[test]
    fn hll_binary_needs_both_flag_and_operator() {
        let mut q = query("countDistinctHLL(driver_id)");
        q.hll = true;
        assert!(QueryContext::build(q).unwrap().return_hll_binary);

        let mut q = query("sum(fare)");
        q.hll = true;
        assert!(!QueryContext::build(q).unwrap().return_hll_binary);
    }

    #[test]
    fn sub_queries_cover_assignment_with_shard_lists() {
        let placement = ServicePlacement {
            replicas: 1,
            num_shards: 4,
            instances: vec![
                PlacementInstance {
                    id: "a".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 9474,
                    shards: Some(
                        (0..4)
                            .map(|id| PlacementShard {
                                id,
                                state: ShardState::Available,
                            })
                            .collect(),
                    ),
                },
                PlacementInstance {
                    id: "b".to_string(),
                    host: "127.0.0.2".to_string(),
                    port: 9474,
                    shards: Some(
                        (0..4)
                            .map(|id| PlacementShard {
                                id,
                                state: ShardState::Available,
                            })
                            .collect(),
                    ),
                },
            ],
        };
        let snapshot = TopologySnapshot::from_placement(&placement).unwrap();
        let subs = build_sub_queries(&query("sum(fare)"), &snapshot).unwrap();

        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].0.id, "a");
        let mut all_shards: Vec<u32> = subs
            .iter()
            .flat_map(|(_, sub)| sub.shards.iter().copied())
            .collect();
        all_shards.sort_unstable();
        assert_eq!(all_shards, vec![0, 1, 2, 3]);
    }
}
