//! Aggregate query plan: parallel fan-out, merge reduction.

use super::merge::{finalize, merge};
use super::telemetry::BrokerTelemetry;
use super::{build_sub_queries, QueryContext};
use crate::cluster::{DynamicTopology, Host};
use crate::datanode::DataNodeQueryClient;
use crate::query::{AQLQuery, AggType, ResultNode};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct AggScanNode {
    host: Host,
    query: AQLQuery,
}

/// Fan-out of one aggregate query: one sub-query per assigned host, reduced
/// into a single result tree by the merge engine.
pub struct AggQueryPlan {
    headers: Vec<String>,
    agg: AggType,
    /// Sub-queries carry sketch leaves instead of plain counts.
    hll: bool,
    /// Sketches survive finalization instead of collapsing to estimates.
    hll_binary: bool,
    nodes: Vec<AggScanNode>,
    client: Arc<dyn DataNodeQueryClient>,
    telemetry: Arc<BrokerTelemetry>,
}

impl std::fmt::Debug for AggQueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggQueryPlan")
            .field("headers", &self.headers)
            .field("agg", &self.agg)
            .field("hll", &self.hll)
            .field("hll_binary", &self.hll_binary)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl AggQueryPlan {
    /// Plan against the current topology snapshot.
    pub fn new(
        qc: &QueryContext,
        topology: &DynamicTopology,
        client: Arc<dyn DataNodeQueryClient>,
        telemetry: Arc<BrokerTelemetry>,
    ) -> Result<Self> {
        let agg = qc
            .agg
            .ok_or_else(|| Error::Query("not an aggregate query".to_string()))?;
        let snapshot = topology.get();
        let nodes = build_sub_queries(&qc.query, &snapshot)?
            .into_iter()
            .map(|(host, query)| AggScanNode { host, query })
            .collect();
        Ok(Self {
            headers: qc.headers(),
            agg,
            hll: agg == AggType::Hll,
            hll_binary: qc.return_hll_binary,
            nodes,
            client,
            telemetry,
        })
    }

    /// Run the fan-out and write the combined response body.
    pub async fn execute<W>(&self, cancel: CancellationToken, w: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let combined = self.reduce(&cancel).await?;
        let body = serde_json::to_vec(&serde_json::json!({
            "headers": self.headers,
            "matrixData": combined,
        }))?;
        w.write_all(&body).await?;
        w.flush().await?;
        Ok(())
    }

    /// Fan out the sub-queries and fold partials as they arrive. The first
    /// partial seeds the accumulator, so strict-shape operators never see an
    /// artificial empty operand.
    pub async fn reduce(&self, cancel: &CancellationToken) -> Result<ResultNode> {
        let (tx, mut rx) = mpsc::channel(self.nodes.len().max(1));
        for node in &self.nodes {
            let client = Arc::clone(&self.client);
            let host = node.host.clone();
            let query = node.query.clone();
            let hll = self.hll;
            let cancel = cancel.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = client.query(&host, &query, hll, &cancel).await;
                // a dropped receiver means the reducer already terminated
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let wait_start = Instant::now();
        let mut acc: Option<ResultNode> = None;
        for received in 0..self.nodes.len() {
            let Some(result) = rx.recv().await else {
                break;
            };
            if received == 0 {
                self.telemetry.record_datanode_wait(wait_start.elapsed());
            }
            let partial = match result {
                Ok(partial) => partial,
                Err(e) => {
                    cancel.cancel();
                    return Err(e);
                }
            };
            debug!(received, "merging partial aggregate result");
            acc = Some(match acc.take() {
                None => partial,
                Some(prev) => match merge(prev, partial, self.agg) {
                    Ok(merged) => merged,
                    Err(e) => {
                        cancel.cancel();
                        return Err(e);
                    }
                },
            });
        }

        Ok(finalize(
            acc.unwrap_or_else(ResultNode::empty),
            self.agg,
            self.hll_binary,
        ))
    }
}
