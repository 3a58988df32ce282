//! Streaming non-aggregate query plan.
//!
//! Partial row batches are concatenated in arrival order, so clients must
//! not assume any row ordering. With a non-negative limit each partial is
//! decoded to count rows; without one the raw bytes pass straight through.

use super::telemetry::BrokerTelemetry;
use super::{build_sub_queries, QueryContext};
use crate::cluster::{DynamicTopology, Host};
use crate::datanode::DataNodeQueryClient;
use crate::query::AQLQuery;
use crate::Result;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct StreamingScanNode {
    host: Host,
    query: AQLQuery,
}

/// Fan-out of one streaming scan with a global row limit.
pub struct NonAggQueryPlan {
    headers: Vec<String>,
    /// Rows wanted across all partials; negative means unlimited.
    limit: i64,
    /// Rows written so far in limited mode.
    flushed: usize,
    nodes: Vec<StreamingScanNode>,
    client: Arc<dyn DataNodeQueryClient>,
    telemetry: Arc<BrokerTelemetry>,
}

impl NonAggQueryPlan {
    /// Plan against the current topology snapshot.
    pub fn new(
        qc: &QueryContext,
        topology: &DynamicTopology,
        client: Arc<dyn DataNodeQueryClient>,
        telemetry: Arc<BrokerTelemetry>,
    ) -> Result<Self> {
        let snapshot = topology.get();
        let nodes = build_sub_queries(&qc.query, &snapshot)?
            .into_iter()
            .map(|(host, query)| StreamingScanNode { host, query })
            .collect();
        Ok(Self {
            headers: qc.headers(),
            limit: qc.query.limit,
            flushed: 0,
            nodes,
            client,
            telemetry,
        })
    }

    /// Stream the response body into `w`. On any error the body is left
    /// truncated and outstanding scans are cancelled; nothing is retried
    /// after the first byte has been written.
    pub async fn execute<W>(&mut self, cancel: CancellationToken, w: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let result = self.stream_body(&cancel, w).await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    }

    async fn stream_body<W>(&mut self, cancel: &CancellationToken, w: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let headers = serde_json::to_vec(&self.headers)?;
        w.write_all(b"{\"headers\":").await?;
        w.write_all(&headers).await?;
        w.write_all(b",\"matrixData\":[").await?;

        let (tx, mut rx) = mpsc::channel(self.nodes.len().max(1));
        for node in &self.nodes {
            let client = Arc::clone(&self.client);
            let host = node.host.clone();
            let query = node.query.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = client.query_raw(&host, &query, &cancel).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let wait_start = Instant::now();
        let mut wrote_partial = false;
        for received in 0..self.nodes.len() {
            if self.rows_wanted() == Some(0) {
                debug!("row limit satisfied, cancelling outstanding scans");
                cancel.cancel();
                break;
            }
            let Some(result) = rx.recv().await else {
                break;
            };
            if received == 0 {
                self.telemetry.record_datanode_wait(wait_start.elapsed());
            }
            let data = result?;
            if data.is_empty() {
                continue;
            }

            match self.rows_wanted() {
                // unlimited: flush raw bytes directly
                None => {
                    if wrote_partial {
                        w.write_all(b",").await?;
                    }
                    w.write_all(&data).await?;
                    wrote_partial = true;
                }
                Some(remaining) => {
                    if self.flush_limited(data, remaining, wrote_partial, w).await? {
                        wrote_partial = true;
                    }
                }
            }
        }

        w.write_all(b"]}").await?;
        w.flush().await?;
        Ok(())
    }

    /// Limited mode: decode the partial to count rows, slicing down to the
    /// remaining budget if it overshoots. Returns whether anything was
    /// written.
    async fn flush_limited<W>(
        &mut self,
        data: Bytes,
        remaining: usize,
        wrote_partial: bool,
        w: &mut W,
    ) -> Result<bool>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let serde_start = Instant::now();
        let mut wrapped = Vec::with_capacity(data.len() + 2);
        wrapped.push(b'[');
        wrapped.extend_from_slice(&data);
        wrapped.push(b']');
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&wrapped)?;
        self.telemetry.record_serde_duration(serde_start.elapsed());

        if rows.is_empty() {
            return Ok(false);
        }

        if rows.len() <= remaining {
            if wrote_partial {
                w.write_all(b",").await?;
            }
            w.write_all(&data).await?;
            self.flushed += rows.len();
            debug!(nrows = rows.len(), "flushed batch");
        } else {
            let serde_start = Instant::now();
            let sliced = serde_json::to_vec(&rows[..remaining])?;
            self.telemetry.record_serde_duration(serde_start.elapsed());
            if wrote_partial {
                w.write_all(b",").await?;
            }
            // strip the enclosing brackets of the re-encoded array
            w.write_all(&sliced[1..sliced.len() - 1]).await?;
            self.flushed += remaining;
            debug!(nrows = remaining, "flushed truncated batch");
        }
        Ok(true)
    }

    /// Remaining row budget; `None` when the query is unlimited.
    fn rows_wanted(&self) -> Option<usize> {
        if self.limit < 0 {
            None
        } else {
            Some((self.limit as usize).saturating_sub(self.flushed))
        }
    }
}
