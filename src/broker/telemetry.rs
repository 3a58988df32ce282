//! Broker metric instruments.
//!
//! Built once from a meter at startup and threaded through the datanode
//! client and the query plans; nothing here is process-global.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::time::Duration;

pub struct BrokerTelemetry {
    datanode_query_failures: Counter<u64>,
    time_waited_for_datanode: Histogram<f64>,
    time_serde_datanode_response: Histogram<f64>,
}

impl BrokerTelemetry {
    pub fn new(meter: &Meter) -> Self {
        Self {
            datanode_query_failures: meter
                .u64_counter("borealdb.broker.datanode_query_failures")
                .with_description("Failed datanode fetch attempts")
                .init(),
            time_waited_for_datanode: meter
                .f64_histogram("borealdb.broker.time_waited_for_datanode")
                .with_description("Wait for the fastest datanode partial")
                .with_unit("s")
                .init(),
            time_serde_datanode_response: meter
                .f64_histogram("borealdb.broker.time_serde_datanode_response")
                .with_description("Time decoding or re-encoding datanode responses")
                .with_unit("s")
                .init(),
        }
    }

    pub fn record_datanode_failure(&self, host_id: &str) {
        self.datanode_query_failures
            .add(1, &[KeyValue::new("host", host_id.to_string())]);
    }

    /// Recorded once per query, for the fastest partial.
    pub fn record_datanode_wait(&self, elapsed: Duration) {
        self.time_waited_for_datanode
            .record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_serde_duration(&self, elapsed: Duration) {
        self.time_serde_datanode_response
            .record(elapsed.as_secs_f64(), &[]);
    }
}
