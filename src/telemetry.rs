//! Shared telemetry bootstrap for the broker binary.

use crate::{Error, Result};

use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";
const ATTR_SERVICE_INSTANCE_ID: &str = "service.instance.id";

/// Handle that keeps telemetry SDK providers alive for process lifetime.
///
/// Components do not reach for process-wide singletons; they receive meters
/// (or instrument handles built from them) from whoever owns this value.
pub struct Telemetry {
    service_name: String,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Initialize the tracing subscriber and the OTel meter provider.
    pub fn init(service_name: &str, instance_id: &str, log_level: &str) -> Result<Self> {
        let level = parse_log_level(log_level)?;

        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .json()
            .try_init()
            .map_err(|e| {
                Error::Config(format!("failed to initialize telemetry subscriber: {e}"))
            })?;

        let resource = Resource::default().merge(&Resource::new(vec![
            KeyValue::new(ATTR_SERVICE_NAME, service_name.to_string()),
            KeyValue::new(ATTR_SERVICE_NAMESPACE, "borealdb".to_string()),
            KeyValue::new(ATTR_SERVICE_INSTANCE_ID, instance_id.to_string()),
        ]));

        let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();

        info!(
            service_name = %service_name,
            instance_id = %instance_id,
            "telemetry bootstrap initialized"
        );

        Ok(Self {
            service_name: service_name.to_string(),
            meter_provider,
        })
    }

    /// A meter scoped to the given instrumentation name.
    pub fn meter(&self, name: &'static str) -> Meter {
        self.meter_provider.meter(name)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
    }
}

fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}
