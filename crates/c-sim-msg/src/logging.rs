//! ---
//! csim_section: "02-message-schema"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Message schema, value blocks, and protocol codecs."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tracing::debug;

use crate::types::Message;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message published to the bus.
    Outbound,
    /// Message received from the bus.
    Inbound,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, message: &Message) {
    let envelope = message.envelope();
    debug!(
        message_id = %envelope.message_id,
        message_type = %envelope.message_type,
        simulation_id = %envelope.simulation_id,
        timestamp = %envelope.timestamp,
        direction = ?direction,
        "messaging activity"
    );
}

/// Prometheus metric handles for messaging activity.
pub struct MessagingMetricsExporter {
    published: IntCounter,
    received: IntCounter,
    decode_failures: IntCounter,
    publish_latency: Histogram,
}

impl MessagingMetricsExporter {
    /// Register messaging metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published = IntCounter::with_opts(Opts::new(
            "messages_published_total",
            "Messages published to the bus",
        ))?;
        let received = IntCounter::with_opts(Opts::new(
            "messages_received_total",
            "Messages consumed from the bus",
        ))?;
        let decode_failures = IntCounter::with_opts(Opts::new(
            "message_decode_failures_total",
            "Received payloads that failed schema validation",
        ))?;
        let publish_latency = Histogram::with_opts(HistogramOpts::new(
            "message_publish_latency_seconds",
            "Observed latency of publish calls",
        ))?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(publish_latency.clone()))?;

        Ok(Self {
            published,
            received,
            decode_failures,
            publish_latency,
        })
    }

    /// Record a published message.
    pub fn observe_published(&self) {
        self.published.inc();
    }

    /// Record a received message.
    pub fn observe_received(&self) {
        self.received.inc();
    }

    /// Record a received payload that failed to decode.
    pub fn observe_decode_failure(&self) {
        self.decode_failures.inc();
    }

    /// Record the latency of one publish call.
    pub fn observe_publish_latency(&self, duration: Duration) {
        self.publish_latency.observe(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_exporter_records_counts() {
        let registry = Registry::new();
        let metrics = MessagingMetricsExporter::register(&registry).expect("register metrics");
        metrics.observe_published();
        metrics.observe_received();
        metrics.observe_decode_failure();
        metrics.observe_publish_latency(Duration::from_millis(10));

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "messages_published_total"));
    }
}
