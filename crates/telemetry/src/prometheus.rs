// Path: crates/telemetry/src/prometheus.rs
//! A concrete implementation of the metrics sinks using the Prometheus crate.
//!
//! Metrics register with the default registry on first use. Registration
//! failures are logged once and turn the sink into a no-op.

use crate::sinks::*;
use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_gauge, register_histogram, register_int_counter,
    register_int_counter_vec, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, TextEncoder,
};

struct Metrics {
    // GAUGE (no _total suffix)
    mempool_size: Gauge,
    sync_gap: Gauge,
    // COUNTER
    blocks_produced_total: IntCounter,
    workflow_resets_total: IntCounterVec,
    acs_rounds_total: IntCounter,
    blocks_committed_total: IntCounter,
    blocks_synced_total: IntCounter,
    requests_received_total: IntCounter,
    requests_processed_total: IntCounter,
    gas_burned_total: IntCounter,
    mailbox_rejections_total: IntCounterVec,
    // HISTOGRAM
    take_action_duration_seconds: Histogram,
}

fn register() -> Result<Metrics, prometheus::Error> {
    Ok(Metrics {
        mempool_size: register_gauge!(
            "kestrel_mempool_size",
            "Current number of pending requests in the mempool."
        )?,
        sync_gap: register_gauge!(
            "kestrel_statemgr_sync_gap",
            "Blocks between the solid state and the latest anchor."
        )?,
        blocks_produced_total: register_int_counter!(
            "kestrel_consensus_blocks_produced_total",
            "Blocks whose anchor transaction this node saw included."
        )?,
        workflow_resets_total: register_int_counter_vec!(
            "kestrel_consensus_workflow_resets_total",
            "Consensus workflow resets.",
            &["reason"]
        )?,
        acs_rounds_total: register_int_counter!(
            "kestrel_consensus_acs_rounds_total",
            "Batch proposals submitted to ACS."
        )?,
        blocks_committed_total: register_int_counter!(
            "kestrel_statemgr_blocks_committed_total",
            "Blocks committed to the solid state."
        )?,
        blocks_synced_total: register_int_counter!(
            "kestrel_statemgr_blocks_synced_total",
            "Blocks received from peers and validated."
        )?,
        requests_received_total: register_int_counter!(
            "kestrel_mempool_requests_received_total",
            "Requests accepted into the mempool."
        )?,
        requests_processed_total: register_int_counter!(
            "kestrel_vm_requests_processed_total",
            "Requests that produced a receipt."
        )?,
        gas_burned_total: register_int_counter!(
            "kestrel_vm_gas_burned_total",
            "Gas burned by processed requests."
        )?,
        mailbox_rejections_total: register_int_counter_vec!(
            "kestrel_mailbox_rejections_total",
            "Messages rejected by a full component mailbox.",
            &["mailbox"]
        )?,
        take_action_duration_seconds: register_histogram!(
            "kestrel_consensus_take_action_duration_seconds",
            "Latency of a single consensus driver step.",
            exponential_buckets(0.0005, 2.0, 15)?
        )?,
    })
}

static METRICS: Lazy<Option<Metrics>> = Lazy::new(|| match register() {
    Ok(m) => Some(m),
    Err(e) => {
        tracing::warn!(target: "telemetry", error = %e, "prometheus registration failed");
        None
    }
});

fn metrics() -> Option<&'static Metrics> {
    METRICS.as_ref()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl ConsensusMetricsSink for PrometheusSink {
    fn inc_blocks_produced(&self) {
        if let Some(m) = metrics() {
            m.blocks_produced_total.inc();
        }
    }
    fn inc_workflow_resets(&self, reason: &'static str) {
        if let Some(m) = metrics() {
            m.workflow_resets_total.with_label_values(&[reason]).inc();
        }
    }
    fn inc_acs_rounds(&self) {
        if let Some(m) = metrics() {
            m.acs_rounds_total.inc();
        }
    }
    fn observe_take_action_duration(&self, duration_secs: f64) {
        if let Some(m) = metrics() {
            m.take_action_duration_seconds.observe(duration_secs);
        }
    }
}
impl StateMetricsSink for PrometheusSink {
    fn set_sync_gap(&self, blocks: u32) {
        if let Some(m) = metrics() {
            m.sync_gap.set(f64::from(blocks));
        }
    }
    fn inc_blocks_committed(&self) {
        if let Some(m) = metrics() {
            m.blocks_committed_total.inc();
        }
    }
    fn inc_blocks_synced(&self) {
        if let Some(m) = metrics() {
            m.blocks_synced_total.inc();
        }
    }
}
impl MempoolMetricsSink for PrometheusSink {
    fn set_mempool_size(&self, size: usize) {
        if let Some(m) = metrics() {
            m.mempool_size.set(size as f64);
        }
    }
    fn inc_requests_received(&self) {
        if let Some(m) = metrics() {
            m.requests_received_total.inc();
        }
    }
}
impl VmMetricsSink for PrometheusSink {
    fn inc_gas_burned(&self, gas: u64) {
        if let Some(m) = metrics() {
            m.gas_burned_total.inc_by(gas);
        }
    }
    fn inc_requests_processed(&self, count: u64) {
        if let Some(m) = metrics() {
            m.requests_processed_total.inc_by(count);
        }
    }
}
impl MailboxMetricsSink for PrometheusSink {
    fn inc_mailbox_rejections(&self, mailbox: &'static str) {
        if let Some(m) = metrics() {
            m.mailbox_rejections_total.with_label_values(&[mailbox]).inc();
        }
    }
}

pub fn install() -> &'static dyn MetricsSink {
    static SINK: PrometheusSink = PrometheusSink;
    &SINK
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_metrics_show_up_in_the_export() {
        let sink = install();
        sink.inc_blocks_produced();
        sink.inc_workflow_resets("conflicting");
        sink.inc_mailbox_rejections("consensus");
        sink.set_mempool_size(3);
        let text = render().unwrap();
        assert!(text.contains("kestrel_consensus_blocks_produced_total"));
        assert!(text.contains("reason=\"conflicting\""));
        assert!(text.contains("mailbox=\"consensus\""));
        assert!(text.contains("kestrel_mempool_size 3"));
    }
}
