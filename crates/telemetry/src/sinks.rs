// Path: crates/telemetry/src/sinks.rs
//! Abstract metric sinks, one trait per component.

/// A no-op sink for use in tests where metrics are not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopSink;

// --- Trait Definitions ---

pub trait ConsensusMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_blocks_produced(&self);
    /// Counts a workflow reset. `reason` is a short static label.
    fn inc_workflow_resets(&self, reason: &'static str);
    fn inc_acs_rounds(&self);
    fn observe_take_action_duration(&self, duration_secs: f64);
}
impl ConsensusMetricsSink for NopSink {
    fn inc_blocks_produced(&self) {}
    fn inc_workflow_resets(&self, _reason: &'static str) {}
    fn inc_acs_rounds(&self) {}
    fn observe_take_action_duration(&self, _duration_secs: f64) {}
}

pub trait StateMetricsSink: Send + Sync + std::fmt::Debug {
    /// Blocks between the local solid state and the latest anchor.
    fn set_sync_gap(&self, blocks: u32);
    fn inc_blocks_committed(&self);
    fn inc_blocks_synced(&self);
}
impl StateMetricsSink for NopSink {
    fn set_sync_gap(&self, _blocks: u32) {}
    fn inc_blocks_committed(&self) {}
    fn inc_blocks_synced(&self) {}
}

pub trait MempoolMetricsSink: Send + Sync + std::fmt::Debug {
    fn set_mempool_size(&self, size: usize);
    fn inc_requests_received(&self);
}
impl MempoolMetricsSink for NopSink {
    fn set_mempool_size(&self, _size: usize) {}
    fn inc_requests_received(&self) {}
}

pub trait VmMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_gas_burned(&self, gas: u64);
    fn inc_requests_processed(&self, count: u64);
}
impl VmMetricsSink for NopSink {
    fn inc_gas_burned(&self, _gas: u64) {}
    fn inc_requests_processed(&self, _count: u64) {}
}

/// Counts messages a bounded component mailbox turned away.
pub trait MailboxMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_mailbox_rejections(&self, mailbox: &'static str);
}
impl MailboxMetricsSink for NopSink {
    fn inc_mailbox_rejections(&self, _mailbox: &'static str) {}
}

// A unified sink that implements all domain-specific traits
pub trait MetricsSink:
    ConsensusMetricsSink + StateMetricsSink + MempoolMetricsSink + VmMetricsSink + MailboxMetricsSink
{
}

// Blanket implementation
impl<T> MetricsSink for T where
    T: ConsensusMetricsSink
        + StateMetricsSink
        + MempoolMetricsSink
        + VmMetricsSink
        + MailboxMetricsSink
{
}
