//! Edges: directed channels from an output-gate slot to an input-gate slot.

use super::arena::GateIndex;
use crate::ids::ChannelId;
use qos_messaging::TargetWorker;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A single channel-latency or output-statistics observation, time-stamped
/// at the moment the sample was taken (not at ingestion).
#[derive(Clone, Copy, Debug)]
pub struct Timestamped<T> {
    pub observed_at: Instant,
    pub value: T,
}

impl<T> Timestamped<T> {
    fn is_fresh(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.observed_at) <= window
    }
}

/// Output-channel behavior accompanying a channel-latency sample: observed
/// throughput and output buffer occupancy, as reported by the host's
/// record-tagging instrumentation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    pub throughput_records_per_sec: f64,
    pub output_buffer_fill_ratio: f64,
}

/// The QoS data attached to one edge: its latest channel-latency sample and
/// its latest output-channel statistics sample, each independently
/// overwritten as fresh measurements arrive.
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeQosData {
    pub latency_millis: Option<Timestamped<f64>>,
    pub statistics: Option<Timestamped<ChannelStatistics>>,
}

impl EdgeQosData {
    /// An edge is active for traversal purposes only once both its latency
    /// and statistics samples are present and neither has gone stale.
    pub fn is_active(&self, window: Duration, now: Instant) -> bool {
        match (&self.latency_millis, &self.statistics) {
            (Some(latency), Some(stats)) => latency.is_fresh(window, now) && stats.is_fresh(window, now),
            _ => false,
        }
    }
}

/// A directed channel from one output-gate slot to one input-gate slot,
/// keyed externally by its source [`ChannelId`].
#[derive(Clone, Debug)]
pub struct Edge {
    pub source_channel_id: ChannelId,
    pub source_gate: GateIndex,
    pub target_gate: GateIndex,
    pub qos: EdgeQosData,
    /// The worker hosting this edge's source task, named by its reporter
    /// announcement — the recipient of any buffer-size action a violation
    /// on this edge produces.
    pub owner: TargetWorker,
    /// Set by `processChainAnnounce` when this edge lies on an announced
    /// single-output-gate POINTWISE chain.
    pub in_chain: bool,
}

impl Edge {
    pub fn new(source_channel_id: ChannelId, source_gate: GateIndex, target_gate: GateIndex, owner: TargetWorker) -> Self {
        Edge { source_channel_id, source_gate, target_gate, qos: EdgeQosData::default(), owner, in_chain: false }
    }
}
