//! Wire message types exchanged between task-side reporters, the report
//! forwarder, the elected manager, and target workers.
//!
//! Each message names its own [`JobId`]; dispatch at the plugin and
//! per-job environment is strictly by that field (see [`crate::plugin`],
//! [`crate::environment`]).

use crate::graph::{ChannelStatistics, ShallowGraphFragment};
use crate::graph::{EdgeReporterAnnouncement, VertexReporterAnnouncement};
use crate::ids::{ChannelId, JobId, VertexId};
use qos_messaging::TargetWorker;
use serde::{Deserialize, Serialize};

/// A single vertex-latency observation for one (input gate, output gate)
/// combination on a member vertex.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VertexLatencySample {
    pub vertex_id: VertexId,
    pub input_gate_index: u32,
    pub output_gate_index: u32,
    pub latency_millis: f64,
}

/// A single channel-latency observation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EdgeLatencySample {
    pub source_channel_id: ChannelId,
    pub latency_millis: f64,
}

/// A single output-channel statistics observation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EdgeStatisticsSample {
    pub source_channel_id: ChannelId,
    pub statistics: ChannelStatistics,
}

/// A bundled batch of samples and reporter announcements forwarded to the
/// elected manager for `job_id` on one aggregation tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QosReport {
    pub job_id: JobId,
    pub vertex_latencies: Vec<VertexLatencySample>,
    pub edge_latencies: Vec<EdgeLatencySample>,
    pub edge_statistics: Vec<EdgeStatisticsSample>,
    pub vertex_reporter_announcements: Vec<VertexReporterAnnouncement>,
    pub edge_reporter_announcements: Vec<EdgeReporterAnnouncement>,
}

impl QosReport {
    pub fn has_announcements(&self) -> bool {
        !self.vertex_reporter_announcements.is_empty() || !self.edge_reporter_announcements.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_latencies.is_empty()
            && self.edge_latencies.is_empty()
            && self.edge_statistics.is_empty()
            && !self.has_announcements()
    }
}

/// Which vertex (input gate, output gate) combinations a task-side reporter
/// should start tagging, as assigned by the elected manager.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct VertexQosReporterConfig {
    pub vertex_id: VertexId,
    pub input_gate_index: Option<u32>,
    pub output_gate_index: Option<u32>,
}

/// Which outbound channel a task-side reporter should report statistics for.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EdgeQosReporterConfig {
    pub source_channel_id: ChannelId,
}

/// Names the worker elected manager for a job, and the shallow graph
/// fragment (including constraints) it should seed its model with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QosManagerAssignment {
    pub manager_worker: TargetWorker,
    pub shallow_graph: ShallowGraphFragment,
}

/// Reconfigures a job's forwarder and, for the worker elected manager,
/// merges a shallow graph fragment into its model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployInstanceQosRolesAction {
    pub job_id: JobId,
    pub qos_manager_assignment: Option<QosManagerAssignment>,
    pub vertex_qos_reporters: Vec<VertexQosReporterConfig>,
    pub edge_qos_reporters: Vec<EdgeQosReporterConfig>,
}

/// Instructs the worker hosting `source_channel_id` to cap its output
/// buffer at `buffer_size_bytes`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LimitBufferSizeAction {
    pub job_id: JobId,
    pub target_vertex_id: VertexId,
    pub source_channel_id: ChannelId,
    pub buffer_size_bytes: u64,
}

/// A no-op at the task-manager plugin: chains are constructed only via
/// [`StreamChainAnnounce`] on the manager side, never reconstructed locally
/// from this action. Kept so an inbound message of this kind is recognized
/// and dropped rather than rejected as unknown.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ConstructStreamChainAction {
    pub job_id: JobId,
    pub chain_begin_vertex_id: VertexId,
    pub chain_end_vertex_id: VertexId,
}

/// Announces that two vertices are now chained: the manager should mark
/// the POINTWISE edges between them as in-chain.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StreamChainAnnounce {
    pub job_id: JobId,
    pub chain_begin: VertexId,
    pub chain_end: VertexId,
}

/// Outbound messages produced by the plugin's own components: aggregated
/// reports from forwarders, and buffer-size actions from the violation
/// finder's action emission, dispatched via [`qos_messaging::Dispatcher`].
///
/// [`StreamChainAnnounce`] is inbound-only at this subsystem — it names two
/// already-chained vertices, produced by whatever component elsewhere
/// detects the fusion, and the manager only ever consumes it to call
/// `processChainAnnounce` against its own graph. Unlike a buffer-size
/// action, there's no second worker to forward it to, so it never appears
/// as an `OutboundMessage` variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OutboundMessage {
    Report(QosReport),
    LimitBufferSize(LimitBufferSizeAction),
}
