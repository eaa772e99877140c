//! Reporter announcements and the buffer that holds unresolved ones.
//!
//! A reporter announcement is a piggybacked description, inside a QoS
//! report, of a newly activated reporter — carrying enough information to
//! instantiate its member vertex, gate, or edge in the graph. A vertex
//! announcement has no prerequisite: it names and creates its own group
//! vertex if absent. An edge announcement does: it waits until both
//! endpoint gates, named by the vertex announcements that create them,
//! already exist.

use crate::ids::{ChannelId, GroupVertexId, VertexId};
use qos_messaging::TargetWorker;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Announces that a reporter is now active for a member vertex, optionally
/// naming the (input gate, output gate) combination it reports latency for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexReporterAnnouncement {
    pub vertex_id: VertexId,
    pub group_vertex_id: GroupVertexId,
    pub member_index: usize,
    pub input_gate_index: Option<u32>,
    pub output_gate_index: Option<u32>,
}

/// Announces that a reporter is now active for an edge, naming both
/// endpoint gates by (vertex, gate-index).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeReporterAnnouncement {
    pub source_channel_id: ChannelId,
    pub source_vertex_id: VertexId,
    pub source_output_gate_index: u32,
    pub target_vertex_id: VertexId,
    pub target_input_gate_index: u32,
    /// The worker hosting the source task, so a later buffer-size action
    /// for this edge can be routed back without a separate lookup.
    pub owner: TargetWorker,
}

/// Holds announcements whose prerequisites haven't resolved yet.
///
/// Both sweeps performed by `try_process` are re-entrant-safe and
/// idempotent on repeated announcements: an announcement is removed from
/// the buffer only once it has been fully applied to the graph.
#[derive(Default)]
pub struct AnnouncementBuffer {
    pending_vertices: HashMap<GroupVertexId, Vec<VertexReporterAnnouncement>>,
    pending_edges: HashMap<ChannelId, EdgeReporterAnnouncement>,
}

impl AnnouncementBuffer {
    pub fn new() -> Self {
        AnnouncementBuffer::default()
    }

    pub fn buffer_vertex(&mut self, announcement: VertexReporterAnnouncement) {
        let bucket = self.pending_vertices.entry(announcement.group_vertex_id).or_default();
        if !bucket.contains(&announcement) {
            bucket.push(announcement);
        }
    }

    pub fn buffer_edge(&mut self, announcement: EdgeReporterAnnouncement) {
        self.pending_edges.entry(announcement.source_channel_id).or_insert(announcement);
    }

    pub fn is_empty(&self) -> bool {
        self.pending_vertices.values().all(|v| v.is_empty()) && self.pending_edges.is_empty()
    }

    /// Removes and returns every pending vertex announcement whose
    /// predicate accepts it. A vertex announcement has no real prerequisite
    /// — applying it creates its named group if the group doesn't already
    /// exist — so callers ordinarily pass a predicate that always accepts;
    /// it's still a predicate (rather than draining unconditionally) so the
    /// same two-sweep shape as `take_resolvable_edges` applies here too.
    pub fn take_resolvable_vertices(&mut self, mut group_exists: impl FnMut(GroupVertexId) -> bool) -> Vec<VertexReporterAnnouncement> {
        let mut resolved = Vec::new();
        let mut remaining: HashMap<GroupVertexId, Vec<VertexReporterAnnouncement>> = HashMap::new();
        for (group, announcements) in self.pending_vertices.drain() {
            if group_exists(group) {
                resolved.extend(announcements);
            } else {
                remaining.insert(group, announcements);
            }
        }
        self.pending_vertices = remaining;
        resolved
    }

    /// Removes and returns every pending edge announcement whose endpoint
    /// gates both now exist.
    pub fn take_resolvable_edges(&mut self, mut gates_exist: impl FnMut(&EdgeReporterAnnouncement) -> bool) -> Vec<EdgeReporterAnnouncement> {
        let mut resolved = Vec::new();
        let mut remaining = HashMap::new();
        for (channel, announcement) in self.pending_edges.drain() {
            if gates_exist(&announcement) {
                resolved.push(announcement);
            } else {
                remaining.insert(channel, announcement);
            }
        }
        self.pending_edges = remaining;
        resolved
    }
}
