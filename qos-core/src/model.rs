//! The QoS model: the graph assembly state machine (EMPTY → SHALLOW →
//! READY) that sits in front of [`crate::graph::QosGraph`], merging shallow
//! graph fragments with reporter announcements piggybacked on reports.

use crate::graph::{AnnouncementBuffer, QosGraph, ShallowGraphFragment};
use crate::messages::QosReport;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// The model's assembly state. A graph is shallow iff at least one group
/// vertex currently has zero members; ready otherwise. Recomputed after
/// every buffer-processing pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    Empty,
    Shallow,
    Ready,
}

/// Wraps the sparse graph with its announcement buffer and assembly state.
pub struct QosModel {
    graph: QosGraph,
    buffer: AnnouncementBuffer,
    state: ModelState,
    /// Window within which a sample is considered fresh; beyond it a
    /// vertex/edge QoS record is treated as inactive.
    sample_window: Duration,
}

impl QosModel {
    pub fn new(sample_window: Duration) -> Self {
        QosModel { graph: QosGraph::new(), buffer: AnnouncementBuffer::new(), state: ModelState::Empty, sample_window }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn graph(&self) -> &QosGraph {
        &self.graph
    }

    pub fn sample_window(&self) -> Duration {
        self.sample_window
    }

    /// Unions a group-level fragment into the graph, then re-drives the
    /// announcement buffer and recomputes the assembly state. A fragment
    /// that introduces a new, still-memberless group vertex can fall an
    /// otherwise-ready model back to SHALLOW.
    pub fn merge_shallow(&mut self, fragment: ShallowGraphFragment) {
        self.graph.merge_shallow(fragment);
        self.try_process();
        self.recompute_state();
        debug!(state = ?self.state, "merged shallow graph fragment");
    }

    /// Ingests one report according to the current assembly state: always
    /// buffers any piggybacked reporter announcements first, then
    /// try-processes the buffer, and only ingests samples once (and for as
    /// long as) the model is READY.
    ///
    /// Try-processing runs even from EMPTY: a vertex announcement names its
    /// own group vertex and is enough on its own to create it, so a model
    /// with no prior `merge_shallow` call can still assemble straight from
    /// announcements.
    pub fn process_report(&mut self, report: QosReport, now: Instant) {
        if report.has_announcements() {
            for announcement in &report.vertex_reporter_announcements {
                self.buffer.buffer_vertex(*announcement);
            }
            for announcement in &report.edge_reporter_announcements {
                self.buffer.buffer_edge(*announcement);
            }
            self.try_process();
            self.recompute_state();
        }

        if self.state == ModelState::Ready {
            self.ingest_samples(&report, now);
        }
        trace!(job_id = ?report.job_id, state = ?self.state, "processed report");
    }

    fn ingest_samples(&mut self, report: &QosReport, now: Instant) {
        for sample in &report.vertex_latencies {
            self.graph.record_vertex_latency(sample.vertex_id, sample.input_gate_index, sample.output_gate_index, now, sample.latency_millis);
        }
        for sample in &report.edge_latencies {
            self.graph.record_edge_latency(sample.source_channel_id, now, sample.latency_millis);
        }
        for sample in &report.edge_statistics {
            self.graph.record_edge_statistics(sample.source_channel_id, now, sample.statistics);
        }
    }

    /// Runs both announcement-buffer sweeps until resolvability stops
    /// changing. A single pass is correct already (each sweep only removes
    /// entries it could resolve against the graph as it stood before that
    /// sweep), but a second pass catches a vertex announcement and an edge
    /// announcement becoming mutually resolvable within the same report.
    fn try_process(&mut self) {
        for _ in 0..2 {
            if self.buffer.is_empty() {
                break;
            }
            // A vertex announcement has no prerequisite: applying it names
            // and creates its own group vertex if it doesn't already exist
            // (`QosGraph::apply_vertex_announcement` → `ensure_member`), so
            // every pending one is always resolvable.
            let resolved_vertices = self.buffer.take_resolvable_vertices(|_group| true);
            for announcement in resolved_vertices {
                self.graph.apply_vertex_announcement(announcement);
            }

            let graph = &self.graph;
            let resolved_edges = self.buffer.take_resolvable_edges(|announcement| graph.edge_endpoints_exist(announcement));
            for announcement in resolved_edges {
                if let Err(err) = self.graph.apply_edge_announcement(announcement) {
                    tracing::warn!(%err, "dropping edge announcement");
                }
            }
        }
    }

    fn recompute_state(&mut self) {
        self.state = if !self.graph.has_groups() {
            ModelState::Empty
        } else if self.graph.is_shallow() {
            ModelState::Shallow
        } else {
            ModelState::Ready
        };
    }

    pub fn process_chain_announce(&mut self, begin: crate::ids::VertexId, end: crate::ids::VertexId) -> Result<(), crate::error::QosError> {
        self.graph.process_chain_announce(begin, end)
    }
}
