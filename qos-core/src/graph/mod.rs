//! The in-memory sparse QoS graph: group vertices, member vertices, gates
//! and edges, plus the constraint records checked against it.
//!
//! Arena-allocated (see [`arena`]) with `HashMap` side tables for external
//! ID lookup, per the design notes: the cross-reference cycle between
//! gates, edges and vertices is structural and modeled with non-owning
//! indices rather than bidirectional owning pointers.

pub mod announce;
pub mod arena;
pub mod constraint;
pub mod edge;
pub mod gate;
pub mod group;
pub mod vertex;

pub use announce::{AnnouncementBuffer, EdgeReporterAnnouncement, VertexReporterAnnouncement};
pub use arena::{EdgeIndex, GateIndex, MemberIndex};
pub use constraint::{Constraint, SequenceElement};
pub use edge::{ChannelStatistics, Edge, EdgeQosData, Timestamped};
pub use gate::{Gate, GateDirection};
pub use group::{Distribution, GroupEdge, GroupVertex};
pub use vertex::{MemberVertex, VertexQosData};

use crate::error::QosError;
use crate::ids::{ChannelId, GateId, GroupVertexId, VertexId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

/// A group-level fragment received from the job's QoS-manager coordinator:
/// the group vertices it names, the group edges between them, and any
/// constraints it carries.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShallowGraphFragment {
    pub group_vertices: Vec<GroupVertexId>,
    /// `(owning group, edge)`; the reverse link is derived automatically.
    pub forward_edges: Vec<(GroupVertexId, GroupEdge)>,
    pub constraints: Vec<Constraint>,
}

/// The sparse QoS graph plus its secondary indices.
#[derive(Default)]
pub struct QosGraph {
    groups: HashMap<GroupVertexId, GroupVertex>,
    constraints: HashMap<crate::ids::ConstraintId, Constraint>,
    members: Vec<MemberVertex>,
    gates: Vec<Gate>,
    edges: Vec<Edge>,
    vertex_index: HashMap<VertexId, MemberIndex>,
    gate_id_index: HashMap<GateId, GateIndex>,
    channel_index: HashMap<ChannelId, EdgeIndex>,
    next_gate_id: u64,
}

impl QosGraph {
    pub fn new() -> Self {
        QosGraph::default()
    }

    pub fn has_groups(&self) -> bool {
        !self.groups.is_empty()
    }

    /// A graph is shallow iff at least one group vertex has zero members.
    pub fn is_shallow(&self) -> bool {
        self.groups.values().any(GroupVertex::is_shallow)
    }

    pub fn group(&self, id: GroupVertexId) -> Option<&GroupVertex> {
        self.groups.get(&id)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    pub fn member(&self, index: MemberIndex) -> &MemberVertex {
        &self.members[index.0]
    }

    fn member_mut(&mut self, index: MemberIndex) -> &mut MemberVertex {
        &mut self.members[index.0]
    }

    pub fn gate(&self, index: GateIndex) -> &Gate {
        &self.gates[index.0]
    }

    pub fn edge(&self, index: EdgeIndex) -> &Edge {
        &self.edges[index.0]
    }

    fn edge_mut(&mut self, index: EdgeIndex) -> &mut Edge {
        &mut self.edges[index.0]
    }

    pub fn member_index_of(&self, vertex_id: VertexId) -> Option<MemberIndex> {
        self.vertex_index.get(&vertex_id).copied()
    }

    pub fn edge_index_of(&self, channel_id: ChannelId) -> Option<EdgeIndex> {
        self.channel_index.get(&channel_id).copied()
    }

    fn gate_index_of(&self, vertex_id: VertexId, direction: GateDirection, gate_index: u32) -> Option<GateIndex> {
        let member = self.member_index_of(vertex_id)?;
        let member = self.member(member);
        let table = match direction {
            GateDirection::Input => &member.input_gates,
            GateDirection::Output => &member.output_gates,
        };
        table.get(&gate_index).copied()
    }

    /// Unions a group-level fragment into the graph. Idempotent on
    /// already-known group IDs: an existing group (shallow or not) is
    /// never replaced, only extended with edges it didn't have yet.
    pub fn merge_shallow(&mut self, fragment: ShallowGraphFragment) {
        for group_id in fragment.group_vertices {
            self.groups.entry(group_id).or_insert_with(GroupVertex::new);
        }
        for (owner, edge) in fragment.forward_edges {
            self.groups.entry(owner).or_insert_with(GroupVertex::new);
            self.groups.entry(edge.other).or_insert_with(GroupVertex::new);

            let forward = &mut self.groups.get_mut(&owner).unwrap().forward_edges;
            if !forward.iter().any(|e| group_edge_eq(e, &edge)) {
                forward.push(edge);
            }
            let backward = GroupEdge { other: owner, ..edge };
            let backward_list = &mut self.groups.get_mut(&edge.other).unwrap().backward_edges;
            if !backward_list.iter().any(|e| group_edge_eq(e, &backward)) {
                backward_list.push(backward);
            }
        }
        for constraint in fragment.constraints {
            if constraint.is_well_formed() {
                self.constraints.entry(constraint.id).or_insert(constraint);
            } else {
                warn!(constraint_id = ?constraint.id, "dropping malformed constraint sequence");
            }
        }
    }

    fn ensure_member(&mut self, vertex_id: VertexId, group_vertex_id: GroupVertexId, member_index: usize) -> MemberIndex {
        if let Some(&index) = self.vertex_index.get(&vertex_id) {
            return index;
        }
        let index = MemberIndex(self.members.len());
        self.members.push(MemberVertex::new(vertex_id, group_vertex_id, member_index));
        self.vertex_index.insert(vertex_id, index);
        self.groups.entry(group_vertex_id).or_insert_with(GroupVertex::new).members.push(index);
        index
    }

    fn ensure_gate(&mut self, member: MemberIndex, direction: GateDirection, gate_index: u32) -> GateIndex {
        let existing = {
            let m = self.member(member);
            let table = match direction {
                GateDirection::Input => &m.input_gates,
                GateDirection::Output => &m.output_gates,
            };
            table.get(&gate_index).copied()
        };
        if let Some(index) = existing {
            return index;
        }
        let id = GateId(self.next_gate_id);
        self.next_gate_id += 1;
        let index = GateIndex(self.gates.len());
        self.gates.push(Gate::new(id, member, direction, gate_index));
        self.gate_id_index.insert(id, index);
        let m = self.member_mut(member);
        match direction {
            GateDirection::Input => m.input_gates.insert(gate_index, index),
            GateDirection::Output => m.output_gates.insert(gate_index, index),
        };
        index
    }

    /// Applies a single resolved vertex announcement: creates the member
    /// and its named gates if absent, and arms the (input, output)
    /// combination when both are named.
    pub fn apply_vertex_announcement(&mut self, announcement: VertexReporterAnnouncement) {
        let member = self.ensure_member(announcement.vertex_id, announcement.group_vertex_id, announcement.member_index);
        if let Some(input_gate_index) = announcement.input_gate_index {
            self.ensure_gate(member, GateDirection::Input, input_gate_index);
        }
        if let Some(output_gate_index) = announcement.output_gate_index {
            self.ensure_gate(member, GateDirection::Output, output_gate_index);
        }
        if let (Some(i), Some(o)) = (announcement.input_gate_index, announcement.output_gate_index) {
            self.member_mut(member).arm(i, o);
        }
    }

    /// Whether both endpoint gates named by an edge announcement already
    /// exist in the graph (their owning vertices must have been announced
    /// with a matching gate index already).
    pub fn edge_endpoints_exist(&self, announcement: &EdgeReporterAnnouncement) -> bool {
        self.gate_index_of(announcement.source_vertex_id, GateDirection::Output, announcement.source_output_gate_index).is_some()
            && self.gate_index_of(announcement.target_vertex_id, GateDirection::Input, announcement.target_input_gate_index).is_some()
    }

    /// Applies a single resolved edge announcement. Idempotent: a repeat
    /// announcement for an already-indexed channel is a no-op.
    pub fn apply_edge_announcement(&mut self, announcement: EdgeReporterAnnouncement) -> Result<(), QosError> {
        if self.channel_index.contains_key(&announcement.source_channel_id) {
            return Ok(());
        }
        let source_gate = self
            .gate_index_of(announcement.source_vertex_id, GateDirection::Output, announcement.source_output_gate_index)
            .ok_or_else(|| QosError::InternalInvariant {
                description: format!("edge {:?} announced before its source gate existed", announcement.source_channel_id),
            })?;
        let target_gate = self
            .gate_index_of(announcement.target_vertex_id, GateDirection::Input, announcement.target_input_gate_index)
            .ok_or_else(|| QosError::InternalInvariant {
                description: format!("edge {:?} announced before its target gate existed", announcement.source_channel_id),
            })?;

        let edge_index = EdgeIndex(self.edges.len());
        self.edges.push(Edge::new(announcement.source_channel_id, source_gate, target_gate, announcement.owner));
        self.gates[source_gate.0].edges.push(edge_index);
        self.gates[target_gate.0].edges.push(edge_index);
        self.channel_index.insert(announcement.source_channel_id, edge_index);
        Ok(())
    }

    /// Records a vertex-latency sample. Unknown members/combinations are
    /// silently dropped — their reporter announcement will arrive later.
    pub fn record_vertex_latency(&mut self, vertex_id: VertexId, input_gate_index: u32, output_gate_index: u32, observed_at: Instant, latency_millis: f64) {
        let Some(&member) = self.vertex_index.get(&vertex_id) else { return };
        let Some(data) = self.member_mut(member).qos_data_mut(input_gate_index, output_gate_index) else { return };
        data.latest_sample = Some(Timestamped { observed_at, value: latency_millis });
    }

    /// Records a channel-latency sample. Unknown channels are silently
    /// dropped.
    pub fn record_edge_latency(&mut self, channel_id: ChannelId, observed_at: Instant, latency_millis: f64) {
        let Some(&edge) = self.channel_index.get(&channel_id) else { return };
        self.edge_mut(edge).qos.latency_millis = Some(Timestamped { observed_at, value: latency_millis });
    }

    /// Records an output-channel statistics sample. Unknown channels are
    /// silently dropped.
    pub fn record_edge_statistics(&mut self, channel_id: ChannelId, observed_at: Instant, statistics: ChannelStatistics) {
        let Some(&edge) = self.channel_index.get(&channel_id) else { return };
        self.edge_mut(edge).qos.statistics = Some(Timestamped { observed_at, value: statistics });
    }

    fn group_edge_distribution(&self, source_group: GroupVertexId, output_gate_index: u32, target_group: GroupVertexId, input_gate_index: u32) -> Option<Distribution> {
        let group = self.groups.get(&source_group)?;
        group
            .forward_edges
            .iter()
            .find(|e| e.other == target_group && e.output_gate_index == output_gate_index && e.input_gate_index == input_gate_index)
            .map(|e| e.distribution)
    }

    /// Walks forward along single-output-gate POINTWISE edges from `begin`
    /// to `end`, marking each traversed edge's QoS data as in-chain.
    ///
    /// Computes the full path before mutating anything: on failure, no
    /// edge is marked, matching the all-or-nothing semantics scenario 6
    /// exercises.
    pub fn process_chain_announce(&mut self, begin: VertexId, end: VertexId) -> Result<(), QosError> {
        let mut path = Vec::new();
        let mut current = begin;
        let max_hops = self.edges.len() + 1;

        for _ in 0..=max_hops {
            if current == end {
                for edge_index in &path {
                    self.edge_mut(*edge_index).in_chain = true;
                }
                return Ok(());
            }

            let member = self.member_index_of(current).ok_or_else(|| QosError::InvalidChain {
                begin,
                end,
                reason: format!("vertex {current} is not present in the graph"),
            })?;
            let member = self.member(member);
            if member.output_gates.len() != 1 {
                return Err(QosError::InvalidChain {
                    begin,
                    end,
                    reason: format!("vertex {current} has {} output gates, expected exactly 1", member.output_gates.len()),
                });
            }
            let (&output_gate_index, &output_gate) = member.output_gates.iter().next().unwrap();
            let gate = self.gate(output_gate);
            if gate.edges.len() != 1 {
                return Err(QosError::InvalidChain {
                    begin,
                    end,
                    reason: format!("vertex {current}'s single output gate fans out to {} edges", gate.edges.len()),
                });
            }
            let edge_index = gate.edges[0];
            let edge = self.edge(edge_index);
            let target_gate = self.gate(edge.target_gate);
            let target_member = self.member(target_gate.owner);
            let source_group = member.group;
            let target_group = target_member.group;
            let target_vertex_id = target_member.id;
            let input_gate_index = target_gate.gate_index;

            let distribution = self.group_edge_distribution(source_group, output_gate_index, target_group, input_gate_index);
            if distribution != Some(Distribution::Pointwise) {
                return Err(QosError::InvalidChain {
                    begin,
                    end,
                    reason: format!("edge from {current} is not POINTWISE"),
                });
            }

            path.push(edge_index);
            current = target_vertex_id;
        }

        Err(QosError::InvalidChain { begin, end, reason: "chain did not reach its end vertex".to_string() })
    }
}

fn group_edge_eq(a: &GroupEdge, b: &GroupEdge) -> bool {
    a.other == b.other && a.output_gate_index == b.output_gate_index && a.input_gate_index == b.input_gate_index && a.distribution == b.distribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use qos_messaging::TargetWorker;
    use std::time::Duration;

    fn sample_fragment(source: GroupVertexId, target: GroupVertexId, distribution: Distribution) -> ShallowGraphFragment {
        ShallowGraphFragment {
            group_vertices: vec![source, target],
            forward_edges: vec![(
                source,
                GroupEdge { other: target, output_gate_index: 0, input_gate_index: 0, distribution },
            )],
            constraints: vec![],
        }
    }

    #[test]
    fn merge_shallow_is_idempotent_on_known_ids() {
        let mut graph = QosGraph::new();
        let (g1, g2) = (GroupVertexId(1), GroupVertexId(2));
        graph.merge_shallow(sample_fragment(g1, g2, Distribution::Pointwise));
        graph.merge_shallow(sample_fragment(g1, g2, Distribution::Pointwise));
        assert_eq!(graph.group(g1).unwrap().forward_edges.len(), 1);
        assert_eq!(graph.group(g2).unwrap().backward_edges.len(), 1);
    }

    #[test]
    fn unknown_vertex_sample_does_not_mutate_the_graph() {
        let mut graph = QosGraph::new();
        graph.record_vertex_latency(VertexId(99), 0, 0, Instant::now(), 12.0);
        assert!(!graph.has_groups());
        assert!(graph.member_index_of(VertexId(99)).is_none());
    }

    #[test]
    fn vertex_announcement_creates_member_and_arms_combination() {
        let mut graph = QosGraph::new();
        let group = GroupVertexId(1);
        graph.merge_shallow(ShallowGraphFragment { group_vertices: vec![group], ..Default::default() });
        graph.apply_vertex_announcement(VertexReporterAnnouncement {
            vertex_id: VertexId(10),
            group_vertex_id: group,
            member_index: 0,
            input_gate_index: Some(0),
            output_gate_index: Some(0),
        });
        let member = graph.member_index_of(VertexId(10)).unwrap();
        assert!(graph.member(member).qos_data(0, 0).is_some());
        assert!(!graph.member(member).qos_data(0, 0).unwrap().is_active(Duration::from_secs(1), Instant::now()));
    }

    #[test]
    fn repeated_announcement_leaves_graph_unchanged() {
        let mut graph = QosGraph::new();
        let group = GroupVertexId(1);
        let ann = VertexReporterAnnouncement {
            vertex_id: VertexId(10),
            group_vertex_id: group,
            member_index: 0,
            input_gate_index: Some(0),
            output_gate_index: Some(0),
        };
        graph.apply_vertex_announcement(ann);
        graph.apply_vertex_announcement(ann);
        assert_eq!(graph.group(group).unwrap().members.len(), 1);
    }

    #[test]
    fn chain_announce_marks_pointwise_edges_and_rejects_bipartite() {
        let mut graph = QosGraph::new();
        let (ga, gb, gc) = (GroupVertexId(1), GroupVertexId(2), GroupVertexId(3));
        graph.merge_shallow(sample_fragment(ga, gb, Distribution::Bipartite));
        graph.merge_shallow(sample_fragment(gb, gc, Distribution::Pointwise));

        let a = VertexReporterAnnouncement { vertex_id: VertexId(1), group_vertex_id: ga, member_index: 0, input_gate_index: Some(0), output_gate_index: Some(0) };
        let b = VertexReporterAnnouncement { vertex_id: VertexId(2), group_vertex_id: gb, member_index: 0, input_gate_index: Some(0), output_gate_index: Some(0) };
        let c = VertexReporterAnnouncement { vertex_id: VertexId(3), group_vertex_id: gc, member_index: 0, input_gate_index: Some(0), output_gate_index: None };
        graph.apply_vertex_announcement(a);
        graph.apply_vertex_announcement(b);
        graph.apply_vertex_announcement(c);

        graph.apply_edge_announcement(EdgeReporterAnnouncement {
            source_channel_id: ChannelId(100),
            source_vertex_id: VertexId(1),
            source_output_gate_index: 0,
            target_vertex_id: VertexId(2),
            target_input_gate_index: 0,
            owner: TargetWorker(0),
        }).unwrap();
        graph.apply_edge_announcement(EdgeReporterAnnouncement {
            source_channel_id: ChannelId(101),
            source_vertex_id: VertexId(2),
            source_output_gate_index: 0,
            target_vertex_id: VertexId(3),
            target_input_gate_index: 0,
            owner: TargetWorker(0),
        }).unwrap();

        let err = graph.process_chain_announce(VertexId(1), VertexId(3)).unwrap_err();
        assert!(matches!(err, QosError::InvalidChain { .. }));
        let e1 = graph.edge(graph.edge_index_of(ChannelId(100)).unwrap());
        let e2 = graph.edge(graph.edge_index_of(ChannelId(101)).unwrap());
        assert!(!e1.in_chain && !e2.in_chain);
    }
}
