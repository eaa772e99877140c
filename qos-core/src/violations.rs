//! The constraint-violation finder: a depth-first traversal of the QoS
//! graph along a constraint's sequence, summing per-element latencies and
//! reporting paths whose sum diverges from the budget by more than 5%.

use crate::graph::{Constraint, MemberIndex, QosGraph, SequenceElement};
use crate::ids::{ChannelId, ConstraintId, VertexId};
use qos_logging::{Logger, Registry};
use qos_messaging::TargetWorker;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// One concrete hop in an enumerated path: either a vertex's
/// (input gate, output gate) combination or a traversed edge, each
/// carrying the latency sample it contributed.
#[derive(Clone, Debug, PartialEq)]
pub enum ConcreteStep {
    Vertex { vertex_id: VertexId, input_gate_index: u32, output_gate_index: u32, latency_millis: f64 },
    Edge { source_channel_id: ChannelId, source_vertex_id: VertexId, owner: TargetWorker, latency_millis: f64 },
}

/// One complete enumeration of a constraint's sequence against the graph,
/// logged regardless of whether it violates its budget.
#[derive(Clone, Debug)]
pub struct EnumeratedSequence {
    pub constraint_id: ConstraintId,
    pub path: Vec<ConcreteStep>,
    pub sum_millis: f64,
}

/// Receives notification of every path whose summed latency diverges from
/// its constraint's budget by more than 5%, in either direction.
pub trait ViolationListener {
    fn on_violation(&mut self, constraint_id: ConstraintId, path: &[ConcreteStep], excess_millis: f64);
}

/// Collects violations into a `Vec`, for tests and simple callers.
#[derive(Default)]
pub struct CollectingListener {
    pub violations: Vec<(ConstraintId, Vec<ConcreteStep>, f64)>,
}

impl ViolationListener for CollectingListener {
    fn on_violation(&mut self, constraint_id: ConstraintId, path: &[ConcreteStep], excess_millis: f64) {
        self.violations.push((constraint_id, path.to_vec(), excess_millis));
    }
}

/// Threshold (as a fraction of budget) beyond which a sum is reported.
const VIOLATION_THRESHOLD: f64 = 0.05;

/// Runs the violation finder over every constraint in the graph, logging
/// every fully-enumerated sequence and notifying `listener` of the ones
/// that exceed [`VIOLATION_THRESHOLD`].
///
/// Owns one `qos_logging::Logger<EnumeratedSequence>` per constraint,
/// allocated lazily on first use and kept for the life of the finder.
pub struct ViolationFinder {
    registry: Registry,
}

impl ViolationFinder {
    pub fn new(time: Instant) -> Self {
        ViolationFinder { registry: Registry::new(time) }
    }

    fn logger_for(&mut self, constraint_id: ConstraintId) -> Logger<EnumeratedSequence> {
        let name = constraint_id.to_string();
        if let Some(logger) = self.registry.get::<EnumeratedSequence>(&name) {
            return logger;
        }
        self.registry.insert::<EnumeratedSequence>(name.clone(), Box::new(|_elapsed, _batch| {}));
        self.registry.get::<EnumeratedSequence>(&name).expect("logger was just inserted")
    }

    pub fn find_violations(&mut self, graph: &QosGraph, now: Instant, sample_window: Duration, listener: &mut impl ViolationListener) {
        let constraints: Vec<Constraint> = graph.constraints().cloned().collect();
        for constraint in constraints {
            let logger = self.logger_for(constraint.id);
            find_violations_for_constraint(graph, &constraint, now, sample_window, &logger, listener);
        }
    }
}

fn find_violations_for_constraint(
    graph: &QosGraph,
    constraint: &Constraint,
    now: Instant,
    window: Duration,
    logger: &Logger<EnumeratedSequence>,
    listener: &mut impl ViolationListener,
) {
    let Some(first) = constraint.sequence.first() else { return };
    let Some(start_group) = graph.group(first.start_group()) else { return };

    let mut members = start_group.members.clone();
    members.sort_by_key(|&index| graph.member(index).member_index);

    for member in members {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        dfs(
            graph,
            &constraint.sequence,
            0,
            member,
            now,
            window,
            &mut visited,
            &mut path,
            0.0,
            &mut |path, sum| {
                logger.log(EnumeratedSequence { constraint_id: constraint.id, path: path.to_vec(), sum_millis: sum });
                let excess = sum - constraint.budget_millis;
                if (excess.abs() / constraint.budget_millis) > VIOLATION_THRESHOLD {
                    listener.on_violation(constraint.id, path, excess);
                }
            },
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    graph: &QosGraph,
    sequence: &[SequenceElement],
    pos: usize,
    member: MemberIndex,
    now: Instant,
    window: Duration,
    visited: &mut HashSet<(VertexId, u32, u32)>,
    path: &mut Vec<ConcreteStep>,
    sum: f64,
    on_complete: &mut impl FnMut(&[ConcreteStep], f64),
) {
    match &sequence[pos] {
        SequenceElement::Vertex { group_vertex_id, input_gate_index, output_gate_index } => {
            let vertex = graph.member(member);
            if vertex.group != *group_vertex_id {
                return;
            }
            let key = (vertex.id, *input_gate_index, *output_gate_index);
            if visited.contains(&key) {
                return;
            }
            let Some(data) = vertex.qos_data(*input_gate_index, *output_gate_index) else { return };
            if !data.is_active(window, now) {
                return;
            }
            let latency_millis = data.latest_sample.unwrap().value;

            visited.insert(key);
            path.push(ConcreteStep::Vertex {
                vertex_id: vertex.id,
                input_gate_index: *input_gate_index,
                output_gate_index: *output_gate_index,
                latency_millis,
            });

            if pos == sequence.len() - 1 {
                on_complete(path, sum + latency_millis);
            } else {
                dfs(graph, sequence, pos + 1, member, now, window, visited, path, sum + latency_millis, on_complete);
            }

            path.pop();
            visited.remove(&key);
        }
        SequenceElement::Edge { source_group_vertex_id, output_gate_index, target_group_vertex_id, input_gate_index } => {
            let vertex = graph.member(member);
            if vertex.group != *source_group_vertex_id {
                return;
            }
            let Some(&output_gate) = vertex.output_gates.get(output_gate_index) else { return };

            for &edge_index in &graph.gate(output_gate).edges {
                let edge = graph.edge(edge_index);
                let target_gate = graph.gate(edge.target_gate);
                if target_gate.gate_index != *input_gate_index {
                    continue;
                }
                let target_member_index = target_gate.owner;
                let target_member = graph.member(target_member_index);
                if target_member.group != *target_group_vertex_id {
                    continue;
                }
                if !edge.qos.is_active(window, now) {
                    continue;
                }
                let latency_millis = edge.qos.latency_millis.unwrap().value;

                path.push(ConcreteStep::Edge { source_channel_id: edge.source_channel_id, source_vertex_id: vertex.id, owner: edge.owner, latency_millis });

                if pos == sequence.len() - 1 {
                    on_complete(path, sum + latency_millis);
                } else {
                    dfs(graph, sequence, pos + 1, target_member_index, now, window, visited, path, sum + latency_millis, on_complete);
                }

                path.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Distribution, EdgeReporterAnnouncement, GroupEdge, ShallowGraphFragment, VertexReporterAnnouncement};
    use crate::ids::{ChannelId, ConstraintId, GroupVertexId};
    use qos_messaging::TargetWorker;

    fn build_chain(latencies: (f64, f64, f64)) -> QosGraph {
        let mut graph = QosGraph::new();
        let (ga, gb, gc) = (GroupVertexId(1), GroupVertexId(2), GroupVertexId(3));
        graph.merge_shallow(ShallowGraphFragment {
            group_vertices: vec![ga, gb, gc],
            forward_edges: vec![
                (ga, GroupEdge { other: gb, output_gate_index: 0, input_gate_index: 0, distribution: Distribution::Pointwise }),
                (gb, GroupEdge { other: gc, output_gate_index: 0, input_gate_index: 0, distribution: Distribution::Pointwise }),
            ],
            constraints: vec![],
        });

        for (id, group) in [(VertexId(1), ga), (VertexId(2), gb), (VertexId(3), gc)] {
            graph.apply_vertex_announcement(VertexReporterAnnouncement {
                vertex_id: id,
                group_vertex_id: group,
                member_index: 0,
                input_gate_index: Some(0),
                output_gate_index: Some(0),
            });
        }
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

        let now = Instant::now();
        graph.record_vertex_latency(VertexId(1), 0, 0, now, latencies.0);
        graph.record_edge_latency(ChannelId(100), now, 0.0);
        graph.record_edge_statistics(ChannelId(100), now, crate::graph::ChannelStatistics { throughput_records_per_sec: 0.0, output_buffer_fill_ratio: 0.0 });
        graph.record_edge_latency(ChannelId(100), now, latencies.1);
        graph.record_edge_statistics(ChannelId(100), now, crate::graph::ChannelStatistics { throughput_records_per_sec: 100.0, output_buffer_fill_ratio: 0.1 });
        graph.record_vertex_latency(VertexId(2), 0, 0, now, latencies.2);
        graph
    }

    fn three_step_constraint(budget: f64) -> Constraint {
        Constraint {
            id: ConstraintId(1),
            sequence: vec![
                SequenceElement::Vertex { group_vertex_id: GroupVertexId(1), input_gate_index: 0, output_gate_index: 0 },
                SequenceElement::Edge { source_group_vertex_id: GroupVertexId(1), output_gate_index: 0, target_group_vertex_id: GroupVertexId(2), input_gate_index: 0 },
                SequenceElement::Vertex { group_vertex_id: GroupVertexId(2), input_gate_index: 0, output_gate_index: 0 },
            ],
            budget_millis: budget,
        }
    }

    #[test]
    fn scenario_violation_detection() {
        let graph = build_chain((30.0, 50.0, 25.0));
        let constraint = three_step_constraint(80.0);
        let mut finder = ViolationFinder::new(Instant::now());
        let mut listener = CollectingListener::default();
        find_violations_for_constraint(&graph, &constraint, Instant::now(), Duration::from_secs(2), &finder.logger_for(constraint.id), &mut listener);
        assert_eq!(listener.violations.len(), 1);
        let (_, _, excess) = &listener.violations[0];
        assert!((*excess - 25.0).abs() < 1e-9);
    }

    #[test]
    fn scenario_just_within_threshold_suppressed() {
        let graph = build_chain((30.0, 50.0, 3.0));
        let constraint = three_step_constraint(80.0);
        let mut finder = ViolationFinder::new(Instant::now());
        let mut listener = CollectingListener::default();
        find_violations_for_constraint(&graph, &constraint, Instant::now(), Duration::from_secs(2), &finder.logger_for(constraint.id), &mut listener);
        assert!(listener.violations.is_empty());
    }
}
