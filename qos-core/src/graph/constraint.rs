//! Latency constraints: sequences of vertex-steps and edge-steps with a
//! latency budget.

use crate::ids::{ConstraintId, GroupVertexId};
use serde::{Deserialize, Serialize};

/// One element of a constraint's sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceElement {
    /// A hop through a member vertex's (input gate, output gate) combination.
    Vertex {
        group_vertex_id: GroupVertexId,
        input_gate_index: u32,
        output_gate_index: u32,
    },
    /// A hop across an edge between two groups' gates.
    Edge {
        source_group_vertex_id: GroupVertexId,
        output_gate_index: u32,
        target_group_vertex_id: GroupVertexId,
        input_gate_index: u32,
    },
}

impl SequenceElement {
    /// The group vertex this element starts at — itself for a vertex-step,
    /// its source group for an edge-step.
    pub fn start_group(&self) -> GroupVertexId {
        match self {
            SequenceElement::Vertex { group_vertex_id, .. } => *group_vertex_id,
            SequenceElement::Edge { source_group_vertex_id, .. } => *source_group_vertex_id,
        }
    }
}

/// A sequence of sequence-elements with an end-to-end latency budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Constraint {
    pub id: ConstraintId,
    pub sequence: Vec<SequenceElement>,
    pub budget_millis: f64,
}

impl Constraint {
    /// Sequence must be non-empty and alternate consistently: each
    /// edge-step's endpoints must match its adjacent vertex-steps' groups
    /// where those neighbors are vertex-steps.
    pub fn is_well_formed(&self) -> bool {
        if self.sequence.is_empty() {
            return false;
        }
        for window in self.sequence.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            let chains = match (a, b) {
                (SequenceElement::Vertex { group_vertex_id, .. }, SequenceElement::Edge { source_group_vertex_id, .. }) => {
                    group_vertex_id == source_group_vertex_id
                }
                (SequenceElement::Edge { target_group_vertex_id, .. }, SequenceElement::Vertex { group_vertex_id, .. }) => {
                    target_group_vertex_id == group_vertex_id
                }
                (SequenceElement::Edge { target_group_vertex_id, .. }, SequenceElement::Edge { source_group_vertex_id, .. }) => {
                    target_group_vertex_id == source_group_vertex_id
                }
                (SequenceElement::Vertex { .. }, SequenceElement::Vertex { .. }) => false,
            };
            if !chains {
                return false;
            }
        }
        true
    }
}
