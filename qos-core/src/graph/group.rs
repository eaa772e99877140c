//! Group vertices: logical operators, parent of parallel member vertices.

use super::arena::MemberIndex;
use crate::ids::GroupVertexId;
use serde::{Deserialize, Serialize};

/// The distribution pattern a group edge describes between two groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    /// Each source member connects to exactly the corresponding target member.
    Pointwise,
    /// Every source member connects to every target member.
    Bipartite,
}

/// A group-level connection between two group vertices, as announced by
/// a shallow graph fragment.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GroupEdge {
    pub other: GroupVertexId,
    pub output_gate_index: u32,
    pub input_gate_index: u32,
    pub distribution: Distribution,
}

/// A logical operator node: parent of parallel member vertices, connected
/// to other group vertices via ordered forward/backward group edges.
#[derive(Clone, Debug, Default)]
pub struct GroupVertex {
    pub members: Vec<MemberIndex>,
    pub forward_edges: Vec<GroupEdge>,
    pub backward_edges: Vec<GroupEdge>,
}

impl GroupVertex {
    pub fn new() -> Self {
        GroupVertex::default()
    }

    /// A group vertex with zero members is the definition of "shallow".
    pub fn is_shallow(&self) -> bool {
        self.members.is_empty()
    }
}
