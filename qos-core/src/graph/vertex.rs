//! Member vertices: one parallel instance of a group vertex.

use super::arena::GateIndex;
use super::edge::Timestamped;
use crate::ids::{GroupVertexId, VertexId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// The QoS data tracked for one active (input-gate, output-gate)
/// combination on a member vertex: the latest end-to-end processing
/// latency sample for records flowing through that combination.
#[derive(Clone, Copy, Debug)]
pub struct VertexQosData {
    pub latest_sample: Option<Timestamped<f64>>,
}

impl VertexQosData {
    fn armed() -> Self {
        VertexQosData { latest_sample: None }
    }

    /// Active once it has received at least one sample within the
    /// aggregation window.
    pub fn is_active(&self, window: Duration, now: Instant) -> bool {
        match &self.latest_sample {
            Some(sample) => now.saturating_duration_since(sample.observed_at) <= window,
            None => false,
        }
    }
}

/// One parallel instance of a group vertex.
#[derive(Clone, Debug)]
pub struct MemberVertex {
    pub id: VertexId,
    pub group: GroupVertexId,
    /// This member's position within its group's ordered member list —
    /// the enumeration order the violation finder walks members in.
    pub member_index: usize,
    /// Gate-index to arena-index, keyed sparsely: not every gate index a
    /// reporter could ever name is necessarily ever announced.
    pub input_gates: HashMap<u32, GateIndex>,
    pub output_gates: HashMap<u32, GateIndex>,
    /// QoS data per active (inputGateIndex, outputGateIndex) combination.
    /// A combination only appears here once a reporter has been announced
    /// for it (the "armed" state); absence means "not active", whether or
    /// not it will later be armed.
    qos_data: HashMap<(u32, u32), VertexQosData>,
}

impl MemberVertex {
    pub fn new(id: VertexId, group: GroupVertexId, member_index: usize) -> Self {
        MemberVertex { id, group, member_index, input_gates: HashMap::new(), output_gates: HashMap::new(), qos_data: HashMap::new() }
    }

    /// Arms (input_gate_index, output_gate_index) for incoming samples,
    /// idempotent if already armed.
    pub fn arm(&mut self, input_gate_index: u32, output_gate_index: u32) {
        self.qos_data.entry((input_gate_index, output_gate_index)).or_insert_with(VertexQosData::armed);
    }

    pub fn qos_data(&self, input_gate_index: u32, output_gate_index: u32) -> Option<&VertexQosData> {
        self.qos_data.get(&(input_gate_index, output_gate_index))
    }

    pub fn qos_data_mut(&mut self, input_gate_index: u32, output_gate_index: u32) -> Option<&mut VertexQosData> {
        self.qos_data.get_mut(&(input_gate_index, output_gate_index))
    }
}
