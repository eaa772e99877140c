//! Opaque, fixed-width identifier types.
//!
//! Every identifier here is `Copy + Eq + Hash`; nothing about ordering or
//! internal structure is ever relied upon, only equality and hashability
//! (see the data model's Identifier types section).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

opaque_id!(JobId, "Identifies a streaming job.");
opaque_id!(GroupVertexId, "Identifies a group vertex (logical operator).");
opaque_id!(VertexId, "Identifies a member vertex (one parallel instance).");
opaque_id!(GateId, "Identifies a gate (input or output port) on a member vertex.");
opaque_id!(ChannelId, "Identifies the source side of an edge.");
opaque_id!(ConstraintId, "Identifies a latency constraint.");
