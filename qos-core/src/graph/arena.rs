//! Arena index newtypes.
//!
//! Member vertices, gates and edges are never removed before job teardown
//! (see the data model's Lifecycles), so the graph can address them with
//! plain growable-`Vec` indices instead of a generational/free-list arena —
//! there is no reuse to guard against.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemberIndex(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GateIndex(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeIndex(pub usize);
