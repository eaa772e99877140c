//! The task-manager-side component of a streaming dataflow engine's
//! Quality-of-Service subsystem.
//!
//! Per-vertex processing latencies and per-edge channel statistics are
//! collected by task-side reporters, forwarded by the per-job
//! [`forwarder::ReportForwarder`] to the worker elected QoS manager for
//! the job, assembled into a sparse [`graph::QosGraph`] by the
//! [`model::QosModel`] state machine, and checked against declared latency
//! constraints by the [`violations`] finder. Detected violations produce
//! runtime actions — reducing output buffer sizes, chaining consecutive
//! tasks — dispatched back to the worker hosting the offending edge.
//!
//! [`environment::JobEnvironment`] ties these together per job; the process-
//! wide [`plugin::Plugin`] demultiplexes task registration and inbound
//! messages by [`ids::JobId`].

#![forbid(unsafe_code)]

pub mod config;
pub mod environment;
pub mod error;
pub mod forwarder;
pub mod graph;
pub mod ids;
pub mod messages;
pub mod model;
pub mod plugin;
pub mod violations;

pub use config::QosConfig;
pub use error::{QosError, QosResult};
pub use plugin::Plugin;
