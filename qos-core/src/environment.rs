//! Per-job environment: the lifecycle owner tying the forwarder, the
//! lazily-instantiated manager, and per-task coordinators together for one
//! job on this worker.

use crate::config::QosConfig;
use crate::error::{QosError, QosResult};
use crate::forwarder::ReportForwarder;
use crate::ids::{ChannelId, JobId, VertexId};
use crate::messages::{
    ConstructStreamChainAction, DeployInstanceQosRolesAction, LimitBufferSizeAction, OutboundMessage, QosReport, StreamChainAnnounce,
};
use crate::model::QosModel;
use crate::violations::ViolationFinder;
use qos_messaging::Dispatcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tracing::{debug, warn};

/// A task-side coordinator registered for one vertex. Only runtime-typed
/// tasks whose invokable environment is a stream task environment
/// participate; callers decide that filtering before calling
/// [`JobEnvironment::register_task`].
pub struct TaskCoordinator {
    pub vertex_id: VertexId,
}

/// The job's elected-manager state, instantiated lazily on first manager-role
/// message or first inbound `QosReport` — many per-job environments never
/// play the manager role, so eager construction would waste a worker thread
/// and a graph for most jobs.
pub struct ManagerState {
    model: Mutex<QosModel>,
    finder: Mutex<ViolationFinder>,
}

impl ManagerState {
    fn new(sample_window: std::time::Duration) -> Self {
        ManagerState { model: Mutex::new(QosModel::new(sample_window)), finder: Mutex::new(ViolationFinder::new(Instant::now())) }
    }
}

/// Owns one job's forwarder, its (possibly absent) manager, and its
/// per-task coordinators. Created on first task registration for the job,
/// torn down on last task unregistration or explicit shutdown.
pub struct JobEnvironment {
    job_id: JobId,
    config: QosConfig,
    dispatcher: Arc<Dispatcher<OutboundMessage>>,
    forwarder: Mutex<Option<ReportForwarder>>,
    manager: OnceLock<ManagerState>,
    coordinators: Mutex<HashMap<VertexId, TaskCoordinator>>,
}

impl JobEnvironment {
    pub fn new(job_id: JobId, config: QosConfig, dispatcher: Arc<Dispatcher<OutboundMessage>>) -> Self {
        JobEnvironment {
            job_id,
            config,
            dispatcher,
            forwarder: Mutex::new(None),
            manager: OnceLock::new(),
            coordinators: Mutex::new(HashMap::new()),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Registers a task, rejecting a duplicate `VertexId`. Eagerly
    /// instantiates this job's forwarder on first registration.
    pub fn register_task(&self, vertex_id: VertexId) -> QosResult<()> {
        {
            let mut forwarder = self.forwarder.lock().unwrap();
            if forwarder.is_none() {
                *forwarder = Some(ReportForwarder::spawn(
                    self.job_id,
                    self.config.aggregation_interval,
                    self.config.tagging_interval,
                    Arc::clone(&self.dispatcher),
                ));
            }
        }

        let mut coordinators = self.coordinators.lock().unwrap();
        if coordinators.contains_key(&vertex_id) {
            return Err(QosError::AlreadyRegistered { vertex_id });
        }
        coordinators.insert(vertex_id, TaskCoordinator { vertex_id });
        Ok(())
    }

    /// Removes a task's coordinator. When the last one departs, the
    /// environment shuts down.
    pub fn unregister_task(&self, vertex_id: VertexId) {
        let became_empty = {
            let mut coordinators = self.coordinators.lock().unwrap();
            coordinators.remove(&vertex_id);
            coordinators.is_empty()
        };
        if became_empty {
            self.shutdown();
        }
    }

    fn manager(&self) -> &ManagerState {
        self.manager.get_or_init(|| ManagerState::new(self.config.sample_window))
    }

    /// Demultiplexes one inbound message by kind.
    pub fn handle(&self, message: JobMessage) {
        match message {
            JobMessage::Report(report) => self.handle_report(report),
            JobMessage::DeployRoles(action) => self.handle_deploy_roles(action),
            JobMessage::LimitBufferSize(action) => self.handle_limit_buffer_size(action),
            JobMessage::ConstructStreamChain(action) => self.handle_construct_stream_chain(action),
            JobMessage::StreamChainAnnounce(announce) => self.handle_stream_chain_announce(announce),
        }
    }

    fn handle_report(&self, report: QosReport) {
        let manager = self.manager();
        manager.model.lock().unwrap().process_report(report, Instant::now());
        self.run_violation_finder();
    }

    fn run_violation_finder(&self) {
        let manager = self.manager();
        let model = manager.model.lock().unwrap();
        let mut finder = manager.finder.lock().unwrap();
        let mut listener = DispatchingListener { job_id: self.job_id, dispatcher: &self.dispatcher };
        finder.find_violations(model.graph(), Instant::now(), model.sample_window(), &mut listener);
    }

    fn handle_deploy_roles(&self, action: DeployInstanceQosRolesAction) {
        if let Some(forwarder) = self.forwarder.lock().unwrap().as_ref() {
            forwarder.reconfigure(&action, self.config.aggregation_interval, self.config.tagging_interval);
        }
        if let Some(assignment) = action.qos_manager_assignment {
            self.manager().model.lock().unwrap().merge_shallow(assignment.shallow_graph);
        }
    }

    fn handle_limit_buffer_size(&self, action: LimitBufferSizeAction) {
        let coordinators = self.coordinators.lock().unwrap();
        if !coordinators.contains_key(&action.target_vertex_id) {
            warn!(vertex_id = ?action.target_vertex_id, "buffer-size action addressed to an unregistered task");
        }
        // Applying the buffer cap is the host engine's responsibility; this
        // subsystem only routes the action to the addressed coordinator.
    }

    fn handle_construct_stream_chain(&self, _action: ConstructStreamChainAction) {
        debug!("ConstructStreamChainAction is a no-op at the task-manager plugin; chains are built via StreamChainAnnounce");
    }

    fn handle_stream_chain_announce(&self, announce: StreamChainAnnounce) {
        let manager = self.manager();
        if let Err(err) = manager.model.lock().unwrap().process_chain_announce(announce.chain_begin, announce.chain_end) {
            warn!(%err, "dropping invalid chain announcement");
        }
    }

    /// Stops the manager (if any) and the forwarder (if any), and clears
    /// the coordinator map. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut forwarder) = self.forwarder.lock().unwrap().take() {
            forwarder.shutdown();
        }
        self.coordinators.lock().unwrap().clear();
    }
}

impl Drop for JobEnvironment {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct DispatchingListener<'a> {
    job_id: JobId,
    dispatcher: &'a Dispatcher<OutboundMessage>,
}

/// Output-buffer byte budget the dispatcher proposes for the most severe
/// violation it can observe (excess equal to the whole constraint budget).
/// Scaled down linearly for smaller excess ratios.
const MAX_BUFFER_REDUCTION_BYTES: u64 = 64 * 1024;

impl crate::violations::ViolationListener for DispatchingListener<'_> {
    fn on_violation(&mut self, constraint_id: crate::ids::ConstraintId, path: &[crate::violations::ConcreteStep], excess_millis: f64) {
        debug!(job_id = ?self.job_id, ?constraint_id, excess_millis, "constraint violation detected");
        if excess_millis <= 0.0 {
            return;
        }
        for step in path {
            if let crate::violations::ConcreteStep::Edge { source_channel_id, source_vertex_id, owner, latency_millis } = step {
                self.notify_edge(*source_channel_id, *source_vertex_id, *owner, *latency_millis, excess_millis);
            }
        }
    }
}

impl DispatchingListener<'_> {
    fn notify_edge(&self, source_channel_id: ChannelId, target_vertex_id: VertexId, owner: qos_messaging::TargetWorker, edge_latency_millis: f64, excess_millis: f64) {
        let severity = (edge_latency_millis / excess_millis.max(edge_latency_millis)).clamp(0.0, 1.0);
        let buffer_size_bytes = (severity * MAX_BUFFER_REDUCTION_BYTES as f64) as u64;
        let action = LimitBufferSizeAction { job_id: self.job_id, target_vertex_id, source_channel_id, buffer_size_bytes };
        if let Err(err) = self.dispatcher.send(owner, OutboundMessage::LimitBufferSize(action)) {
            warn!(%err, ?source_channel_id, "failed to dispatch buffer-size action");
        }
    }
}

/// Inbound messages routed to a job's environment by `JobId`.
pub enum JobMessage {
    Report(QosReport),
    DeployRoles(DeployInstanceQosRolesAction),
    LimitBufferSize(LimitBufferSizeAction),
    ConstructStreamChain(ConstructStreamChainAction),
    StreamChainAnnounce(StreamChainAnnounce),
}
