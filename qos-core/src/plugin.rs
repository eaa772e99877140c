//! Process-wide plugin entry: configuration defaults, the outbound
//! dispatcher, and the mapping from job to per-job environment.
//!
//! Lifecycle: one `Plugin` is created at worker start and torn down at
//! worker stop. Per the design notes, this crate introduces no
//! process-global `static` for it — the host holds the returned handle and
//! threads it through its own registration/routing calls; a process-wide
//! lookup, if the RPC boundary needs one, is the host's concern.

use crate::config::QosConfig;
use crate::environment::{JobEnvironment, JobMessage};
use crate::error::{QosError, QosResult};
use crate::ids::{JobId, VertexId};
use crate::messages::{
    ConstructStreamChainAction, DeployInstanceQosRolesAction, LimitBufferSizeAction, OutboundMessage, QosReport, StreamChainAnnounce,
};
use qos_messaging::{Dispatcher, Transport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A task the host engine is registering, as seen at the plugin boundary.
/// Only tasks whose invokable environment is a stream task environment
/// participate; the host filters before calling [`Plugin::register_task`].
pub struct TaskHandle {
    pub job_id: JobId,
    pub vertex_id: VertexId,
}

/// Process-wide QoS subsystem state.
pub struct Plugin {
    defaults: QosConfig,
    dispatcher: Arc<Dispatcher<OutboundMessage>>,
    jobs: Mutex<HashMap<JobId, Arc<JobEnvironment>>>,
}

impl Plugin {
    /// Initializes the plugin, spawning the shared outbound dispatcher.
    /// Fails only if a required configuration key is missing.
    pub fn new(defaults: QosConfig, transport: impl Transport<OutboundMessage> + 'static) -> QosResult<Self> {
        let dispatcher = Arc::new(Dispatcher::spawn("qos-dispatcher", transport));
        Ok(Plugin { defaults, dispatcher, jobs: Mutex::new(HashMap::new()) })
    }

    fn job_environment(&self, job_id: JobId, job_config: &QosConfig) -> Arc<JobEnvironment> {
        let mut jobs = self.jobs.lock().unwrap();
        Arc::clone(jobs.entry(job_id).or_insert_with(|| Arc::new(JobEnvironment::new(job_id, job_config.clone(), Arc::clone(&self.dispatcher)))))
    }

    /// Registers a task, demultiplexing to its job's environment (created
    /// on first use). `job_config` overrides `self.defaults` for this job.
    pub fn register_task(&self, task: &TaskHandle, job_config: &HashMap<String, String>) -> QosResult<()> {
        let config = QosConfig::overlay(&self.defaults, job_config);
        let environment = self.job_environment(task.job_id, &config);
        environment.register_task(task.vertex_id)
    }

    pub fn unregister_task(&self, task: &TaskHandle) {
        let environment = {
            let jobs = self.jobs.lock().unwrap();
            jobs.get(&task.job_id).cloned()
        };
        if let Some(environment) = environment {
            environment.unregister_task(task.vertex_id);
        }
    }

    /// Routes an inbound message to the job environment named by its
    /// `JobId`. Unknown message kinds are logged and dropped.
    pub fn handle_message(&self, message: InboundMessage) -> QosResult<()> {
        let job_id = message.job_id();
        let environment = {
            let mut jobs = self.jobs.lock().unwrap();
            Arc::clone(jobs.entry(job_id).or_insert_with(|| Arc::new(JobEnvironment::new(job_id, self.defaults.clone(), Arc::clone(&self.dispatcher)))))
        };
        environment.handle(message.into());
        Ok(())
    }

    /// Tears down every job environment. Idempotent: a job whose
    /// environment already shut down is simply dropped from the map.
    pub fn shutdown(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap());
        for (_, environment) in jobs {
            environment.shutdown();
        }
    }
}

/// Inbound wire messages, tagged with enough of their own shape to resolve
/// a `JobId` before dispatch.
pub enum InboundMessage {
    Report(QosReport),
    DeployRoles(DeployInstanceQosRolesAction),
    LimitBufferSize(LimitBufferSizeAction),
    ConstructStreamChain(ConstructStreamChainAction),
    StreamChainAnnounce(StreamChainAnnounce),
}

impl InboundMessage {
    fn job_id(&self) -> JobId {
        match self {
            InboundMessage::Report(report) => report.job_id,
            InboundMessage::DeployRoles(action) => action.job_id,
            InboundMessage::LimitBufferSize(action) => action.job_id,
            InboundMessage::ConstructStreamChain(action) => action.job_id,
            InboundMessage::StreamChainAnnounce(announce) => announce.job_id,
        }
    }
}

impl From<InboundMessage> for JobMessage {
    fn from(message: InboundMessage) -> Self {
        match message {
            InboundMessage::Report(report) => JobMessage::Report(report),
            InboundMessage::DeployRoles(action) => JobMessage::DeployRoles(action),
            InboundMessage::LimitBufferSize(action) => JobMessage::LimitBufferSize(action),
            InboundMessage::ConstructStreamChain(action) => JobMessage::ConstructStreamChain(action),
            InboundMessage::StreamChainAnnounce(announce) => JobMessage::StreamChainAnnounce(announce),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qos_messaging::TransportFailure;
    use std::sync::Mutex as StdMutex;

    struct NullTransport;
    impl Transport<OutboundMessage> for NullTransport {
        fn send(&self, _target: qos_messaging::TargetWorker, _message: OutboundMessage) -> Result<(), TransportFailure> {
            Ok(())
        }
    }

    #[test]
    fn register_task_creates_job_environment_on_first_use() {
        let plugin = Plugin::new(QosConfig::default(), NullTransport).unwrap();
        let task = TaskHandle { job_id: JobId(1), vertex_id: VertexId(1) };
        plugin.register_task(&task, &HashMap::new()).unwrap();
        assert_eq!(plugin.jobs.lock().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let plugin = Plugin::new(QosConfig::default(), NullTransport).unwrap();
        let task = TaskHandle { job_id: JobId(1), vertex_id: VertexId(1) };
        plugin.register_task(&task, &HashMap::new()).unwrap();
        let err = plugin.register_task(&task, &HashMap::new()).unwrap_err();
        assert!(matches!(err, QosError::AlreadyRegistered { .. }));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let plugin = Plugin::new(QosConfig::default(), NullTransport).unwrap();
        plugin.shutdown();
        plugin.shutdown();
        let _ = StdMutex::new(());
    }
}
