//! Per-job report forwarder: batches locally produced samples and
//! reporter announcements, and ships one bundled [`QosReport`] to the
//! currently elected manager worker on every aggregation tick.

use crate::ids::{ChannelId, JobId, VertexId};
use crate::messages::{
    DeployInstanceQosRolesAction, EdgeLatencySample, EdgeQosReporterConfig, EdgeStatisticsSample, OutboundMessage, QosReport,
    VertexLatencySample, VertexQosReporterConfig,
};
use crate::graph::{ChannelStatistics, EdgeReporterAnnouncement, VertexReporterAnnouncement};
use qos_messaging::{Dispatcher, TargetWorker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::trace;

struct ForwarderState {
    manager_target: Option<TargetWorker>,
    aggregation_interval: Duration,
    tagging_interval: u32,
    vertex_reporters: Vec<VertexQosReporterConfig>,
    edge_reporters: Vec<EdgeQosReporterConfig>,
    pending: QosReport,
}

impl ForwarderState {
    fn new(job_id: JobId, aggregation_interval: Duration, tagging_interval: u32) -> Self {
        ForwarderState {
            manager_target: None,
            aggregation_interval,
            tagging_interval,
            vertex_reporters: Vec::new(),
            edge_reporters: Vec::new(),
            pending: QosReport { job_id, ..Default::default() },
        }
    }

    fn take_report(&mut self) -> QosReport {
        std::mem::replace(&mut self.pending, QosReport { job_id: self.pending.job_id, ..Default::default() })
    }
}

/// Owns the aggregation-interval ticker thread and the batch of samples
/// and announcements accumulated since the last tick.
pub struct ReportForwarder {
    job_id: JobId,
    state: Arc<Mutex<ForwarderState>>,
    shutdown: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl ReportForwarder {
    pub fn spawn(job_id: JobId, aggregation_interval: Duration, tagging_interval: u32, dispatcher: Arc<Dispatcher<OutboundMessage>>) -> Self {
        let state = Arc::new(Mutex::new(ForwarderState::new(job_id, aggregation_interval, tagging_interval)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let ticker_state = Arc::clone(&state);
        let ticker_shutdown = Arc::clone(&shutdown);
        let ticker = thread::Builder::new()
            .name(format!("qos-forwarder-{job_id}"))
            .spawn(move || {
                while !ticker_shutdown.load(Ordering::Acquire) {
                    let interval = ticker_state.lock().unwrap().aggregation_interval;
                    thread::sleep(interval);
                    if ticker_shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    tick(&ticker_state, &dispatcher);
                }
                // Final flush: ship whatever accumulated since the last tick.
                tick(&ticker_state, &dispatcher);
            })
            .expect("failed to spawn forwarder ticker thread");

        ReportForwarder { job_id, state, shutdown, ticker: Some(ticker) }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Applies a `DeployInstanceQosRolesAction`: sets the manager target
    /// (if a new assignment is present), the reporter activation sets, and
    /// the aggregation/tagging intervals.
    pub fn reconfigure(&self, action: &DeployInstanceQosRolesAction, default_aggregation_interval: Duration, default_tagging_interval: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(assignment) = &action.qos_manager_assignment {
            state.manager_target = Some(assignment.manager_worker);
        }
        state.vertex_reporters = action.vertex_qos_reporters.clone();
        state.edge_reporters = action.edge_qos_reporters.clone();
        state.aggregation_interval = default_aggregation_interval;
        state.tagging_interval = default_tagging_interval;
    }

    pub fn record_vertex_latency(&self, vertex_id: VertexId, input_gate_index: u32, output_gate_index: u32, latency_millis: f64) {
        let mut state = self.state.lock().unwrap();
        state.pending.vertex_latencies.push(VertexLatencySample { vertex_id, input_gate_index, output_gate_index, latency_millis });
    }

    pub fn record_edge_latency(&self, source_channel_id: ChannelId, latency_millis: f64) {
        let mut state = self.state.lock().unwrap();
        state.pending.edge_latencies.push(EdgeLatencySample { source_channel_id, latency_millis });
    }

    pub fn record_edge_statistics(&self, source_channel_id: ChannelId, statistics: ChannelStatistics) {
        let mut state = self.state.lock().unwrap();
        state.pending.edge_statistics.push(EdgeStatisticsSample { source_channel_id, statistics });
    }

    pub fn announce_vertex_reporter(&self, announcement: VertexReporterAnnouncement) {
        let mut state = self.state.lock().unwrap();
        state.pending.vertex_reporter_announcements.push(announcement);
    }

    pub fn announce_edge_reporter(&self, announcement: EdgeReporterAnnouncement) {
        let mut state = self.state.lock().unwrap();
        state.pending.edge_reporter_announcements.push(announcement);
    }

    /// Stops the ticker, which performs one last flush before exiting.
    /// Idempotent: a second call observes the ticker handle already taken.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(ticker) = self.ticker.take() {
            drop(ticker.join());
        }
    }
}

impl Drop for ReportForwarder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tick(state: &Arc<Mutex<ForwarderState>>, dispatcher: &Dispatcher<OutboundMessage>) {
    let (target, report) = {
        let mut state = state.lock().unwrap();
        (state.manager_target, state.take_report())
    };
    let Some(target) = target else {
        trace!(job_id = ?report.job_id, "no manager elected yet, dropping tick");
        return;
    };
    if report.is_empty() {
        return;
    }
    if let Err(err) = dispatcher.send(target, OutboundMessage::Report(report)) {
        tracing::warn!(%err, "failed to forward qos report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qos_messaging::{Transport, TransportFailure};
    use std::sync::{Arc, Mutex as StdMutex};

    struct RecordingTransport {
        sent: Arc<StdMutex<Vec<OutboundMessage>>>,
    }

    impl Transport<OutboundMessage> for RecordingTransport {
        fn send(&self, _target: TargetWorker, message: OutboundMessage) -> Result<(), TransportFailure> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[test]
    fn ticks_emit_accumulated_samples_once_a_manager_is_known() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::spawn("test-forwarder-dispatcher", RecordingTransport { sent: sent.clone() }));
        let mut forwarder = ReportForwarder::spawn(JobId(1), Duration::from_millis(20), 7, dispatcher);

        forwarder.reconfigure(
            &DeployInstanceQosRolesAction {
                job_id: JobId(1),
                qos_manager_assignment: Some(crate::messages::QosManagerAssignment {
                    manager_worker: TargetWorker(9),
                    shallow_graph: crate::graph::ShallowGraphFragment::default(),
                }),
                vertex_qos_reporters: vec![],
                edge_qos_reporters: vec![],
            },
            Duration::from_millis(20),
            7,
        );
        forwarder.record_vertex_latency(VertexId(1), 0, 0, 12.5);

        thread::sleep(Duration::from_millis(80));
        forwarder.shutdown();

        let sent = sent.lock().unwrap();
        assert!(sent.iter().any(|message| matches!(message, OutboundMessage::Report(r) if !r.vertex_latencies.is_empty())));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let dispatcher = Arc::new(Dispatcher::spawn("test-forwarder-dispatcher-2", RecordingTransport { sent }));
        let mut forwarder = ReportForwarder::spawn(JobId(2), Duration::from_millis(20), 7, dispatcher);
        forwarder.shutdown();
        forwarder.shutdown();
    }
}
