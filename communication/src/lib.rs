//! A transport-agnostic dispatcher for outbound QoS control messages.
//!
//! This crate is part of the QoS subsystem, used to ship control and report
//! messages to other workers without ever blocking a report producer on
//! network I/O. It is deliberately ignorant of how bytes reach a peer: the
//! actual RPC transport is an external collaborator, supplied as a
//! [`Transport`] implementation by the host engine.
//!
//! A [`Dispatcher`] owns a single background thread draining an unbounded
//! FIFO of `(TargetWorker, M)` pairs. Producers enqueue with
//! [`Dispatcher::send`], which never blocks on the network; the background
//! thread dequeues and calls into the supplied `Transport`. Send failures
//! are logged and dropped — outbound QoS messages are advisory, never
//! required for correctness.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

/// Identifies the worker a message should be delivered to.
///
/// Opaque beyond equality, ordering and display; the host engine's RPC
/// layer is responsible for resolving it to an actual network endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetWorker(pub u64);

impl fmt::Display for TargetWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

/// An error delivering a message to a peer worker.
///
/// Always advisory: the dispatcher logs it and drops the message.
#[derive(Clone, Debug)]
pub struct TransportFailure {
    /// Human-readable description supplied by the transport implementation.
    pub reason: String,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport failure: {}", self.reason)
    }
}

impl std::error::Error for TransportFailure {}

/// The host engine's cross-worker RPC send, as seen by this crate.
///
/// Implementations are expected to time out at the transport layer rather
/// than block indefinitely; a timeout should surface as `Err`.
pub trait Transport<M>: Send + Sync {
    /// Attempts a single delivery of `message` to `target`. No retry.
    fn send(&self, target: TargetWorker, message: M) -> Result<(), TransportFailure>;
}

/// Owns the outbound queue and the worker thread draining it.
///
/// Dropping a `Dispatcher` also stops and joins the worker; `shutdown` is
/// the explicit, idempotent form of the same operation.
pub struct Dispatcher<M> {
    queue: Sender<(TargetWorker, M)>,
    worker: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> Dispatcher<M> {
    /// Spawns the background worker and returns a handle to it.
    ///
    /// `name` becomes the worker thread's name, useful in panics and
    /// profiles when a worker hosts several dispatchers (e.g. one per job).
    pub fn spawn(name: impl Into<String>, transport: impl Transport<M> + 'static) -> Self {
        let (queue, inbound) = mpsc::channel::<(TargetWorker, M)>();
        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while let Ok((target, message)) = inbound.recv() {
                    if let Err(err) = transport.send(target, message) {
                        tracing::warn!(%target, %err, "dropping outbound QoS message after transport failure");
                    }
                }
            })
            .expect("failed to spawn dispatcher thread");
        Dispatcher { queue, worker: Some(worker) }
    }

    /// Enqueues `message` for delivery to `target`. Never blocks on I/O.
    ///
    /// Returns `Err` only once the worker thread has stopped, which
    /// happens solely after `shutdown`/drop — handled by the caller the
    /// same as any other outbound failure: logged and dropped.
    pub fn send(&self, target: TargetWorker, message: M) -> Result<(), TransportFailure> {
        self.queue.send((target, message)).map_err(|_| TransportFailure {
            reason: "dispatcher has shut down".to_string(),
        })
    }

    /// Stops accepting new sends, drains the queue, and joins the worker.
    ///
    /// Idempotent: a second call is a no-op since the worker handle is
    /// consumed on the first.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.join());
        }
    }
}

impl<M> Drop for Dispatcher<M> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            drop(worker.join());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<(TargetWorker, u32)>>>,
        fail_on: Option<u32>,
    }

    impl Transport<u32> for RecordingTransport {
        fn send(&self, target: TargetWorker, message: u32) -> Result<(), TransportFailure> {
            if self.fail_on == Some(message) {
                return Err(TransportFailure { reason: "simulated".to_string() });
            }
            self.sent.lock().unwrap().push((target, message));
            Ok(())
        }
    }

    #[test]
    fn delivers_in_fifo_order_per_caller() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport { sent: sent.clone(), fail_on: None };
        let mut dispatcher = Dispatcher::spawn("test-dispatcher", transport);

        for i in 0..10 {
            dispatcher.send(TargetWorker(1), i).unwrap();
        }
        dispatcher.shutdown();

        assert_eq!(
            *sent.lock().unwrap(),
            (0..10).map(|i| (TargetWorker(1), i)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn transport_failures_are_dropped_not_propagated_to_later_sends() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport { sent: sent.clone(), fail_on: Some(1) };
        let mut dispatcher = Dispatcher::spawn("test-dispatcher", transport);

        dispatcher.send(TargetWorker(1), 0).unwrap();
        dispatcher.send(TargetWorker(1), 1).unwrap();
        dispatcher.send(TargetWorker(1), 2).unwrap();
        dispatcher.shutdown();

        assert_eq!(*sent.lock().unwrap(), vec![(TargetWorker(1), 0), (TargetWorker(1), 2)]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let transport = RecordingTransport { sent: Arc::new(Mutex::new(Vec::new())), fail_on: None };
        let mut dispatcher = Dispatcher::spawn("test-dispatcher", transport);
        dispatcher.shutdown();
        dispatcher.shutdown();
    }
}
