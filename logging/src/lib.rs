//! A small buffering event-log registry, shared by the pieces of the QoS
//! subsystem that want to hand a consumer a named stream of timestamped
//! events without committing to what that consumer does with them (print,
//! aggregate, discard).
//!
//! The canonical consumer is the constraint-violation finder's
//! per-constraint logger (see `qos-core::violations`), which receives every
//! fully-enumerated sequence — not just violating ones — to support offline
//! analysis. A job's elected manager may be queried from any task thread
//! registered against it, so both `Logger` and `Registry` are `Send + Sync`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A collection of named loggers sharing a common time origin.
pub struct Registry {
    time: Instant,
    map: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Registry {
    /// Creates a new registry, establishing the time origin for every
    /// logger later inserted into it.
    pub fn new(time: Instant) -> Self {
        Registry { time, map: HashMap::new() }
    }

    /// Binds `name` to a fresh logger backed by `action`, returning any
    /// previously-bound logger under that name (boxed, for the caller to
    /// downcast if it cares).
    ///
    /// Existing clones of the old logger keep writing to the old `action`;
    /// only newly-fetched loggers see the replacement. The end of a
    /// logging stream is only ever signaled by dropping every clone of its
    /// logger, not by calling `insert` again under the same name.
    pub fn insert<T: Send + 'static>(
        &mut self,
        name: impl Into<String>,
        action: Box<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>,
    ) -> Option<Box<dyn Any + Send + Sync>> {
        let logger = Logger::<T>::new(self.time, action);
        self.map.insert(name.into(), Box::new(logger))
    }

    /// Removes a bound logger, if present.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.map.remove(name)
    }

    /// Retrieves a clone of the logger bound to `name`, if any and if its
    /// event type matches `T`.
    pub fn get<T: Send + 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.map.get(name).and_then(|entry| entry.downcast_ref::<Logger<T>>()).cloned()
    }
}

/// A cheaply-cloneable, buffering logger for events of type `T`.
///
/// Events are appended to a shared buffer and flushed to `action` either
/// when the buffer fills or on an explicit [`Logger::flush`]. All clones of
/// a `Logger` share the same buffer and destination, so interleaved
/// `log` calls from clones still produce one ordered stream.
pub struct Logger<T> {
    time: Instant,
    action: Arc<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>,
    buffer: Arc<Mutex<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger { time: self.time, action: Arc::clone(&self.action), buffer: Arc::clone(&self.buffer) }
    }
}

impl<T: Send + 'static> Logger<T> {
    /// Allocates a new logger bound to `action`, sharing `time` as the
    /// origin against which every event's timestamp is measured.
    pub fn new(time: Instant, action: Box<dyn Fn(&Duration, &[(Duration, T)]) + Send + Sync>) -> Self {
        Logger { time, action: Arc::from(action), buffer: Arc::new(Mutex::new(Vec::with_capacity(256))) }
    }

    /// Logs one event, timestamped at the moment of the call.
    ///
    /// Flushes automatically once the buffer reaches its capacity.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Flushes any buffered events to `action` immediately.
    pub fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        (self.action)(&self.time.elapsed(), &buffer[..]);
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn logged_events_reach_the_action_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut registry = Registry::new(Instant::now());
        registry.insert::<&'static str>(
            "test",
            Box::new(move |_now, batch| {
                seen_clone.lock().unwrap().extend(batch.iter().map(|(_, e)| *e));
            }),
        );

        let logger = registry.get::<&'static str>("test").unwrap();
        logger.log("a");
        logger.log("b");
        logger.flush();

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn clones_share_the_same_destination() {
        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = seen.clone();
        let logger = Logger::<u32>::new(
            Instant::now(),
            Box::new(move |_now, batch| *seen_clone.lock().unwrap() += batch.len()),
        );
        let clone = logger.clone();

        logger.log(1);
        clone.log(2);
        logger.flush();

        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn removed_logger_is_no_longer_retrievable() {
        let mut registry = Registry::new(Instant::now());
        registry.insert::<u32>("x", Box::new(|_, _| {}));
        assert!(registry.get::<u32>("x").is_some());
        registry.remove("x");
        assert!(registry.get::<u32>("x").is_none());
    }
}
