//! The publish/subscribe bus the player talks to.
//!
//! Playback is written against the [`Bus`] trait so the transport itself
//! stays external: the binary wires up the in-process [`LocalBus`], library
//! users hand in whatever bus they actually run on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};

use parking_lot::Mutex;
use thiserror::Error;

use crate::bag::TypeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseOutcome {
    /// The topic was already known; no new connections will form.
    AlreadyAdvertised,
    /// First advertisement of this topic; subscribers may still be connecting.
    NewlyAdvertised,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("topic {0} was never advertised")]
    NotAdvertised(String),
    #[error("bus is shut down")]
    ShutDown,
    #[error("publish on {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

pub trait Bus: Send + Sync {
    fn advertise(
        &self,
        topic: &str,
        ty: &TypeDescriptor,
        queue_depth: usize,
    ) -> Result<AdvertiseOutcome, BusError>;

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Global liveness; `false` ends a playback session without error.
    fn is_running(&self) -> bool;
}

enum SubscriberTx {
    Unbounded(Sender<Vec<u8>>),
    Bounded(SyncSender<Vec<u8>>),
}

impl SubscriberTx {
    /// Deliver one payload. `false` means the receiver is gone. A full
    /// bounded queue drops the payload, which is what an outgoing queue of
    /// fixed depth does.
    fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        match self {
            SubscriberTx::Unbounded(tx) => tx.send(payload.to_vec()).is_ok(),
            SubscriberTx::Bounded(tx) => match tx.try_send(payload.to_vec()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(topic, "subscriber queue full, dropping message");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }
}

struct TopicEntry {
    ty: TypeDescriptor,
    queue_depth: usize,
    subscribers: Vec<SubscriberTx>,
}

/// In-process bus: an advertise registry with per-subscriber queues honoring
/// the advertised outgoing depth (0 = unbounded).
pub struct LocalBus {
    topics: Mutex<HashMap<String, TopicEntry>>,
    running: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        }
    }

    /// Subscribe to an advertised topic.
    pub fn subscribe(&self, topic: &str) -> Result<Receiver<Vec<u8>>, BusError> {
        let mut topics = self.topics.lock();
        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| BusError::NotAdvertised(topic.to_owned()))?;
        let rx = if entry.queue_depth == 0 {
            let (tx, rx) = mpsc::channel();
            entry.subscribers.push(SubscriberTx::Unbounded(tx));
            rx
        } else {
            let (tx, rx) = mpsc::sync_channel(entry.queue_depth);
            entry.subscribers.push(SubscriberTx::Bounded(tx));
            rx
        };
        Ok(rx)
    }

    /// Type under which a topic was advertised, if it was.
    pub fn topic_type(&self, topic: &str) -> Option<TypeDescriptor> {
        self.topics.lock().get(topic).map(|e| e.ty.clone())
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for LocalBus {
    fn advertise(
        &self,
        topic: &str,
        ty: &TypeDescriptor,
        queue_depth: usize,
    ) -> Result<AdvertiseOutcome, BusError> {
        if !self.is_running() {
            return Err(BusError::ShutDown);
        }
        let mut topics = self.topics.lock();
        if topics.contains_key(topic) {
            return Ok(AdvertiseOutcome::AlreadyAdvertised);
        }
        topics.insert(
            topic.to_owned(),
            TopicEntry {
                ty: ty.clone(),
                queue_depth,
                subscribers: Vec::new(),
            },
        );
        Ok(AdvertiseOutcome::NewlyAdvertised)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        if !self.is_running() {
            return Err(BusError::ShutDown);
        }
        let mut topics = self.topics.lock();
        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| BusError::NotAdvertised(topic.to_owned()))?;
        entry.subscribers.retain(|tx| tx.deliver(topic, payload));
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty() -> TypeDescriptor {
        TypeDescriptor::new("test/Msg", "abcd")
    }

    #[test]
    fn advertise_is_newly_then_already() {
        let bus = LocalBus::new();
        assert!(matches!(
            bus.advertise("/a", &ty(), 0),
            Ok(AdvertiseOutcome::NewlyAdvertised)
        ));
        assert!(matches!(
            bus.advertise("/a", &ty(), 0),
            Ok(AdvertiseOutcome::AlreadyAdvertised)
        ));
    }

    #[test]
    fn publish_requires_advertisement() {
        let bus = LocalBus::new();
        assert!(matches!(
            bus.publish("/a", b"x"),
            Err(BusError::NotAdvertised(_))
        ));
    }

    #[test]
    fn subscribers_receive_in_publish_order() {
        let bus = LocalBus::new();
        bus.advertise("/a", &ty(), 0).unwrap();
        let rx = bus.subscribe("/a").unwrap();
        bus.publish("/a", b"1").unwrap();
        bus.publish("/a", b"2").unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"1");
        assert_eq!(rx.try_recv().unwrap(), b"2");
    }

    #[test]
    fn bounded_queue_drops_overflow_without_failing() {
        let bus = LocalBus::new();
        bus.advertise("/a", &ty(), 1).unwrap();
        let rx = bus.subscribe("/a").unwrap();
        bus.publish("/a", b"1").unwrap();
        bus.publish("/a", b"2").unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn shutdown_stops_the_bus() {
        let bus = LocalBus::new();
        bus.advertise("/a", &ty(), 0).unwrap();
        bus.shutdown();
        assert!(!bus.is_running());
        assert!(matches!(bus.publish("/a", b"x"), Err(BusError::ShutDown)));
    }
}
