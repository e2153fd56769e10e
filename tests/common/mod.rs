//! Shared test utilities: a bus that records every publish with its wall
//! time, and fixture bag builders.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use bagplay::{AdvertiseOutcome, BagWriter, Bus, BusError, Stamp, TypeDescriptor};

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: Vec<u8>,
    pub at: Instant,
}

pub struct RecordingBus {
    events: Mutex<Vec<PublishedEvent>>,
    advertised: Mutex<HashSet<String>>,
    running: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            advertised: Mutex::new(HashSet::new()),
            running: AtomicBool::new(true),
        }
    }

    pub fn published(&self) -> Vec<PublishedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<PublishedEvent> {
        self.published()
            .into_iter()
            .filter(|e| e.topic == topic)
            .collect()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Bus for RecordingBus {
    fn advertise(
        &self,
        topic: &str,
        _ty: &TypeDescriptor,
        _queue_depth: usize,
    ) -> Result<AdvertiseOutcome, BusError> {
        if self.advertised.lock().unwrap().insert(topic.to_owned()) {
            Ok(AdvertiseOutcome::NewlyAdvertised)
        } else {
            Ok(AdvertiseOutcome::AlreadyAdvertised)
        }
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.events.lock().unwrap().push(PublishedEvent {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            at: Instant::now(),
        });
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Write a bag holding `(topic, recorded seconds, payload)` triples, which
/// must already be in recorded-time order.
pub fn write_bag(path: &Path, events: &[(&str, f64, &[u8])]) {
    let ty = TypeDescriptor::new("test/Msg", "abcd");
    let mut writer = BagWriter::create(path).expect("create fixture bag");
    for (topic, secs, payload) in events {
        writer
            .write_message(topic, &ty, Stamp::from_secs_f64(*secs), payload)
            .expect("write fixture message");
    }
    writer.finish().expect("flush fixture bag");
}
