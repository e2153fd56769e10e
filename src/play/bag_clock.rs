//! Synthetic "bag time" broadcasting.
//!
//! In bag-time mode subscribers follow log time rather than wall time. A
//! background thread publishes the current bag time on [`CLOCK_TOPIC`] at a
//! fixed frequency; the dispatcher drives the state transitions so the
//! synthetic clock freezes whenever playback does (pause, step, advertise
//! settle) and never runs ahead of the next undelivered event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bag::{Stamp, TypeDescriptor};
use crate::bus::Bus;

pub const CLOCK_TOPIC: &str = "/clock";

fn clock_type() -> TypeDescriptor {
    TypeDescriptor::new("bagplay/Clock", "6e1f2030bd2fc1cd2760e355b06b6c8e")
}

#[derive(Debug, Clone, Copy)]
enum ClockState {
    Uninitialized,
    Frozen {
        at: Stamp,
    },
    Running {
        anchor_wall: Instant,
        anchor_bag: Stamp,
        /// Wall deadline of the next undelivered event; the published bag
        /// time is clamped to it.
        horizon: Option<Instant>,
    },
}

struct Shared {
    state: Mutex<ClockState>,
    time_scale: f64,
    stop: AtomicBool,
}

fn bag_time_at(state: &ClockState, now: Instant, time_scale: f64) -> Option<Stamp> {
    match *state {
        ClockState::Uninitialized => None,
        ClockState::Frozen { at } => Some(at),
        ClockState::Running {
            anchor_wall,
            anchor_bag,
            horizon,
        } => {
            let effective = match horizon {
                Some(h) if h < now => h,
                _ => now,
            };
            let elapsed = effective.saturating_duration_since(anchor_wall);
            Some(anchor_bag + elapsed.mul_f64(time_scale))
        }
    }
}

pub struct BagClockPublisher {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl BagClockPublisher {
    /// Start the broadcast thread. Nothing is published until the first
    /// `start_time` or `step_time`.
    pub fn spawn(
        bus: Arc<dyn Bus>,
        frequency_hz: u32,
        time_scale: f64,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ClockState::Uninitialized),
            time_scale,
            stop: AtomicBool::new(false),
        });
        let period = Duration::from_secs_f64(1.0 / f64::from(frequency_hz.max(1)));
        let worker = shared.clone();
        let handle = std::thread::Builder::new()
            .name("bag-clock".into())
            .spawn(move || broadcast_loop(bus, worker, period))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Let the clock run, anchored so that `record` is "now" in bag time.
    pub fn start_time(&self, record: Stamp) {
        *self.shared.state.lock() = ClockState::Running {
            anchor_wall: Instant::now(),
            anchor_bag: record,
            horizon: None,
        };
    }

    /// Jump to `record` and hold there (single-step while paused).
    pub fn step_time(&self, record: Stamp) {
        *self.shared.state.lock() = ClockState::Frozen { at: record };
    }

    /// Hold the clock at its current bag time.
    pub fn freeze_time(&self) {
        let mut state = self.shared.state.lock();
        if let Some(at) = bag_time_at(&state, Instant::now(), self.shared.time_scale) {
            *state = ClockState::Frozen { at };
        }
    }

    /// Advance the clamp to the held event's wall deadline. No-op unless
    /// running.
    pub fn set_horizon(&self, play_time: Instant) {
        let mut state = self.shared.state.lock();
        if let ClockState::Running { horizon, .. } = &mut *state {
            *horizon = Some(play_time);
        }
    }

    /// Current bag time, if initialized.
    pub fn now(&self) -> Option<Stamp> {
        let state = self.shared.state.lock();
        bag_time_at(&state, Instant::now(), self.shared.time_scale)
    }
}

impl Drop for BagClockPublisher {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn broadcast_loop(bus: Arc<dyn Bus>, shared: Arc<Shared>, period: Duration) {
    let mut advertised = false;
    while !shared.stop.load(Ordering::SeqCst) && bus.is_running() {
        let now = {
            let state = shared.state.lock();
            bag_time_at(&state, Instant::now(), shared.time_scale)
        };
        if let Some(stamp) = now {
            if !advertised {
                if let Err(error) = bus.advertise(CLOCK_TOPIC, &clock_type(), 1) {
                    tracing::warn!(%error, "bag clock could not advertise, stopping broadcast");
                    return;
                }
                advertised = true;
            }
            if let Err(error) = bus.publish(CLOCK_TOPIC, &stamp.to_le_bytes()) {
                if bus.is_running() {
                    tracing::warn!(%error, "bag clock publish failed, stopping broadcast");
                }
                return;
            }
        }
        std::thread::sleep(period);
    }
}
