//! Interactive transport control: pause, resume, single-step, quit.
//!
//! The controller is generic over a [`KeySource`] so the state machine runs
//! against a scripted key sequence in tests and against the raw-mode
//! terminal in the binary.

use std::collections::VecDeque;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::bag::Stamp;
use crate::bus::Bus;
use crate::play::bag_clock::BagClockPublisher;
use crate::play::clock::PlaybackClock;

/// Sleep between polls while paused with no input pending.
const PAUSED_IDLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Space: toggle pause.
    Pause,
    /// `s`: publish the held event and stay paused.
    Step,
    /// `q` or interrupt.
    Quit,
    Other,
}

/// Polled input source with a distinguishable "nothing available" result.
pub trait KeySource {
    fn poll_key(&mut self) -> Option<Key>;
}

/// Fixed key sequence, exhausted to `None`. The test stand-in for a terminal.
#[derive(Debug, Default)]
pub struct ScriptedKeys {
    keys: VecDeque<Key>,
}

impl ScriptedKeys {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

impl KeySource for ScriptedKeys {
    fn poll_key(&mut self) -> Option<Key> {
        self.keys.pop_front()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Playing,
    Paused,
    /// A step was just taken; reverts to `Paused` on the next pump.
    SteppedOnce,
    /// Terminal; the dispatcher stops after the in-flight event.
    Quitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Input drained; fall through to the normal wait.
    Proceed,
    /// Publish the held event immediately and move to the next one.
    Step,
    /// End the session cleanly.
    Quit,
}

pub struct TransportController<K> {
    keys: K,
    state: TransportState,
    paused_at: Option<Instant>,
    /// Set by a step; the next resume anchors its shift on the step instead
    /// of the pause.
    shifted: bool,
}

impl<K: KeySource> TransportController<K> {
    pub fn new(keys: K, start_paused: bool, now: Instant) -> Self {
        let (state, paused_at) = if start_paused {
            (TransportState::Paused, Some(now))
        } else {
            (TransportState::Playing, None)
        };
        Self {
            keys,
            state,
            paused_at,
            shifted: false,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        matches!(
            self.state,
            TransportState::Paused | TransportState::SteppedOnce
        )
    }

    pub fn is_quitting(&self) -> bool {
        self.state == TransportState::Quitting
    }

    /// Drain pending input, blocking (in 10 ms polls) while paused.
    ///
    /// Called before every delivery wait slice, so playback can be paused
    /// and resumed arbitrarily many times per event. `play_time` is the
    /// held event's current deadline; resume folds the elapsed pause into
    /// `clock` so the event is due immediately while all later spacing is
    /// preserved.
    pub fn pump(
        &mut self,
        clock: &mut PlaybackClock,
        play_time: Instant,
        bag_clock: Option<&BagClockPublisher>,
        record: Stamp,
        bus: &dyn Bus,
    ) -> PumpOutcome {
        if self.state == TransportState::Quitting {
            return PumpOutcome::Quit;
        }
        if self.state == TransportState::SteppedOnce {
            self.state = TransportState::Paused;
        }
        loop {
            if !bus.is_running() {
                self.state = TransportState::Quitting;
                return PumpOutcome::Quit;
            }
            match self.keys.poll_key() {
                Some(Key::Pause) => {
                    if self.state == TransportState::Playing {
                        self.state = TransportState::Paused;
                        self.paused_at = Some(Instant::now());
                        if let Some(bc) = bag_clock {
                            bc.freeze_time();
                        }
                        prompt("Hit space to resume, or 's' to step.");
                    } else {
                        let now = Instant::now();
                        if self.shifted {
                            clock.shift_by(play_time, now);
                            self.shifted = false;
                        } else {
                            let since = self.paused_at.take().unwrap_or(now);
                            clock.shift_by(since, now);
                        }
                        self.state = TransportState::Playing;
                        if let Some(bc) = bag_clock {
                            bc.start_time(record);
                        }
                        prompt("Hit space to pause.");
                    }
                }
                Some(Key::Step) => {
                    if self.state == TransportState::Paused {
                        self.state = TransportState::SteppedOnce;
                        self.shifted = true;
                        if let Some(bc) = bag_clock {
                            bc.step_time(record);
                        }
                        return PumpOutcome::Step;
                    }
                }
                Some(Key::Quit) => {
                    self.state = TransportState::Quitting;
                    return PumpOutcome::Quit;
                }
                Some(Key::Other) => {}
                None => {
                    if self.state == TransportState::Paused {
                        std::thread::sleep(PAUSED_IDLE);
                    } else {
                        return PumpOutcome::Proceed;
                    }
                }
            }
        }
    }
}

/// Transport prompts own stdout; raw mode needs the explicit `\r`.
fn prompt(text: &str) {
    print!("\r\n{text}");
    let _ = std::io::stdout().flush();
}
