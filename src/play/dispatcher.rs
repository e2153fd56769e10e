//! The per-event dispatch loop.
//!
//! Decides skip/wait/publish for every record the log yields, absorbing
//! connection latency and operator pauses into the playback clock's shift so
//! the remaining schedule never desynchronizes.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bag::{EventRecord, LogReader, Stamp};
use crate::bus::{AdvertiseOutcome, Bus};
use crate::play::bag_clock::BagClockPublisher;
use crate::play::clock::PlaybackClock;
use crate::play::transport::{KeySource, PumpOutcome, TransportController};
use crate::play::PlayError;

/// Outer wait granularity while an event is not yet due.
const COARSE_POLL: Duration = Duration::from_millis(100);
/// Remaining wait below this falls through to the final precise sleep.
const WAIT_SLACK: Duration = Duration::from_micros(100);
/// Residue left unslept by the precise sleep.
const FINE_SLACK: Duration = Duration::from_micros(5);
/// Progress line repaint interval.
const PRINT_INTERVAL: Duration = Duration::from_millis(100);

/// Default pause after first advertising a topic, letting subscribers
/// connect before its first message goes out.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct PlayOptions {
    /// Publish everything immediately, no pacing, no interaction.
    pub at_once: bool,
    /// Suppress the progress line.
    pub quiet: bool,
    pub start_paused: bool,
    /// Rate multiplier; values below 1 slow playback, above 1 accelerate it.
    pub time_scale: f64,
    /// Seek this far into the log before delivering anything.
    pub start_skip: Duration,
    /// Settle delay after each first advertisement.
    pub settle: Duration,
    /// Outgoing queue depth passed to `Bus::advertise` (0 = unbounded).
    pub queue_depth: usize,
    /// Broadcast the synthetic bag clock at this frequency.
    pub bag_clock_hz: Option<u32>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            at_once: false,
            quiet: false,
            start_paused: false,
            time_scale: 1.0,
            start_skip: Duration::ZERO,
            settle: DEFAULT_SETTLE,
            queue_depth: 0,
            bag_clock_hz: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayReport {
    pub published: u64,
    pub skipped: u64,
}

enum Dispatched {
    Skipped,
    Published,
    Quit,
}

pub struct Player<K> {
    reader: LogReader,
    bus: Arc<dyn Bus>,
    clock: PlaybackClock,
    transport: TransportController<K>,
    bag_clock: Option<BagClockPublisher>,
    bag_clock_started: bool,
    at_once: bool,
    quiet: bool,
    settle: Duration,
    queue_depth: usize,
    first_recorded: Stamp,
    advertised: HashSet<String>,
    last_print: Option<Instant>,
}

impl<K> std::fmt::Debug for Player<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player").finish_non_exhaustive()
    }
}

impl<K: KeySource> Player<K> {
    pub fn new(
        reader: LogReader,
        bus: Arc<dyn Bus>,
        keys: K,
        options: PlayOptions,
    ) -> Result<Self, PlayError> {
        if options.bag_clock_hz.is_some() && reader.input_count() > 1 {
            return Err(PlayError::BagTimeManyInputs);
        }
        let now = Instant::now();
        let first_recorded = reader.start_stamp().unwrap_or(Stamp::ZERO);
        let clock = PlaybackClock::new(now, first_recorded, options.start_skip, options.time_scale);
        let start_paused = options.start_paused && !options.at_once;
        let transport = TransportController::new(keys, start_paused, now);
        let bag_clock = match options.bag_clock_hz {
            Some(hz) => Some(
                BagClockPublisher::spawn(bus.clone(), hz, options.time_scale)
                    .map_err(PlayError::ClockSpawn)?,
            ),
            None => None,
        };
        if !options.at_once {
            let hint = if start_paused {
                "Hit space to resume, or 's' to step."
            } else {
                "Hit space to pause."
            };
            print!("{hint}");
            let _ = std::io::stdout().flush();
        }
        Ok(Self {
            reader,
            bus,
            clock,
            transport,
            bag_clock,
            bag_clock_started: false,
            at_once: options.at_once,
            quiet: options.quiet,
            settle: options.settle,
            queue_depth: options.queue_depth,
            first_recorded,
            advertised: HashSet::new(),
            last_print: None,
        })
    }

    /// Drive the whole log to the bus. Returns on end of log, quit request,
    /// or bus shutdown; bag and bus failures abort with an error.
    pub fn run(&mut self) -> Result<PlayReport, PlayError> {
        let mut report = PlayReport::default();
        while self.bus.is_running() && !self.transport.is_quitting() {
            let Some(event) = self.reader.next_event()? else {
                break;
            };
            match self.dispatch(&event)? {
                Dispatched::Skipped => report.skipped += 1,
                Dispatched::Published => {
                    report.published += 1;
                    if !self.quiet {
                        self.print_progress(event.stamp);
                    }
                }
                Dispatched::Quit => break,
            }
        }
        print!("\r\nDone.\r\n");
        let _ = std::io::stdout().flush();
        Ok(report)
    }

    fn dispatch(&mut self, event: &EventRecord) -> Result<Dispatched, PlayError> {
        if self.clock.is_before_start(event.stamp) {
            return Ok(Dispatched::Skipped);
        }

        if let Some(bag_clock) = &self.bag_clock {
            if !self.bag_clock_started {
                if self.transport.is_paused() {
                    bag_clock.step_time(event.stamp);
                } else {
                    bag_clock.start_time(event.stamp);
                }
                self.bag_clock_started = true;
            }
            if self.at_once {
                bag_clock.start_time(event.stamp);
            } else {
                bag_clock.set_horizon(self.clock.play_time(event.stamp));
            }
        }

        self.advertise(event)?;

        if !self.at_once {
            loop {
                let play_time = self.clock.play_time(event.stamp);
                let remaining = play_time.saturating_duration_since(Instant::now());
                if !self.transport.is_paused() && remaining <= WAIT_SLACK {
                    break;
                }
                let outcome = self.transport.pump(
                    &mut self.clock,
                    play_time,
                    self.bag_clock.as_ref(),
                    event.stamp,
                    self.bus.as_ref(),
                );
                match outcome {
                    PumpOutcome::Proceed => {}
                    PumpOutcome::Step => {
                        self.publish(event)?;
                        return Ok(Dispatched::Published);
                    }
                    PumpOutcome::Quit => return Ok(Dispatched::Quit),
                }
                std::thread::sleep(COARSE_POLL);
            }

            let play_time = self.clock.play_time(event.stamp);
            let remaining = play_time.saturating_duration_since(Instant::now());
            if remaining > FINE_SLACK && self.bus.is_running() {
                std::thread::sleep(remaining - FINE_SLACK);
            }
        }

        if !self.bus.is_running() {
            return Ok(Dispatched::Quit);
        }
        self.publish(event)?;
        Ok(Dispatched::Published)
    }

    /// First event on a topic advertises it; a newly established topic gets
    /// the settle delay, measured and folded into the shift so later events
    /// are not penalized for the one-time connection cost.
    fn advertise(&mut self, event: &EventRecord) -> Result<(), PlayError> {
        if !self.advertised.insert(event.topic.clone()) {
            return Ok(());
        }
        let outcome = self
            .bus
            .advertise(&event.topic, &event.ty, self.queue_depth)
            .map_err(|source| PlayError::Bus {
                topic: event.topic.clone(),
                source,
            })?;
        if outcome == AdvertiseOutcome::NewlyAdvertised {
            if let Some(bag_clock) = &self.bag_clock {
                bag_clock.freeze_time();
            }
            tracing::info!(
                topic = %event.topic,
                settle = ?self.settle,
                "sleeping after advertising to let subscribers connect"
            );
            let before = Instant::now();
            std::thread::sleep(self.settle);
            self.clock.shift_by(before, Instant::now());
            tracing::info!(topic = %event.topic, "done sleeping");
            if let Some(bag_clock) = &self.bag_clock {
                bag_clock.start_time(event.stamp);
            }
        }
        Ok(())
    }

    fn publish(&self, event: &EventRecord) -> Result<(), PlayError> {
        self.bus
            .publish(&event.topic, &event.payload)
            .map_err(|source| PlayError::Bus {
                topic: event.topic.clone(),
                source,
            })
    }

    fn print_progress(&mut self, stamp: Stamp) {
        let now = Instant::now();
        let due = match self.last_print {
            Some(last) => now.duration_since(last) >= PRINT_INTERVAL,
            None => true,
        };
        if due {
            print!(
                "Time: {:16.6}    Duration: {:16.6}\r",
                stamp.as_secs_f64(),
                stamp.saturating_sub(self.first_recorded).as_secs_f64()
            );
            let _ = std::io::stdout().flush();
            self.last_print = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{BagWriter, TypeDescriptor};
    use crate::bus::BusError;
    use crate::play::transport::{Key, ScriptedKeys};
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        advertised: Mutex<HashSet<String>>,
        running: AtomicBool,
    }

    impl RecordingBus {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
                advertised: Mutex::new(HashSet::new()),
                running: AtomicBool::new(true),
            }
        }

        fn topics_published(&self) -> Vec<String> {
            self.published.lock().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl Bus for RecordingBus {
        fn advertise(
            &self,
            topic: &str,
            _ty: &TypeDescriptor,
            _queue_depth: usize,
        ) -> Result<AdvertiseOutcome, BusError> {
            if self.advertised.lock().insert(topic.to_owned()) {
                Ok(AdvertiseOutcome::NewlyAdvertised)
            } else {
                Ok(AdvertiseOutcome::AlreadyAdvertised)
            }
        }

        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
            self.published
                .lock()
                .push((topic.to_owned(), payload.to_vec()));
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    fn write_bag(path: &Path, events: &[(&str, f64)]) {
        let ty = TypeDescriptor::new("test/Msg", "abcd");
        let mut writer = BagWriter::create(path).unwrap();
        for (i, (topic, secs)) in events.iter().enumerate() {
            writer
                .write_message(topic, &ty, Stamp::from_secs_f64(*secs), &[i as u8])
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn quick_options() -> PlayOptions {
        PlayOptions {
            at_once: true,
            quiet: true,
            settle: Duration::ZERO,
            ..PlayOptions::default()
        }
    }

    #[test]
    fn at_once_publishes_everything_in_recorded_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bag");
        write_bag(&path, &[("/a", 0.0), ("/b", 0.5), ("/a", 1.0)]);

        let bus = Arc::new(RecordingBus::new());
        let reader = LogReader::open(&[&path]).unwrap();
        let mut player =
            Player::new(reader, bus.clone(), ScriptedKeys::default(), quick_options()).unwrap();
        let report = player.run().unwrap();

        assert_eq!(report.published, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(bus.topics_published(), vec!["/a", "/b", "/a"]);
    }

    #[test]
    fn start_skip_reads_but_never_publishes_early_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bag");
        write_bag(&path, &[("/a", 0.0), ("/a", 1.0), ("/a", 2.0)]);

        let bus = Arc::new(RecordingBus::new());
        let reader = LogReader::open(&[&path]).unwrap();
        let options = PlayOptions {
            start_skip: Duration::from_millis(1500),
            ..quick_options()
        };
        let mut player =
            Player::new(reader, bus.clone(), ScriptedKeys::default(), options).unwrap();
        let report = player.run().unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.published, 1);
        let published = bus.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, vec![2]);
    }

    #[test]
    fn steps_publish_one_event_each_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bag");
        write_bag(&path, &[("/a", 0.0), ("/a", 5.0), ("/a", 10.0)]);

        let bus = Arc::new(RecordingBus::new());
        let reader = LogReader::open(&[&path]).unwrap();
        let options = PlayOptions {
            start_paused: true,
            quiet: true,
            settle: Duration::ZERO,
            ..PlayOptions::default()
        };
        let keys = ScriptedKeys::new([Key::Step, Key::Step, Key::Quit]);
        let mut player = Player::new(reader, bus.clone(), keys, options).unwrap();
        let report = player.run().unwrap();

        assert_eq!(report.published, 2);
        let published = bus.published.lock();
        assert_eq!(published[0].1, vec![0]);
        assert_eq!(published[1].1, vec![1]);
    }

    #[test]
    fn quit_while_paused_publishes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bag");
        write_bag(&path, &[("/a", 0.0), ("/a", 1.0)]);

        let bus = Arc::new(RecordingBus::new());
        let reader = LogReader::open(&[&path]).unwrap();
        let options = PlayOptions {
            start_paused: true,
            quiet: true,
            settle: Duration::ZERO,
            ..PlayOptions::default()
        };
        let keys = ScriptedKeys::new([Key::Quit]);
        let mut player = Player::new(reader, bus.clone(), keys, options).unwrap();
        let report = player.run().unwrap();

        assert_eq!(report.published, 0);
        assert!(bus.published.lock().is_empty());
    }

    #[test]
    fn bag_time_with_several_inputs_is_rejected() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bag");
        let b = dir.path().join("b.bag");
        write_bag(&a, &[("/a", 0.0)]);
        write_bag(&b, &[("/b", 0.0)]);

        let bus = Arc::new(RecordingBus::new());
        let reader = LogReader::open(&[&a, &b]).unwrap();
        let options = PlayOptions {
            bag_clock_hz: Some(100),
            ..quick_options()
        };
        let err = Player::new(reader, bus, ScriptedKeys::default(), options).unwrap_err();
        assert!(matches!(err, PlayError::BagTimeManyInputs));
    }

    #[test]
    fn advertise_happens_once_per_topic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bag");
        write_bag(&path, &[("/a", 0.0), ("/a", 0.1), ("/b", 0.2), ("/a", 0.3)]);

        let bus = Arc::new(RecordingBus::new());
        let reader = LogReader::open(&[&path]).unwrap();
        let mut player =
            Player::new(reader, bus.clone(), ScriptedKeys::default(), quick_options()).unwrap();
        player.run().unwrap();

        assert_eq!(bus.advertised.lock().len(), 2);
    }
}
