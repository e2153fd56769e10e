//! Schedule math: recorded time to wall-clock deadline.

use std::time::{Duration, Instant};

use crate::bag::Stamp;

/// Maps recorded stamps onto wall-clock deadlines.
///
/// `play_time(stamp) = start_wall + (stamp - first_recorded) / time_scale
/// + cumulative shift`. The shift is the single source of truth reconciling
/// the schedule with wall time lost to pauses, steps, and advertise settle
/// delays; it accumulates for the whole session and is never reset.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    start_wall: Instant,
    first_recorded: Stamp,
    requested_start: Stamp,
    time_scale: f64,
    shift_nanos: i128,
}

impl PlaybackClock {
    /// `start_skip` seeks into the log: everything recorded before
    /// `first_recorded + start_skip` is read but never delivered.
    pub fn new(
        start_wall: Instant,
        first_recorded: Stamp,
        start_skip: Duration,
        time_scale: f64,
    ) -> Self {
        debug_assert!(time_scale > 0.0);
        Self {
            start_wall,
            first_recorded,
            requested_start: first_recorded + start_skip,
            time_scale,
            shift_nanos: 0,
        }
    }

    /// Wall-clock instant at which `recorded` is due.
    pub fn play_time(&self, recorded: Stamp) -> Instant {
        let offset = recorded.saturating_sub(self.first_recorded);
        let base = self.start_wall + offset.div_f64(self.time_scale);
        if self.shift_nanos >= 0 {
            base + Duration::from_nanos(self.shift_nanos as u64)
        } else {
            base - Duration::from_nanos(self.shift_nanos.unsigned_abs() as u64)
        }
    }

    /// Fold the wall time between `from` and `to` into the schedule. `to`
    /// earlier than `from` pulls the schedule forward; this happens when a
    /// resume anchors on a step that consumed a wait which had not elapsed.
    pub fn shift_by(&mut self, from: Instant, to: Instant) {
        if to >= from {
            self.shift_nanos += to.duration_since(from).as_nanos() as i128;
        } else {
            self.shift_nanos -= from.duration_since(to).as_nanos() as i128;
        }
    }

    pub fn is_before_start(&self, recorded: Stamp) -> bool {
        recorded < self.requested_start
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlines_follow_recorded_spacing() {
        let start = Instant::now();
        let clock = PlaybackClock::new(start, Stamp::new(10, 0), Duration::ZERO, 1.0);
        let due = clock.play_time(Stamp::new(12, 500_000_000));
        assert_eq!(due.duration_since(start), Duration::from_millis(2500));
    }

    #[test]
    fn rate_scale_divides_the_gap() {
        let start = Instant::now();
        let clock = PlaybackClock::new(start, Stamp::ZERO, Duration::ZERO, 2.0);
        let due = clock.play_time(Stamp::new(4, 0));
        assert_eq!(due.duration_since(start), Duration::from_secs(2));

        let slow = PlaybackClock::new(start, Stamp::ZERO, Duration::ZERO, 0.5);
        let due = slow.play_time(Stamp::new(4, 0));
        assert_eq!(due.duration_since(start), Duration::from_secs(8));
    }

    #[test]
    fn shift_moves_every_later_deadline() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(start, Stamp::ZERO, Duration::ZERO, 1.0);
        let before = clock.play_time(Stamp::new(1, 0));
        clock.shift_by(start, start + Duration::from_secs(3));
        let after = clock.play_time(Stamp::new(1, 0));
        assert_eq!(after.duration_since(before), Duration::from_secs(3));
    }

    #[test]
    fn backward_shift_accumulates_signed() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(start, Stamp::ZERO, Duration::ZERO, 1.0);
        clock.shift_by(start, start + Duration::from_secs(5));
        clock.shift_by(start + Duration::from_secs(8), start);
        let due = clock.play_time(Stamp::new(10, 0));
        assert_eq!(due.duration_since(start), Duration::from_secs(7));
    }

    #[test]
    fn start_skip_marks_earlier_records() {
        let clock = PlaybackClock::new(
            Instant::now(),
            Stamp::new(100, 0),
            Duration::from_secs(5),
            1.0,
        );
        assert!(clock.is_before_start(Stamp::new(104, 999_999_999)));
        assert!(!clock.is_before_start(Stamp::new(105, 0)));
    }
}
