//! Playback: the time-synchronization engine.

pub mod bag_clock;
pub mod clock;
pub mod dispatcher;
pub mod transport;

use std::io;

use thiserror::Error;

use crate::bag::BagError;
use crate::bus::BusError;

pub use bag_clock::{BagClockPublisher, CLOCK_TOPIC};
pub use clock::PlaybackClock;
pub use dispatcher::{PlayOptions, PlayReport, Player, DEFAULT_SETTLE};
pub use transport::{Key, KeySource, PumpOutcome, ScriptedKeys, TransportController, TransportState};

#[derive(Debug, Error)]
pub enum PlayError {
    #[error(transparent)]
    Bag(#[from] BagError),
    #[error("bus failure on {topic}: {source}")]
    Bus {
        topic: String,
        #[source]
        source: BusError,
    },
    #[error("bag time mode supports a single input bag")]
    BagTimeManyInputs,
    #[error("failed to start the bag clock thread: {0}")]
    ClockSpawn(#[source] io::Error),
}
