pub mod bag;
pub mod bus;
pub mod check;
pub mod cli;
pub mod play;
pub mod term;

pub use bag::{
    BagError, BagReader, BagWriter, EventRecord, LogReader, Stamp, TypeDescriptor,
};
pub use bus::{AdvertiseOutcome, Bus, BusError, LocalBus};
pub use check::{BagSummary, TopicStats};
pub use cli::{Cli, Mode};
pub use play::{
    BagClockPublisher, Key, KeySource, PlayError, PlayOptions, PlayReport, PlaybackClock, Player,
    ScriptedKeys, TransportController, TransportState,
};
pub use term::{RawModeGuard, TerminalKeys};
