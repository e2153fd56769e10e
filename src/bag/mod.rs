//! Bag files: time-ordered logs of recorded publishes.

pub mod format;
pub mod reader;
pub mod writer;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use format::{EventRecord, RecordOp, Stamp, TypeDescriptor};
pub use reader::{BagReader, LogReader};
pub use writer::BagWriter;

#[derive(Debug, Error)]
pub enum BagError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not a bag file: {source}")]
    BadHeader {
        path: PathBuf,
        #[source]
        source: format::RecordError,
    },
    #[error("malformed record in {path} at byte {offset}: {source}")]
    Malformed {
        path: PathBuf,
        offset: u64,
        #[source]
        source: format::RecordError,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("record for {topic} in {path} is out of order ({stamp:?} after {last:?})")]
    OutOfOrder {
        path: PathBuf,
        topic: String,
        stamp: Stamp,
        last: Stamp,
    },
    #[error("no input bags given")]
    NoInput,
}
