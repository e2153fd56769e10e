//! Sequential and merged bag reading.
//!
//! `BagReader` walks one file; `LogReader` merges several by recorded time.
//! Type-metadata records are consumed here and never surfaced: the rest of
//! the crate only ever sees message data.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::bag::format::{self, EventRecord, RecordOp, Stamp};
use crate::bag::BagError;

#[derive(Debug)]
pub struct BagReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    peeked: Option<EventRecord>,
}

impl BagReader {
    /// Open a bag, verify its magic line, and position on the first message.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BagError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| BagError::Open {
            path: path.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let offset = format::read_magic(&mut reader).map_err(|source| BagError::BadHeader {
            path: path.clone(),
            source,
        })?;
        let mut bag = Self {
            path,
            reader,
            offset,
            peeked: None,
        };
        bag.peeked = bag.read_message()?;
        Ok(bag)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The next message without consuming it.
    pub fn peek(&self) -> Option<&EventRecord> {
        self.peeked.as_ref()
    }

    pub fn next_event(&mut self) -> Result<Option<EventRecord>, BagError> {
        let next = self.read_message()?;
        Ok(std::mem::replace(&mut self.peeked, next))
    }

    /// Pull records until the next data record, skipping metadata.
    fn read_message(&mut self) -> Result<Option<EventRecord>, BagError> {
        loop {
            let at = self.offset;
            match format::read_record(&mut self.reader) {
                Ok(Some((record, consumed))) => {
                    self.offset += consumed;
                    match record.op {
                        RecordOp::TypeDef => {
                            tracing::debug!(
                                topic = %record.topic,
                                ty = %record.ty.name,
                                "skipping type definition record"
                            );
                        }
                        RecordOp::Message => return Ok(Some(record.into())),
                    }
                }
                Ok(None) => return Ok(None),
                Err(source) => {
                    return Err(BagError::Malformed {
                        path: self.path.clone(),
                        offset: at,
                        source,
                    })
                }
            }
        }
    }
}

/// The playback input: one or more bags merged into a single sequence that is
/// non-decreasing in recorded time. Ties keep the argument order. Finite and
/// not restartable; reopen to scan again.
#[derive(Debug)]
pub struct LogReader {
    bags: Vec<BagReader>,
    start: Option<Stamp>,
}

impl LogReader {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self, BagError> {
        if paths.is_empty() {
            return Err(BagError::NoInput);
        }
        let mut bags = Vec::with_capacity(paths.len());
        for path in paths {
            bags.push(BagReader::open(path)?);
        }
        let start = bags
            .iter()
            .filter_map(|b| b.peek().map(|e| e.stamp))
            .min();
        Ok(Self { bags, start })
    }

    /// Recorded time of the earliest message across all inputs. `None` when
    /// every input is empty.
    pub fn start_stamp(&self) -> Option<Stamp> {
        self.start
    }

    pub fn input_count(&self) -> usize {
        self.bags.len()
    }

    pub fn next_event(&mut self) -> Result<Option<EventRecord>, BagError> {
        let mut best: Option<(usize, Stamp)> = None;
        for (idx, bag) in self.bags.iter().enumerate() {
            if let Some(event) = bag.peek() {
                let earlier = match best {
                    Some((_, stamp)) => event.stamp < stamp,
                    None => true,
                };
                if earlier {
                    best = Some((idx, event.stamp));
                }
            }
        }
        match best {
            Some((idx, _)) => self.bags[idx].next_event(),
            None => Ok(None),
        }
    }
}
