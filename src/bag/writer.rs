//! Bag creation: the recording counterpart to [`crate::bag::LogReader`].

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bag::format::{self, RawRecord, RecordOp, Stamp, TypeDescriptor};
use crate::bag::BagError;

pub struct BagWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    described: HashSet<String>,
    last_stamp: Option<Stamp>,
}

impl BagWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BagError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| BagError::Open {
            path: path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        format::write_magic(&mut writer).map_err(|source| BagError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            writer,
            described: HashSet::new(),
            last_stamp: None,
        })
    }

    /// Append one message. Stamps must be non-decreasing within a file. The
    /// first message on each topic gets a TypeDef record ahead of it unless
    /// one was already written via [`Self::write_type_def`].
    pub fn write_message(
        &mut self,
        topic: &str,
        ty: &TypeDescriptor,
        stamp: Stamp,
        payload: &[u8],
    ) -> Result<(), BagError> {
        if let Some(last) = self.last_stamp {
            if stamp < last {
                return Err(BagError::OutOfOrder {
                    path: self.path.clone(),
                    topic: topic.to_owned(),
                    stamp,
                    last,
                });
            }
        }
        if !self.described.contains(topic) {
            self.emit(RecordOp::TypeDef, topic, ty, stamp, &[])?;
            self.described.insert(topic.to_owned());
        }
        self.emit(RecordOp::Message, topic, ty, stamp, payload)?;
        self.last_stamp = Some(stamp);
        Ok(())
    }

    /// Record an explicit type definition for a topic. Optional; playback
    /// only needs the descriptor carried on every record.
    pub fn write_type_def(
        &mut self,
        topic: &str,
        ty: &TypeDescriptor,
        stamp: Stamp,
        definition: &[u8],
    ) -> Result<(), BagError> {
        self.emit(RecordOp::TypeDef, topic, ty, stamp, definition)?;
        self.described.insert(topic.to_owned());
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), BagError> {
        self.writer.flush().map_err(|source| BagError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn emit(
        &mut self,
        op: RecordOp,
        topic: &str,
        ty: &TypeDescriptor,
        stamp: Stamp,
        payload: &[u8],
    ) -> Result<(), BagError> {
        let record = RawRecord {
            op,
            topic: topic.to_owned(),
            ty: ty.clone(),
            stamp,
            payload: payload.to_vec(),
        };
        format::write_record(&mut self.writer, &record).map_err(|source| BagError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn out_of_order_stamps_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bag");
        let ty = TypeDescriptor::new("test/Msg", "abcd");

        let mut writer = BagWriter::create(&path).unwrap();
        writer
            .write_message("/a", &ty, Stamp::new(5, 0), b"x")
            .unwrap();
        let err = writer
            .write_message("/a", &ty, Stamp::new(4, 0), b"y")
            .unwrap_err();
        assert!(matches!(err, BagError::OutOfOrder { .. }));
    }

    #[test]
    fn equal_stamps_are_allowed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bag");
        let ty = TypeDescriptor::new("test/Msg", "abcd");

        let mut writer = BagWriter::create(&path).unwrap();
        writer
            .write_message("/a", &ty, Stamp::new(1, 0), b"x")
            .unwrap();
        writer
            .write_message("/b", &ty, Stamp::new(1, 0), b"y")
            .unwrap();
        writer.finish().unwrap();
    }
}
