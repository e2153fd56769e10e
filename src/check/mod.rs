//! Check mode: scan a bag and report per-topic structure without publishing.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bag::{BagError, LogReader, Stamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicStats {
    pub type_name: String,
    pub checksum: String,
    pub count: u64,
}

/// Everything the scan learned about one bag. An explicit value, threaded
/// through the scan, so independent scans can run side by side.
#[derive(Debug, Clone)]
pub struct BagSummary {
    pub path: PathBuf,
    pub start: Option<Stamp>,
    pub end: Option<Stamp>,
    pub topics: BTreeMap<String, TopicStats>,
}

impl BagSummary {
    pub fn duration(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => Duration::ZERO,
        }
    }

    pub fn message_count(&self) -> u64 {
        self.topics.values().map(|s| s.count).sum()
    }
}

impl fmt::Display for BagSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bag: {}", self.path.display())?;
        writeln!(
            f,
            "start_time: {:.6}",
            self.start.unwrap_or(Stamp::ZERO).as_secs_f64()
        )?;
        writeln!(
            f,
            "end_time: {:.6}",
            self.end.unwrap_or(Stamp::ZERO).as_secs_f64()
        )?;
        writeln!(f, "length: {:.6}", self.duration().as_secs_f64())?;
        writeln!(f, "topics:")?;
        for (name, stats) in &self.topics {
            writeln!(f, "  - name: {name}")?;
            writeln!(f, "    datatype: {}", stats.type_name)?;
            writeln!(f, "    md5sum: {}", stats.checksum)?;
            writeln!(f, "    count: {}", stats.count)?;
        }
        Ok(())
    }
}

/// Read the whole bag, counting per-topic occurrences and tracking the
/// recorded time span. No bus, no pacing.
pub fn scan(path: impl AsRef<Path>) -> Result<BagSummary, BagError> {
    let path = path.as_ref().to_path_buf();
    let mut reader = LogReader::open(&[&path])?;
    let mut summary = BagSummary {
        path,
        start: reader.start_stamp(),
        end: None,
        topics: BTreeMap::new(),
    };
    while let Some(event) = reader.next_event()? {
        summary
            .topics
            .entry(event.topic)
            .and_modify(|stats| stats.count += 1)
            .or_insert_with(|| TopicStats {
                type_name: event.ty.name,
                checksum: event.ty.checksum,
                count: 1,
            });
        let end = summary.end.get_or_insert(event.stamp);
        if event.stamp > *end {
            *end = event.stamp;
        }
    }
    Ok(summary)
}
