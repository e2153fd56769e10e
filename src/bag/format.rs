//! On-disk bag framing.
//!
//! A bag starts with the magic line `#BAGPLAY V1\n` followed by a sequence of
//! length-prefixed records. Each record carries a one-byte op (type metadata
//! vs. message data), the topic, a type descriptor, a recorded timestamp, and
//! an opaque payload. All integers are little-endian.

use std::io::{self, BufRead, Read, Write};
use std::ops::Add;
use std::time::Duration;

use thiserror::Error;

pub const BAG_MAGIC: &[u8] = b"#BAGPLAY V1";

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Caps guard against reading garbage lengths from a corrupt file.
const MAX_HEADER_LEN: u32 = 64 * 1024;
const MAX_PAYLOAD_LEN: u32 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unexpected end of file inside a record")]
    Truncated,
    #[error("not a bag file (bad magic line)")]
    BadMagic,
    #[error("unknown record op {0}")]
    UnknownOp(u8),
    #[error("record header length {0} exceeds limit")]
    OversizedHeader(u32),
    #[error("record payload length {0} exceeds limit")]
    OversizedPayload(u32),
    #[error("record field is not valid UTF-8")]
    BadUtf8,
    #[error("nanoseconds field {0} out of range")]
    BadNanos(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Timestamp a record carried at capture time. Ordered, copyable, and cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp {
    secs: u64,
    nanos: u32,
}

impl Stamp {
    pub const ZERO: Stamp = Stamp { secs: 0, nanos: 0 };

    pub fn new(secs: u64, nanos: u32) -> Self {
        Self {
            secs: secs + u64::from(nanos / NANOS_PER_SEC),
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        let d = Duration::from_secs_f64(secs.max(0.0));
        Self::new(d.as_secs(), d.subsec_nanos())
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + f64::from(self.nanos) / f64::from(NANOS_PER_SEC)
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Elapsed recorded time since `earlier`, clamped to zero.
    pub fn saturating_sub(&self, earlier: Stamp) -> Duration {
        let a = Duration::new(self.secs, self.nanos);
        let b = Duration::new(earlier.secs, earlier.nanos);
        a.saturating_sub(b)
    }

    /// Wire form used by the synthetic clock payload.
    pub fn to_le_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.secs.to_le_bytes());
        out[8..].copy_from_slice(&self.nanos.to_le_bytes());
        out
    }

    pub fn from_le_bytes(bytes: [u8; 12]) -> Self {
        let mut secs = [0u8; 8];
        let mut nanos = [0u8; 4];
        secs.copy_from_slice(&bytes[..8]);
        nanos.copy_from_slice(&bytes[8..]);
        Self::new(u64::from_le_bytes(secs), u32::from_le_bytes(nanos))
    }
}

impl Add<Duration> for Stamp {
    type Output = Stamp;

    fn add(self, rhs: Duration) -> Stamp {
        Stamp::new(self.secs + rhs.as_secs(), self.nanos + rhs.subsec_nanos())
    }
}

/// Message type identity: name plus an opaque checksum/signature string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub checksum: String,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checksum: checksum.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    /// Topic metadata: the payload is the full type definition text.
    TypeDef = 1,
    /// Topic data: the payload is an opaque serialized message.
    Message = 2,
}

impl RecordOp {
    fn from_u8(raw: u8) -> Result<Self, RecordError> {
        match raw {
            1 => Ok(RecordOp::TypeDef),
            2 => Ok(RecordOp::Message),
            other => Err(RecordError::UnknownOp(other)),
        }
    }
}

/// One decoded record, metadata and data alike. The reader layer decides
/// which ops reach the rest of the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub op: RecordOp,
    pub topic: String,
    pub ty: TypeDescriptor,
    pub stamp: Stamp,
    pub payload: Vec<u8>,
}

/// A data record as seen by playback and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub topic: String,
    pub ty: TypeDescriptor,
    pub stamp: Stamp,
    pub payload: Vec<u8>,
}

impl From<RawRecord> for EventRecord {
    fn from(raw: RawRecord) -> Self {
        Self {
            topic: raw.topic,
            ty: raw.ty,
            stamp: raw.stamp,
            payload: raw.payload,
        }
    }
}

/// Consume and verify the magic line. Returns the number of bytes read.
pub fn read_magic(reader: &mut impl BufRead) -> Result<u64, RecordError> {
    let mut line = Vec::with_capacity(BAG_MAGIC.len() + 1);
    let n = reader
        .by_ref()
        .take(BAG_MAGIC.len() as u64 + 1)
        .read_until(b'\n', &mut line)?;
    if line.last() != Some(&b'\n') || &line[..line.len() - 1] != BAG_MAGIC {
        return Err(RecordError::BadMagic);
    }
    Ok(n as u64)
}

pub fn write_magic(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(BAG_MAGIC)?;
    writer.write_all(b"\n")
}

/// Read the next record. Ok(None) at a clean end of file; a partial record is
/// `RecordError::Truncated`. On success also returns the bytes consumed, so
/// callers can report byte offsets without seeking.
pub fn read_record(reader: &mut impl Read) -> Result<Option<(RawRecord, u64)>, RecordError> {
    let header_len = match try_read_u32(reader)? {
        Some(len) => len,
        None => return Ok(None),
    };
    if header_len > MAX_HEADER_LEN {
        return Err(RecordError::OversizedHeader(header_len));
    }
    let mut header = vec![0u8; header_len as usize];
    read_exact(reader, &mut header)?;

    let mut cursor: &[u8] = &header;
    let op = RecordOp::from_u8(read_u8(&mut cursor)?)?;
    let topic = read_string(&mut cursor)?;
    let type_name = read_string(&mut cursor)?;
    let checksum = read_string(&mut cursor)?;
    let secs = read_u64(&mut cursor)?;
    let nanos = read_u32(&mut cursor)?;
    if nanos >= NANOS_PER_SEC {
        return Err(RecordError::BadNanos(nanos));
    }

    let payload_len = read_u32_exact(reader)?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(RecordError::OversizedPayload(payload_len));
    }
    let mut payload = vec![0u8; payload_len as usize];
    read_exact(reader, &mut payload)?;

    let consumed = 4 + u64::from(header_len) + 4 + u64::from(payload_len);
    let record = RawRecord {
        op,
        topic,
        ty: TypeDescriptor::new(type_name, checksum),
        stamp: Stamp::new(secs, nanos),
        payload,
    };
    Ok(Some((record, consumed)))
}

pub fn write_record(writer: &mut impl Write, record: &RawRecord) -> io::Result<()> {
    let mut header = Vec::with_capacity(
        1 + 12 + 12 + record.topic.len() + record.ty.name.len() + record.ty.checksum.len(),
    );
    header.push(record.op as u8);
    put_string(&mut header, &record.topic);
    put_string(&mut header, &record.ty.name);
    put_string(&mut header, &record.ty.checksum);
    header.extend_from_slice(&record.stamp.secs.to_le_bytes());
    header.extend_from_slice(&record.stamp.nanos.to_le_bytes());

    writer.write_all(&(header.len() as u32).to_le_bytes())?;
    writer.write_all(&header)?;
    writer.write_all(&(record.payload.len() as u32).to_le_bytes())?;
    writer.write_all(&record.payload)
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// Read a u32 at a record boundary: zero bytes available is a clean EOF.
fn try_read_u32(reader: &mut impl Read) -> Result<Option<u32>, RecordError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(RecordError::Truncated);
        }
        filled += n;
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

fn read_u32_exact(reader: &mut impl Read) -> Result<u32, RecordError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), RecordError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            RecordError::Truncated
        } else {
            RecordError::Io(e)
        }
    })
}

fn read_u8(cursor: &mut &[u8]) -> Result<u8, RecordError> {
    let mut buf = [0u8; 1];
    read_exact(cursor, &mut buf)?;
    Ok(buf[0])
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32, RecordError> {
    let mut buf = [0u8; 4];
    read_exact(cursor, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(cursor: &mut &[u8]) -> Result<u64, RecordError> {
    let mut buf = [0u8; 8];
    read_exact(cursor, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string(cursor: &mut &[u8]) -> Result<String, RecordError> {
    let len = read_u32(cursor)?;
    if len as usize > cursor.len() {
        return Err(RecordError::Truncated);
    }
    let (head, tail) = cursor.split_at(len as usize);
    let value = std::str::from_utf8(head)
        .map_err(|_| RecordError::BadUtf8)?
        .to_owned();
    *cursor = tail;
    Ok(value)
}
