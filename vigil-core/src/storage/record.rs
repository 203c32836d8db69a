//! Log record types and framing.
//!
//! ```text
//! file:  ┌───────────┬────────────┬──────────┬──────────┬─────┐
//!        │ Magic (4) │ Schema (4) │ Frame 0  │ Frame 1  │ ... │
//!        └───────────┴────────────┴──────────┴──────────┴─────┘
//! frame: ┌─────────┬────────┬───────┬───────────┬─────────┬─────┬──────────┬──────┐
//!        │ Length  │ CRC32  │ Type  │ Timestamp │ Key len │ Key │ Body len │ Body │
//!        │ (4 B)   │ (4 B)  │ (1 B) │ (8 B)     │ (2 B)   │     │ (4 B)    │ JSON │
//!        └─────────┴────────┴───────┴───────────┴─────────┴─────┴──────────┴──────┘
//! ```
//!
//! The CRC covers the type byte and everything after it. The length covers
//! the whole frame.

use super::state::{ResourceKey, SessionDeletion, SpanKey, SpanRecord};
use crate::error::Result;
use crate::resource::ResourceRecord;
use crate::session::SessionRecord;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// File magic.
pub const MAGIC: [u8; 4] = *b"VGLS";

/// Version of the row encoding. Bumped on incompatible changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Size of the file header.
pub const HEADER_SIZE: u64 = 8;

/// Length + CRC + type.
pub const MIN_FRAME_SIZE: usize = 4 + 4 + 1;

/// Frame body fields before the key and body bytes.
const FIXED_BODY_SIZE: usize = 8 + 2 + 4;

/// Upper bound for a single frame; larger lengths are treated as garbage.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Insert or replace a session row.
    SessionUpsert = 1,
    /// Delete a session and everything it owns.
    SessionDelete = 2,
    /// Insert or replace a span row.
    SpanUpsert = 3,
    /// Delete a span row.
    SpanDelete = 4,
    /// Insert or replace a resource.
    ResourceUpsert = 5,
    /// Delete a resource.
    ResourceDelete = 6,
}

impl TryFrom<u8> for RecordType {
    type Error = &'static str;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::SessionUpsert),
            2 => Ok(Self::SessionDelete),
            3 => Ok(Self::SpanUpsert),
            4 => Ok(Self::SpanDelete),
            5 => Ok(Self::ResourceUpsert),
            6 => Ok(Self::ResourceDelete),
            _ => Err("Unknown storage record type"),
        }
    }
}

/// A state change, the unit of durability.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert or replace a session.
    UpsertSession(SessionRecord),
    /// Cascade-delete a session.
    DeleteSession(SessionDeletion),
    /// Insert or replace a span row.
    UpsertSpan(SpanRecord),
    /// Delete a span row.
    DeleteSpan(SpanKey),
    /// Insert or replace a resource.
    UpsertResource(ResourceRecord),
    /// Delete a resource.
    DeleteResource(ResourceKey),
}

impl Mutation {
    /// Whether the mutation changes the session table.
    pub fn touches_sessions(&self) -> bool {
        matches!(self, Self::UpsertSession(_) | Self::DeleteSession(_))
    }

    /// Encode into a log record.
    pub fn to_record(&self, timestamp_ms: i64) -> Result<LogRecord> {
        let (record_type, key, body) = match self {
            Self::UpsertSession(s) => (
                RecordType::SessionUpsert,
                s.id.to_string(),
                serde_json::to_vec(s)?,
            ),
            Self::DeleteSession(d) => (
                RecordType::SessionDelete,
                d.session_id.to_string(),
                serde_json::to_vec(d)?,
            ),
            Self::UpsertSpan(s) => (
                RecordType::SpanUpsert,
                s.key().to_string(),
                serde_json::to_vec(s)?,
            ),
            Self::DeleteSpan(k) => (RecordType::SpanDelete, k.to_string(), serde_json::to_vec(k)?),
            Self::UpsertResource(r) => (
                RecordType::ResourceUpsert,
                r.key.clone(),
                serde_json::to_vec(r)?,
            ),
            Self::DeleteResource(k) => (
                RecordType::ResourceDelete,
                k.key.clone(),
                serde_json::to_vec(k)?,
            ),
        };

        Ok(LogRecord {
            record_type,
            timestamp_ms,
            key,
            body,
        })
    }

    /// Decode from a log record.
    pub fn from_record(record: &LogRecord) -> Result<Self> {
        let body = &record.body;
        Ok(match record.record_type {
            RecordType::SessionUpsert => Self::UpsertSession(serde_json::from_slice(body)?),
            RecordType::SessionDelete => Self::DeleteSession(serde_json::from_slice(body)?),
            RecordType::SpanUpsert => Self::UpsertSpan(serde_json::from_slice(body)?),
            RecordType::SpanDelete => Self::DeleteSpan(serde_json::from_slice(body)?),
            RecordType::ResourceUpsert => Self::UpsertResource(serde_json::from_slice(body)?),
            RecordType::ResourceDelete => Self::DeleteResource(serde_json::from_slice(body)?),
        })
    }
}

/// A single framed log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Type of this record.
    pub record_type: RecordType,
    /// Write time (Unix epoch milliseconds).
    pub timestamp_ms: i64,
    /// Row key, for diagnostics.
    pub key: String,
    /// JSON row.
    pub body: Vec<u8>,
}

impl LogRecord {
    /// Serialize into a frame.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let key = self.key.as_bytes();
        let key_len = u16::try_from(key.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Record key too long"))?;
        let body_len = u32::try_from(self.body.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Record body too long"))?;

        let mut checked = Vec::with_capacity(1 + FIXED_BODY_SIZE + key.len() + self.body.len());
        checked.write_u8(self.record_type as u8)?;
        checked.write_i64::<LittleEndian>(self.timestamp_ms)?;
        checked.write_u16::<LittleEndian>(key_len)?;
        checked.write_all(key)?;
        checked.write_u32::<LittleEndian>(body_len)?;
        checked.write_all(&self.body)?;

        let total_len = 8 + checked.len();
        if total_len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Record of {} bytes exceeds frame limit", total_len),
            ));
        }

        let crc = crc32fast::hash(&checked);
        let mut frame = Vec::with_capacity(total_len);
        frame.write_u32::<LittleEndian>(total_len as u32)?;
        frame.write_u32::<LittleEndian>(crc)?;
        frame.write_all(&checked)?;
        Ok(frame)
    }

    /// Deserialize from a complete frame.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < MIN_FRAME_SIZE + FIXED_BODY_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "Record too small"));
        }

        let mut cursor = io::Cursor::new(bytes);
        let total_len = cursor.read_u32::<LittleEndian>()? as usize;
        let stored_crc = cursor.read_u32::<LittleEndian>()?;

        if bytes.len() < total_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Record truncated: expected {} bytes, got {}",
                    total_len,
                    bytes.len()
                ),
            ));
        }

        let checked = &bytes[8..total_len];
        let computed_crc = crc32fast::hash(checked);
        if computed_crc != stored_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("CRC mismatch: expected {}, got {}", stored_crc, computed_crc),
            ));
        }

        let mut cursor = io::Cursor::new(checked);
        let record_type = RecordType::try_from(cursor.read_u8()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let timestamp_ms = cursor.read_i64::<LittleEndian>()?;

        let key_len = cursor.read_u16::<LittleEndian>()? as usize;
        let mut key = vec![0u8; key_len];
        cursor.read_exact(&mut key)?;

        let body_len = cursor.read_u32::<LittleEndian>()? as usize;
        let mut body = vec![0u8; body_len];
        cursor.read_exact(&mut body)?;

        Ok(Self {
            record_type,
            timestamp_ms,
            key: String::from_utf8_lossy(&key).into_owned(),
            body,
        })
    }
}

/// Write the file header.
pub fn write_header<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_u32::<LittleEndian>(SCHEMA_VERSION)
}

/// Validate the file header.
pub fn read_header<R: Read>(reader: &mut R) -> std::result::Result<(), String> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| format!("Failed to read header: {}", e))?;
    if magic != MAGIC {
        return Err(format!("Unexpected magic {:02x?}", magic));
    }
    let version = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| format!("Failed to read schema version: {}", e))?;
    if version != SCHEMA_VERSION {
        return Err(format!(
            "Unsupported schema version {} (expected {})",
            version, SCHEMA_VERSION
        ));
    }
    Ok(())
}
