//! Job payload codec
//!
//! Wire layout before compression:
//!
//! ```text
//! +---------------------------+------------------------------+
//! | creation time (i64, LE)   | job definition document      |
//! | 8 bytes, 100ns ticks      | remaining bytes              |
//! +---------------------------+------------------------------+
//! ```
//!
//! The whole stream is gzip-compressed. Ticks count 100 ns intervals since
//! 0001-01-01T00:00:00Z.

use crate::error::{PayloadError, PayloadResult};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Streaming buffer size for compression and decompression
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Largest accepted job definition
pub const MAX_DEFINITION_SIZE: usize = 1024 * 1024;

/// Size of the timestamp header
pub const TIMESTAMP_LEN: usize = 8;

/// Ticks between 0001-01-01 and the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;

/// An immutable, distributable job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    job_definition: Vec<u8>,
    creation_ticks: i64,
}

impl JobPayload {
    /// Create a payload stamped with the current time
    pub fn new(job_definition: Vec<u8>) -> PayloadResult<Self> {
        Self::with_ticks(job_definition, ticks_from_datetime(Utc::now()))
    }

    /// Create a payload with an explicit creation time
    pub fn with_ticks(job_definition: Vec<u8>, creation_ticks: i64) -> PayloadResult<Self> {
        check_size(job_definition.len())?;
        Ok(Self {
            job_definition,
            creation_ticks,
        })
    }

    pub fn job_definition(&self) -> &[u8] {
        &self.job_definition
    }

    pub fn creation_ticks(&self) -> i64 {
        self.creation_ticks
    }

    /// Creation time as a date
    pub fn created_at(&self) -> PayloadResult<DateTime<Utc>> {
        datetime_from_ticks(self.creation_ticks)
    }

    /// Encode and compress
    pub fn serialize(&self) -> PayloadResult<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut writer = BufWriter::with_capacity(STREAM_BUFFER_SIZE, encoder);
        writer.write_all(&self.creation_ticks.to_le_bytes())?;
        writer.write_all(&self.job_definition)?;
        let encoder = writer
            .into_inner()
            .map_err(|e| PayloadError::Stream(e.into_error()))?;
        Ok(encoder.finish()?)
    }

    /// Decompress and decode
    pub fn deserialize(bytes: &[u8]) -> PayloadResult<Self> {
        if bytes.is_empty() {
            return Err(PayloadError::InvalidArgument);
        }

        let decoder = GzDecoder::new(BufReader::with_capacity(STREAM_BUFFER_SIZE, bytes));
        let limit = (TIMESTAMP_LEN + MAX_DEFINITION_SIZE + 1) as u64;
        let mut raw = Vec::with_capacity(STREAM_BUFFER_SIZE);
        decoder.take(limit).read_to_end(&mut raw)?;

        if raw.len() < TIMESTAMP_LEN {
            return Err(PayloadError::Truncated {
                len: raw.len(),
                min: TIMESTAMP_LEN,
            });
        }
        check_size(raw.len() - TIMESTAMP_LEN)?;

        let mut header = [0u8; TIMESTAMP_LEN];
        header.copy_from_slice(&raw[..TIMESTAMP_LEN]);
        let creation_ticks = i64::from_le_bytes(header);
        raw.drain(..TIMESTAMP_LEN);

        Ok(Self {
            job_definition: raw,
            creation_ticks,
        })
    }

    /// Serialize to a file
    pub fn write_to(&self, path: &Path) -> PayloadResult<usize> {
        let bytes = self.serialize()?;
        fs::write(path, &bytes).map_err(|source| PayloadError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(bytes.len())
    }

    /// Deserialize from a file
    pub fn read_from(path: &Path) -> PayloadResult<Self> {
        let bytes = fs::read(path).map_err(|source| PayloadError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Self::deserialize(&bytes)
    }
}

fn check_size(size: usize) -> PayloadResult<()> {
    if size > MAX_DEFINITION_SIZE {
        return Err(PayloadError::TooLarge {
            size,
            max: MAX_DEFINITION_SIZE,
        });
    }
    Ok(())
}

/// 100 ns ticks since 0001-01-01 for `time`
pub fn ticks_from_datetime(time: DateTime<Utc>) -> i64 {
    let secs = time.timestamp().saturating_mul(TICKS_PER_SECOND);
    let sub = i64::from(time.timestamp_subsec_nanos() / 100);
    UNIX_EPOCH_TICKS.saturating_add(secs).saturating_add(sub)
}

/// Date for a tick count
pub fn datetime_from_ticks(ticks: i64) -> PayloadResult<DateTime<Utc>> {
    let since_epoch = ticks
        .checked_sub(UNIX_EPOCH_TICKS)
        .ok_or(PayloadError::InvalidTimestamp { ticks })?;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos).ok_or(PayloadError::InvalidTimestamp { ticks })
}
