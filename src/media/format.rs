//! Recording file layout
//!
//! Recordings are line-oriented text files:
//!
//! ```text
//! ASCII_STREAM_RECORD          <- tag
//! version:1.0                  <- key:value metadata
//! timestamp:2024-05-01 12:00:00
//! frames:                      <- sentinel
//! frame:0:12                   <- frame:<elapsed_ms>:<byte_length>
//! <12 bytes of payload>\n
//! frame:100:12
//! <12 bytes of payload>\n
//! end_time:3                   <- footer, written on close
//! frame_count:2
//! ```
//!
//! Payloads may themselves contain line breaks; only the declared byte length
//! delimits them.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::error::{FormatError, Result};

/// First line of every recording
pub const RECORDING_TAG: &str = "ASCII_STREAM_RECORD";

/// Version written to new recordings
pub const FORMAT_VERSION: &str = "1.0";

/// Line separating metadata from frame records
pub const FRAMES_MARKER: &str = "frames:";

/// File extension of recordings
pub const RECORDING_EXTENSION: &str = "asr";

const FRAME_PREFIX: &str = "frame:";

/// Metadata read from a recording's header and footer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingHeader {
    /// Format version
    pub version: Option<String>,
    /// Wall-clock start time
    pub timestamp: Option<String>,
    /// Recording length in seconds (footer)
    pub end_time: Option<u64>,
    /// Number of frames (footer)
    pub frame_count: Option<u64>,
}

impl RecordingHeader {
    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "version" => self.version = Some(value.to_string()),
            "timestamp" => self.timestamp = Some(value.to_string()),
            "end_time" => self.end_time = value.trim().parse().ok(),
            "frame_count" => self.frame_count = value.trim().parse().ok(),
            _ => {}
        }
    }
}

/// A `frame:<elapsed_ms>:<byte_length>` record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Milliseconds since recording start
    pub elapsed_ms: u64,
    /// Payload length in bytes
    pub len: usize,
}

impl FrameHeader {
    /// Parse a header line (without the trailing line break)
    pub fn parse(line: &str) -> std::result::Result<Self, FormatError> {
        let bad = || FormatError::BadFrameHeader(line.to_string());

        let rest = line.strip_prefix(FRAME_PREFIX).ok_or_else(bad)?;
        let (ts, len) = rest.split_once(':').ok_or_else(bad)?;

        Ok(Self {
            elapsed_ms: ts.parse().map_err(|_| bad())?,
            len: len.parse().map_err(|_| bad())?,
        })
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", FRAME_PREFIX, self.elapsed_ms, self.len)
    }
}

/// A frame record located inside a recording buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Milliseconds since recording start
    pub elapsed_ms: u64,
    /// Byte range of the payload within the buffer
    pub payload: Range<usize>,
}

/// Outcome of reading at a record position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A frame and the position of the following record
    Frame(FrameRecord, usize),
    /// End of the frame section (end of buffer or start of the footer)
    End,
}

/// Split the line starting at `pos`
///
/// Returns the line without its terminator and the position after it.
pub fn next_line(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    if pos >= data.len() {
        return None;
    }
    let rest = &data[pos..];
    match rest.iter().position(|&b| b == b'\n') {
        Some(i) => {
            let line = &rest[..i];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            Some((line, pos + i + 1))
        }
        None => Some((rest, data.len())),
    }
}

/// Parse the tag and metadata section
///
/// Returns the header and the position of the first frame record.
pub fn parse_header(data: &[u8]) -> std::result::Result<(RecordingHeader, usize), FormatError> {
    let (tag, mut pos) = next_line(data, 0).ok_or_else(|| FormatError::BadTag(String::new()))?;
    if tag != RECORDING_TAG.as_bytes() {
        return Err(FormatError::BadTag(String::from_utf8_lossy(tag).into_owned()));
    }

    let mut header = RecordingHeader::default();
    loop {
        let (line, next) = next_line(data, pos).ok_or(FormatError::MissingFramesMarker)?;
        pos = next;

        if line == FRAMES_MARKER.as_bytes() {
            return Ok((header, pos));
        }

        let line = String::from_utf8_lossy(line);
        if let Some((key, value)) = line.split_once(':') {
            header.apply(key, value);
        }
    }
}

/// Read the record at `pos`
pub fn read_record(data: &[u8], pos: usize) -> std::result::Result<Record, FormatError> {
    let (line, payload_start) = match next_line(data, pos) {
        Some(split) => split,
        None => return Ok(Record::End),
    };

    if !line.starts_with(FRAME_PREFIX.as_bytes()) {
        return Ok(Record::End);
    }

    let line = std::str::from_utf8(line)
        .map_err(|_| FormatError::BadFrameHeader(String::from_utf8_lossy(line).into_owned()))?;
    let header = FrameHeader::parse(line)?;

    let available = data.len().saturating_sub(payload_start);
    if available < header.len {
        return Err(FormatError::Truncated {
            expected: header.len,
            available,
        });
    }

    let payload_end = payload_start + header.len;
    // One line break follows each payload; tolerate its absence at end of file
    let next = match data.get(payload_end) {
        Some(b'\n') => payload_end + 1,
        _ => payload_end,
    };

    Ok(Record::Frame(
        FrameRecord {
            elapsed_ms: header.elapsed_ms,
            payload: payload_start..payload_end,
        },
        next,
    ))
}

/// Parse footer `key:value` lines starting at `pos`
pub fn parse_footer(data: &[u8], mut pos: usize, header: &mut RecordingHeader) {
    while let Some((line, next)) = next_line(data, pos) {
        let line = String::from_utf8_lossy(line);
        if let Some((key, value)) = line.split_once(':') {
            header.apply(key, value);
        }
        pos = next;
    }
}

/// Summary of a recording on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingInfo {
    /// File name within the recordings directory
    pub filename: String,
    /// Wall-clock start time from the header
    pub timestamp: Option<String>,
    /// Length in seconds
    pub duration_secs: u64,
    /// Number of frame records
    pub frame_count: u64,
    /// File size in bytes
    pub file_size: u64,
}

impl RecordingInfo {
    /// Scan a recording buffer
    ///
    /// Footer values win when present; otherwise they are derived from the
    /// frame records (an interrupted recording has no footer).
    pub fn from_bytes(filename: &str, data: &[u8]) -> std::result::Result<Self, FormatError> {
        let (mut header, mut pos) = parse_header(data)?;

        let mut counted = 0u64;
        let mut last_ms = 0u64;
        while let Record::Frame(record, next) = read_record(data, pos)? {
            counted += 1;
            last_ms = record.elapsed_ms;
            pos = next;
        }
        parse_footer(data, pos, &mut header);

        Ok(Self {
            filename: filename.to_string(),
            timestamp: header.timestamp,
            duration_secs: header.end_time.unwrap_or(last_ms / 1000),
            frame_count: header.frame_count.unwrap_or(counted),
            file_size: data.len() as u64,
        })
    }

    /// Scan a recording file
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_bytes(&filename, &data)?)
    }
}

/// List valid recordings in `dir`, sorted by file name
///
/// Files that fail to parse are skipped.
pub fn list_recordings(dir: &Path) -> Result<Vec<RecordingInfo>> {
    let mut recordings = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(RECORDING_EXTENSION) {
            continue;
        }

        match RecordingInfo::from_path(&path) {
            Ok(info) => recordings.push(info),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable recording");
            }
        }
    }

    recordings.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(recordings)
}

/// Resolve a client-supplied recording name inside `dir`
///
/// Returns `None` for names that could escape the directory.
pub fn resolve_recording(dir: &Path, name: &str) -> Option<PathBuf> {
    let invalid = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || Path::new(name).is_absolute();

    if invalid {
        None
    } else {
        Some(dir.join(name))
    }
}
