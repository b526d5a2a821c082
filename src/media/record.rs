//! Session recorder
//!
//! Appends rendered frames to a recording file, timestamping each one with
//! the milliseconds elapsed since the recording started. Elapsed time comes
//! from the monotonic clock so wall-clock adjustments cannot reorder frames.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::time::Instant;

use super::format::{FrameHeader, FORMAT_VERSION, FRAMES_MARKER, RECORDING_EXTENSION, RECORDING_TAG};
use crate::error::{Error, Result};

/// Upper bound on `_N` suffixes tried when a file name is taken
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Totals reported when a recording is closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    /// Path of the finished file
    pub path: PathBuf,
    /// Whole seconds between start and stop
    pub duration_secs: u64,
    /// Frames written
    pub frame_count: u64,
}

/// An open recording
struct ActiveRecording {
    writer: BufWriter<File>,
    path: PathBuf,
    started_at: Instant,
    frame_count: u64,
}

/// Append-only frame recorder
pub struct RecordLog {
    dir: PathBuf,
    active: Option<ActiveRecording>,
}

impl RecordLog {
    /// Create a recorder writing into `dir`
    ///
    /// The directory is created on the first [`start`](Self::start).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            active: None,
        }
    }

    /// Directory recordings are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a recording is open
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Path of the open recording
    pub fn current_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Frames written to the open recording
    pub fn frame_count(&self) -> u64 {
        self.active.as_ref().map(|a| a.frame_count).unwrap_or(0)
    }

    /// Open a new recording and write its header
    pub fn start(&mut self) -> Result<PathBuf> {
        if self.active.is_some() {
            return Err(Error::InvalidState("Recording already in progress"));
        }

        std::fs::create_dir_all(&self.dir)?;

        let now = chrono::Local::now();
        let stem = now.format("ascii_stream_%Y%m%d_%H%M%S").to_string();
        let (file, path) = create_unique(&self.dir, &stem)?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", RECORDING_TAG)?;
        writeln!(writer, "version:{}", FORMAT_VERSION)?;
        writeln!(writer, "timestamp:{}", now.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(writer, "{}", FRAMES_MARKER)?;

        tracing::info!(path = %path.display(), "Recording started");

        self.active = Some(ActiveRecording {
            writer,
            path: path.clone(),
            started_at: Instant::now(),
            frame_count: 0,
        });

        Ok(path)
    }

    /// Append a frame; a no-op when not recording
    pub fn write_frame(&mut self, text: &str) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        let header = FrameHeader {
            elapsed_ms: active.started_at.elapsed().as_millis() as u64,
            len: text.len(),
        };

        writeln!(active.writer, "{}", header)?;
        active.writer.write_all(text.as_bytes())?;
        active.writer.write_all(b"\n")?;
        active.frame_count += 1;

        Ok(())
    }

    /// Write the footer and close the recording
    ///
    /// Returns `Ok(None)` when no recording was open.
    pub fn stop(&mut self) -> Result<Option<RecordingSummary>> {
        let Some(mut active) = self.active.take() else {
            return Ok(None);
        };

        let duration_secs = active.started_at.elapsed().as_secs();
        writeln!(active.writer, "end_time:{}", duration_secs)?;
        writeln!(active.writer, "frame_count:{}", active.frame_count)?;
        active.writer.flush()?;

        tracing::info!(
            path = %active.path.display(),
            duration_secs = duration_secs,
            frames = active.frame_count,
            "Recording stopped"
        );

        Ok(Some(RecordingSummary {
            path: active.path,
            duration_secs,
            frame_count: active.frame_count,
        }))
    }
}

impl Drop for RecordLog {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Failed to finalize recording");
        }
    }
}

fn create_unique(dir: &Path, stem: &str) -> io::Result<(File, PathBuf)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{}.{}", stem, RECORDING_EXTENSION)
        } else {
            format!("{}_{}.{}", stem, attempt, RECORDING_EXTENSION)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free recording name for {}", stem),
    ))
}
