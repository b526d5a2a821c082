//! Timed playback of recordings
//!
//! A [`PlaybackReader`] loads one recording and re-emits its frames with the
//! original inter-frame spacing divided by the playback speed.
//!
//! ```text
//!   load()        start()          pause()
//! Idle ──► Loaded ──────► Playing ◄──────► Paused
//!   ▲                        │     resume()     │
//!   └──── stop() / end of log┴──────────────────┘
//! ```
//!
//! Delivery runs on a timer task. The delay before each frame is computed
//! from the speed in effect when that frame is scheduled, so a speed change
//! applies from the next frame on. The cursor only advances once a frame is
//! actually delivered; pausing mid-wait leaves the pending frame in place.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::format::{parse_header, read_record, Record, RecordingHeader};
use crate::error::{Error, Result};
use crate::registry::TextFrame;

/// Slowest allowed playback speed
pub const MIN_SPEED: f64 = 0.1;

/// Fastest allowed playback speed
pub const MAX_SPEED: f64 = 10.0;

/// Receives frames as playback emits them
pub type FrameCallback = Arc<dyn Fn(TextFrame) + Send + Sync>;

/// Playback lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing loaded
    Idle,
    /// Recording loaded, not started
    Loaded,
    /// Frames are being delivered
    Playing,
    /// Delivery suspended, cursor retained
    Paused,
}

impl PlaybackState {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loaded => "loaded",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// Delay between two recorded timestamps at `speed`
///
/// Timestamps that go backwards yield no delay.
pub fn scheduled_delay(previous_ms: u64, next_ms: u64, speed: f64) -> Duration {
    let delta_ms = next_ms.saturating_sub(previous_ms) as f64;
    let micros = (delta_ms * 1000.0 / speed).round();
    Duration::from_micros(micros as u64)
}

/// A recording held in memory
struct LoadedLog {
    data: Bytes,
    path: PathBuf,
    header: RecordingHeader,
    first_record: usize,
}

/// State shared between the reader and its timer task
struct Cursor {
    log: Option<LoadedLog>,
    state: PlaybackState,
    /// Byte offset of the next record
    pos: usize,
    /// Frames delivered in this run
    delivered: u64,
    /// Timestamp of the last delivered frame
    last_ms: Option<u64>,
    speed: f64,
}

impl Cursor {
    fn rewind(&mut self) {
        self.pos = self.log.as_ref().map(|l| l.first_record).unwrap_or(0);
        self.delivered = 0;
        self.last_ms = None;
    }

    fn close(&mut self) {
        self.log = None;
        self.state = PlaybackState::Idle;
        self.pos = 0;
        self.last_ms = None;
    }
}

struct PlaybackTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PlaybackTimer {
    fn cancel(self) {
        self.cancel.cancel();
        // The task checks its token before every delivery; it is not awaited
        drop(self.handle);
    }
}

/// Plays one recording at a time
pub struct PlaybackReader {
    cursor: Arc<Mutex<Cursor>>,
    timer: Option<PlaybackTimer>,
    callback: Option<FrameCallback>,
}

impl PlaybackReader {
    /// Create an idle reader at speed 1.0
    pub fn new() -> Self {
        Self {
            cursor: Arc::new(Mutex::new(Cursor {
                log: None,
                state: PlaybackState::Idle,
                pos: 0,
                delivered: 0,
                last_ms: None,
                speed: 1.0,
            })),
            timer: None,
            callback: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        lock_cursor(&self.cursor)
    }

    /// Current state
    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    /// Current speed multiplier
    pub fn speed(&self) -> f64 {
        self.lock().speed
    }

    /// Frames delivered since the last start
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    /// Path of the loaded recording
    pub fn loaded_path(&self) -> Option<PathBuf> {
        self.lock().log.as_ref().map(|l| l.path.clone())
    }

    /// Metadata of the loaded recording
    pub fn header(&self) -> Option<RecordingHeader> {
        self.lock().log.as_ref().map(|l| l.header.clone())
    }

    /// Load a recording, replacing any current one
    ///
    /// On failure nothing changes: a playback in progress keeps running.
    pub async fn load(&mut self, path: &Path) -> Result<RecordingHeader> {
        let data = Bytes::from(tokio::fs::read(path).await?);
        self.load_bytes(path, data)
    }

    /// Load a recording from memory
    pub fn load_bytes(&mut self, path: &Path, data: Bytes) -> Result<RecordingHeader> {
        let (header, first_record) = parse_header(&data).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Rejected recording");
            e
        })?;

        self.stop();

        let mut cursor = self.lock();
        cursor.log = Some(LoadedLog {
            data,
            path: path.to_path_buf(),
            header: header.clone(),
            first_record,
        });
        cursor.state = PlaybackState::Loaded;
        cursor.rewind();
        drop(cursor);

        tracing::info!(
            path = %path.display(),
            timestamp = ?header.timestamp,
            "Recording loaded"
        );

        Ok(header)
    }

    /// Start delivering frames to `callback`
    ///
    /// The first frame is delivered immediately.
    pub fn start(&mut self, callback: FrameCallback) -> Result<()> {
        {
            let mut cursor = self.lock();
            match cursor.state {
                PlaybackState::Idle => return Err(Error::InvalidState("No recording loaded")),
                PlaybackState::Playing | PlaybackState::Paused => {
                    return Err(Error::InvalidState("Playback already in progress"))
                }
                PlaybackState::Loaded => {}
            }
            cursor.rewind();
            cursor.state = PlaybackState::Playing;
        }

        self.callback = Some(callback);
        self.spawn_timer();
        tracing::info!("Playback started");
        Ok(())
    }

    /// Suspend delivery, keeping the cursor
    ///
    /// Returns false when not playing.
    pub fn pause(&mut self) -> bool {
        {
            let mut cursor = self.lock();
            if cursor.state != PlaybackState::Playing {
                return false;
            }
            cursor.state = PlaybackState::Paused;
        }

        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        tracing::debug!("Playback paused");
        true
    }

    /// Continue from the paused cursor
    ///
    /// The pending frame is delivered immediately. Returns false when not
    /// paused.
    pub fn resume(&mut self) -> bool {
        {
            let mut cursor = self.lock();
            if cursor.state != PlaybackState::Paused {
                return false;
            }
            cursor.state = PlaybackState::Playing;
        }

        self.spawn_timer();
        tracing::debug!("Playback resumed");
        true
    }

    /// Cancel delivery and unload the recording
    ///
    /// Returns false when nothing was loaded.
    pub fn stop(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.callback = None;

        let mut cursor = self.lock();
        if cursor.state == PlaybackState::Idle {
            return false;
        }
        cursor.close();
        tracing::info!("Playback stopped");
        true
    }

    /// Set the speed multiplier, clamped to `[0.1, 10.0]`
    ///
    /// Returns the speed now in effect. NaN is ignored.
    pub fn set_speed(&mut self, speed: f64) -> f64 {
        let mut cursor = self.lock();
        if !speed.is_nan() {
            cursor.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        }
        cursor.speed
    }

    fn spawn_timer(&mut self) {
        let Some(callback) = self.callback.clone() else {
            return;
        };

        if let Some(old) = self.timer.take() {
            old.cancel();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.cursor),
            callback,
            cancel.clone(),
        ));
        self.timer = Some(PlaybackTimer { cancel, handle });
    }
}

impl Default for PlaybackReader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackReader {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

fn lock_cursor(cursor: &Mutex<Cursor>) -> MutexGuard<'_, Cursor> {
    cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A frame chosen for delivery but not yet committed
struct Pending {
    frame: TextFrame,
    elapsed_ms: u64,
    next_pos: usize,
    delay: Duration,
}

enum Step {
    Deliver(Pending),
    Finished,
    Halt,
}

fn next_step(cursor: &mut Cursor, immediate: bool) -> Step {
    if cursor.state != PlaybackState::Playing {
        return Step::Halt;
    }
    let Some(log) = cursor.log.as_ref() else {
        return Step::Halt;
    };

    let record = match read_record(&log.data, cursor.pos) {
        Ok(Record::Frame(record, next_pos)) => (record, next_pos),
        Ok(Record::End) => return Step::Finished,
        Err(e) => {
            tracing::warn!(path = %log.path.display(), error = %e, "Playback hit a malformed record");
            return Step::Finished;
        }
    };
    let (record, next_pos) = record;

    let frame = match TextFrame::from_utf8(log.data.slice(record.payload.clone())) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(path = %log.path.display(), error = %e, "Playback hit a malformed record");
            return Step::Finished;
        }
    };

    let delay = match cursor.last_ms {
        Some(previous) if !immediate => scheduled_delay(previous, record.elapsed_ms, cursor.speed),
        _ => Duration::ZERO,
    };

    Step::Deliver(Pending {
        frame,
        elapsed_ms: record.elapsed_ms,
        next_pos,
        delay,
    })
}

async fn run_timer(cursor: Arc<Mutex<Cursor>>, callback: FrameCallback, cancel: CancellationToken) {
    let mut immediate = true;

    loop {
        let step = next_step(&mut lock_cursor(&cursor), immediate);
        let pending = match step {
            Step::Deliver(pending) => pending,
            Step::Halt => return,
            Step::Finished => {
                let mut guard = lock_cursor(&cursor);
                if !cancel.is_cancelled() {
                    tracing::info!(frames = guard.delivered, "Playback reached end of recording");
                    guard.close();
                }
                return;
            }
        };

        if !pending.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(pending.delay) => {}
            }
        }

        {
            let mut guard = lock_cursor(&cursor);
            if cancel.is_cancelled() || guard.state != PlaybackState::Playing {
                return;
            }
            guard.pos = pending.next_pos;
            guard.last_ms = Some(pending.elapsed_ms);
            guard.delivered += 1;
        }

        callback(pending.frame);
        immediate = false;
    }
}
