//! Broadcast hub
//!
//! The hub owns the single capture pipeline, the viewer registry, the
//! recorder and the playback reader. Every command that changes hub state
//! runs under one async mutex, so a `stop_streaming` can never interleave
//! with a concurrent `start_streaming` or viewer change.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<BroadcastHub>
//!              ┌──────────────────────────────────┐
//!  commands ──►│ control: Mutex<Control>          │
//!              │   pipeline (idle) / capture task │
//!              │   playback reader                │
//!              │ shared: Arc<Shared>              │
//!              │   streaming flag, viewers,       │
//!              │   recorder, counters             │
//!              └────────────────┬─────────────────┘
//!                               │ moves pipeline in, gets it back on exit
//!                               ▼
//!                     capture_loop (one task)
//!          tick ─► capture + render + record (blocking pool)
//!               ─► viewers.broadcast()
//! ```
//!
//! The capture loop never takes the control mutex. It only touches the
//! short-lived locks in `Shared`, which is what lets `stop_streaming` hold
//! the control mutex while it waits for the loop to exit.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::HubConfig;
use super::error::HubError;
use super::frame::{Resolution, TextFrame};
use super::viewers::ViewerSet;
use crate::capture::{CaptureDevice, DeviceInfo, FrameRenderer};
use crate::error::{DeviceError, Result};
use crate::media::{
    list_recordings, resolve_recording, FrameCallback, PlaybackReader, PlaybackState, RecordLog,
    RecordingInfo, RecordingSummary,
};
use crate::session::{Session, SessionPhase};
use crate::stats::{CaptureStats, HubStats};

/// Device and renderer, moved as one unit between the hub and its loop
pub struct CapturePipeline {
    device: Box<dyn CaptureDevice>,
    renderer: Box<dyn FrameRenderer>,
}

impl CapturePipeline {
    /// Pair a device with a renderer
    pub fn new(device: Box<dyn CaptureDevice>, renderer: Box<dyn FrameRenderer>) -> Self {
        Self { device, renderer }
    }

    /// Open and size the device, then install the ramp
    ///
    /// A panicking backend is reported as [`DeviceError::OpenFailed`] and
    /// the device is closed; the pipeline stays usable.
    fn open(&mut self, settings: &StreamSettings, oversample: u32, ramp: &str) -> std::result::Result<(), DeviceError> {
        match catch_panic(|| self.open_device(settings, oversample)) {
            Ok(result) => result?,
            Err(msg) => {
                self.device.close();
                return Err(DeviceError::OpenFailed(format!("device panicked: {}", msg)));
            }
        }

        self.renderer.set_ramp(ramp);
        Ok(())
    }

    fn open_device(&mut self, settings: &StreamSettings, oversample: u32) -> std::result::Result<(), DeviceError> {
        self.device.open(settings.camera_index)?;

        let target = settings.resolution.scaled(oversample);
        if let Err(e) = self.device.set_resolution(target.width, target.height) {
            self.device.close();
            return Err(e);
        }
        Ok(())
    }

    /// Read and render one frame; a panic counts as a read failure
    fn capture_text(&mut self, grid: Resolution) -> std::result::Result<Option<String>, DeviceError> {
        catch_panic(|| self.render_next(grid))
            .unwrap_or_else(|msg| Err(DeviceError::ReadFailed(format!("capture panicked: {}", msg))))
    }

    fn render_next(&mut self, grid: Resolution) -> std::result::Result<Option<String>, DeviceError> {
        let Some(image) = self.device.capture_frame()? else {
            return Ok(None);
        };
        if image.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.renderer.render(&image, grid.width, grid.height)))
    }
}

/// Run `f`, returning the panic message if it unwinds
fn catch_panic<T>(f: impl FnOnce() -> T) -> std::result::Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Parameters of a running stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Capture device index
    pub camera_index: u32,
    /// Text grid size
    pub resolution: Resolution,
    /// Frames per second
    pub fps: u32,
}

impl StreamSettings {
    /// Time between frames, `1000 / fps` milliseconds (at least 1 ms)
    pub fn frame_interval(&self) -> Duration {
        let millis = 1000 / u64::from(self.fps.max(1));
        Duration::from_millis(millis.max(1))
    }
}

struct CaptureTask {
    cancel: CancellationToken,
    handle: JoinHandle<Option<CapturePipeline>>,
}

/// State only touched by hub commands
struct Control {
    /// Present while idle; moved into the capture loop while streaming
    pipeline: Option<CapturePipeline>,
    capture: Option<CaptureTask>,
    settings: Option<StreamSettings>,
    playback: PlaybackReader,
    /// Session receiving playback frames
    playback_owner: Option<u64>,
}

#[derive(Default)]
struct RunWindow {
    started: Option<Instant>,
    ended: Option<Instant>,
}

#[derive(Default)]
struct CaptureCounters {
    captured: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    window: Mutex<RunWindow>,
}

impl CaptureCounters {
    fn lock_window(&self) -> MutexGuard<'_, RunWindow> {
        self.window.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn begin(&self) {
        self.captured.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        *self.lock_window() = RunWindow {
            started: Some(Instant::now()),
            ended: None,
        };
    }

    fn end(&self) {
        self.lock_window().ended = Some(Instant::now());
    }

    fn snapshot(&self) -> CaptureStats {
        let duration = {
            let window = self.lock_window();
            match (window.started, window.ended) {
                (Some(start), Some(end)) => end.duration_since(start),
                (Some(start), None) => start.elapsed(),
                _ => Duration::ZERO,
            }
        };

        CaptureStats {
            frames_captured: self.captured.load(Ordering::Relaxed),
            frames_skipped: self.skipped.load(Ordering::Relaxed),
            capture_errors: self.errors.load(Ordering::Relaxed),
            duration,
        }
    }
}

/// State shared with the capture loop
struct Shared {
    streaming: AtomicBool,
    viewers: ViewerSet,
    recorder: Mutex<RecordLog>,
    counters: CaptureCounters,
}

impl Shared {
    fn lock_recorder(&self) -> MutexGuard<'_, RecordLog> {
        self.recorder.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append a rendered frame to the open recording, if any
    ///
    /// Does file I/O; only called from the blocking pool.
    fn record(&self, text: &str) {
        if let Err(e) = self.lock_recorder().write_frame(text) {
            tracing::warn!(error = %e, "Failed to append frame to recording");
        }
    }

    /// Count and fan out one rendered frame
    fn publish(&self, frame: TextFrame) -> usize {
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
        self.viewers.broadcast(&frame)
    }
}

/// Owner of the live stream and everything attached to it
pub struct BroadcastHub {
    config: HubConfig,
    devices: Vec<DeviceInfo>,
    control: tokio::sync::Mutex<Control>,
    shared: Arc<Shared>,
}

impl BroadcastHub {
    /// Create a hub with default configuration
    pub fn new(device: Box<dyn CaptureDevice>, renderer: Box<dyn FrameRenderer>) -> Self {
        Self::with_config(device, renderer, HubConfig::default())
    }

    /// Create a hub with custom configuration
    pub fn with_config(
        device: Box<dyn CaptureDevice>,
        renderer: Box<dyn FrameRenderer>,
        config: HubConfig,
    ) -> Self {
        let devices = device.list_devices();
        let recorder = RecordLog::new(config.recordings_dir.clone());

        Self {
            config,
            devices,
            control: tokio::sync::Mutex::new(Control {
                pipeline: Some(CapturePipeline::new(device, renderer)),
                capture: None,
                settings: None,
                playback: PlaybackReader::new(),
                playback_owner: None,
            }),
            shared: Arc::new(Shared {
                streaming: AtomicBool::new(false),
                viewers: ViewerSet::new(),
                recorder: Mutex::new(recorder),
                counters: CaptureCounters::default(),
            }),
        }
    }

    /// Hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Capture devices reported by the backend at construction
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    /// Whether the capture loop is running
    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    /// `"active"` while streaming, otherwise `"inactive"`
    pub fn get_status(&self) -> &'static str {
        if self.is_streaming() {
            "active"
        } else {
            "inactive"
        }
    }

    /// Settings of the current or most recent stream
    pub async fn settings(&self) -> Option<StreamSettings> {
        self.control.lock().await.settings
    }

    /// Open the device and start the capture loop
    ///
    /// A no-op when already streaming. Grids larger than
    /// [`HubConfig::max_resolution`] are rejected before the device is
    /// touched. The device is opened at the grid size times the oversampling
    /// factor. If opening fails the device is left closed and `streaming`
    /// stays false.
    pub async fn start_streaming(
        &self,
        camera_index: u32,
        resolution: &str,
        fps: u32,
    ) -> std::result::Result<(), HubError> {
        let mut control = self.control.lock().await;

        if self.is_streaming() {
            tracing::warn!("Streaming already in progress");
            return Ok(());
        }

        let requested = resolution;
        let resolution: Resolution = requested.parse()?;
        if !resolution.fits_within(self.config.max_resolution) {
            tracing::warn!(
                resolution = %resolution,
                max = %self.config.max_resolution,
                "Requested resolution too large"
            );
            return Err(HubError::InvalidResolution(requested.to_string()));
        }
        if fps == 0 {
            return Err(HubError::InvalidFps);
        }
        let settings = StreamSettings {
            camera_index,
            resolution,
            fps,
        };

        // A loop that ended on its own still holds the pipeline
        self.join_capture(&mut control).await;
        let mut pipeline = control.pipeline.take().ok_or(HubError::DeviceUnavailable)?;

        let oversample = self.config.oversample;
        let ramp = self.config.ramp.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let result = pipeline.open(&settings, oversample, &ramp);
            (pipeline, result)
        })
        .await;

        let (pipeline, result) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "Device open task failed");
                return Err(HubError::DeviceUnavailable);
            }
        };

        if let Err(e) = result {
            control.pipeline = Some(pipeline);
            tracing::error!(camera_index = camera_index, error = %e, "Failed to start streaming");
            return Err(e.into());
        }

        self.shared.counters.begin();
        self.shared.streaming.store(true, Ordering::Release);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(capture_loop(
            pipeline,
            settings,
            Arc::clone(&self.shared),
            cancel.clone(),
            self.config.max_consecutive_failures,
        ));
        control.capture = Some(CaptureTask { cancel, handle });
        control.settings = Some(settings);

        tracing::info!(
            camera_index = camera_index,
            resolution = %resolution,
            fps = fps,
            "Streaming started"
        );

        Ok(())
    }

    /// Stop the capture loop and wait for it to exit
    ///
    /// Idempotent. Once this returns the device is closed, `streaming` is
    /// false and the viewer registry is empty.
    pub async fn stop_streaming(&self) {
        let mut control = self.control.lock().await;
        self.halt_streaming(&mut control).await;
    }

    async fn halt_streaming(&self, control: &mut Control) {
        if self.join_capture(control).await {
            self.shared.viewers.clear();
            tracing::info!("Streaming stopped");
        }
    }

    /// Cancel the capture task, if any, and take the pipeline back
    async fn join_capture(&self, control: &mut Control) -> bool {
        let Some(task) = control.capture.take() else {
            return false;
        };

        task.cancel.cancel();
        match task.handle.await {
            Ok(pipeline) => control.pipeline = pipeline,
            Err(e) => tracing::error!(error = %e, "Capture loop failed"),
        }
        true
    }

    /// Register a session to receive frames
    pub async fn add_viewer(&self, session: &Arc<Session>) {
        let _control = self.control.lock().await;
        if self.shared.viewers.insert(session) {
            tracing::debug!(
                session_id = session.id(),
                viewers = self.shared.viewers.len(),
                "Viewer added"
            );
        }
    }

    /// Deregister a session
    pub async fn remove_viewer(&self, session: &Arc<Session>) {
        self.remove_viewer_by_id(session.id()).await;
    }

    /// Deregister a session by ID; tolerates sessions already gone
    pub async fn remove_viewer_by_id(&self, session_id: u64) {
        let _control = self.control.lock().await;
        if self.shared.viewers.remove(session_id) {
            tracing::debug!(session_id = session_id, "Viewer removed");
        }
    }

    /// Queue a frame on every live viewer, returning how many received it
    pub fn broadcast(&self, frame: &TextFrame) -> usize {
        self.shared.viewers.broadcast(frame)
    }

    /// Live registered viewers
    pub fn viewer_count(&self) -> usize {
        self.shared.viewers.len()
    }

    /// Make `session` the controller and register it for frames
    pub async fn claim_controller(&self, session: &Arc<Session>) -> std::result::Result<(), HubError> {
        let _control = self.control.lock().await;
        self.shared.viewers.claim_controller(session)?;
        self.shared.viewers.insert(session);

        tracing::info!(session_id = session.id(), "Controller connected");
        Ok(())
    }

    /// Whether a live controller is connected
    pub fn has_controller(&self) -> bool {
        self.shared.viewers.has_controller()
    }

    /// Undo everything a closed session registered
    ///
    /// A controller that still holds the controller slot stops the stream
    /// on departure. One whose slot was already taken over by a newer
    /// controller leaves that controller's stream alone. A viewer is
    /// deregistered. Playback bound to the session is stopped either way.
    pub async fn release_session(&self, session_id: u64, phase: SessionPhase) {
        let mut control = self.control.lock().await;

        match phase {
            SessionPhase::Controller => {
                self.shared.viewers.remove(session_id);
                if self.shared.viewers.release_controller(session_id) {
                    tracing::info!(session_id = session_id, "Controller disconnected");
                    self.halt_streaming(&mut control).await;
                } else {
                    tracing::debug!(session_id = session_id, "Controller slot already reassigned");
                }
            }
            SessionPhase::Viewer => {
                if self.shared.viewers.remove(session_id) {
                    tracing::debug!(session_id = session_id, "Viewer removed");
                }
            }
            SessionPhase::Unauthenticated | SessionPhase::Closed => {}
        }

        if control.playback_owner == Some(session_id) {
            control.playback.stop();
            control.playback_owner = None;
        }
    }

    /// Start recording the live stream
    ///
    /// Returns the recording path. When a recording is already open this is
    /// a no-op that returns the open recording's path.
    pub async fn start_recording(&self) -> std::result::Result<PathBuf, HubError> {
        let _control = self.control.lock().await;

        let started = self
            .with_recorder(|recorder| {
                if let Some(path) = recorder.current_path() {
                    return Ok((path.to_path_buf(), false));
                }
                recorder.start().map(|path| (path, true)).map_err(|e| e.to_string())
            })
            .await?;

        match started {
            Ok((path, true)) => Ok(path),
            Ok((path, false)) => {
                tracing::warn!("Recording already in progress");
                Ok(path)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start recording");
                Err(HubError::Recording(e))
            }
        }
    }

    /// Finish the open recording, if any
    pub async fn stop_recording(&self) -> std::result::Result<Option<RecordingSummary>, HubError> {
        let _control = self.control.lock().await;
        self.with_recorder(|recorder| recorder.stop().map_err(|e| e.to_string()))
            .await?
            .map_err(HubError::Recording)
    }

    /// Run `f` against the recorder on the blocking pool
    async fn with_recorder<T, F>(&self, f: F) -> std::result::Result<T, HubError>
    where
        F: FnOnce(&mut RecordLog) -> T + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || f(&mut *shared.lock_recorder()))
            .await
            .map_err(|e| HubError::Recording(e.to_string()))
    }

    /// Whether a recording is open
    pub fn is_recording(&self) -> bool {
        self.shared.lock_recorder().is_recording()
    }

    /// Recordings available for playback
    pub fn recordings(&self) -> Result<Vec<RecordingInfo>> {
        list_recordings(&self.config.recordings_dir)
    }

    /// Load `filename` from the recordings directory and play it to `session`
    ///
    /// Replaces any playback in progress. On failure a playback already in
    /// progress keeps running.
    pub async fn start_playback(
        &self,
        filename: &str,
        session: &Arc<Session>,
    ) -> std::result::Result<(), HubError> {
        let path = resolve_recording(&self.config.recordings_dir, filename)
            .ok_or_else(|| HubError::Playback(format!("invalid recording name {:?}", filename)))?;

        let mut control = self.control.lock().await;
        control
            .playback
            .load(&path)
            .await
            .map_err(|e| HubError::Playback(e.to_string()))?;

        let target = Arc::downgrade(session);
        let callback: FrameCallback = Arc::new(move |frame: TextFrame| {
            if let Some(session) = target.upgrade() {
                session.send_frame(frame);
            }
        });

        control
            .playback
            .start(callback)
            .map_err(|e| HubError::Playback(e.to_string()))?;
        control.playback_owner = Some(session.id());

        tracing::info!(
            session_id = session.id(),
            path = %path.display(),
            "Playback started"
        );
        Ok(())
    }

    /// Pause playback; returns false when nothing is playing
    pub async fn pause_playback(&self) -> bool {
        self.control.lock().await.playback.pause()
    }

    /// Resume paused playback; returns false when not paused
    pub async fn resume_playback(&self) -> bool {
        self.control.lock().await.playback.resume()
    }

    /// Stop playback; returns false when nothing was loaded
    pub async fn stop_playback(&self) -> bool {
        let mut control = self.control.lock().await;
        control.playback_owner = None;
        control.playback.stop()
    }

    /// Change the playback speed, returning the clamped value in effect
    pub async fn set_playback_speed(&self, speed: f64) -> f64 {
        self.control.lock().await.playback.set_speed(speed)
    }

    /// Playback state
    pub async fn playback_state(&self) -> PlaybackState {
        self.control.lock().await.playback.state()
    }

    /// Snapshot of hub state
    pub async fn stats(&self) -> HubStats {
        let playback_state = self.playback_state().await;

        HubStats {
            streaming: self.is_streaming(),
            viewer_count: self.viewer_count(),
            has_controller: self.has_controller(),
            recording: self.is_recording(),
            playback_state,
            capture: self.shared.counters.snapshot(),
        }
    }

    /// Stop everything: stream, recording and playback
    ///
    /// The device is closed and every session handle is dropped.
    pub async fn shutdown(&self) {
        self.stop_streaming().await;

        let mut control = self.control.lock().await;
        control.playback.stop();
        control.playback_owner = None;

        let finalized = self
            .with_recorder(|recorder| recorder.stop().map_err(|e| e.to_string()))
            .await
            .map_err(|e| e.to_string())
            .and_then(|result| result);
        if let Err(e) = finalized {
            tracing::warn!(error = %e, "Failed to finalize recording");
        }
        self.shared.viewers.clear();

        tracing::info!("Broadcast hub shut down");
    }
}

impl Drop for BroadcastHub {
    fn drop(&mut self) {
        if let Some(task) = self.control.get_mut().capture.take() {
            task.cancel.cancel();
        }
    }
}

/// Capture, render, record and broadcast until cancelled
///
/// Returns the pipeline with the device closed, or `None` if the runtime
/// aborted the blocking step. `streaming` is cleared as the very last step.
async fn capture_loop(
    mut pipeline: CapturePipeline,
    settings: StreamSettings,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    max_failures: u32,
) -> Option<CapturePipeline> {
    let interval = settings.frame_interval();
    let grid = settings.resolution;
    let mut failures = 0u32;

    loop {
        let deadline = Instant::now() + interval;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }

        let recorder = Arc::clone(&shared);
        let stopping = cancel.clone();
        let captured = tokio::task::spawn_blocking(move || {
            let result = pipeline.capture_text(grid);
            if let Ok(Some(text)) = &result {
                if !stopping.is_cancelled() {
                    recorder.record(text);
                }
            }
            (pipeline, result)
        })
        .await;

        let result = match captured {
            Ok((returned, result)) => {
                pipeline = returned;
                result
            }
            Err(e) => {
                // Device panics are caught inside the task; this is runtime shutdown
                tracing::error!(error = %e, "Capture task aborted");
                shared.counters.end();
                shared.streaming.store(false, Ordering::Release);
                return None;
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(Some(text)) => {
                failures = 0;
                shared.publish(TextFrame::new(text));
            }
            Ok(None) => {
                shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Empty frame captured");
            }
            Err(e) => {
                failures += 1;
                shared.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, failures = failures, "Frame capture failed");

                if failures >= max_failures {
                    tracing::error!(failures = failures, "Capture device keeps failing, stopping stream");
                    break;
                }
            }
        }
    }

    pipeline.device.close();
    shared.counters.end();
    shared.streaming.store(false, Ordering::Release);
    tracing::debug!("Capture loop exited");

    Some(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{
        AsciiRenderer, DeviceMonitor, LabelRenderer, ScriptStep, ScriptedDevice, TestPatternDevice,
    };
    use crate::session::context::tests::channel_session;
    use crate::session::Role;

    fn scripted_hub(
        script: impl IntoIterator<Item = ScriptStep>,
        config: HubConfig,
    ) -> (BroadcastHub, Arc<DeviceMonitor>) {
        let device = ScriptedDevice::new(script);
        let monitor = device.monitor();
        let renderer = LabelRenderer::with_monitor(Arc::clone(&monitor));
        let hub = BroadcastHub::with_config(Box::new(device), Box::new(renderer), config);
        (hub, monitor)
    }

    async fn wait_until_stopped(hub: &BroadcastHub) {
        while hub.is_streaming() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_frame_interval() {
        let settings = StreamSettings {
            camera_index: 0,
            resolution: Resolution::default(),
            fps: 10,
        };
        assert_eq!(settings.frame_interval(), Duration::from_millis(100));

        let fast = StreamSettings { fps: 5000, ..settings };
        assert_eq!(fast.frame_interval(), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let (hub, monitor) = scripted_hub([], HubConfig::default());
        assert_eq!(hub.get_status(), "inactive");

        hub.start_streaming(0, "120x90", 10).await.unwrap();
        assert!(hub.is_streaming());
        assert_eq!(hub.get_status(), "active");
        assert_eq!(monitor.resolution(), Some((240, 180)));
        assert_eq!(monitor.ramp().as_deref(), Some("@%#*+=-:. "));

        // Second start leaves the running stream alone
        hub.start_streaming(0, "64x48", 5).await.unwrap();
        assert_eq!(monitor.opens(), 1);
        assert_eq!(hub.settings().await.unwrap().fps, 10);

        hub.stop_streaming().await;
        assert!(!hub.is_streaming());
        assert!(!monitor.is_open());
        assert_eq!(monitor.closes(), 1);

        hub.stop_streaming().await;
        assert_eq!(monitor.closes(), 1);

        hub.start_streaming(0, "64x48", 5).await.unwrap();
        assert_eq!(monitor.opens(), 2);
        assert_eq!(monitor.resolution(), Some((128, 96)));
        hub.stop_streaming().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_reach_viewers() {
        let (hub, _monitor) = scripted_hub(
            [ScriptStep::Frame(1), ScriptStep::Empty, ScriptStep::Frame(2)],
            HubConfig::default(),
        );
        let (viewer, mut rx) = channel_session(1);
        hub.add_viewer(&viewer).await;

        hub.start_streaming(0, "120x90", 10).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "frame 1 120x90");
        assert_eq!(rx.recv().await.unwrap(), "frame 2 120x90");

        let stats = hub.stats().await;
        assert!(stats.streaming);
        assert_eq!(stats.viewer_count, 1);
        assert!(stats.capture.frames_skipped >= 1);

        hub.stop_streaming().await;
        assert_eq!(hub.viewer_count(), 0, "stop clears viewers");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_leaves_state() {
        let (hub, monitor) = scripted_hub([], HubConfig::default());

        assert_eq!(
            hub.start_streaming(0, "wide", 10).await,
            Err(HubError::InvalidResolution("wide".into()))
        );
        assert_eq!(hub.start_streaming(0, "120x90", 0).await, Err(HubError::InvalidFps));
        assert!(!hub.is_streaming());
        assert_eq!(monitor.opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_resolution_rejected() {
        let (hub, monitor) = scripted_hub([], HubConfig::default());

        for requested in ["40000x40000", "321x240", "320x241"] {
            assert_eq!(
                hub.start_streaming(0, requested, 10).await,
                Err(HubError::InvalidResolution(requested.into()))
            );
        }
        assert!(!hub.is_streaming());
        assert_eq!(monitor.opens(), 0);

        // The largest accepted grid still streams
        hub.start_streaming(0, "320x240", 10).await.unwrap();
        assert_eq!(monitor.resolution(), Some((640, 480)));
        hub.stop_streaming().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_size_limit_keeps_pipeline() {
        let config = HubConfig::default().max_resolution(Resolution::new(u32::MAX, u32::MAX));
        let hub = BroadcastHub::with_config(
            Box::new(TestPatternDevice::new()),
            Box::new(AsciiRenderer::new()),
            config,
        );

        let err = hub.start_streaming(0, "40000x40000", 10).await.unwrap_err();
        assert_eq!(
            err,
            HubError::Device(DeviceError::UnsupportedResolution {
                width: 80_000,
                height: 80_000
            })
        );
        assert!(!hub.is_streaming());

        let (viewer, mut rx) = channel_session(1);
        hub.add_viewer(&viewer).await;
        hub.start_streaming(0, "8x4", 10).await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.lines().count(), 4);
        assert!(frame.lines().all(|row| row.chars().count() == 8));
        hub.stop_streaming().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_panic_keeps_pipeline() {
        let script = (0..2).map(|n| ScriptStep::Panic(format!("driver fault {}", n)));
        let config = HubConfig::default().max_consecutive_failures(2);
        let (hub, monitor) = scripted_hub(script, config);

        hub.start_streaming(0, "120x90", 10).await.unwrap();
        wait_until_stopped(&hub).await;

        assert!(!monitor.is_open());
        assert_eq!(monitor.closes(), 1);
        assert_eq!(hub.stats().await.capture.capture_errors, 2);

        // The next start reuses the same device
        let (viewer, mut rx) = channel_session(1);
        hub.add_viewer(&viewer).await;
        hub.start_streaming(0, "120x90", 10).await.unwrap();
        assert_eq!(monitor.opens(), 2);
        assert_eq!(rx.recv().await.unwrap(), "frame 0 120x90");
        hub.stop_streaming().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_rolls_back() {
        let device = ScriptedDevice::new([]).failing_open(DeviceError::OpenFailed("busy".into()));
        let monitor = device.monitor();
        let hub = BroadcastHub::new(Box::new(device), Box::new(LabelRenderer::default()));

        let err = hub.start_streaming(0, "120x90", 10).await.unwrap_err();
        assert_eq!(err, HubError::Device(DeviceError::OpenFailed("busy".into())));
        assert!(!hub.is_streaming());
        assert!(!monitor.is_open());

        // The pipeline is still available for another attempt
        let err = hub.start_streaming(0, "120x90", 10).await.unwrap_err();
        assert!(matches!(err, HubError::Device(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device_index() {
        let (hub, _monitor) = scripted_hub([], HubConfig::default());
        let err = hub.start_streaming(4, "120x90", 10).await.unwrap_err();
        assert_eq!(err, HubError::Device(DeviceError::NotFound(4)));
        assert!(!hub.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_end_stream() {
        let script = (0..3).map(|n| ScriptStep::Fail(format!("glitch {}", n)));
        let config = HubConfig::default().max_consecutive_failures(3);
        let (hub, monitor) = scripted_hub(script, config);

        hub.start_streaming(0, "120x90", 10).await.unwrap();
        wait_until_stopped(&hub).await;

        assert!(!monitor.is_open());
        assert_eq!(monitor.captures(), 3);
        assert_eq!(hub.stats().await.capture.capture_errors, 3);

        // The pipeline is reclaimed from the finished loop
        hub.start_streaming(0, "120x90", 10).await.unwrap();
        assert_eq!(monitor.opens(), 2);
        hub.stop_streaming().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_frame_wait() {
        let (hub, monitor) = scripted_hub([], HubConfig::default());

        hub.start_streaming(0, "120x90", 1).await.unwrap();
        let before = Instant::now();
        hub.stop_streaming().await;

        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(monitor.captures(), 0);
        assert!(!monitor.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_live_frames() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::default().recordings_dir(dir.path());
        let (hub, _monitor) = scripted_hub([ScriptStep::Frame(5)], config);
        let (viewer, mut rx) = channel_session(1);
        hub.add_viewer(&viewer).await;

        let path = hub.start_recording().await.unwrap();
        assert!(hub.is_recording());
        assert_eq!(hub.start_recording().await.unwrap(), path);

        hub.start_streaming(0, "8x4", 10).await.unwrap();
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }
        hub.stop_streaming().await;

        let summary = hub.stop_recording().await.unwrap().unwrap();
        assert!(summary.frame_count >= 3);
        assert!(!hub.is_recording());
        assert!(hub.stop_recording().await.unwrap().is_none());

        let listed = hub.recordings().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].frame_count, summary.frame_count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_goes_to_requesting_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("clip.asr"),
            "ASCII_STREAM_RECORD\nversion:1.0\nframes:\nframe:0:2\nA1\nframe:40:2\nA2\n",
        )
        .unwrap();
        let config = HubConfig::default().recordings_dir(dir.path());
        let (hub, _monitor) = scripted_hub([], config);
        let (viewer, mut rx) = channel_session(4);

        hub.start_playback("clip.asr", &viewer).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "A1");
        assert_eq!(rx.recv().await.unwrap(), "A2");

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(hub.playback_state().await, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::default().recordings_dir(dir.path());
        let (hub, _monitor) = scripted_hub([], config);
        let (viewer, _rx) = channel_session(1);

        for name in ["../etc/passwd", "a/b.asr", "", "missing.asr"] {
            let err = hub.start_playback(name, &viewer).await.unwrap_err();
            assert!(matches!(err, HubError::Playback(_)), "{:?}", name);
        }
        assert_eq!(hub.playback_state().await, PlaybackState::Idle);
        assert!(!hub.pause_playback().await);
        assert!(!hub.stop_playback().await);
        assert_eq!(hub.set_playback_speed(20.0).await, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_release_stops_stream() {
        let (hub, monitor) = scripted_hub([], HubConfig::default());
        let (controller, _rx) = channel_session(1);
        let (other, _rx2) = channel_session(2);

        controller.authenticate(Role::Controller);
        hub.claim_controller(&controller).await.unwrap();
        assert_eq!(hub.claim_controller(&other).await, Err(HubError::ControllerTaken));
        assert!(hub.has_controller());

        hub.start_streaming(0, "120x90", 10).await.unwrap();

        let phase = controller.close();
        hub.release_session(controller.id(), phase).await;

        assert!(!hub.is_streaming());
        assert!(!hub.has_controller());
        assert!(!monitor.is_open());
        hub.claim_controller(&other).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_controller_release_keeps_new_stream() {
        let (hub, monitor) = scripted_hub([], HubConfig::default());
        let (first, _rx1) = channel_session(1);
        let (second, _rx2) = channel_session(2);

        first.authenticate(Role::Controller);
        hub.claim_controller(&first).await.unwrap();
        hub.start_streaming(0, "120x90", 10).await.unwrap();

        // The first controller drops and a new one takes over before the
        // old connection's teardown runs
        let stale_phase = first.close();
        second.authenticate(Role::Controller);
        hub.claim_controller(&second).await.unwrap();
        hub.start_streaming(0, "120x90", 10).await.unwrap();

        hub.release_session(first.id(), stale_phase).await;

        assert!(hub.is_streaming());
        assert!(monitor.is_open());
        assert_eq!(monitor.opens(), 1);
        assert_eq!(hub.stats().await.viewer_count, 1);
        assert!(hub.has_controller());

        let phase = second.close();
        hub.release_session(second.id(), phase).await;
        assert!(!hub.is_streaming());
        assert!(!hub.has_controller());
        assert!(!monitor.is_open());
    }

    #[tokio::test]
    async fn test_viewer_add_remove() {
        let (hub, _monitor) = scripted_hub([], HubConfig::default());
        let (a, _rx_a) = channel_session(1);
        let (b, _rx_b) = channel_session(2);

        hub.add_viewer(&a).await;
        hub.add_viewer(&b).await;
        assert_eq!(hub.viewer_count(), 2);

        hub.remove_viewer(&a).await;
        assert_eq!(hub.viewer_count(), 1);

        drop(b);
        hub.remove_viewer_by_id(2).await;
        hub.remove_viewer_by_id(2).await;
        assert_eq!(hub.viewer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finalizes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::default().recordings_dir(dir.path());
        let (hub, monitor) = scripted_hub([], config);

        let path = hub.start_recording().await.unwrap();
        hub.start_streaming(0, "120x90", 10).await.unwrap();
        hub.shutdown().await;

        assert!(!hub.is_streaming());
        assert!(!hub.is_recording());
        assert!(!monitor.is_open());
        let data = std::fs::read_to_string(path).unwrap();
        assert!(data.contains("frame_count:"));
    }
}
