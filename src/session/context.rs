//! Shared session handle
//!
//! A [`Session`] is owned by its connection task and shared as `Arc<Session>`
//! with the writer task it spawns. The broadcast hub only ever holds a
//! `Weak<Session>`, so a disconnected session is reclaimed as soon as its
//! connection task and writer finish.
//!
//! Outbound delivery follows a single-writer discipline: enqueueing never
//! waits for the socket, and a writer task is started only when none is
//! running. That writer drains the queue in order and exits when it is empty.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{Sink, SinkExt};
use tokio::time::Instant;

use super::outbound::OutboundQueue;
use super::state::{Role, SessionPhase};
use crate::error::Error;
use crate::registry::TextFrame;
use crate::stats::SessionStats;

/// Type-erased text sink a session writes to
pub type BoxSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

#[derive(Default)]
struct Counters {
    frames_enqueued: AtomicU64,
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    replies_written: AtomicU64,
}

/// One connected client
pub struct Session {
    id: u64,
    phase: Mutex<SessionPhase>,
    outbound: Mutex<OutboundQueue>,
    sink: tokio::sync::Mutex<BoxSink>,
    write_failed: AtomicBool,
    counters: Counters,
    created_at: Instant,
}

impl Session {
    /// Create a session writing to `sink`
    pub fn new(id: u64, sink: BoxSink, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            phase: Mutex::new(SessionPhase::Unauthenticated),
            outbound: Mutex::new(OutboundQueue::new(queue_capacity)),
            sink: tokio::sync::Mutex::new(sink),
            write_failed: AtomicBool::new(false),
            counters: Counters::default(),
            created_at: Instant::now(),
        })
    }

    /// Create a session from any text sink
    pub fn with_sink<S>(id: u64, sink: S, queue_capacity: usize) -> Arc<Self>
    where
        S: Sink<String, Error = Error> + Send + 'static,
    {
        Self::new(id, Box::pin(sink), queue_capacity)
    }

    /// Process-unique session ID
    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock_phase(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_outbound(&self) -> MutexGuard<'_, OutboundQueue> {
        self.outbound.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        *self.lock_phase()
    }

    /// Grant a role; see [`SessionPhase::authenticate`]
    pub fn authenticate(&self, role: Role) -> SessionPhase {
        self.lock_phase().authenticate(role)
    }

    /// Mark the session closed and discard pending output
    ///
    /// Returns the phase the session was in, so teardown can deregister it
    /// from the right place.
    pub fn close(&self) -> SessionPhase {
        let previous = self.lock_phase().close();
        self.lock_outbound().clear();
        previous
    }

    /// Whether the session no longer accepts output
    pub fn is_closed(&self) -> bool {
        self.phase() == SessionPhase::Closed || self.write_failed.load(Ordering::Acquire)
    }

    /// Queue a frame for delivery
    ///
    /// Never waits on the socket. When the frame lane is full the oldest
    /// queued frame is dropped.
    pub fn send_frame(self: &Arc<Self>, frame: TextFrame) {
        if self.is_closed() {
            return;
        }

        let start_writer = {
            let mut outbound = self.lock_outbound();
            if outbound.push_frame(frame).is_some() {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            self.counters.frames_enqueued.fetch_add(1, Ordering::Relaxed);
            outbound.begin_write()
        };

        if start_writer {
            self.spawn_writer();
        }
    }

    /// Queue a control reply; replies are never dropped
    pub fn send_reply(self: &Arc<Self>, reply: impl Into<String>) {
        if self.is_closed() {
            return;
        }

        let start_writer = {
            let mut outbound = self.lock_outbound();
            outbound.push_reply(reply.into());
            outbound.begin_write()
        };

        if start_writer {
            self.spawn_writer();
        }
    }

    /// Items waiting to be written
    pub fn queued(&self) -> usize {
        self.lock_outbound().len()
    }

    /// Whether a writer task is running
    pub fn is_writing(&self) -> bool {
        self.lock_outbound().is_writing()
    }

    /// Snapshot of delivery counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_enqueued: self.counters.frames_enqueued.load(Ordering::Relaxed),
            frames_written: self.counters.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            replies_written: self.counters.replies_written.load(Ordering::Relaxed),
            duration: self.created_at.elapsed(),
        }
    }

    /// Close the underlying sink
    ///
    /// Waits for an in-flight write to finish first.
    pub async fn close_sink(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!(session_id = self.id, error = %e, "Close failed");
        }
    }

    fn spawn_writer(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.write_pending().await });
    }

    async fn write_pending(&self) {
        let mut sink = self.sink.lock().await;

        loop {
            let Some(item) = self.lock_outbound().next_for_writer() else {
                return;
            };
            let is_frame = item.is_frame();

            if let Err(e) = sink.send(item.into_text()).await {
                tracing::debug!(session_id = self.id, error = %e, "Write failed");
                self.write_failed.store(true, Ordering::Release);
                self.lock_outbound().abort_write();
                return;
            }

            let counter = if is_frame {
                &self.counters.frames_written
            } else {
                &self.counters.replies_written
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
