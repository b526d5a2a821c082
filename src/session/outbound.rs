//! Per-session outbound queue
//!
//! Two lanes feed the single writer of a session: control replies, which are
//! never dropped and always go first, and broadcast frames, which are bounded
//! and drop the oldest entry on overflow so a slow viewer always sees the
//! most recent picture.

use std::collections::VecDeque;

use crate::registry::TextFrame;

/// Default frame lane capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// An item waiting to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Control reply such as `CONFIG_APPLIED`
    Reply(String),
    /// Rendered frame
    Frame(TextFrame),
}

impl Outbound {
    /// Text to put on the wire
    pub fn into_text(self) -> String {
        match self {
            Outbound::Reply(text) => text,
            Outbound::Frame(frame) => frame.as_str().to_owned(),
        }
    }

    /// Whether this is a frame
    pub fn is_frame(&self) -> bool {
        matches!(self, Outbound::Frame(_))
    }
}

/// Bounded frame queue plus reply lane and writer flag
#[derive(Debug)]
pub struct OutboundQueue {
    replies: VecDeque<String>,
    frames: VecDeque<TextFrame>,
    capacity: usize,
    writing: bool,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            replies: VecDeque::new(),
            frames: VecDeque::with_capacity(capacity),
            capacity,
            writing: false,
        }
    }

    /// Frame lane capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a frame, returning the one evicted to make room
    pub fn push_frame(&mut self, frame: TextFrame) -> Option<TextFrame> {
        let dropped = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        dropped
    }

    /// Queue a control reply
    pub fn push_reply(&mut self, reply: String) {
        self.replies.push_back(reply);
    }

    /// Next item to write, replies first
    pub fn pop(&mut self) -> Option<Outbound> {
        if let Some(reply) = self.replies.pop_front() {
            return Some(Outbound::Reply(reply));
        }
        self.frames.pop_front().map(Outbound::Frame)
    }

    /// Queued frames
    pub fn frame_len(&self) -> usize {
        self.frames.len()
    }

    /// Queued items across both lanes
    pub fn len(&self) -> usize {
        self.replies.len() + self.frames.len()
    }

    /// Whether both lanes are empty
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty() && self.frames.is_empty()
    }

    /// Discard everything queued
    pub fn clear(&mut self) {
        self.replies.clear();
        self.frames.clear();
    }

    /// Claim the writer role
    ///
    /// Returns true when the caller must start a writer; false when one is
    /// already running or there is nothing to write.
    pub fn begin_write(&mut self) -> bool {
        if self.writing || self.is_empty() {
            return false;
        }
        self.writing = true;
        true
    }

    /// Next item for the running writer
    ///
    /// Releases the writer role when the queue is empty.
    pub fn next_for_writer(&mut self) -> Option<Outbound> {
        let item = self.pop();
        if item.is_none() {
            self.writing = false;
        }
        item
    }

    /// Release the writer role after a failed write
    pub fn abort_write(&mut self) {
        self.writing = false;
        self.clear();
    }

    /// Whether a writer is running
    pub fn is_writing(&self) -> bool {
        self.writing
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
