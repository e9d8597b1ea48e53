//! Stream Accumulator
//!
//! Collects the text deltas of one model turn into a raw buffer and re-runs
//! the tag filter after every delta so the caller can redraw.
//!
//! A turn moves `Idle -> Streaming` on [`StreamAccumulator::start`] and ends in
//! exactly one of `finish`, `cancel` or `fail`. Deltas that arrive outside a
//! streaming turn are ignored.

use crate::error::ChatError;
use crate::tag_filter::{Segment, TagFilter};
use tracing::{debug, trace};

/// Receives the current segment view. Each call carries the full view and
/// replaces what the previous call showed.
pub trait RenderHook {
    fn render(&mut self, segments: &[Segment]);
}

impl<F> RenderHook for F
where
    F: FnMut(&[Segment]),
{
    fn render(&mut self, segments: &[Segment]) {
        self(segments)
    }
}

/// Render hook that draws nothing
pub struct NoRender;

impl RenderHook for NoRender {
    fn render(&mut self, _segments: &[Segment]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Finished,
    Cancelled,
    Failed,
}

/// Result of a completed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutput {
    /// Final segment view
    pub segments: Vec<Segment>,
    /// Everything the model sent, byte for byte
    pub raw: String,
    /// Raw text with stripped blocks removed; used for history and export
    pub text: String,
}

pub struct StreamAccumulator {
    filter: TagFilter,
    buffer: String,
    state: TurnState,
    deltas: usize,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new(TagFilter::default())
    }
}

impl StreamAccumulator {
    pub fn new(filter: TagFilter) -> Self {
        Self {
            filter,
            buffer: String::new(),
            state: TurnState::Idle,
            deltas: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Raw text received so far in the current turn
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Begin a new turn with an empty buffer
    pub fn start(&mut self) {
        self.buffer.clear();
        self.deltas = 0;
        self.state = TurnState::Streaming;
        debug!("turn started");
    }

    /// Append a delta and hand the refreshed view to `hook`.
    ///
    /// Returns `false` if no turn is streaming and the delta was dropped.
    pub fn on_delta(&mut self, delta: &str, hook: &mut dyn RenderHook) -> bool {
        if self.state != TurnState::Streaming {
            trace!(state = ?self.state, "delta ignored outside a streaming turn");
            return false;
        }

        self.buffer.push_str(delta);
        self.deltas += 1;
        trace!(
            delta_len = delta.len(),
            buffer_len = self.buffer.len(),
            "delta appended"
        );

        let segments = self.filter.segments(&self.buffer);
        hook.render(&segments);
        true
    }

    /// Close the turn and return its final output.
    ///
    /// Returns `None` if no turn is streaming.
    pub fn finish(&mut self) -> Option<TurnOutput> {
        if self.state != TurnState::Streaming {
            return None;
        }

        self.state = TurnState::Finished;
        let raw = std::mem::take(&mut self.buffer);
        let output = TurnOutput {
            segments: self.filter.resolve(&raw),
            text: self.filter.strip(&raw),
            raw,
        };
        debug!(
            deltas = self.deltas,
            raw_len = output.raw.len(),
            segments = output.segments.len(),
            "turn finished"
        );
        Some(output)
    }

    /// Abandon the turn and release the buffer
    pub fn cancel(&mut self) {
        if self.state == TurnState::Streaming {
            debug!(deltas = self.deltas, "turn cancelled");
        }
        self.buffer = String::new();
        self.deltas = 0;
        self.state = TurnState::Cancelled;
    }

    /// Close the turn after a transport failure.
    ///
    /// The returned error carries the partial raw buffer.
    pub fn fail(&mut self, message: impl Into<String>) -> ChatError {
        let partial = std::mem::take(&mut self.buffer);
        self.deltas = 0;
        self.state = TurnState::Failed;
        ChatError::Transport {
            message: message.into(),
            partial,
        }
    }
}
