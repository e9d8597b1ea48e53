//! Incremental terminal output for a streaming turn.
//!
//! Each render call carries the whole segment view; only the part not yet
//! printed is written. Code segments are fenced as R code blocks.

use std::io::{self, Write};

use tracing::warn;

use crate::accumulator::RenderHook;
use crate::tag_filter::{Segment, SegmentKind};

const CODE_FENCE_OPEN: &str = "\n```r\n";
const CODE_FENCE_CLOSE: &str = "\n```\n";

pub struct TerminalRenderer<W: Write> {
    out: W,
    printed: Vec<Segment>,
    error: Option<io::Error>,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: Vec::new(),
            error: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Close any open code block and end the turn's output
    pub fn finish(&mut self) -> io::Result<()> {
        match self.printed.last().map(|s| s.kind) {
            Some(SegmentKind::Code) => self.write(CODE_FENCE_CLOSE),
            Some(SegmentKind::Text) => self.write("\n"),
            None => {}
        }
        self.printed.clear();
        if self.error.is_none() {
            if let Err(e) = self.out.flush() {
                self.error = Some(e);
            }
        }
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn write(&mut self, text: &str) {
        if self.error.is_some() || text.is_empty() {
            return;
        }
        if let Err(e) = self.out.write_all(text.as_bytes()) {
            self.error = Some(e);
        }
    }

    fn draw(&mut self, segments: &[Segment]) {
        let printed = std::mem::take(&mut self.printed);

        // The view only grows, so everything but the last printed segment is
        // already complete on screen.
        for (i, segment) in segments.iter().enumerate() {
            let already = match printed.get(i) {
                Some(prev) if prev == segment => continue,
                Some(prev)
                    if prev.kind == segment.kind && segment.content.starts_with(&prev.content) =>
                {
                    prev.content.len()
                }
                Some(_) => {
                    warn!(index = i, "segment view changed under the renderer");
                    break;
                }
                None => {
                    if i > 0 && segments[i - 1].kind == SegmentKind::Code {
                        self.write(CODE_FENCE_CLOSE);
                    }
                    if segment.kind == SegmentKind::Code {
                        self.write(CODE_FENCE_OPEN);
                    }
                    0
                }
            };
            self.write(&segment.content[already..]);
        }

        self.printed = segments.to_vec();
        if let Err(e) = self.out.flush() {
            if self.error.is_none() {
                self.error = Some(e);
            }
        }
    }
}

impl<W: Write> RenderHook for TerminalRenderer<W> {
    fn render(&mut self, segments: &[Segment]) {
        self.draw(segments);
    }
}
