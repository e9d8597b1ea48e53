//! Tag Filter Module
//!
//! Splits a model response buffer into renderable segments using paired
//! sentinel tags such as `<scratchpad>...</scratchpad>` and `<r_code>...</r_code>`.
//!
//! ## Tag Modes
//! - [`TagMode::Strip`]: the tag and everything inside it is hidden. An
//!   unclosed block hides the rest of the buffer, so planning text never
//!   shows up while it is still streaming.
//! - [`TagMode::Segment`]: the contents become a [`SegmentKind::Code`]
//!   segment. An unclosed block is still emitted so code renders as it arrives.
//!
//! ## Streaming
//! The filter is a pure function of the buffer. A buffer tail that could still
//! grow into a marker (`"<r_co"`) is held back by [`TagFilter::segments`] until
//! a later delta decides it. [`TagFilter::resolve`] is used once the buffer is
//! final and treats such a tail as literal text.

use serde::{Deserialize, Serialize};

/// Planning block the model is asked to think in. Never shown.
pub const SCRATCHPAD_TAG: &str = "scratchpad";
/// Block holding the R code of an answer.
pub const R_CODE_TAG: &str = "r_code";

/// How the contents of a tag are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagMode {
    /// Remove the tag and its contents from visible output
    Strip,
    /// Render the contents as a separate code segment
    Segment,
}

/// A sentinel tag pair, `<name>` ... `</name>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    pub name: String,
    pub mode: TagMode,
}

impl TagSpec {
    pub fn new(name: impl Into<String>, mode: TagMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }

    pub fn strip(name: impl Into<String>) -> Self {
        Self::new(name, TagMode::Strip)
    }

    pub fn segment(name: impl Into<String>) -> Self {
        Self::new(name, TagMode::Segment)
    }

    /// Returns the opening marker for this tag
    pub fn open_tag(&self) -> String {
        format!("<{}>", self.name)
    }

    /// Returns the closing marker for this tag
    pub fn close_tag(&self) -> String {
        format!("</{}>", self.name)
    }
}

/// Tags used by the R assistant prompt: hidden scratchpad, segmented code.
pub fn default_tag_specs() -> Vec<TagSpec> {
    vec![TagSpec::strip(SCRATCHPAD_TAG), TagSpec::segment(R_CODE_TAG)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Text,
    Code,
}

/// One contiguous, classified chunk of renderable output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub content: String,
}

impl Segment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Text,
            content: content.into(),
        }
    }

    pub fn code(content: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Code,
            content: content.into(),
        }
    }
}

/// Concatenates segment contents in display order
pub fn concat_segments(segments: &[Segment]) -> String {
    segments.iter().map(|s| s.content.as_str()).collect()
}

#[derive(Debug, Clone)]
struct CompiledTag {
    name: String,
    mode: TagMode,
    open: String,
    close: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Buffer may still grow; hold back a possible partial marker
    Streaming,
    /// Buffer is complete; a partial marker is literal text
    Final,
}

enum ScanEvent<'a> {
    Text { kind: SegmentKind, text: &'a str },
    /// Marker text of a `Segment` tag outside any stripped block
    Marker(&'a str),
}

enum MarkerMatch<'a> {
    Open(&'a CompiledTag),
    Close(&'a CompiledTag),
    Partial,
    Literal,
}

/// Configured set of sentinel tags
#[derive(Debug, Clone)]
pub struct TagFilter {
    tags: Vec<CompiledTag>,
}

impl Default for TagFilter {
    fn default() -> Self {
        Self::new(&default_tag_specs())
    }
}

impl TagFilter {
    /// Create a filter for the given tags (earlier specs win on ties)
    pub fn new(specs: &[TagSpec]) -> Self {
        let tags = specs
            .iter()
            .map(|spec| CompiledTag {
                name: spec.name.clone(),
                mode: spec.mode,
                open: spec.open_tag(),
                close: spec.close_tag(),
            })
            .collect();
        Self { tags }
    }

    /// Current renderable view of a buffer that may still be growing
    pub fn segments(&self, buffer: &str) -> Vec<Segment> {
        self.collect_segments(buffer, Resolution::Streaming)
    }

    /// Renderable view of a completed buffer
    pub fn resolve(&self, buffer: &str) -> Vec<Segment> {
        self.collect_segments(buffer, Resolution::Final)
    }

    /// Completed buffer with stripped blocks removed.
    ///
    /// Markers of `Segment` tags are kept so the text can be sent back to the
    /// model or exported with its code blocks intact.
    pub fn strip(&self, buffer: &str) -> String {
        let mut out = String::with_capacity(buffer.len());
        self.scan(buffer, Resolution::Final, |event| match event {
            ScanEvent::Text { text, .. } => out.push_str(text),
            ScanEvent::Marker(marker) => out.push_str(marker),
        });
        out
    }

    fn collect_segments(&self, buffer: &str, resolution: Resolution) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        self.scan(buffer, resolution, |event| {
            if let ScanEvent::Text { kind, text } = event {
                push_coalesced(&mut segments, kind, text);
            }
        });
        segments
    }

    fn scan<'a>(
        &'a self,
        buffer: &'a str,
        resolution: Resolution,
        mut sink: impl FnMut(ScanEvent<'a>),
    ) {
        let mut stack: Vec<&'a CompiledTag> = Vec::new();
        let mut pos = 0;

        while pos < buffer.len() {
            let rest = &buffer[pos..];

            // Every marker starts with '<', so plain runs can be emitted whole
            let Some(lt) = rest.find('<') else {
                emit_text(&stack, rest, &mut sink);
                break;
            };
            emit_text(&stack, &rest[..lt], &mut sink);
            pos += lt;

            let rest = &buffer[pos..];
            match self.match_marker(rest, &stack) {
                MarkerMatch::Open(tag) => {
                    if tag.mode == TagMode::Segment {
                        sink(ScanEvent::Marker(&tag.open));
                    }
                    stack.push(tag);
                    pos += tag.open.len();
                }
                MarkerMatch::Close(tag) => {
                    stack.pop();
                    if tag.mode == TagMode::Segment {
                        sink(ScanEvent::Marker(&tag.close));
                    }
                    pos += tag.close.len();
                }
                MarkerMatch::Partial if resolution == Resolution::Streaming => break,
                MarkerMatch::Partial | MarkerMatch::Literal => {
                    emit_text(&stack, &rest[..1], &mut sink);
                    pos += 1;
                }
            }
        }
    }

    /// Classify the '<' at the start of `rest`.
    ///
    /// Inside a stripped block only its own close marker is recognized.
    /// Elsewhere the innermost tag's close marker and the open marker of any
    /// tag not already on the stack are candidates.
    fn match_marker<'a>(&'a self, rest: &str, stack: &[&'a CompiledTag]) -> MarkerMatch<'a> {
        let mut partial = false;

        if let Some(top) = stack.last().copied() {
            if rest.starts_with(top.close.as_str()) {
                return MarkerMatch::Close(top);
            }
            partial |= is_proper_prefix(rest, &top.close);

            if top.mode == TagMode::Strip {
                return if partial {
                    MarkerMatch::Partial
                } else {
                    MarkerMatch::Literal
                };
            }
        }

        for tag in &self.tags {
            if stack.iter().any(|open| open.name == tag.name) {
                continue;
            }
            if rest.starts_with(tag.open.as_str()) {
                return MarkerMatch::Open(tag);
            }
            partial |= is_proper_prefix(rest, &tag.open);
        }

        if partial {
            MarkerMatch::Partial
        } else {
            MarkerMatch::Literal
        }
    }
}

fn is_proper_prefix(rest: &str, marker: &str) -> bool {
    rest.len() < marker.len() && marker.starts_with(rest)
}

fn emit_text<'a>(stack: &[&CompiledTag], text: &'a str, sink: &mut impl FnMut(ScanEvent<'a>)) {
    if text.is_empty() {
        return;
    }
    if stack.iter().any(|t| t.mode == TagMode::Strip) {
        return;
    }
    let kind = if stack.iter().any(|t| t.mode == TagMode::Segment) {
        SegmentKind::Code
    } else {
        SegmentKind::Text
    };
    sink(ScanEvent::Text { kind, text });
}

fn push_coalesced(segments: &mut Vec<Segment>, kind: SegmentKind, text: &str) {
    if text.is_empty() {
        return;
    }
    match segments.last_mut() {
        Some(last) if last.kind == kind => last.content.push_str(text),
        _ => segments.push(Segment {
            kind,
            content: text.to_string(),
        }),
    }
}
