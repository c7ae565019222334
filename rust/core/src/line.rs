// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One physical line of an LDraw document.
//!
//! A [`Line`] is a shared [`LineHeader`] plus a payload selected by the
//! leading integer type code: `0` comment, `1` sub-model reference, `2`
//! segment, `3` triangle, `4` quad, `5` conditional segment. Anything else
//! is `Empty` (all whitespace) or `Unknown` (never parses). Payload field
//! scans are locale-independent: every decimal goes through `fast-float`,
//! every integer through `lexical-core`, regardless of host locale.

use crate::comment::CommentLine;
use crate::error::{DiagKind, Diagnostic, Severity};
use crate::model_ref::ModelRefLine;
use crate::shape::{CondLine, QuadLine, SegmentLine, TriangleLine};

/// BFC certification state of a document. Only ever advances forward:
/// once `Off`, never back to `On`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BfcState {
    #[default]
    Unknown,
    Off,
    On,
    /// Certified implicitly because the document is a part
    ForcedOn,
}

impl BfcState {
    #[inline]
    pub fn is_certified(self) -> bool {
        matches!(self, BfcState::On | BfcState::ForcedOn)
    }
}

/// Per-line snapshot of document state, stamped on action lines just
/// before they parse.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActionFlags {
    pub bfc_certify: BfcState,
    pub bfc_clip: bool,
    pub bfc_winding_ccw: bool,
    pub bfc_invert: bool,
    pub bbox_ignore: bool,
    pub texmap_fallback: bool,
}

impl Default for ActionFlags {
    fn default() -> Self {
        Self {
            bfc_certify: BfcState::Unknown,
            bfc_clip: false,
            bfc_winding_ccw: true,
            bfc_invert: false,
            bbox_ignore: false,
            texmap_fallback: false,
        }
    }
}

impl ActionFlags {
    /// Whether back-face culling applies to this line
    #[inline]
    pub fn bfc_on(&self) -> bool {
        self.bfc_certify.is_certified() && self.bfc_clip
    }
}

/// Fields common to every line variant
#[derive(Debug, Clone)]
pub struct LineHeader {
    /// Current text, after any normalization
    pub text: String,
    /// Pre-substitution text, kept for diagnostics when a repair produced
    /// this line
    pub original: Option<String>,
    /// 1-based line number in the source file
    pub line_number: usize,
    /// Normalized re-serialization produced by a successful parse
    pub formatted: Option<String>,
    pub valid: bool,
    /// Set when repair lines were spliced in after this line
    pub replaced: bool,
    /// Index of the step this line belongs to
    pub step_index: usize,
    /// Index into the owning document's texmap table when this line falls
    /// inside a texture mapping block
    pub texmap_index: Option<usize>,
    pub diagnostic: Option<Diagnostic>,
}

impl LineHeader {
    pub fn new(text: String, line_number: usize, original: Option<String>) -> Self {
        Self {
            text,
            original,
            line_number,
            formatted: None,
            valid: true,
            replaced: false,
            step_index: 0,
            texmap_index: None,
            diagnostic: None,
        }
    }

    pub fn set_error(&mut self, kind: DiagKind, message: impl Into<String>) {
        self.diagnostic = Some(Diagnostic::error(kind, self.line_number, message));
    }

    pub fn set_warning(&mut self, kind: DiagKind, message: impl Into<String>) {
        self.diagnostic = Some(Diagnostic::warning(kind, self.line_number, message));
    }

    /// Text for display: the formatted form when available
    #[inline]
    pub fn display_text(&self) -> &str {
        self.formatted.as_deref().unwrap_or(&self.text)
    }
}

/// Variant payloads
#[derive(Debug, Clone)]
pub enum LinePayload {
    Comment(CommentLine),
    ModelRef(ModelRefLine),
    Segment(SegmentLine),
    Triangle(TriangleLine),
    Quad(QuadLine),
    CondLine(CondLine),
    Empty,
    Unknown,
}

impl LinePayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            LinePayload::Comment(_) => "comment",
            LinePayload::ModelRef(_) => "model reference",
            LinePayload::Segment(_) => "segment",
            LinePayload::Triangle(_) => "triangle",
            LinePayload::Quad(_) => "quad",
            LinePayload::CondLine(_) => "conditional segment",
            LinePayload::Empty => "empty",
            LinePayload::Unknown => "unknown",
        }
    }
}

/// One physical line
#[derive(Debug, Clone)]
pub struct Line {
    pub header: LineHeader,
    pub payload: LinePayload,
}

impl Line {
    /// Classify raw text by its leading integer type code. Comment lines
    /// pre-tokenize their words; nothing else is parsed yet.
    pub fn scan(text: &str, line_number: usize) -> Line {
        Line::scan_with_original(text, line_number, None)
    }

    pub fn scan_with_original(text: &str, line_number: usize, original: Option<String>) -> Line {
        let payload = match scan_line_type(text) {
            Some(0) => LinePayload::Comment(CommentLine::from_text(text)),
            Some(1) => LinePayload::ModelRef(ModelRefLine::default()),
            Some(2) => LinePayload::Segment(SegmentLine::default()),
            Some(3) => LinePayload::Triangle(TriangleLine::default()),
            Some(4) => LinePayload::Quad(QuadLine::default()),
            Some(5) => LinePayload::CondLine(CondLine::default()),
            _ => {
                if text.trim().is_empty() {
                    LinePayload::Empty
                } else {
                    LinePayload::Unknown
                }
            }
        };
        Line {
            header: LineHeader::new(text.to_owned(), line_number, original),
            payload,
        }
    }

    /// Whether this line produces geometry (or a sub-model reference)
    #[inline]
    pub fn is_action(&self) -> bool {
        matches!(
            self.payload,
            LinePayload::ModelRef(_)
                | LinePayload::Segment(_)
                | LinePayload::Triangle(_)
                | LinePayload::Quad(_)
                | LinePayload::CondLine(_)
        )
    }

    /// Stamp flags shared by all action variants; no-op for others
    pub fn action_flags_mut(&mut self) -> Option<&mut ActionFlags> {
        match &mut self.payload {
            LinePayload::ModelRef(m) => Some(&mut m.flags),
            LinePayload::Segment(s) => Some(&mut s.flags),
            LinePayload::Triangle(t) => Some(&mut t.flags),
            LinePayload::Quad(q) => Some(&mut q.flags),
            LinePayload::CondLine(c) => Some(&mut c.flags),
            _ => None,
        }
    }

    pub fn action_flags(&self) -> Option<&ActionFlags> {
        match &self.payload {
            LinePayload::ModelRef(m) => Some(&m.flags),
            LinePayload::Segment(s) => Some(&s.flags),
            LinePayload::Triangle(t) => Some(&t.flags),
            LinePayload::Quad(q) => Some(&q.flags),
            LinePayload::CondLine(c) => Some(&c.flags),
            _ => None,
        }
    }

    /// Color code of an action line, when parsed
    pub fn color_number(&self) -> Option<u32> {
        match &self.payload {
            LinePayload::ModelRef(m) => Some(m.color_number),
            LinePayload::Segment(s) => Some(s.color_number),
            LinePayload::Triangle(t) => Some(t.color_number),
            LinePayload::Quad(q) => Some(q.color_number),
            LinePayload::CondLine(c) => Some(c.color_number),
            _ => None,
        }
    }

    /// Attach a diagnostic and surface it through the logger
    pub fn report(&self) {
        if let Some(diag) = &self.header.diagnostic {
            match diag.severity {
                Severity::Error => log::warn!("{}: {}", diag, self.header.text.trim_end()),
                Severity::Warning => log::debug!("{}: {}", diag, self.header.text.trim_end()),
            }
        }
    }
}

/// First whitespace-delimited token parsed as an integer, if any
fn scan_line_type(text: &str) -> Option<i32> {
    let trimmed = text.trim_start();
    let bytes = trimmed.as_bytes();
    let (value, consumed) = lexical_core::parse_partial::<i32>(bytes).ok()?;
    if consumed == 0 {
        return None;
    }
    // The token must end at whitespace or end of line
    match bytes.get(consumed) {
        None => Some(value),
        Some(b) if b.is_ascii_whitespace() => Some(value),
        _ => None,
    }
}

/// The `index`-th (0-based) whitespace-delimited word
pub fn word_at(text: &str, index: usize) -> Option<&str> {
    text.split_ascii_whitespace().nth(index)
}

/// Text of words `start..end` with their original spelling, single-space
/// joined. Used for diagnostics and repair-line construction.
pub fn word_range(text: &str, start: usize, end: usize) -> String {
    text.split_ascii_whitespace()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text through the end of the second word (type code + color), used as the
/// prefix when re-serializing. Empty when the line has fewer than two words.
pub fn type_and_color_prefix(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut pos = 0;
    for _ in 0..2 {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos == bytes.len() {
            return "";
        }
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
    }
    &text[..pos]
}

/// Parse a color word the way `sscanf("%i")` would: decimal, or hex with a
/// `0x` prefix.
pub fn parse_color_word(word: &str) -> Option<u32> {
    if let Some(hex) = word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        let (value, consumed) = lexical_core::parse_partial::<u32>(word.as_bytes()).ok()?;
        if consumed == word.len() {
            Some(value)
        } else {
            None
        }
    }
}

/// Parse one decimal word, requiring the whole word to be consumed
pub fn parse_float_word(word: &str) -> Option<f32> {
    match fast_float::parse_partial::<f32, _>(word.as_bytes()) {
        Ok((value, consumed)) if consumed == word.len() => Some(value),
        _ => None,
    }
}

/// Scan `count` floats starting at word 2 (after type code and color).
/// Returns the color and the floats, or `None` on any malformed field.
pub fn scan_color_and_floats(text: &str, count: usize, out: &mut [f32]) -> Option<u32> {
    debug_assert!(out.len() >= count);
    let mut words = text.split_ascii_whitespace();
    words.next()?; // type code, already validated by scan
    let color = parse_color_word(words.next()?)?;
    for slot in out.iter_mut().take(count) {
        *slot = parse_float_word(words.next()?)?;
    }
    Some(color)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_dispatch() {
        assert!(matches!(
            Line::scan("0 comment", 1).payload,
            LinePayload::Comment(_)
        ));
        assert!(matches!(
            Line::scan("1 16 0 0 0 1 0 0 0 1 0 0 0 1 part.dat", 1).payload,
            LinePayload::ModelRef(_)
        ));
        assert!(matches!(
            Line::scan("2 24 0 0 0 1 1 1", 1).payload,
            LinePayload::Segment(_)
        ));
        assert!(matches!(
            Line::scan("3 16 0 0 0 1 0 0 0 1 0", 1).payload,
            LinePayload::Triangle(_)
        ));
        assert!(matches!(
            Line::scan("4 16 0 0 0 1 0 0 1 1 0 0 1 0", 1).payload,
            LinePayload::Quad(_)
        ));
        assert!(matches!(
            Line::scan("5 24 0 0 0 1 0 0 0 1 0 1 1 0", 1).payload,
            LinePayload::CondLine(_)
        ));
        assert!(matches!(Line::scan("   \t ", 1).payload, LinePayload::Empty));
        assert!(matches!(
            Line::scan("bogus line", 1).payload,
            LinePayload::Unknown
        ));
        assert!(matches!(
            Line::scan("7 unknown type", 1).payload,
            LinePayload::Unknown
        ));
    }

    #[test]
    fn test_type_and_color_prefix() {
        assert_eq!(type_and_color_prefix("4 16 0 0 0"), "4 16");
        assert_eq!(type_and_color_prefix("  4   0x2FF8000 1 2 3"), "  4   0x2FF8000");
        assert_eq!(type_and_color_prefix("4"), "");
    }

    #[test]
    fn test_parse_color_word() {
        assert_eq!(parse_color_word("16"), Some(16));
        assert_eq!(parse_color_word("0x2FF8000"), Some(0x2FF8000));
        assert_eq!(parse_color_word("red"), None);
    }

    #[test]
    fn test_scan_color_and_floats() {
        let mut out = [0.0f32; 6];
        let color = scan_color_and_floats("2 24 0 0 0 1.5 -2 3e1", 6, &mut out);
        assert_eq!(color, Some(24));
        assert_eq!(out, [0.0, 0.0, 0.0, 1.5, -2.0, 30.0]);
        assert_eq!(scan_color_and_floats("2 24 0 0", 6, &mut out), None);
        assert_eq!(scan_color_and_floats("2 24 0 0 0 1 1 x", 6, &mut out), None);
    }

    #[test]
    fn test_word_range() {
        assert_eq!(word_range("4 16  1 2 3  4 5 6", 2, 5), "1 2 3");
    }
}
