// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One model document and the arena that owns them all.
//!
//! Sub-document references form an arbitrary graph (shared primitives,
//! MPD blocks referencing each other), so documents live in a flat
//! [`DocArena`] and refer to each other through [`DocId`] handles instead
//! of owning pointers. Classification flags that outlive the parse are
//! kept on [`DocFlags`]; the per-parse meta state machines (BFC,
//! bounding-box ignore, texture mapping, embedded data) live in a
//! transient [`ParseState`] that is reset when parsing starts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use smallvec::SmallVec;

use crate::bounds::Bounds3;
use crate::comment::CommentLine;
use crate::error::{DiagKind, Diagnostic};
use crate::line::{BfcState, Line, LinePayload};
use crate::vector::Vector3;

/// Handle to a document in a [`DocArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DocId(pub u32);

/// Flat storage for every document loaded as part of one root model
#[derive(Debug, Default)]
pub struct DocArena {
    docs: Vec<Document>,
}

impl DocArena {
    pub fn alloc(&mut self, name: &str) -> DocId {
        let id = DocId(self.docs.len() as u32);
        self.docs.push(Document::new(id, name));
        id
    }

    #[inline]
    pub fn get(&self, id: DocId) -> &Document {
        &self.docs[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: DocId) -> &mut Document {
        &mut self.docs[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.docs.iter()
    }
}

/// Projection for texture mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TexmapMethod {
    Planar,
    Cylindrical,
    Spherical,
}

impl TexmapMethod {
    /// Number of angle parameters between the points and the file name
    pub fn extra_params(self) -> usize {
        match self {
            TexmapMethod::Planar => 0,
            TexmapMethod::Cylindrical => 1,
            TexmapMethod::Spherical => 2,
        }
    }

    pub fn from_word(word: &str) -> Option<TexmapMethod> {
        match word {
            "PLANAR" => Some(TexmapMethod::Planar),
            "CYLINDRICAL" => Some(TexmapMethod::Cylindrical),
            "SPHERICAL" => Some(TexmapMethod::Spherical),
            _ => None,
        }
    }
}

/// One texture mapping block's parameters. The image bytes are stored
/// undecoded; consumers hand them to whatever image stack they use.
#[derive(Debug, Clone)]
pub struct TexmapSettings {
    pub method: TexmapMethod,
    /// Normalized (lowercased, forward-slash) path or MPD-embedded key
    pub filename: String,
    pub points: [Vector3; 3],
    pub extra: SmallVec<[f32; 2]>,
    pub image: Option<Vec<u8>>,
    /// `!DATA` document supplying the image, when the texture is
    /// MPD-embedded
    pub embedded: Option<DocId>,
}

/// Classification that outlives the parse
#[derive(Debug, Clone, Copy, Default)]
pub struct DocFlags {
    pub part: bool,
    pub sub_part: bool,
    pub primitive: bool,
    /// Document came from a multi-part file
    pub mpd: bool,
    pub official: bool,
    pub unofficial: bool,
    /// Excluded from seam shrinking (flexible elements)
    pub no_shrink: bool,
    pub has_studs: bool,
    pub bfc_certify: BfcState,
}

/// Texture mapping machine position, while a block is open
#[derive(Debug, Clone)]
pub(crate) struct TexmapState {
    /// Index into [`Document::texmaps`]
    pub index: usize,
    pub fallback: bool,
    /// Block opened with NEXT: closes after one action line
    pub next: bool,
    /// Image resolved and loaded
    pub valid: bool,
}

/// Meta state that only matters while this document parses
#[derive(Debug, Clone, Default)]
pub(crate) struct ParseState {
    /// An action line has been seen
    pub started: bool,
    pub bfc_clip: bool,
    pub bfc_winding_ccw: bool,
    pub bfc_invert_next: bool,
    pub bbox_ignore_on: bool,
    pub bbox_ignore_begun: bool,
    pub texmap: Option<TexmapState>,
    /// Line index of the opening `!DATA START`
    pub data_start: Option<usize>,
    /// A `0 FILE` meta has been seen during the read pass
    pub main_block_seen: bool,
    /// The leading `0 FILE` meta has been consumed during parse
    pub main_block_parsed: bool,
}

impl ParseState {
    pub fn new() -> ParseState {
        ParseState {
            bfc_winding_ccw: true,
            ..ParseState::default()
        }
    }
}

/// One LDraw document: a file on disk or an embedded MPD block
#[derive(Debug)]
pub struct Document {
    pub id: DocId,
    /// Registry key: normalized reference name
    pub name: String,
    /// Resolved path, or a `parent:name` pseudo-path for embedded blocks
    pub filename: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub lines: Vec<Line>,
    /// Lines belonging to this document proper; for the root of an MPD
    /// file this stops where the first embedded block starts
    pub active_line_count: usize,
    /// Line indices of step boundaries
    pub step_indices: Vec<usize>,
    /// Document-level problems found during read and parse
    pub diagnostics: Vec<Diagnostic>,
    pub texmaps: Vec<TexmapSettings>,
    /// Decoded `!DATA` payload
    pub data: Option<Vec<u8>>,
    pub flags: DocFlags,
    /// Lines were handed over from the enclosing MPD block
    pub(crate) mpd_filled: bool,
    pub(crate) state: ParseState,
    pub(crate) bounding_box: Option<Bounds3>,
    pub(crate) max_radius: Option<f32>,
    pub(crate) max_full_radius: Option<f32>,
    pub(crate) radius_center: Vector3,
}

impl Document {
    pub fn new(id: DocId, name: &str) -> Document {
        Document {
            id,
            name: name.to_owned(),
            filename: String::new(),
            description: None,
            author: None,
            lines: Vec::new(),
            active_line_count: 0,
            step_indices: Vec::new(),
            diagnostics: Vec::new(),
            texmaps: Vec::new(),
            data: None,
            flags: DocFlags::default(),
            mpd_filled: false,
            state: ParseState::new(),
            bounding_box: None,
            max_radius: None,
            max_full_radius: None,
            radius_center: Vector3::ZERO,
        }
    }

    #[inline]
    pub fn is_part(&self) -> bool {
        self.flags.part || self.flags.sub_part
    }

    /// Whether culling currently applies: certified and clipping on
    #[inline]
    pub(crate) fn bfc_on(&self) -> bool {
        self.flags.bfc_certify.is_certified() && self.state.bfc_clip
    }

    pub fn has_bounding_box(&self) -> bool {
        self.bounding_box.map_or(false, |b| b.is_valid())
    }

    pub(crate) fn push_error(&mut self, kind: DiagKind, line_number: usize, message: impl Into<String>) {
        let diag = Diagnostic::error(kind, line_number, message);
        log::warn!("{}: {}", self.name, diag);
        self.diagnostics.push(diag);
    }

    pub(crate) fn push_warning(&mut self, kind: DiagKind, line_number: usize, message: impl Into<String>) {
        let diag = Diagnostic::warning(kind, line_number, message);
        log::debug!("{}: {}", self.name, diag);
        self.diagnostics.push(diag);
    }

    /// `0 BFC ...`: the certification state machine. Certification can
    /// only be decided before the first action line; everything after the
    /// decision either adjusts clip/winding or gets reported.
    pub(crate) fn parse_bfc_meta(&mut self, comment: &CommentLine, line_number: usize) {
        if self.state.bfc_invert_next {
            self.push_error(
                DiagKind::BfcError,
                line_number,
                "INVERTNEXT was not immediately followed by geometry.",
            );
            self.state.bfc_invert_next = false;
        }
        if self.flags.bfc_certify == BfcState::Unknown {
            if comment.contains_bfc_command("NOCERTIFY") {
                self.flags.bfc_certify = BfcState::Off;
                if self.state.started {
                    self.push_error(
                        DiagKind::BfcError,
                        line_number,
                        "NOCERTIFY must come before any action lines.",
                    );
                }
            } else if self.state.started {
                self.flags.bfc_certify = BfcState::Off;
                self.push_error(
                    DiagKind::BfcError,
                    line_number,
                    "First BFC command must come before any action lines.",
                );
            } else {
                // Any BFC command other than NOCERTIFY implies CERTIFY.
                // Certified parts force culling on even under uncertified
                // parents.
                self.flags.bfc_certify = if self.flags.part || self.flags.sub_part {
                    BfcState::ForcedOn
                } else {
                    BfcState::On
                };
                self.state.bfc_clip = true;
            }
        } else {
            if comment.contains_bfc_command("CERTIFY") {
                if self.flags.bfc_certify.is_certified() {
                    self.push_warning(
                        DiagKind::BfcWarning,
                        line_number,
                        "CERTIFY was not the first BFC command.",
                    );
                } else {
                    self.push_error(
                        DiagKind::BfcError,
                        line_number,
                        "CERTIFY after NOCERTIFY.",
                    );
                }
            }
            // Checked separately, since one command could carry both.
            if comment.contains_bfc_command("NOCERTIFY") {
                if self.flags.bfc_certify.is_certified() {
                    self.push_error(
                        DiagKind::BfcError,
                        line_number,
                        "NOCERTIFY after CERTIFY.",
                    );
                } else {
                    self.push_warning(
                        DiagKind::BfcWarning,
                        line_number,
                        "Repeated NOCERTIFY.",
                    );
                }
            }
        }
        if self.flags.bfc_certify.is_certified() {
            if comment.contains_bfc_command("CLIP") {
                if comment.contains_bfc_command("NOCLIP") {
                    self.push_error(
                        DiagKind::BfcError,
                        line_number,
                        "CLIP and NOCLIP in the same command.",
                    );
                } else {
                    self.state.bfc_clip = true;
                }
            } else if comment.contains_bfc_command("NOCLIP") {
                self.state.bfc_clip = false;
            }
            if comment.contains_bfc_command("CCW") {
                if comment.contains_bfc_command("CW") {
                    self.push_error(
                        DiagKind::BfcError,
                        line_number,
                        "CW and CCW in the same command.",
                    );
                } else {
                    self.state.bfc_winding_ccw = true;
                }
            } else if comment.contains_bfc_command("CW") {
                self.state.bfc_winding_ccw = false;
            }
            if comment.contains_bfc_command("INVERTNEXT") {
                self.state.bfc_invert_next = true;
            }
        } else if comment.contains_bfc_command("CLIP")
            || comment.contains_bfc_command("NOCLIP")
            || comment.contains_bfc_command("CW")
            || comment.contains_bfc_command("CCW")
            || comment.contains_bfc_command("INVERTNEXT")
        {
            self.push_error(
                DiagKind::BfcError,
                line_number,
                "BFC command in an uncertified document.",
            );
        }
    }

    /// `0 !LDVIEW BBOX_IGNORE ...`: BEGIN holds until END; NEXT covers
    /// only the following action line.
    pub(crate) fn parse_bbox_ignore_meta(&mut self, comment: &CommentLine, line_number: usize) {
        if comment.contains_bbox_ignore_command("BEGIN") {
            self.state.bbox_ignore_on = true;
            self.state.bbox_ignore_begun = true;
        } else if comment.contains_bbox_ignore_command("NEXT") {
            self.state.bbox_ignore_on = true;
        } else if comment.contains_bbox_ignore_command("END") {
            if !self.state.bbox_ignore_begun {
                self.push_warning(
                    DiagKind::MetaCommand,
                    line_number,
                    "BBOX_IGNORE END without BEGIN.",
                );
            }
            self.state.bbox_ignore_on = false;
            self.state.bbox_ignore_begun = false;
        } else {
            self.push_warning(
                DiagKind::MetaCommand,
                line_number,
                "Unknown BBOX_IGNORE command.",
            );
        }
    }

    /// `0 !DATA ...`: START opens a block; END decodes the accumulated
    /// `0 !:` base64 rows seen since.
    pub(crate) fn parse_data_meta(
        &mut self,
        index: usize,
        comment: &CommentLine,
        line_number: usize,
        lines: &[Line],
    ) {
        if let Some(start) = self.state.data_start {
            if comment.contains_data_command("END") {
                self.end_data(start, index, line_number, lines);
            } else {
                self.push_error(
                    DiagKind::MetaCommand,
                    line_number,
                    "Unexpected !DATA command.",
                );
            }
        } else if comment.contains_data_command("START") {
            self.state.data_start = Some(index);
        } else {
            self.push_error(
                DiagKind::MetaCommand,
                line_number,
                "Unexpected !DATA command.",
            );
        }
    }

    fn end_data(&mut self, start: usize, end: usize, line_number: usize, lines: &[Line]) {
        let mut text = String::new();
        for line in &lines[start + 1..end] {
            if let LinePayload::Comment(comment) = &line.payload {
                if comment.is_data_row_meta() {
                    let row = match comment.processed.find(':') {
                        Some(pos) => &comment.processed[pos + 1..],
                        None => continue,
                    };
                    text.extend(row.chars().filter(|c| {
                        c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
                    }));
                }
            }
        }
        match BASE64.decode(text.as_bytes()) {
            Ok(bytes) => self.data = Some(bytes),
            Err(_) => self.push_error(
                DiagKind::MetaCommand,
                line_number,
                "Error decoding !DATA content.",
            ),
        }
    }

    /// Close an open texture mapping block
    pub(crate) fn end_texmap(&mut self) {
        self.state.texmap = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Line;

    fn comment(text: &str) -> CommentLine {
        CommentLine::from_text(text)
    }

    fn doc() -> Document {
        Document::new(DocId(0), "test.ldr")
    }

    #[test]
    fn test_bfc_certify_default_on() {
        let mut d = doc();
        d.parse_bfc_meta(&comment("0 BFC CERTIFY CCW"), 1);
        assert_eq!(d.flags.bfc_certify, BfcState::On);
        assert!(d.state.bfc_clip);
        assert!(d.state.bfc_winding_ccw);
        assert!(d.diagnostics.is_empty());
    }

    #[test]
    fn test_bfc_part_forces_on() {
        let mut d = doc();
        d.flags.part = true;
        d.parse_bfc_meta(&comment("0 BFC CERTIFY CW"), 1);
        assert_eq!(d.flags.bfc_certify, BfcState::ForcedOn);
        assert!(!d.state.bfc_winding_ccw);
    }

    #[test]
    fn test_bfc_nocertify_sticks() {
        let mut d = doc();
        d.parse_bfc_meta(&comment("0 BFC NOCERTIFY"), 1);
        assert_eq!(d.flags.bfc_certify, BfcState::Off);
        // A later CERTIFY cannot turn it back on.
        d.parse_bfc_meta(&comment("0 BFC CERTIFY"), 2);
        assert_eq!(d.flags.bfc_certify, BfcState::Off);
        assert!(d.diagnostics.iter().any(|diag| diag.is_error()));
    }

    #[test]
    fn test_bfc_after_geometry_goes_off() {
        let mut d = doc();
        d.state.started = true;
        d.parse_bfc_meta(&comment("0 BFC CERTIFY"), 5);
        assert_eq!(d.flags.bfc_certify, BfcState::Off);
        assert_eq!(d.diagnostics.len(), 1);
        assert!(d.diagnostics[0].is_error());
    }

    #[test]
    fn test_bfc_clip_toggles() {
        let mut d = doc();
        d.parse_bfc_meta(&comment("0 BFC CERTIFY"), 1);
        d.parse_bfc_meta(&comment("0 BFC NOCLIP"), 2);
        assert!(!d.state.bfc_clip);
        assert!(!d.bfc_on());
        d.parse_bfc_meta(&comment("0 BFC CLIP CW"), 3);
        // Clip comes back on in a certified document, and the CW token
        // in the same command still applies.
        assert!(d.state.bfc_clip);
        assert!(d.bfc_on());
        assert!(!d.state.bfc_winding_ccw);
        assert!(d.diagnostics.is_empty());
    }

    #[test]
    fn test_bfc_command_in_uncertified_doc() {
        let mut d = doc();
        d.parse_bfc_meta(&comment("0 BFC NOCERTIFY"), 1);
        d.parse_bfc_meta(&comment("0 BFC INVERTNEXT"), 2);
        assert!(d
            .diagnostics
            .iter()
            .any(|diag| diag.kind == DiagKind::BfcError));
        assert!(!d.state.bfc_invert_next);
    }

    #[test]
    fn test_bfc_dangling_invert_next() {
        let mut d = doc();
        d.parse_bfc_meta(&comment("0 BFC CERTIFY"), 1);
        d.parse_bfc_meta(&comment("0 BFC INVERTNEXT"), 2);
        assert!(d.state.bfc_invert_next);
        d.parse_bfc_meta(&comment("0 BFC CLIP"), 3);
        assert!(!d.state.bfc_invert_next);
        assert!(d
            .diagnostics
            .iter()
            .any(|diag| diag.kind == DiagKind::BfcError));
    }

    #[test]
    fn test_bbox_ignore_machine() {
        let mut d = doc();
        d.parse_bbox_ignore_meta(&comment("0 !LDVIEW BBOX_IGNORE NEXT"), 1);
        assert!(d.state.bbox_ignore_on);
        assert!(!d.state.bbox_ignore_begun);
        d.parse_bbox_ignore_meta(&comment("0 !LDVIEW BBOX_IGNORE END"), 2);
        assert!(!d.state.bbox_ignore_on);
        // END without BEGIN warns but is not an error.
        assert_eq!(d.diagnostics.len(), 1);
        assert!(!d.diagnostics[0].is_error());
    }

    #[test]
    fn test_data_decode() {
        let lines = vec![
            Line::scan("0 !DATA START", 1),
            Line::scan("0 !: aGVs", 2),
            Line::scan("0 !: bG8=", 3),
            Line::scan("0 !DATA END", 4),
        ];
        let mut d = doc();
        d.parse_data_meta(0, &comment("0 !DATA START"), 1, &lines);
        assert_eq!(d.state.data_start, Some(0));
        d.parse_data_meta(3, &comment("0 !DATA END"), 4, &lines);
        assert_eq!(d.data.as_deref(), Some(&b"hello"[..]));
        assert!(d.diagnostics.is_empty());
    }

    #[test]
    fn test_data_end_without_start() {
        let mut d = doc();
        d.parse_data_meta(0, &comment("0 !DATA END"), 1, &[]);
        assert!(d.diagnostics[0].is_error());
    }

    #[test]
    fn test_arena_handles() {
        let mut arena = DocArena::default();
        let a = arena.alloc("a.ldr");
        let b = arena.alloc("b.dat");
        assert_ne!(a, b);
        arena.get_mut(b).flags.part = true;
        assert!(!arena.get(a).is_part());
        assert!(arena.get(b).is_part());
    }
}
