// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Root model loading: file resolution, the MPD registry, the parse
//! driver, and point scanning.
//!
//! [`MainModel`] owns everything a loaded model graph needs: the document
//! arena, the name registry, the color palette, and the interpretation
//! options. Loading is two passes per document. The read pass splits the
//! text into classified lines and registers embedded MPD blocks; the
//! parse pass walks lines with an explicit index so it can splice repair
//! lines in place and hand embedded block lines to their documents.

use std::fs;
use std::mem;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::bounds::Bounds3;
use crate::comment::CommentLine;
use crate::document::{DocArena, DocId, Document, TexmapMethod, TexmapSettings, TexmapState};
use crate::error::{DiagKind, Diagnostic, Error, Result};
use crate::line::{parse_float_word, ActionFlags, BfcState, Line, LinePayload};
use crate::palette::Palette;
use crate::vector::{Matrix4, Vector3};

/// Registry key prefix for low-resolution stud substitutes
const LOWRES_PREFIX: &str = "ldl-lowres:";

/// Fraction of load progress assigned to the root read pass
const READ_FRACTION: f32 = 0.1;

const LOAD_MESSAGE: &str = "Loading...";

/// A file located by [`LoadHooks::find_file`]
#[derive(Debug, Clone)]
pub struct FoundFile {
    /// Name or path to retry resolution with
    pub name: String,
    /// The file is known to be a part
    pub is_part: bool,
}

/// Callbacks a host wires into the load
pub trait LoadHooks {
    /// A diagnostic was recorded. `source` is the document name.
    fn report(&mut self, source: &str, diagnostic: &Diagnostic) {
        let _ = (source, diagnostic);
    }

    /// Progress through the load, 0.0 to 1.0. Return false to cancel.
    fn progress(&mut self, message: &str, fraction: f32) -> bool {
        let _ = (message, fraction);
        true
    }

    /// Last chance to locate a file the search path missed (part tracker
    /// downloads, user prompts)
    fn find_file(&mut self, name: &str) -> Option<FoundFile> {
        let _ = name;
        None
    }
}

/// Hooks that do nothing
#[derive(Debug, Default)]
pub struct NullHooks;

impl LoadHooks for NullHooks {}

/// Interpretation options, all fixed before [`MainModel::load`]
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Substitute low-resolution studs where available
    pub low_res_studs: bool,
    /// Force edge lines to black (or dark gray on dark colors)
    pub black_edge_lines: bool,
    pub red_back_faces: bool,
    pub green_front_faces: bool,
    pub blue_neutral_faces: bool,
    /// Load colors from `ldconfig.ldr` before the model
    pub process_ld_config: bool,
    /// Alternate ldconfig file name
    pub ld_config: Option<String>,
    /// Skip matrix and quad validation
    pub skip_validation: bool,
    /// Scan parts as their eight bounding-box corners instead of full
    /// geometry
    pub bounding_boxes_only: bool,
    pub random_colors: bool,
    pub force_highlight_color: bool,
    pub highlight_color_number: u32,
    /// Resolve and attach texture map images
    pub texmaps: bool,
    /// Include conditional-line control points in scans
    pub scan_conditional_control_points: bool,
    /// Gap to shrink parts by so seams show, in LDraw units
    pub seam_width: f32,
    pub extra_search_dirs: Vec<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            low_res_studs: false,
            black_edge_lines: false,
            red_back_faces: false,
            green_front_faces: false,
            blue_neutral_faces: false,
            process_ld_config: true,
            ld_config: None,
            skip_validation: false,
            bounding_boxes_only: false,
            random_colors: false,
            force_highlight_color: false,
            highlight_color_number: 0x2FFFFFF,
            texmaps: true,
            scan_conditional_control_points: true,
            seam_width: 0.0,
            extra_search_dirs: Vec::new(),
        }
    }
}

/// Outcome of searching the disk for a referenced name
enum Located {
    Found {
        path: PathBuf,
        primitive: bool,
        part: bool,
        sub_part: bool,
        unofficial: bool,
    },
    /// Resolved to the root model file itself
    Loop,
    NotFound,
}

/// A loaded model graph and everything needed to interpret it
pub struct MainModel {
    pub options: LoadOptions,
    pub palette: Palette,
    pub arena: DocArena,
    registry: FxHashMap<String, DocId>,
    /// Names currently on the resolution stack, for cycle detection
    ancestors: FxHashMap<String, bool>,
    root: Option<DocId>,
    root_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    ldraw_dir: PathBuf,
    active_mpd: Option<DocId>,
    bbox_ignore_used: bool,
    canceled: bool,
    rng_state: u64,
}

fn normalize_key(name: &str) -> String {
    name.replace('\\', "/").to_ascii_lowercase()
}

fn is_absolute_name(name: &str) -> bool {
    Path::new(name).is_absolute()
}

/// LDraw file names are case-insensitive; disks are not always. Try the
/// name as written, then lowercased, then uppercased.
fn find_file_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let slashed = name.replace('\\', "/");
    for candidate in [
        slashed.clone(),
        slashed.to_ascii_lowercase(),
        slashed.to_ascii_uppercase(),
    ] {
        let path = dir.join(&candidate);
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn file_base_name(filename: &str) -> &str {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    name.split('.').next().unwrap_or(name)
}

impl MainModel {
    pub fn new(ldraw_dir: impl Into<PathBuf>) -> MainModel {
        MainModel {
            options: LoadOptions::default(),
            palette: Palette::default(),
            arena: DocArena::default(),
            registry: FxHashMap::default(),
            ancestors: FxHashMap::default(),
            root: None,
            root_path: None,
            model_dir: None,
            ldraw_dir: ldraw_dir.into(),
            active_mpd: None,
            bbox_ignore_used: false,
            canceled: false,
            rng_state: 0x853c_49e6_748f_ea9b,
        }
    }

    pub fn root(&self) -> Option<DocId> {
        self.root
    }

    #[inline]
    pub fn doc(&self, id: DocId) -> &Document {
        self.arena.get(id)
    }

    /// Document registered under a normalized reference name
    pub fn document_named(&self, name: &str) -> Option<DocId> {
        self.registry.get(&normalize_key(name)).copied()
    }

    pub fn bbox_ignore_used(&self) -> bool {
        self.bbox_ignore_used
    }

    /// Change the part seam width, dropping every cached bounding box and
    /// radius that the old width baked in.
    pub fn set_seam_width(&mut self, width: f32) {
        if width == self.options.seam_width {
            return;
        }
        self.options.seam_width = width;
        for index in 0..self.arena.len() {
            let doc = self.arena.get_mut(DocId(index as u32));
            doc.bounding_box = None;
            doc.max_radius = None;
            doc.max_full_radius = None;
        }
    }

    /// Load a root model and everything it references.
    pub fn load(&mut self, path: &Path, hooks: &mut dyn LoadHooks) -> Result<DocId> {
        if !self.verify_ldraw_dir() {
            return Err(Error::LDrawDirNotFound(self.ldraw_dir.clone()));
        }
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_owned()));
        }
        self.root_path = fs::canonicalize(path).ok();
        self.model_dir = path.parent().map(Path::to_owned);
        if !hooks.progress(LOAD_MESSAGE, 0.0) {
            return Err(Error::Canceled);
        }
        if self.options.process_ld_config {
            self.process_ld_config(hooks);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let root = self.arena.alloc(&name);
        self.arena.get_mut(root).filename = path_string(path);
        self.root = Some(root);
        let text = read_model_text(path)?;
        self.read_document(root, &text);
        if !hooks.progress(LOAD_MESSAGE, READ_FRACTION) {
            return Err(Error::Canceled);
        }
        self.parse_document(root, hooks);
        self.ancestors.clear();
        self.resolve_embedded_texmaps();
        if !hooks.progress(LOAD_MESSAGE, 1.0) {
            return Err(Error::Canceled);
        }
        if self.canceled {
            return Err(Error::Canceled);
        }
        Ok(root)
    }

    fn verify_ldraw_dir(&self) -> bool {
        self.subdir(&["parts", "PARTS", "Parts"]).is_some()
            && self.subdir(&["p", "P"]).is_some()
    }

    fn subdir(&self, names: &[&str]) -> Option<PathBuf> {
        for name in names {
            let dir = self.ldraw_dir.join(name);
            if dir.is_dir() {
                return Some(dir);
            }
        }
        None
    }

    /// Load color definitions from ldconfig.ldr (or the configured
    /// alternate) as a regular document; its `!COLOUR` comments update the
    /// palette as they parse.
    fn process_ld_config(&mut self, hooks: &mut dyn LoadHooks) {
        let name = self
            .options
            .ld_config
            .clone()
            .unwrap_or_else(|| "ldconfig.ldr".to_owned());
        if self.sub_document_named(&name, None, 0, false, false, false, hooks).is_none() {
            if let Some(path) = find_file_in(&self.ldraw_dir, &name) {
                self.load_sub_document(&name, &path, hooks);
            } else {
                log::debug!("no {} found under {}", name, self.ldraw_dir.display());
            }
        }
    }

    // ------------------------------------------------------------------
    // Read pass
    // ------------------------------------------------------------------

    /// Split text into scanned lines and register embedded MPD blocks.
    /// A trailing newline terminates the last line rather than opening an
    /// empty one.
    fn read_document(&mut self, id: DocId, text: &str) {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        self.active_mpd = None;
        let mut start = 0;
        let mut index = 0;
        for nl in memchr::memchr_iter(b'\n', text.as_bytes()) {
            self.read_line(id, index, &text[start..nl]);
            start = nl + 1;
            index += 1;
        }
        if start < text.len() {
            self.read_line(id, index, &text[start..]);
        }
        let doc = self.arena.get_mut(id);
        if doc.active_line_count == 0 {
            doc.active_line_count = doc.lines.len();
        }
        self.active_mpd = None;
    }

    fn read_line(&mut self, id: DocId, index: usize, raw: &str) {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let line = Line::scan(raw, index + 1);
        let comment = match &line.payload {
            LinePayload::Comment(c) => Some(c.clone()),
            _ => None,
        };
        self.arena.get_mut(id).lines.push(line);
        if let Some(comment) = comment {
            self.read_comment(id, index, &comment);
        }
    }

    /// Classification that must happen before parse: MPD block
    /// registration, part/primitive metas, author.
    fn read_comment(&mut self, id: DocId, index: usize, comment: &CommentLine) {
        if let Some(name) = comment.mpd_filename() {
            let norm = name.replace('\\', "/");
            let key = normalize_key(&norm);
            let main_seen = self.arena.get(id).state.main_block_seen;
            if main_seen {
                let doc = self.arena.get_mut(id);
                if doc.active_line_count == 0 {
                    doc.active_line_count = index;
                }
                let parent_filename = doc.filename.clone();
                if !self.registry.contains_key(&key) {
                    let sub = self.arena.alloc(&norm);
                    let s = self.arena.get_mut(sub);
                    s.filename = parent_filename;
                    s.flags.mpd = true;
                    self.registry.insert(key, sub);
                    self.active_mpd = Some(sub);
                }
            } else {
                let doc = self.arena.get_mut(id);
                doc.state.main_block_seen = true;
                doc.flags.mpd = true;
                if Some(id) == self.root {
                    doc.name = norm;
                    self.registry.insert(key, id);
                }
            }
        } else if comment.is_part_meta() {
            if comment.is_official_part_meta() {
                self.arena.get_mut(id).flags.official = true;
            }
            let main_seen = self.arena.get(id).state.main_block_seen;
            if main_seen {
                if let Some(mpd) = self.active_mpd {
                    let target = self.arena.get_mut(mpd);
                    if !target.flags.primitive && !target.flags.sub_part {
                        target.flags.part = true;
                    }
                }
            } else {
                let doc = self.arena.get_mut(id);
                if !doc.flags.primitive {
                    if !doc.flags.sub_part {
                        doc.flags.part = true;
                    }
                    // An already-certified part forces culling on.
                    if doc.flags.bfc_certify == BfcState::On {
                        doc.flags.bfc_certify = BfcState::ForcedOn;
                    }
                }
            }
        } else if comment.is_primitive_meta() {
            let target = match self.arena.get(id).state.main_block_seen {
                true => self.active_mpd,
                false => Some(id),
            };
            if let Some(target) = target {
                let doc = self.arena.get_mut(target);
                doc.flags.part = false;
                doc.flags.sub_part = false;
                doc.flags.primitive = true;
            }
        } else if comment.is_no_shrink_meta() {
            let target = match self.arena.get(id).state.main_block_seen {
                true => self.active_mpd,
                false => Some(id),
            };
            if let Some(target) = target {
                self.arena.get_mut(target).flags.no_shrink = true;
            }
        } else if let Some(author) = comment.author() {
            let doc = self.arena.get_mut(id);
            if doc.author.is_none() {
                doc.author = Some(author.to_owned());
            }
        }
    }

    // ------------------------------------------------------------------
    // Parse pass
    // ------------------------------------------------------------------

    fn parse_document(&mut self, id: DocId, hooks: &mut dyn LoadHooks) {
        let mut lines = mem::take(&mut self.arena.get_mut(id).lines);
        let doc_name = self.arena.get(id).name.clone();
        let is_root = Some(id) == self.root;
        let mut reported = self.arena.get(id).diagnostics.len();
        let mut i = 0;
        while i < lines.len() {
            if self.canceled {
                break;
            }
            let mut check_invert_next = false;
            if lines[i].is_action() {
                check_invert_next = true;
                self.stamp_action_line(id, &mut lines[i]);
            } else if let LinePayload::Comment(_) = &lines[i].payload {
                self.stamp_comment_line(id, &mut lines[i]);
            }

            self.parse_line(id, i, &mut lines, hooks);
            match &lines[i].payload {
                LinePayload::ModelRef(_) => {
                    // The reference consumed the pending inversion.
                    self.arena.get_mut(id).state.bfc_invert_next = false;
                    check_invert_next = false;
                }
                LinePayload::Comment(_) => check_invert_next = false,
                _ => {}
            }
            if check_invert_next && self.arena.get(id).state.bfc_invert_next {
                let line_number = lines[i].header.line_number;
                self.arena.get_mut(id).push_error(
                    DiagKind::BfcError,
                    line_number,
                    "INVERTNEXT was not immediately followed by a sub-model reference.",
                );
                self.arena.get_mut(id).state.bfc_invert_next = false;
            }
            lines[i].header.step_index = self.arena.get(id).step_indices.len();

            if let Some(diag) = &lines[i].header.diagnostic {
                hooks.report(&doc_name, diag);
            }
            let doc = self.arena.get(id);
            for diag in &doc.diagnostics[reported..] {
                hooks.report(&doc_name, diag);
            }
            reported = doc.diagnostics.len();

            if is_root {
                let fraction = READ_FRACTION
                    + (1.0 - READ_FRACTION) * (i + 1) as f32 / lines.len() as f32;
                if !hooks.progress(LOAD_MESSAGE, fraction) {
                    self.canceled = true;
                }
            }
            i += 1;
        }
        debug_assert!(self.arena.get(id).lines.is_empty());
        self.arena.get_mut(id).lines = lines;
    }

    /// Snapshot document state onto an action line about to parse.
    fn stamp_action_line(&mut self, id: DocId, line: &mut Line) {
        let doc = self.arena.get_mut(id);
        doc.state.started = true;
        let flags = ActionFlags {
            bfc_certify: doc.flags.bfc_certify,
            bfc_clip: doc.state.bfc_clip,
            bfc_winding_ccw: doc.state.bfc_winding_ccw,
            bfc_invert: doc.state.bfc_invert_next,
            bbox_ignore: doc.state.bbox_ignore_on,
            texmap_fallback: doc
                .state
                .texmap
                .as_ref()
                .map_or(false, |t| t.fallback),
        };
        let bbox_ignore = doc.state.bbox_ignore_on;
        if !doc.state.bbox_ignore_begun {
            doc.state.bbox_ignore_on = false;
        }
        let texmap = match &doc.state.texmap {
            Some(t) if !t.fallback && t.valid => Some((t.index, t.next)),
            _ => None,
        };
        if let Some((_, next)) = texmap {
            if next {
                doc.end_texmap();
            }
        }
        if bbox_ignore {
            self.bbox_ignore_used = true;
        }
        if let Some(f) = line.action_flags_mut() {
            *f = flags;
        }
        if let Some((index, _)) = texmap {
            line.header.texmap_index = Some(index);
        }
    }

    /// Comments inside an open texture mapping block carry the block
    /// index so `0 !:` geometry substitution can find its settings.
    fn stamp_comment_line(&mut self, id: DocId, line: &mut Line) {
        let doc = self.arena.get(id);
        if let Some(t) = &doc.state.texmap {
            if !t.fallback && t.valid {
                line.header.texmap_index = Some(t.index);
            }
        }
    }

    /// Parse one line in place; shapes and texture-replacement metas may
    /// splice repair lines in right after it.
    fn parse_line(
        &mut self,
        id: DocId,
        i: usize,
        lines: &mut Vec<Line>,
        hooks: &mut dyn LoadHooks,
    ) {
        match &lines[i].payload {
            LinePayload::Comment(_) => self.parse_comment_line(id, i, lines, hooks),
            LinePayload::ModelRef(_) => self.parse_model_ref_line(id, i, lines, hooks),
            LinePayload::Segment(_)
            | LinePayload::Triangle(_)
            | LinePayload::Quad(_)
            | LinePayload::CondLine(_) => self.parse_shape_line(id, i, lines),
            LinePayload::Empty | LinePayload::Unknown => {}
        }
    }

    fn parse_shape_line(&mut self, id: DocId, i: usize, lines: &mut Vec<Line>) {
        let skip_validation = self.options.skip_validation;
        let replacements = {
            let Line { header, payload } = &mut lines[i];
            match payload {
                LinePayload::Segment(s) => {
                    s.parse(header, skip_validation);
                    None
                }
                LinePayload::Triangle(t) => {
                    t.parse(header, skip_validation);
                    t.replacement_lines(header)
                }
                LinePayload::Quad(q) => {
                    q.parse(header, skip_validation);
                    q.replacement_lines(header)
                }
                LinePayload::CondLine(c) => {
                    c.parse(header, skip_validation);
                    None
                }
                _ => None,
            }
        };
        if let Some(replacements) = replacements {
            self.splice_replacements(id, i, lines, replacements);
        }
    }

    fn splice_replacements(
        &mut self,
        id: DocId,
        i: usize,
        lines: &mut Vec<Line>,
        replacements: impl IntoIterator<Item = Line>,
    ) {
        let texmap_index = lines[i].header.texmap_index;
        let flags = lines[i].action_flags().copied();
        lines[i].header.replaced = true;
        let mut count = 0;
        for (offset, mut line) in replacements.into_iter().enumerate() {
            // Replacements inherit the state snapshot of the line they
            // repair.
            if let (Some(flags), Some(f)) = (flags, line.action_flags_mut()) {
                *f = flags;
            }
            line.header.texmap_index = texmap_index;
            lines.insert(i + 1 + offset, line);
            count += 1;
        }
        let doc = self.arena.get_mut(id);
        if doc.active_line_count > i {
            doc.active_line_count += count;
        }
    }

    fn parse_comment_line(
        &mut self,
        id: DocId,
        i: usize,
        lines: &mut Vec<Line>,
        hooks: &mut dyn LoadHooks,
    ) {
        let comment = match &lines[i].payload {
            LinePayload::Comment(c) => c.clone(),
            _ => return,
        };
        let line_number = lines[i].header.line_number;

        // Pre-parse: metas that affect the line itself.
        if comment.is_moved_to_meta() {
            let new_name = comment.moved_to_name().unwrap_or("?").to_owned();
            let old_name = file_base_name(&self.arena.get(id).filename).to_owned();
            lines[i].header.set_warning(
                DiagKind::MovedTo,
                format!("Part {} has been renamed to {}.", old_name, new_name),
            );
        } else if comment.is_new_geometry_meta() {
            if let Some(index) = lines[i].header.texmap_index {
                if self.texmap_has_source(id, index) {
                    if let Some(text) = comment.new_geometry_text() {
                        let replacement =
                            Line::scan_with_original(text, line_number, Some(lines[i].header.text.clone()));
                        if replacement.is_action() {
                            lines[i].header.valid = false;
                            self.splice_replacements(id, i, lines, std::iter::once(replacement));
                            return;
                        }
                    }
                }
            }
        } else if self.palette.is_color_comment(&comment.processed) {
            self.palette.parse_color_comment(&comment.processed);
        }

        // Dispatch document-level metas.
        if let Some(name) = comment.mpd_filename() {
            let norm = name.replace('\\', "/");
            self.parse_mpd_meta(id, i, &norm, lines, hooks);
        } else if comment.is_nofile_meta() {
            // Terminates an embedded block; nothing to do here.
        } else if comment.is_bfc_meta() {
            self.arena.get_mut(id).parse_bfc_meta(&comment, line_number);
        } else if comment.is_step_meta() {
            self.arena.get_mut(id).step_indices.push(i);
        } else if comment.is_ldview_meta() {
            if comment.is_bbox_ignore_meta() {
                self.arena
                    .get_mut(id)
                    .parse_bbox_ignore_meta(&comment, line_number);
            } else {
                self.arena.get_mut(id).push_warning(
                    DiagKind::MetaCommand,
                    line_number,
                    "Unknown !LDVIEW meta command.",
                );
            }
        } else if comment.is_texmap_meta() {
            if !self.parse_texmap_meta(id, &comment, line_number) {
                lines[i].header.valid = false;
            }
        } else if comment.is_data_meta() {
            self.arena
                .get_mut(id)
                .parse_data_meta(i, &comment, line_number, lines);
        } else if i == 0 {
            let description = comment.processed[1..].trim();
            if !description.is_empty() {
                self.arena.get_mut(id).description = Some(description.to_owned());
            }
        }
    }

    /// `0 FILE name` during parse. The first one names the block being
    /// parsed; each later one hands the following lines to the registered
    /// sub-document and parses it.
    fn parse_mpd_meta(
        &mut self,
        id: DocId,
        i: usize,
        name: &str,
        lines: &mut Vec<Line>,
        hooks: &mut dyn LoadHooks,
    ) {
        if !self.arena.get(id).state.main_block_parsed {
            self.arena.get_mut(id).state.main_block_parsed = true;
            return;
        }
        // Block extent: up to the next FILE or NOFILE line.
        let end = lines[i + 1..]
            .iter()
            .position(|line| match &line.payload {
                LinePayload::Comment(c) => c.mpd_filename().is_some() || c.is_nofile_meta(),
                _ => false,
            })
            .map(|p| i + 1 + p)
            .unwrap_or(lines.len());
        let key = normalize_key(name);
        let sub = match self.registry.get(&key).copied() {
            Some(sub) if sub != id => sub,
            _ => return,
        };
        if self.arena.get(sub).mpd_filled {
            let line_number = lines[i].header.line_number;
            self.arena.get_mut(id).push_error(
                DiagKind::Mpd,
                line_number,
                format!("MPD sub-file already loaded: {}", name),
            );
            return;
        }
        let block: Vec<Line> = lines.drain(i + 1..end).collect();
        {
            let s = self.arena.get_mut(sub);
            s.mpd_filled = true;
            s.active_line_count = block.len();
            s.lines = block;
        }
        let previous = self.active_mpd.replace(sub);
        self.parse_document(sub, hooks);
        self.active_mpd = previous;
    }

    /// `0 !TEXMAP ...`. Returns false when the comment line should be
    /// marked invalid (image could not be attached).
    fn parse_texmap_meta(
        &mut self,
        id: DocId,
        comment: &CommentLine,
        line_number: usize,
    ) -> bool {
        {
            let doc = self.arena.get_mut(id);
            if doc.state.texmap.as_ref().map_or(false, |t| t.next) {
                doc.push_error(
                    DiagKind::General,
                    line_number,
                    "TEXMAP command immediately after TEXMAP NEXT.",
                );
                doc.end_texmap();
            }
        }
        if self.arena.get(id).state.texmap.is_some() {
            if comment.contains_texmap_command("FALLBACK") {
                let doc = self.arena.get_mut(id);
                let t = doc.state.texmap.as_ref().map(|t| (t.fallback, t.index));
                if let Some((fallback, index)) = t {
                    if fallback {
                        doc.push_error(
                            DiagKind::General,
                            line_number,
                            "Multiple TEXMAP FALLBACK commands.",
                        );
                    } else if !doc.texmaps[index].filename.is_empty() {
                        // With no image attached the fallback geometry is
                        // the geometry, so fallback mode stays off.
                        if let Some(t) = &mut doc.state.texmap {
                            t.fallback = true;
                        }
                    }
                }
            } else if comment.contains_texmap_command("END") {
                let doc = self.arena.get_mut(id);
                let valid = doc.state.texmap.as_ref().map_or(true, |t| t.valid);
                doc.end_texmap();
                return valid;
            } else {
                self.arena.get_mut(id).push_error(
                    DiagKind::MetaCommand,
                    line_number,
                    "Unexpected TEXMAP command.",
                );
            }
            return true;
        }
        let is_start = comment.contains_texmap_command("START");
        let is_next = comment.contains_texmap_command("NEXT");
        if !is_start && !is_next {
            self.arena.get_mut(id).push_error(
                DiagKind::MetaCommand,
                line_number,
                "Unexpected TEXMAP command.",
            );
            return true;
        }
        let method = match comment.word(2).and_then(TexmapMethod::from_word) {
            Some(method) => method,
            None => {
                self.arena.get_mut(id).push_error(
                    DiagKind::General,
                    line_number,
                    "Unknown TEXMAP projection method.",
                );
                return true;
            }
        };
        let extra_count = method.extra_params();
        if comment.words.len() < 13 + extra_count {
            self.arena.get_mut(id).push_error(
                DiagKind::Parse,
                line_number,
                "Error parsing TEXMAP command.",
            );
            return true;
        }
        let mut points = [Vector3::ZERO; 3];
        for p in 0..3 {
            for axis in 0..3 {
                points[p][axis] = comment
                    .word(3 + p * 3 + axis)
                    .and_then(parse_float_word)
                    .unwrap_or(0.0);
            }
        }
        let mut extra = smallvec::SmallVec::new();
        for e in 0..extra_count {
            extra.push(
                comment
                    .word(12 + e)
                    .and_then(parse_float_word)
                    .unwrap_or(0.0),
            );
        }
        let image_name = comment.word(12 + extra_count).unwrap_or("").to_owned();
        let (filename, image, embedded) = if self.options.texmaps {
            self.resolve_texmap_image(id, &image_name, line_number)
        } else {
            (String::new(), None, None)
        };
        let valid = !self.options.texmaps || !filename.is_empty();
        let doc = self.arena.get_mut(id);
        let index = doc.texmaps.len();
        doc.texmaps.push(TexmapSettings {
            method,
            filename,
            points,
            extra,
            image,
            embedded,
        });
        doc.state.texmap = Some(TexmapState {
            index,
            fallback: false,
            next: is_next,
            valid,
        });
        valid
    }

    /// Locate a texture image: an MPD-embedded `!DATA` block first, then
    /// `textures/` in the search path, then the bare name.
    fn resolve_texmap_image(
        &mut self,
        id: DocId,
        name: &str,
        line_number: usize,
    ) -> (String, Option<Vec<u8>>, Option<DocId>) {
        let key = normalize_key(name);
        if let Some(&embedded) = self.registry.get(&key) {
            let base = self
                .active_mpd
                .map(|mpd| self.arena.get(mpd).filename.clone())
                .unwrap_or_default();
            let base = if base.is_empty() {
                "mpd".to_owned()
            } else {
                file_base_name(&base).to_owned()
            };
            let filename = normalize_key(&format!("{}:{}", base, name));
            let image = self.arena.get(embedded).data.clone();
            return (filename, image, Some(embedded));
        }
        let textures_name = format!("textures/{}", name);
        let located = self
            .locate_file(&textures_name)
            .or_else(|| self.locate_file(name));
        match located {
            Some(path) => match fs::read(&path) {
                Ok(bytes) => (normalize_key(&path_string(&path)), Some(bytes), None),
                Err(_) => {
                    self.arena.get_mut(id).push_error(
                        DiagKind::MetaCommand,
                        line_number,
                        format!("Error loading texture map image: {}", name),
                    );
                    (String::new(), None, None)
                }
            },
            None => {
                self.arena.get_mut(id).push_error(
                    DiagKind::MetaCommand,
                    line_number,
                    format!("Texture map file not found: {}", name),
                );
                (String::new(), None, None)
            }
        }
    }

    fn texmap_has_source(&self, id: DocId, index: usize) -> bool {
        self.arena
            .get(id)
            .texmaps
            .get(index)
            .map_or(false, |t| !t.filename.is_empty())
    }

    /// Texture images supplied by `!DATA` blocks may be referenced before
    /// their block parses; fill them in after the whole tree is loaded.
    fn resolve_embedded_texmaps(&mut self) {
        for doc_index in 0..self.arena.len() {
            let id = DocId(doc_index as u32);
            for tex_index in 0..self.arena.get(id).texmaps.len() {
                let embedded = self.arena.get(id).texmaps[tex_index].embedded;
                if let Some(source) = embedded {
                    if self.arena.get(id).texmaps[tex_index].image.is_none() {
                        let data = self.arena.get(source).data.clone();
                        self.arena.get_mut(id).texmaps[tex_index].image = data;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Sub-model resolution
    // ------------------------------------------------------------------

    fn parse_model_ref_line(
        &mut self,
        id: DocId,
        i: usize,
        lines: &mut Vec<Line>,
        hooks: &mut dyn LoadHooks,
    ) {
        let parsed = {
            let Line { header, payload } = &mut lines[i];
            match payload {
                LinePayload::ModelRef(m) => m.parse_fields(header),
                _ => false,
            }
        };
        if !parsed {
            return;
        }
        let (name, line_number) = match &lines[i].payload {
            LinePayload::ModelRef(m) => (m.file_name.clone(), lines[i].header.line_number),
            _ => return,
        };
        let high = self.sub_document_named(&name, Some(id), line_number, false, false, false, hooks);
        let high = match high {
            Some(high) => high,
            None => {
                let header = &mut lines[i].header;
                header.valid = false;
                if self.ancestor_active(&name) {
                    header.set_error(
                        DiagKind::ModelLoop,
                        "Sub-model references one of its own ancestors.",
                    );
                } else {
                    header.set_error(
                        DiagKind::FileNotFound,
                        format!("Error loading sub-model: {}", name),
                    );
                }
                return;
            }
        };
        let low = self.sub_document_named(&name, Some(id), line_number, true, false, false, hooks);
        if let LinePayload::ModelRef(m) = &mut lines[i].payload {
            m.high_res = Some(high);
            m.low_res = low;
        }
        if !self.options.skip_validation {
            self.validate_model_ref(id, i, lines, high, low);
        }
        if lines[i].header.valid {
            let effective = self.effective_ref_target(&lines[i]);
            if let Some(effective) = effective {
                self.bounding_box(effective);
                if self.arena.get(effective).flags.has_studs {
                    self.arena.get_mut(id).flags.has_studs = true;
                }
            }
        }
    }

    fn validate_model_ref(
        &mut self,
        id: DocId,
        i: usize,
        lines: &mut Vec<Line>,
        high: DocId,
        low: Option<DocId>,
    ) {
        let mut determinant = match &lines[i].payload {
            LinePayload::ModelRef(m) => m.matrix.determinant(),
            _ => return,
        };
        if determinant == 0.0 {
            if self.doc_is_xz_planar(high, &Matrix4::IDENTITY) {
                let Line { header, payload } = &mut lines[i];
                if let LinePayload::ModelRef(m) = payload {
                    determinant = m.try_fix_planar_matrix(header);
                }
                if determinant == 0.0 {
                    let header = &mut lines[i].header;
                    header.valid = false;
                    header.set_error(DiagKind::Matrix, "Singular matrix.");
                    return;
                }
            } else {
                let header = &mut lines[i].header;
                header.valid = false;
                header.set_error(
                    DiagKind::Matrix,
                    "Singular matrix on a non-flat sub-model.",
                );
                return;
            }
        }
        let child_is_part = self.arena.get(high).is_part();
        let parent_is_part = self.arena.get(id).is_part();
        if child_is_part && !parent_is_part {
            // Extremely loose equality: anything within 0.05 of a unit
            // determinant counts as uniform.
            if (determinant - 1.0).abs() > 0.05 && (determinant + 1.0).abs() > 0.05 {
                lines[i].header.set_warning(
                    DiagKind::PartDeterminant,
                    "Non-uniform scale applied to a part.",
                );
                self.arena.get_mut(high).flags.no_shrink = true;
                if let Some(low) = low {
                    self.arena.get_mut(low).flags.no_shrink = true;
                }
            }
        }
    }

    /// All points of the document sit at Y == 0 under `matrix`. Lazy part
    /// authors write singular matrices for such flat geometry; it is the
    /// only case worth repairing.
    fn doc_is_xz_planar(&self, id: DocId, matrix: &Matrix4) -> bool {
        let doc = self.arena.get(id);
        for line in &doc.lines[..doc.active_line_count.min(doc.lines.len())] {
            if !line.header.valid {
                continue;
            }
            let flat = match &line.payload {
                LinePayload::Segment(s) => self.points_are_xz_planar(&s.points, matrix),
                LinePayload::Triangle(t) => self.points_are_xz_planar(&t.points, matrix),
                LinePayload::Quad(q) => self.points_are_xz_planar(&q.points, matrix),
                LinePayload::CondLine(c) => self.points_are_xz_planar(&c.points, matrix),
                LinePayload::ModelRef(m) => match m.high_res {
                    Some(child) => self.doc_is_xz_planar(child, &matrix.multiply(&m.matrix)),
                    None => true,
                },
                _ => true,
            };
            if !flat {
                return false;
            }
        }
        true
    }

    fn points_are_xz_planar(&self, points: &[Vector3], matrix: &Matrix4) -> bool {
        points
            .iter()
            .all(|p| matrix.transform_point(p).y == 0.0)
    }

    fn ancestor_active(&self, name: &str) -> bool {
        self.ancestors
            .get(&normalize_key(name))
            .copied()
            .unwrap_or(false)
    }

    /// Resolve a reference name to a document, loading it on first use.
    /// `low_res` substitutes the `stud2` family for `stud` names. Returns
    /// `None` on a cycle, with the ancestor entry left set so the caller
    /// can tell a loop from a missing file.
    fn sub_document_named(
        &mut self,
        name: &str,
        parent: Option<DocId>,
        line_number: usize,
        low_res: bool,
        second_attempt: bool,
        known_part: bool,
        hooks: &mut dyn LoadHooks,
    ) -> Option<DocId> {
        let ancestor_key = normalize_key(name);
        if *self.ancestors.entry(ancestor_key.clone()).or_insert(false) {
            return None;
        }
        self.ancestors.insert(ancestor_key.clone(), true);
        if let Some(parent) = parent {
            if name.eq_ignore_ascii_case("stud.dat") {
                self.arena.get_mut(parent).flags.has_studs = true;
            }
        }
        let mut adjusted = name.replace('\\', "/");
        let dict_name;
        if low_res {
            if adjusted.len() >= 4 && adjusted[..4].eq_ignore_ascii_case("stud") {
                adjusted.replace_range(3..4, "2");
            } else {
                self.ancestors.insert(ancestor_key, false);
                return None;
            }
            dict_name = format!("{}{}", LOWRES_PREFIX, adjusted);
        } else {
            dict_name = adjusted.clone();
        }
        let key = normalize_key(&dict_name);
        let mut looped = false;
        let mut found = self.registry.get(&key).copied();
        if found.is_none() {
            match self.locate_sub_document(&adjusted, known_part) {
                Located::Found {
                    path,
                    primitive,
                    part,
                    sub_part,
                    unofficial,
                } => {
                    let sub = self.arena.alloc(&dict_name);
                    {
                        let doc = self.arena.get_mut(sub);
                        doc.filename = path_string(&path);
                        doc.flags.primitive = primitive;
                        doc.flags.part = part;
                        doc.flags.sub_part = sub_part;
                        doc.flags.unofficial = unofficial;
                    }
                    // Registered before loading so self-references resolve
                    // to the entry instead of recursing.
                    self.registry.insert(key.clone(), sub);
                    let saved_mpd = self.active_mpd.take();
                    match read_model_text(&path) {
                        Ok(text) => {
                            self.read_document(sub, &text);
                            self.parse_document(sub, hooks);
                            found = Some(sub);
                        }
                        Err(_) => {
                            self.registry.remove(&key);
                        }
                    }
                    self.active_mpd = saved_mpd;
                }
                Located::Loop => looped = true,
                Located::NotFound => {}
            }
        }
        if let (Some(sub), Some(parent)) = (found, parent) {
            self.warn_if_unofficial_part(sub, parent, name, line_number);
        }
        if found.is_none() && !second_attempt && !looped {
            if let Some(alert) = hooks.find_file(name) {
                found = self.sub_document_named(
                    &alert.name,
                    parent,
                    line_number,
                    low_res,
                    true,
                    alert.is_part,
                    hooks,
                );
                if let Some(sub) = found {
                    // Alias the original name so primitive substitution
                    // keeps working against the registry.
                    self.registry.insert(key, sub);
                    self.arena.get_mut(sub).name = dict_name;
                }
            }
        }
        if !looped {
            self.ancestors.insert(ancestor_key, false);
        }
        found
    }

    fn warn_if_unofficial_part(
        &mut self,
        sub: DocId,
        parent: DocId,
        name: &str,
        line_number: usize,
    ) {
        let sub_doc = self.arena.get(sub);
        if sub_doc.flags.unofficial && sub_doc.is_part() && !self.arena.get(parent).is_part() {
            self.arena.get_mut(parent).push_warning(
                DiagKind::UnofficialPart,
                line_number,
                format!("Unofficial part: {}", name),
            );
        }
    }

    /// Load an already-located file as a document (used for ldconfig).
    fn load_sub_document(
        &mut self,
        name: &str,
        path: &Path,
        hooks: &mut dyn LoadHooks,
    ) -> DocId {
        let sub = self.arena.alloc(name);
        self.arena.get_mut(sub).filename = path_string(path);
        self.registry.insert(normalize_key(name), sub);
        let saved_mpd = self.active_mpd.take();
        if let Ok(text) = read_model_text(path) {
            self.read_document(sub, &text);
            self.parse_document(sub, hooks);
        }
        self.active_mpd = saved_mpd;
        sub
    }

    /// Search order: absolute path, the root model's directory, the LDraw
    /// library (`p/`, `parts/`, `models/`, then the unofficial tree), and
    /// finally any extra directories.
    fn locate_sub_document(&mut self, name: &str, known_part: bool) -> Located {
        if is_absolute_name(name) {
            let path = PathBuf::from(name);
            if path.is_file() {
                return self.located(path, false, known_part, false, false);
            }
            return Located::NotFound;
        }
        if let Some(dir) = self.model_dir.clone() {
            if let Some(path) = find_file_in(&dir, name) {
                if self.is_root_file(&path) {
                    return Located::Loop;
                }
                return self.located(path, false, known_part, false, false);
            }
        }
        let sub_part = name.len() >= 2 && name[..2].eq_ignore_ascii_case("s/");
        if let Some(dir) = self.subdir(&["p", "P"]) {
            if let Some(path) = find_file_in(&dir, name) {
                return self.located(path, true, false, false, false);
            }
        }
        if let Some(dir) = self.subdir(&["parts", "PARTS", "Parts"]) {
            if let Some(path) = find_file_in(&dir, name) {
                return self.located(path, false, !sub_part, sub_part, false);
            }
        }
        if let Some(dir) = self.subdir(&["models", "MODELS", "Models"]) {
            if let Some(path) = find_file_in(&dir, name) {
                if self.is_root_file(&path) {
                    return Located::Loop;
                }
                return self.located(path, false, known_part, false, false);
            }
        }
        let unofficial = self.ldraw_dir.join("unofficial");
        if unofficial.is_dir() {
            if let Some(path) = find_file_in(&unofficial.join("p"), name) {
                return self.located(path, true, false, false, true);
            }
            if let Some(path) = find_file_in(&unofficial.join("parts"), name) {
                return self.located(path, false, !sub_part, sub_part, true);
            }
        }
        for dir in self.options.extra_search_dirs.clone() {
            if let Some(path) = find_file_in(&dir, name) {
                return self.located(path, false, known_part, false, false);
            }
        }
        Located::NotFound
    }

    fn located(
        &self,
        path: PathBuf,
        primitive: bool,
        part: bool,
        sub_part: bool,
        unofficial: bool,
    ) -> Located {
        Located::Found {
            path,
            primitive,
            part,
            sub_part,
            unofficial,
        }
    }

    fn is_root_file(&self, path: &Path) -> bool {
        match (&self.root_path, fs::canonicalize(path).ok()) {
            (Some(root), Some(candidate)) => *root == candidate,
            _ => false,
        }
    }

    fn locate_file(&self, name: &str) -> Option<PathBuf> {
        if is_absolute_name(name) {
            let path = PathBuf::from(name);
            return path.is_file().then(|| path);
        }
        if let Some(dir) = &self.model_dir {
            if let Some(path) = find_file_in(dir, name) {
                return Some(path);
            }
        }
        for names in [&["p", "P"][..], &["parts", "PARTS", "Parts"][..], &["models", "MODELS", "Models"][..]] {
            if let Some(dir) = self.subdir(names) {
                if let Some(path) = find_file_in(&dir, name) {
                    return Some(path);
                }
            }
        }
        for dir in &self.options.extra_search_dirs {
            if let Some(path) = find_file_in(dir, name) {
                return Some(path);
            }
        }
        None
    }

    /// Child a reference line resolves to under current options
    fn effective_ref_target(&self, line: &Line) -> Option<DocId> {
        match &line.payload {
            LinePayload::ModelRef(m) => {
                if self.options.low_res_studs {
                    m.low_res.or(m.high_res)
                } else {
                    m.high_res
                }
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Scanning and bounds
    // ------------------------------------------------------------------

    /// Walk every point of a document's geometry under `matrix`. The
    /// visitor's second argument marks points from conditional segments,
    /// which bounds calculations ignore.
    pub fn scan_points(
        &self,
        id: DocId,
        matrix: &Matrix4,
        step: Option<usize>,
        watch_bbox_ignore: bool,
        visitor: &mut dyn FnMut(&Vector3, bool),
    ) {
        let doc = self.arena.get(id);
        if Some(id) != self.root
            && doc.is_part()
            && self.options.bounding_boxes_only
            && doc.has_bounding_box()
        {
            if let Some(bounds) = doc.bounding_box {
                for corner in bounds.corners() {
                    visitor(&matrix.transform_point(&corner), false);
                }
            }
            return;
        }
        let mut current_step = 0usize;
        let mut empty_step = true;
        for line in &doc.lines[..doc.active_line_count.min(doc.lines.len())] {
            if let Some(step) = step {
                if let LinePayload::Comment(c) = &line.payload {
                    if c.is_step_meta() && !empty_step {
                        empty_step = true;
                        current_step += 1;
                        if current_step > step {
                            break;
                        }
                    }
                }
            }
            if !line.is_action() || !line.header.valid {
                continue;
            }
            empty_step = false;
            if watch_bbox_ignore
                && line.action_flags().map_or(false, |f| f.bbox_ignore)
            {
                continue;
            }
            match &line.payload {
                LinePayload::Segment(s) => {
                    for p in &s.points {
                        visitor(&matrix.transform_point(p), false);
                    }
                }
                LinePayload::Triangle(t) => {
                    for p in &t.points {
                        visitor(&matrix.transform_point(p), false);
                    }
                }
                LinePayload::Quad(q) => {
                    for p in &q.points {
                        visitor(&matrix.transform_point(p), false);
                    }
                }
                LinePayload::CondLine(c) => {
                    for p in &c.points {
                        visitor(&matrix.transform_point(p), true);
                    }
                    if self.options.scan_conditional_control_points {
                        for p in &c.control_points {
                            visitor(&matrix.transform_point(p), true);
                        }
                    }
                }
                LinePayload::ModelRef(m) => {
                    if let Some(child) = self.effective_ref_target(line) {
                        let child_doc = self.arena.get(child);
                        let seam = if self.options.seam_width > 0.0
                            && child_doc.is_part()
                            && !doc.is_part()
                        {
                            // A part's own bounds never carry the seam
                            // scale, so an uncached child can be measured
                            // in place.
                            let b = match child_doc.bounding_box {
                                Some(b) => b,
                                None => {
                                    let mut b = Bounds3::new();
                                    self.scan_points(
                                        child,
                                        &Matrix4::IDENTITY,
                                        None,
                                        true,
                                        &mut |p, conditional| {
                                            if !conditional {
                                                b.expand(p);
                                            }
                                        },
                                    );
                                    b
                                }
                            };
                            b.is_valid().then(|| {
                                Matrix4::seam_scale(self.options.seam_width, &b.min, &b.max)
                            })
                        } else {
                            None
                        };
                        let child_matrix = m.scan_matrix(matrix, seam.as_ref());
                        self.scan_points(child, &child_matrix, None, watch_bbox_ignore, visitor);
                    }
                }
                _ => {}
            }
        }
    }

    /// Bounding box of a document, cached after first computation.
    /// Conditional-segment points are excluded.
    pub fn bounding_box(&mut self, id: DocId) -> Option<Bounds3> {
        if let Some(bounds) = self.arena.get(id).bounding_box {
            return bounds.is_valid().then(|| bounds);
        }
        if self.options.bounding_boxes_only {
            // Children must be cached first; their boxes stand in for
            // their geometry.
            let children: Vec<DocId> = self
                .arena
                .get(id)
                .lines
                .iter()
                .filter_map(|line| self.effective_ref_target(line))
                .collect();
            for child in children {
                if self.arena.get(child).bounding_box.is_none() {
                    self.bounding_box(child);
                }
            }
        }
        let mut bounds = Bounds3::new();
        self.scan_points(id, &Matrix4::IDENTITY, None, true, &mut |p, conditional| {
            if !conditional {
                bounds.expand(p);
            }
        });
        // An MPD block referenced before its lines arrive scans empty;
        // leave it uncached so a later query sees the real geometry.
        if bounds.is_valid() || !self.arena.get(id).lines.is_empty() {
            self.arena.get_mut(id).bounding_box = Some(bounds);
        }
        bounds.is_valid().then(|| bounds)
    }

    /// Greatest distance from `center` to any non-conditional point.
    /// `watch_bbox_ignore` excludes ignored geometry; the two variants
    /// cache separately.
    pub fn max_radius(&mut self, id: DocId, center: &Vector3, watch_bbox_ignore: bool) -> f32 {
        {
            let doc = self.arena.get(id);
            let cached = if watch_bbox_ignore {
                doc.max_radius
            } else {
                doc.max_full_radius
            };
            if let Some(radius) = cached {
                if doc.radius_center == *center {
                    return radius;
                }
            }
        }
        let mut max_squared = 0.0f32;
        self.scan_points(
            id,
            &Matrix4::IDENTITY,
            None,
            watch_bbox_ignore,
            &mut |p, conditional| {
                if !conditional {
                    max_squared = max_squared.max(center.squared_distance(p));
                }
            },
        );
        let radius = max_squared.sqrt();
        let doc = self.arena.get_mut(id);
        doc.radius_center = *center;
        if watch_bbox_ignore {
            doc.max_radius = Some(radius);
        } else {
            doc.max_full_radius = Some(radius);
        }
        radius
    }

    // ------------------------------------------------------------------
    // Color context
    // ------------------------------------------------------------------

    /// Face-debug modes draw with opaque stand-in colors
    pub fn transparency_is_disabled(&self) -> bool {
        self.options.red_back_faces
            || self.options.green_front_faces
            || self.options.blue_neutral_faces
    }

    pub fn rgba(&self, color_number: u32) -> [u8; 4] {
        let mut rgba = self.palette.rgba(color_number);
        if self.transparency_is_disabled() {
            rgba[3] = 255;
        }
        rgba
    }

    pub fn color_number_is_transparent(&self, color_number: u32) -> bool {
        !self.transparency_is_disabled() && self.palette.rgba(color_number)[3] < 255
    }

    /// Edge color for a face color. Black-edge mode buckets by perceived
    /// luminance so black parts keep visible edges.
    pub fn edge_color_number(&self, color_number: u32) -> u32 {
        if self.options.black_edge_lines {
            let [r, g, b, _] = self.palette.rgba(color_number);
            if 30 * r as u32 + 59 * g as u32 + 11 * b as u32 <= 3600 {
                self.palette
                    .color_number_for_name("Dark Gray Edge")
                    .unwrap_or(0x2555555)
            } else {
                self.palette
                    .color_number_for_name("Black Edge")
                    .unwrap_or(0x2000000)
            }
        } else {
            self.palette.edge_color_number(color_number)
        }
    }

    /// Color an action line draws with, after the random-color and
    /// highlight overrides.
    pub fn effective_color_number(&mut self, line: &Line, parent: DocId) -> Option<u32> {
        let color = line.color_number()?;
        if let LinePayload::ModelRef(m) = &line.payload {
            let child_is_part = m
                .high_res
                .map_or(false, |child| self.arena.get(child).is_part());
            if self.options.random_colors && child_is_part && !self.arena.get(parent).is_part() {
                return Some(self.random_color_number());
            }
        }
        if color != 24
            && self.options.random_colors
            && (Some(parent) == self.root || color != 16)
        {
            Some(self.random_color_number())
        } else if self.options.force_highlight_color {
            Some(self.options.highlight_color_number)
        } else {
            Some(color)
        }
    }

    fn random_color_number(&mut self) -> u32 {
        loop {
            let r = self.next_random_byte();
            let g = self.next_random_byte();
            let b = self.next_random_byte();
            // Keep random colors distinguishable from the face-debug
            // stand-ins.
            if self.options.green_front_faces && colors_are_similar(r, g, b, 0, 255, 0) {
                continue;
            }
            if self.options.red_back_faces && colors_are_similar(r, g, b, 255, 0, 0) {
                continue;
            }
            if self.options.blue_neutral_faces && colors_are_similar(r, g, b, 0, 0, 255) {
                continue;
            }
            return Palette::color_number_for_rgba(r, g, b, 255);
        }
    }

    fn next_random_byte(&mut self) -> u8 {
        // xorshift64; deterministic across runs on purpose.
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        (x >> 32) as u8
    }
}

fn colors_are_similar(r1: u8, g1: u8, b1: u8, r2: u8, g2: u8, b2: u8) -> bool {
    const THRESHOLD: i32 = 128;
    (r1 as i32 - r2 as i32).abs() < THRESHOLD
        && (g1 as i32 - g2 as i32).abs() < THRESHOLD
        && (b1 as i32 - b2 as i32).abs() < THRESHOLD
}

/// Read a model file as text: lossy UTF-8, BOM tolerated
fn read_model_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    /// Minimal library tree: parts/3001.dat, p/stud.dat, p/stu2.dat
    fn fake_library() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("parts/s")).unwrap();
        std::fs::create_dir_all(dir.path().join("p")).unwrap();
        write_file(
            &dir.path().join("parts/3001.dat"),
            "0 Brick 2 x 4\n\
             0 !LDRAW_ORG Part UPDATE 2004-03\n\
             0 BFC CERTIFY CCW\n\
             1 16 0 0 0 1 0 0 0 1 0 0 0 1 stud.dat\n\
             4 16 -40 24 -20 -40 24 20 40 24 20 40 24 -20\n",
        );
        write_file(
            &dir.path().join("p/stud.dat"),
            "0 Stud\n\
             0 !LDRAW_ORG Primitive UPDATE 2004-03\n\
             0 BFC CERTIFY CCW\n\
             4 16 -6 -4 -6 -6 -4 6 6 -4 6 6 -4 -6\n",
        );
        write_file(
            &dir.path().join("p/stu2.dat"),
            "0 Stud Fast\n\
             0 !LDRAW_ORG Primitive UPDATE 2004-03\n\
             2 24 -6 -4 -6 6 -4 6\n",
        );
        dir
    }

    fn write_file(path: &Path, contents: &str) {
        let mut f = File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn load_model(library: &TempDir, contents: &str) -> (MainModel, DocId) {
        let model_path = library.path().join("model.ldr");
        write_file(&model_path, contents);
        let mut main = MainModel::new(library.path());
        main.options.process_ld_config = false;
        let root = main.load(&model_path, &mut NullHooks).unwrap();
        (main, root)
    }

    #[test]
    fn test_load_simple_model() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test Model\n\
             0 Author: Jane Builder\n\
             1 16 0 0 0 1 0 0 0 1 0 0 0 1 3001.dat\n",
        );
        let doc = main.doc(root);
        assert_eq!(doc.description.as_deref(), Some("Test Model"));
        assert_eq!(doc.author.as_deref(), Some("Jane Builder"));
        assert!(doc.flags.has_studs);
        let part = main.document_named("3001.dat").unwrap();
        assert!(main.doc(part).is_part());
        assert_eq!(main.doc(part).flags.bfc_certify, BfcState::ForcedOn);
        let stud = main.document_named("stud.dat").unwrap();
        assert!(main.doc(stud).flags.primitive);
    }

    #[test]
    fn test_trailing_newline_is_not_a_line() {
        let library = fake_library();
        // Terminated last line, plus a genuinely blank interior line.
        let (main, root) = load_model(&library, "0 Test\n\n2 24 0 0 0 1 0 0\n");
        let doc = main.doc(root);
        assert_eq!(doc.lines.len(), 3);
        assert_eq!(doc.active_line_count, 3);
        assert!(matches!(doc.lines[1].payload, LinePayload::Empty));
        assert_eq!(doc.lines[2].header.line_number, 3);
    }

    #[test]
    fn test_missing_file_diagnostic() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 no-such.dat\n",
        );
        let line = &main.doc(root).lines[1];
        assert!(!line.header.valid);
        let diag = line.header.diagnostic.as_ref().unwrap();
        assert_eq!(diag.kind, DiagKind::FileNotFound);
    }

    #[test]
    fn test_self_reference_is_a_loop() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 model.ldr\n",
        );
        let line = &main.doc(root).lines[1];
        assert!(!line.header.valid);
        assert_eq!(
            line.header.diagnostic.as_ref().unwrap().kind,
            DiagKind::ModelLoop
        );
    }

    #[test]
    fn test_mpd_blocks_split_and_resolve() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 FILE main.ldr\n\
             0 Main\n\
             1 16 0 0 0 1 0 0 0 1 0 0 0 1 sub.ldr\n\
             0 FILE sub.ldr\n\
             0 Sub\n\
             4 16 0 0 0 0 0 1 1 0 1 1 0 0\n\
             0 NOFILE\n",
        );
        let doc = main.doc(root);
        assert!(doc.flags.mpd);
        // Root keeps its own block plus the FILE/NOFILE markers.
        assert_eq!(doc.active_line_count, 3);
        let sub = main.document_named("sub.ldr").unwrap();
        assert_eq!(main.doc(sub).lines.len(), 2);
        assert_eq!(main.doc(sub).description.as_deref(), Some("Sub"));
        if let LinePayload::ModelRef(m) = &doc.lines[2].payload {
            assert_eq!(m.high_res, Some(sub));
        } else {
            panic!("expected model reference");
        }
    }

    #[test]
    fn test_bfc_stamping_and_quad_repair() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test\n\
             0 BFC CERTIFY CCW\n\
             4 16 0 0 0 1 0 0 1 1 0 0 1 0\n\
             3 16 0 0 0 1 0 0 1 0 0\n",
        );
        let doc = main.doc(root);
        // The quad parses clean; the duplicate-vertex triangle was
        // replaced by a spliced segment.
        let quad = &doc.lines[2];
        assert!(quad.header.valid);
        assert_eq!(
            quad.action_flags().unwrap().bfc_certify,
            BfcState::On
        );
        let triangle = &doc.lines[3];
        assert!(!triangle.header.valid);
        assert!(triangle.header.replaced);
        assert!(matches!(doc.lines[4].payload, LinePayload::Segment(_)));
        assert_eq!(doc.active_line_count, 5);
    }

    #[test]
    fn test_step_indices_stamped() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test\n\
             2 24 0 0 0 1 0 0\n\
             0 STEP\n\
             2 24 0 0 0 0 1 0\n",
        );
        let doc = main.doc(root);
        assert_eq!(doc.step_indices, vec![2]);
        assert_eq!(doc.lines[1].header.step_index, 0);
        assert_eq!(doc.lines[3].header.step_index, 1);
    }

    #[test]
    fn test_bounding_box_and_radius() {
        let library = fake_library();
        let (mut main, root) = load_model(
            &library,
            "0 Test\n\
             4 16 -10 0 -10 -10 0 10 10 0 10 10 0 -10\n\
             5 24 0 0 0 0 -50 0 1 0 0 0 1 0\n",
        );
        // Conditional-line points do not count toward bounds.
        let bounds = main.bounding_box(root).unwrap();
        assert_eq!(bounds.min, Vector3::new(-10.0, 0.0, -10.0));
        assert_eq!(bounds.max, Vector3::new(10.0, 0.0, 10.0));
        let radius = main.max_radius(root, &Vector3::ZERO, true);
        assert!((radius - (200.0f32).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_low_res_stud_substitution() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 stud.dat\n",
        );
        if let LinePayload::ModelRef(m) = &main.doc(root).lines[1].payload {
            let low = m.low_res.expect("low-res stud");
            assert_eq!(main.doc(low).description.as_deref(), Some("Stud Fast"));
        } else {
            panic!("expected model reference");
        }
    }

    #[test]
    fn test_singular_planar_matrix_repaired() {
        let library = fake_library();
        write_file(
            &library.path().join("parts/flat.dat"),
            "0 Flat\n4 16 -1 0 -1 -1 0 1 1 0 1 1 0 -1\n",
        );
        let (main, root) = load_model(
            &library,
            "0 Test\n1 16 0 0 0 1 0 0 0 0 0 0 0 1 flat.dat\n",
        );
        let line = &main.doc(root).lines[1];
        assert!(line.header.valid);
        let diag = line.header.diagnostic.as_ref().unwrap();
        assert_eq!(diag.kind, DiagKind::Matrix);
        assert!(!diag.is_error());
    }

    #[test]
    fn test_singular_non_flat_matrix_rejected() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test\n1 16 0 0 0 1 0 0 0 0 0 0 0 1 3001.dat\n",
        );
        let line = &main.doc(root).lines[1];
        assert!(!line.header.valid);
        assert!(line.header.diagnostic.as_ref().unwrap().is_error());
    }

    #[test]
    fn test_part_determinant_warning_sets_no_shrink() {
        let library = fake_library();
        let (main, root) = load_model(
            &library,
            "0 Test\n1 16 0 0 0 2 0 0 0 2 0 0 0 2 3001.dat\n",
        );
        let line = &main.doc(root).lines[1];
        assert!(line.header.valid);
        assert_eq!(
            line.header.diagnostic.as_ref().unwrap().kind,
            DiagKind::PartDeterminant
        );
        let part = main.document_named("3001.dat").unwrap();
        assert!(main.doc(part).flags.no_shrink);
    }

    #[test]
    fn test_seam_width_shrinks_parts() {
        let library = fake_library();
        let (mut main, root) = load_model(
            &library,
            "0 Test\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 3001.dat\n",
        );
        let unshrunk = main.bounding_box(root).unwrap();
        assert_eq!(unshrunk.max.x, 40.0);
        // Recompute with a seam; the part pulls in by half the seam on
        // each side.
        main.set_seam_width(0.5);
        let shrunk = main.bounding_box(root).unwrap();
        assert!(shrunk.max.x < 40.0);
        assert!(shrunk.max.x > 39.5);
    }

    #[test]
    fn test_data_block_decodes_to_document() {
        let library = fake_library();
        let (main, _) = load_model(
            &library,
            "0 FILE main.ldr\n\
             0 Main\n\
             2 24 0 0 0 1 0 0\n\
             0 FILE logo.png\n\
             0 !DATA START\n\
             0 !: aGVsbG8=\n\
             0 !DATA END\n",
        );
        let data = main.document_named("logo.png").unwrap();
        assert_eq!(main.doc(data).data.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_cancellation() {
        struct CancelAfterRead;
        impl LoadHooks for CancelAfterRead {
            fn progress(&mut self, _message: &str, fraction: f32) -> bool {
                fraction < 0.05
            }
        }
        let library = fake_library();
        let model_path = library.path().join("model.ldr");
        write_file(&model_path, "0 Test\n2 24 0 0 0 1 0 0\n");
        let mut main = MainModel::new(library.path());
        main.options.process_ld_config = false;
        let result = main.load(&model_path, &mut CancelAfterRead);
        assert!(matches!(result, Err(Error::Canceled)));
    }

    #[test]
    fn test_missing_library_rejected() {
        let dir = TempDir::new().unwrap();
        let mut main = MainModel::new(dir.path().join("nowhere"));
        let result = main.load(&dir.path().join("model.ldr"), &mut NullHooks);
        assert!(matches!(result, Err(Error::LDrawDirNotFound(_))));
    }
}
