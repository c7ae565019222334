// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Comment lines and their meta-command classification.
//!
//! A comment's text is normalized once (trimmed, tabs to spaces, runs of
//! spaces collapsed) and split into words after the leading `0`; every
//! meta predicate works on that processed form. Prefix matching follows
//! the original format conventions: `FILE`/`BFC`/`!TEXMAP`/`!DATA`
//! prefixes are case-sensitive, `!LDVIEW`/`STEP`/`AUTHOR`/`~moved to`
//! are not.

use smallvec::SmallVec;

/// Payload of a type-0 line
#[derive(Debug, Clone, Default)]
pub struct CommentLine {
    /// Normalized text: trimmed, tabs converted, multi-spaces collapsed
    pub processed: String,
    /// Words after the leading `0`
    pub words: SmallVec<[String; 8]>,
    /// Set while a texmap block with a resolved image is open; makes a
    /// `0 !:` row produce replacement geometry
    pub texmap_filename: Option<String>,
}

fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.trim().chars() {
        let ch = if ch == '\t' { ' ' } else { ch };
        if ch == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

fn has_prefix_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

impl CommentLine {
    pub fn from_text(text: &str) -> Self {
        let processed = normalize(text);
        let words = if processed.len() > 2 {
            processed[2..]
                .split(' ')
                .map(str::to_owned)
                .collect::<SmallVec<[String; 8]>>()
        } else {
            SmallVec::new()
        };
        Self {
            processed,
            words,
            texmap_filename: None,
        }
    }

    #[inline]
    pub fn word(&self, index: usize) -> Option<&str> {
        self.words.get(index).map(String::as_str)
    }

    fn word_eq(&self, index: usize, value: &str) -> bool {
        self.word(index)
            .map_or(false, |w| w.eq_ignore_ascii_case(value))
    }

    /// Embedded-document marker: `0 FILE <name>` (case-sensitive prefix)
    pub fn mpd_filename(&self) -> Option<&str> {
        let rest = self.processed.strip_prefix("0 FILE ")?;
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// `0 NOFILE` terminates an embedded document without starting another
    pub fn is_nofile_meta(&self) -> bool {
        self.processed == "0 NOFILE"
    }

    pub fn is_bfc_meta(&self) -> bool {
        self.processed.starts_with("0 BFC ")
    }

    /// Case-sensitive search for a BFC keyword among the meta's words
    pub fn contains_bfc_command(&self, command: &str) -> bool {
        self.is_bfc_meta() && self.words.iter().skip(1).any(|w| w == command)
    }

    pub fn is_ldview_meta(&self) -> bool {
        has_prefix_ignore_case(&self.processed, "0 !LDVIEW ")
    }

    pub fn is_bbox_ignore_meta(&self) -> bool {
        self.is_ldview_meta() && self.word(1).map_or(false, |w| w == "BBOX_IGNORE")
    }

    /// Case-sensitive keyword search after `BBOX_IGNORE`
    pub fn contains_bbox_ignore_command(&self, command: &str) -> bool {
        self.is_bbox_ignore_meta() && self.words.iter().skip(2).any(|w| w == command)
    }

    pub fn is_texmap_meta(&self) -> bool {
        self.processed.starts_with("0 !TEXMAP ")
    }

    /// Case-sensitive check of the word right after `!TEXMAP`
    pub fn contains_texmap_command(&self, command: &str) -> bool {
        self.is_texmap_meta() && self.word(1) == Some(command)
    }

    pub fn is_data_meta(&self) -> bool {
        self.processed.starts_with("0 !DATA ")
    }

    pub fn contains_data_command(&self, command: &str) -> bool {
        self.is_data_meta() && self.word(1) == Some(command)
    }

    /// `0 !:` row inside a `!DATA` block (or texture-replacement geometry)
    pub fn is_data_row_meta(&self) -> bool {
        self.processed.starts_with("0 !:")
    }

    /// `0 !: <geometry>`: a line that re-emits its remainder as geometry
    /// when it belongs to a successfully opened texmap block
    pub fn is_new_geometry_meta(&self) -> bool {
        self.processed.starts_with("0 !: ")
    }

    /// Remainder after `0 !: `, the replacement geometry text
    pub fn new_geometry_text(&self) -> Option<&str> {
        self.processed.strip_prefix("0 !: ")
    }

    pub fn is_moved_to_meta(&self) -> bool {
        has_prefix_ignore_case(&self.processed, "0 ~moved to ")
    }

    pub fn moved_to_name(&self) -> Option<&str> {
        if self.is_moved_to_meta() {
            Some(&self.processed["0 ~moved to ".len()..])
        } else {
            None
        }
    }

    pub fn is_step_meta(&self) -> bool {
        has_prefix_ignore_case(&self.processed, "0 step")
            || has_prefix_ignore_case(&self.processed, "0 rotstep")
    }

    pub fn author(&self) -> Option<&str> {
        if has_prefix_ignore_case(&self.processed, "0 author: ") {
            Some(&self.processed["0 author: ".len()..])
        } else if has_prefix_ignore_case(&self.processed, "0 author ") {
            Some(&self.processed["0 author ".len()..])
        } else {
            None
        }
    }

    /// `0 ~lsynth constraint`: geometry that must not be seam-shrunk
    pub fn is_no_shrink_meta(&self) -> bool {
        self.word_eq(0, "~lsynth") && self.word_eq(1, "constraint")
    }

    /// `!LDRAW_ORG`-style part classification, in all its historical forms
    pub fn is_part_meta(&self) -> bool {
        if self.word_eq(0, "!ldraw_org")
            && (self.word_eq(1, "part")
                || self.word_eq(1, "unofficial_part")
                || self.word_eq(1, "shortcut")
                || self.word_eq(1, "unofficial_shortcut"))
        {
            return true;
        }
        let mut word = 0;
        if self.word_eq(0, "unofficial")
            || self.word_eq(0, "un-official")
            || self.word_eq(0, "ldraw_org")
            || self.word_eq(0, "custom")
        {
            word = if self.word_eq(1, "ldraw") { 2 } else { 1 };
        } else if self.word_eq(0, "official") && self.word_eq(1, "lcad") {
            if self.word_eq(2, "update") {
                return true;
            }
            word = 2;
        } else if self.word_eq(0, "original") && self.word_eq(1, "ldraw") && self.word_eq(2, "part")
        {
            return true;
        }
        word != 0 && (self.word_eq(word, "part") || self.word_eq(word, "element"))
    }

    /// Whether a part meta marks the part as officially released
    pub fn is_official_part_meta(&self) -> bool {
        self.is_part_meta()
            && ((self.word_eq(0, "!ldraw_org") && self.word_eq(1, "part"))
                || self.word_eq(0, "ldraw_org")
                || self.word_eq(0, "official")
                || self.word_eq(0, "original"))
    }

    /// `!LDRAW_ORG`-style primitive classification
    pub fn is_primitive_meta(&self) -> bool {
        if self.words.len() == 2
            && self.word_eq(0, "!ldraw_org")
            && (self.word_eq(1, "primitive")
                || self.word_eq(1, "48_primitive")
                || self.word_eq(1, "unofficial_primitive")
                || self.word_eq(1, "unofficial_48_primitive"))
        {
            return true;
        }
        let mut word = 0;
        if self.word_eq(0, "unofficial")
            || self.word_eq(0, "un-official")
            || self.word_eq(0, "ldraw_org")
            || self.word_eq(0, "original")
        {
            word = if self.word_eq(1, "ldraw") { 2 } else { 1 };
        }
        word != 0 && self.word_eq(word, "primitive")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(text: &str) -> CommentLine {
        CommentLine::from_text(text)
    }

    #[test]
    fn test_normalization() {
        let c = comment("  0\tBFC   CERTIFY  CCW  ");
        assert_eq!(c.processed, "0 BFC CERTIFY CCW");
        assert_eq!(c.words.as_slice(), ["BFC", "CERTIFY", "CCW"]);
    }

    #[test]
    fn test_mpd_filename() {
        assert_eq!(comment("0 FILE sub.ldr").mpd_filename(), Some("sub.ldr"));
        assert_eq!(comment("0 file sub.ldr").mpd_filename(), None);
        assert_eq!(comment("0 FILE ").mpd_filename(), None);
        assert!(comment("0 NOFILE").is_nofile_meta());
    }

    #[test]
    fn test_bfc_commands() {
        let c = comment("0 BFC CERTIFY CCW");
        assert!(c.is_bfc_meta());
        assert!(c.contains_bfc_command("CERTIFY"));
        assert!(c.contains_bfc_command("CCW"));
        assert!(!c.contains_bfc_command("certify"));
        assert!(!c.contains_bfc_command("CW"));
    }

    #[test]
    fn test_part_meta_forms() {
        assert!(comment("0 !LDRAW_ORG Part UPDATE 2004-03").is_part_meta());
        assert!(comment("0 !LDRAW_ORG Unofficial_Part").is_part_meta());
        assert!(comment("0 LDRAW_ORG Part").is_part_meta());
        assert!(comment("0 Unofficial LDraw Element").is_part_meta());
        assert!(comment("0 Official LCAD update 99-03").is_part_meta());
        assert!(comment("0 Original LDraw Part").is_part_meta());
        assert!(!comment("0 !LDRAW_ORG Primitive").is_part_meta());

        assert!(comment("0 !LDRAW_ORG Part").is_official_part_meta());
        assert!(!comment("0 !LDRAW_ORG Unofficial_Part").is_official_part_meta());
    }

    #[test]
    fn test_primitive_meta_forms() {
        assert!(comment("0 !LDRAW_ORG Primitive").is_primitive_meta());
        assert!(comment("0 !LDRAW_ORG 48_Primitive").is_primitive_meta());
        assert!(comment("0 Unofficial LDraw Primitive").is_primitive_meta());
        assert!(!comment("0 !LDRAW_ORG Part").is_primitive_meta());
    }

    #[test]
    fn test_texmap_and_data_metas() {
        let c = comment("0 !TEXMAP START PLANAR 0 0 0 1 0 0 0 1 0 tex.png");
        assert!(c.is_texmap_meta());
        assert!(c.contains_texmap_command("START"));
        assert!(!c.contains_texmap_command("PLANAR"));

        assert!(comment("0 !DATA START").contains_data_command("START"));
        assert!(comment("0 !: AAAA").is_data_row_meta());
        assert_eq!(comment("0 !: 3 16 0 0 0 1 0 0 0 1 0").new_geometry_text(),
            Some("3 16 0 0 0 1 0 0 0 1 0"));
    }

    #[test]
    fn test_misc_metas() {
        assert!(comment("0 STEP").is_step_meta());
        assert!(comment("0 ROTSTEP 0 45 0").is_step_meta());
        assert!(comment("0 ~Moved to 3001").is_moved_to_meta());
        assert_eq!(comment("0 Author: J. Doe").author(), Some("J. Doe"));
        assert!(comment("0 ~LSynth Constraint").is_no_shrink_meta());
        assert!(comment("0 !LDVIEW BBOX_IGNORE BEGIN").is_bbox_ignore_meta());
        assert!(comment("0 !ldview BBOX_IGNORE NEXT").contains_bbox_ignore_command("NEXT"));
    }
}
