// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Type-1 line: a colored, transformed reference to another document.
//!
//! The payload parses its own fourteen fields and file name; resolving the
//! name against the registry, loop detection, and the singular-matrix
//! repair that needs the referenced geometry all happen in the parse
//! driver, which owns the document arena.

use crate::document::DocId;
use crate::error::DiagKind;
use crate::line::{parse_color_word, parse_float_word, type_and_color_prefix, ActionFlags, LineHeader};
use crate::vector::Matrix4;

#[derive(Debug, Clone, Default)]
pub struct ModelRefLine {
    pub color_number: u32,
    /// Referenced file name, exactly as written (embedded whitespace kept)
    pub file_name: String,
    /// Column-major transform applied to the referenced geometry
    pub matrix: Matrix4,
    pub flags: ActionFlags,
    /// Resolved sub-document, filled in by the parse driver
    pub high_res: Option<DocId>,
    /// Low-resolution counterpart (`stud*` primitives mapped to `stu2*`)
    pub low_res: Option<DocId>,
}

/// Rebuild the line with the first fourteen words single-space separated
/// and every whitespace run before the file name collapsed. The file name
/// itself is kept verbatim so embedded whitespace survives for the
/// diagnostic below.
fn fix_line(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.trim_start();
    for _ in 0..14 {
        let end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        if end == 0 {
            break;
        }
        out.push_str(&rest[..end]);
        out.push(' ');
        rest = rest[end..].trim_start();
    }
    out.push_str(rest);
    out.truncate(out.trim_end().len());
    out
}

impl ModelRefLine {
    /// Parse color, translation, rotation matrix, and file name. Returns
    /// false (and marks the header) when any field is malformed or the
    /// file name is missing.
    pub fn parse_fields(&mut self, header: &mut LineHeader) -> bool {
        let processed = fix_line(&header.text);
        let (fields, name) = match split_fields(&processed) {
            Some(parts) => parts,
            None => {
                header.valid = false;
                header.set_error(DiagKind::Parse, "Error parsing model reference line.");
                return false;
            }
        };
        if name.chars().any(|c| c.is_ascii_whitespace()) {
            header.set_warning(
                DiagKind::Whitespace,
                format!("Whitespace found in file name: {}", name),
            );
        }
        self.color_number = fields.0;
        self.file_name = name.to_owned();
        let f = fields.1;
        self.set_transformation(f);
        let prefix = type_and_color_prefix(&processed);
        let mut formatted = if prefix.is_empty() {
            format!("1 {}", self.color_number)
        } else {
            prefix.to_owned()
        };
        for group in f.chunks(3) {
            formatted.push_str("  ");
            formatted.push_str(&format!("{} {} {}", group[0], group[1], group[2]));
        }
        formatted.push_str("  ");
        formatted.push_str(name);
        header.formatted = Some(formatted);
        true
    }

    /// `1 c x y z a b c d e f g h i`: rotation rows land in columns of the
    /// column-major matrix, translation in elements 12..15.
    fn set_transformation(&mut self, f: [f32; 12]) {
        let [x, y, z, a, b, c, d, e, ff, g, h, i] = f;
        let m = &mut self.matrix.0;
        *m = [0.0; 16];
        m[15] = 1.0;
        m[0] = a;
        m[4] = b;
        m[8] = c;
        m[1] = d;
        m[5] = e;
        m[9] = ff;
        m[2] = g;
        m[6] = h;
        m[10] = i;
        m[12] = x;
        m[13] = y;
        m[14] = z;
    }

    /// Repair a singular matrix on an XZ-planar sub-model. Part authors
    /// often write an all-zero row or Y column when the geometry is flat at
    /// Y == 0; setting the missing Y term to 1 restores an invertible
    /// transform without moving any point. Returns the new determinant
    /// (still zero when no repair worked).
    pub fn try_fix_planar_matrix(&mut self, header: &mut LineHeader) -> f32 {
        let mut determinant = 0.0;
        for i in 0..3 {
            let m = &mut self.matrix.0;
            if m[i] == 0.0 && m[4 + i] == 0.0 && m[8 + i] == 0.0 {
                m[4 + i] = 1.0;
                determinant = self.matrix.determinant();
                if determinant != 0.0 {
                    header.set_warning(
                        DiagKind::Matrix,
                        format!("Fixed all-zero matrix row {}.", i),
                    );
                    return determinant;
                }
            }
        }
        if self.matrix.0[4] == 0.0 && self.matrix.0[5] == 0.0 && self.matrix.0[6] == 0.0 {
            for i in 0..3 {
                self.matrix.0[4 + i] = 1.0;
                determinant = self.matrix.determinant();
                if determinant != 0.0 {
                    header.set_warning(
                        DiagKind::Matrix,
                        format!("Fixed all-zero matrix column entry {}.", i),
                    );
                    return determinant;
                }
            }
        }
        determinant
    }

    /// Matrix to scan the referenced geometry under: the parent transform
    /// composed with this line's, with an optional seam shrink about the
    /// referenced part's bounding box applied innermost.
    pub fn scan_matrix(&self, parent: &Matrix4, seam: Option<&Matrix4>) -> Matrix4 {
        match seam {
            Some(scale) => parent.multiply(&self.matrix.multiply(scale)),
            None => parent.multiply(&self.matrix),
        }
    }
}

/// Fourteen leading fields plus the file name, or `None` when a field is
/// malformed or the name is empty.
fn split_fields(processed: &str) -> Option<((u32, [f32; 12]), &str)> {
    let mut rest = processed;
    take_word(&mut rest)?; // type code, validated by scan
    let color = parse_color_word(take_word(&mut rest)?)?;
    let mut fields = [0.0f32; 12];
    for slot in fields.iter_mut() {
        *slot = parse_float_word(take_word(&mut rest)?)?;
    }
    let name = rest.trim_start();
    if name.is_empty() {
        return None;
    }
    Some(((color, fields), name))
}

fn take_word<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    let end = trimmed
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(trimmed.len());
    if end == 0 {
        return None;
    }
    *rest = &trimmed[end..];
    Some(&trimmed[..end])
}
