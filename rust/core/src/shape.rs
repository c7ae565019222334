// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shape-line payloads and the geometry validator.
//!
//! Segments, triangles, quads, and conditional segments parse their
//! fixed-arity point fields and then run degenerate-geometry checks:
//! coincident points, colinear points, and (for quads) winding repair and
//! concave/non-planar splitting. Invalid triangles and quads can produce
//! replacement lines that the parse driver splices in right after them.
//!
//! The quad checks use three distinct acceptance bands on normal dot
//! products: `<= 0.0` rejects an ordering outright, values up to `0.9`
//! flag a non-flat warning while still accepting, and a split diagonal
//! with a dot below `-0.9` is reported as concave rather than non-flat.
//! These bands are load-bearing; do not collapse them.

use smallvec::SmallVec;

use crate::error::DiagKind;
use crate::line::{
    scan_color_and_floats, type_and_color_prefix, word_range, ActionFlags, Line, LineHeader,
};
use crate::vector::Vector3;

/// Tolerance for near-zero normal lengths
pub const EPSILON: f32 = 1e-5;

#[inline]
fn feq(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

/// Replacement lines produced by a repair, at most two
pub type Replacements = SmallVec<[Line; 2]>;

/// First pair of exactly equal points, if any
fn matching_points(points: &[Vector3]) -> Option<(usize, usize)> {
    for i in 0..points.len() - 1 {
        for j in i + 1..points.len() {
            if points[i] == points[j] {
                return Some((i, j));
            }
        }
    }
    None
}

/// Of three points known to be colinear, the one strictly between the
/// other two: componentwise it is neither the minimum nor the maximum.
fn middle_index(p1: &Vector3, p2: &Vector3, p3: &Vector3) -> usize {
    let min = p1.min(p2).min(p3);
    let max = p1.max(p2).max(p3);
    if *p1 != min && *p1 != max {
        0
    } else if *p2 != min && *p2 != max {
        1
    } else {
        2
    }
}

/// Original spelling of point `index`'s three coordinate words
fn print_point(text: &str, index: usize) -> String {
    word_range(text, index * 3 + 2, (index + 1) * 3 + 2)
}

/// Serialize a parsed shape back out: original type/color prefix, then
/// point groups separated by two spaces.
fn format_shape(text: &str, type_code: u8, color: u32, points: &[Vector3]) -> String {
    let prefix = type_and_color_prefix(text);
    let mut out = if prefix.is_empty() {
        format!("{} {}", type_code, color)
    } else {
        prefix.to_owned()
    };
    for p in points {
        out.push_str("  ");
        out.push_str(&format!("{} {} {}", p.x, p.y, p.z));
    }
    out
}

/// Replacement shape built from the original line's point words
fn new_shape_line(
    header: &LineHeader,
    type_code: u8,
    color: u32,
    indices: &[usize],
) -> Line {
    let mut text = format!("{} {}", type_code, color);
    for &index in indices {
        text.push(' ');
        text.push_str(&print_point(&header.text, index));
    }
    Line::scan_with_original(&text, header.line_number, Some(header.text.clone()))
}

/// Type-2 line: a visible edge segment between two points
#[derive(Debug, Clone, Default)]
pub struct SegmentLine {
    pub color_number: u32,
    pub points: [Vector3; 2],
    pub flags: ActionFlags,
}

impl SegmentLine {
    pub fn parse(&mut self, header: &mut LineHeader, skip_validation: bool) -> bool {
        let mut fields = [0.0f32; 6];
        match scan_color_and_floats(&header.text, 6, &mut fields) {
            Some(color) => {
                self.color_number = color;
                self.points = [
                    Vector3::new(fields[0], fields[1], fields[2]),
                    Vector3::new(fields[3], fields[4], fields[5]),
                ];
                header.formatted = Some(format_shape(&header.text, 2, color, &self.points));
                if !skip_validation && self.points[0] == self.points[1] {
                    header.valid = false;
                    header.set_error(
                        DiagKind::MatchingPoints,
                        format!(
                            "identical vertices 1 and 2 <{}>",
                            print_point(&header.text, 0)
                        ),
                    );
                }
                true
            }
            None => {
                header.valid = false;
                header.set_error(DiagKind::Parse, "error parsing segment line");
                false
            }
        }
    }
}

/// Type-3 line: a filled triangle
#[derive(Debug, Clone, Default)]
pub struct TriangleLine {
    pub color_number: u32,
    pub points: [Vector3; 3],
    pub flags: ActionFlags,
    matching_index: Option<usize>,
    colinear_index: Option<usize>,
}

impl TriangleLine {
    pub fn parse(&mut self, header: &mut LineHeader, skip_validation: bool) -> bool {
        let mut fields = [0.0f32; 9];
        match scan_color_and_floats(&header.text, 9, &mut fields) {
            Some(color) => {
                self.color_number = color;
                for (i, chunk) in fields.chunks_exact(3).enumerate() {
                    self.points[i] = Vector3::new(chunk[0], chunk[1], chunk[2]);
                }
                header.formatted = Some(format_shape(&header.text, 3, color, &self.points));
                if !skip_validation {
                    if let Some((i, j)) = matching_points(&self.points) {
                        header.set_warning(
                            DiagKind::MatchingPoints,
                            format!("vertices {} and {} are identical", i + 1, j + 1),
                        );
                        self.matching_index = Some(i);
                        header.valid = false;
                    } else {
                        self.check_colinear(header);
                    }
                }
                true
            }
            None => {
                header.valid = false;
                header.set_error(DiagKind::Parse, "error parsing triangle line");
                false
            }
        }
    }

    fn check_colinear(&mut self, header: &mut LineHeader) {
        let [p1, p2, p3] = self.points;
        let normal = (p1 - p3).cross(&(p1 - p2));
        if normal.length_squared() == 0.0 {
            self.colinear_index = Some(middle_index(&p1, &p2, &p3));
            header.valid = false;
        }
    }

    /// One segment over the remaining two points, dropping `index`
    fn remove_point(&self, header: &LineHeader, index: usize) -> Line {
        let kept: [usize; 2] = match index {
            0 => [1, 2],
            1 => [0, 2],
            _ => [0, 1],
        };
        new_shape_line(header, 2, self.color_number, &kept)
    }

    pub fn replacement_lines(&self, header: &mut LineHeader) -> Option<Replacements> {
        if header.valid {
            return None;
        }
        if let Some(index) = self.matching_index {
            let line = self.remove_point(header, index);
            header.set_warning(
                DiagKind::MatchingPoints,
                format!(
                    "removed identical vertex {} <{}>; converted to segment",
                    index + 1,
                    print_point(&header.text, index)
                ),
            );
            Some(SmallVec::from_iter([line]))
        } else if let Some(index) = self.colinear_index {
            let line = self.remove_point(header, index);
            header.set_warning(
                DiagKind::Colinear,
                format!(
                    "removed colinear vertex {} <{}>; converted to segment",
                    index + 1,
                    print_point(&header.text, index)
                ),
            );
            Some(SmallVec::from_iter([line]))
        } else {
            None
        }
    }
}

/// Type-4 line: a filled quadrilateral
#[derive(Debug, Clone, Default)]
pub struct QuadLine {
    pub color_number: u32,
    pub points: [Vector3; 4],
    pub flags: ActionFlags,
    matching_index: Option<usize>,
    colinear_index: Option<usize>,
}

/// The six candidate vertex orderings tried by winding repair and the
/// concave split, in priority order.
const QUAD_ORDERINGS: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [0, 1, 3, 2],
    [0, 2, 1, 3],
    [0, 2, 3, 1],
    [0, 3, 1, 2],
    [0, 3, 2, 1],
];

/// Unit corner normals of the quad (p1..p4), or `None` when any corner
/// degenerates to a near-zero cross product.
fn corner_normals(
    p1: Vector3,
    p2: Vector3,
    p3: Vector3,
    p4: Vector3,
) -> Option<[Vector3; 4]> {
    let normals = [
        (p1 - p4).cross(&(p1 - p2)),
        (p2 - p1).cross(&(p2 - p3)),
        (p3 - p2).cross(&(p3 - p4)),
        (p4 - p3).cross(&(p4 - p1)),
    ];
    let mut out = [Vector3::ZERO; 4];
    for (i, n) in normals.iter().enumerate() {
        let len = n.length();
        if feq(len, 0.0) {
            return None;
        }
        out[i] = *n * (1.0 / len);
    }
    Some(out)
}

impl QuadLine {
    pub fn parse(&mut self, header: &mut LineHeader, skip_validation: bool) -> bool {
        let mut fields = [0.0f32; 12];
        match scan_color_and_floats(&header.text, 12, &mut fields) {
            Some(color) => {
                self.color_number = color;
                for (i, chunk) in fields.chunks_exact(3).enumerate() {
                    self.points[i] = Vector3::new(chunk[0], chunk[1], chunk[2]);
                }
                header.formatted = Some(format_shape(&header.text, 4, color, &self.points));
                if !skip_validation {
                    if let Some((i, j)) = matching_points(&self.points) {
                        header.set_warning(
                            DiagKind::MatchingPoints,
                            format!("vertices {} and {} are identical", i + 1, j + 1),
                        );
                        self.matching_index = Some(i);
                        header.valid = false;
                    } else {
                        self.swap_points_if_needed(header);
                        self.check_colinear(header);
                    }
                }
                true
            }
            None => {
                header.valid = false;
                header.set_error(DiagKind::Parse, "error parsing quad line");
                false
            }
        }
    }

    /// Whether ordering `order` is unacceptable (some adjacent corner
    /// normals point away from each other). Flags a non-flat warning when
    /// the ordering is acceptable but any dot product falls in (0, 0.9].
    fn swap_needed(&self, header: &mut LineHeader, order: [usize; 4]) -> bool {
        let normals = match corner_normals(
            self.points[order[0]],
            self.points[order[1]],
            self.points[order[2]],
            self.points[order[3]],
        ) {
            Some(n) => n,
            // A degenerate corner is handled by the colinear check instead
            None => return false,
        };
        let mut non_flat = false;
        for i in 0..3 {
            for j in i + 1..4 {
                let dot = normals[i].dot(&normals[j]);
                if dot <= 0.0 {
                    return true;
                }
                if dot <= 0.9 {
                    non_flat = true;
                }
            }
        }
        if non_flat {
            header.set_warning(DiagKind::NonFlatQuad, "quad is not flat");
        }
        false
    }

    fn swap_points_if_needed(&mut self, header: &mut LineHeader) {
        if !self.swap_needed(header, QUAD_ORDERINGS[0]) {
            return;
        }
        // The original order is wrong; try the alternates until one produces
        // a standard convex quad.
        let mut fixed = false;
        for order in &QUAD_ORDERINGS[1..] {
            if !self.swap_needed(header, *order) {
                self.report_bad_vertex_order(header, *order);
                self.points = [
                    self.points[order[0]],
                    self.points[order[1]],
                    self.points[order[2]],
                    self.points[order[3]],
                ];
                fixed = true;
                break;
            }
        }
        if !fixed {
            // No point order yields an acceptable quad; it must be concave
            // or non-planar.
            header.valid = false;
            self.flags.bfc_clip = false;
        }
    }

    fn report_bad_vertex_order(&self, header: &mut LineHeader, order: [usize; 4]) {
        let old: Vec<String> = (0..4).map(|i| print_point(&header.text, i)).collect();
        let new: Vec<String> = order
            .iter()
            .map(|&i| print_point(&header.text, i))
            .collect();
        let message = format!(
            "bad vertex sequence <{}> <{}> <{}> <{}>; reordered to <{}> <{}> <{}> <{}>",
            old[0], old[1], old[2], old[3], new[0], new[1], new[2], new[3]
        );
        // A reordered quad still renders, so this stays a warning even
        // when clipping is active.
        header.set_warning(DiagKind::VertexOrder, message);
    }

    fn check_colinear(&mut self, header: &mut LineHeader) {
        self.colinear_index = self.colinear_index_of();
        if self.colinear_index.is_some() {
            header.valid = false;
        }
    }

    /// Index of a corner whose two edges are colinear, checking each of
    /// the four corner normals for exact zero length
    fn colinear_index_of(&self) -> Option<usize> {
        let [p1, p2, p3, p4] = self.points;
        if (p1 - p4).cross(&(p1 - p2)).length_squared() == 0.0 {
            return Some(match middle_index(&p1, &p2, &p4) {
                0 => 0,
                1 => 1,
                _ => 3,
            });
        }
        if (p2 - p1).cross(&(p2 - p3)).length_squared() == 0.0 {
            return Some(middle_index(&p1, &p2, &p3));
        }
        if (p3 - p2).cross(&(p3 - p4)).length_squared() == 0.0 {
            return Some(middle_index(&p2, &p3, &p4) + 1);
        }
        if (p4 - p3).cross(&(p4 - p1)).length_squared() == 0.0 {
            return Some(match middle_index(&p1, &p3, &p4) {
                0 => 0,
                1 => 2,
                _ => 3,
            });
        }
        None
    }

    fn new_triangle(&self, header: &LineHeader, indices: [usize; 3]) -> Line {
        new_shape_line(header, 3, self.color_number, &indices)
    }

    /// One triangle over the remaining three points, dropping `index`
    fn remove_point(&self, header: &LineHeader, index: usize) -> Line {
        let kept: [usize; 3] = match index {
            0 => [1, 2, 3],
            1 => [0, 2, 3],
            2 => [0, 1, 3],
            _ => [0, 1, 2],
        };
        self.new_triangle(header, kept)
    }

    pub fn replacement_lines(&self, header: &mut LineHeader) -> Option<Replacements> {
        if header.valid {
            return None;
        }
        if let Some(index) = self.matching_index {
            let line = self.remove_point(header, index);
            header.set_warning(
                DiagKind::MatchingPoints,
                format!(
                    "removed identical vertex {} <{}>; converted to triangle",
                    index + 1,
                    print_point(&header.text, index)
                ),
            );
            return Some(SmallVec::from_iter([line]));
        }
        if let Some(index) = self.colinear_index {
            return Some(self.remove_colinear_point(header, index));
        }
        self.split_concave_quad(header)
    }

    /// Split along the diagonal that keeps the colinear corner's two
    /// triangles well formed
    fn remove_colinear_point(&self, header: &mut LineHeader, index: usize) -> Replacements {
        let (t1, t2) = match index {
            0 => ([0, 1, 2], [2, 3, 0]),
            1 => ([1, 2, 3], [3, 0, 1]),
            2 => ([2, 3, 0], [0, 1, 2]),
            _ => ([3, 0, 1], [1, 2, 3]),
        };
        let lines = SmallVec::from_iter([
            self.new_triangle(header, t1),
            self.new_triangle(header, t2),
        ]);
        header.set_warning(
            DiagKind::Colinear,
            format!("colinear vertex {}; split into two triangles", index + 1),
        );
        lines
    }

    fn split_concave_quad(&self, header: &mut LineHeader) -> Option<Replacements> {
        for order in &QUAD_ORDERINGS {
            if let Some(lines) = self.try_split(header, *order) {
                return Some(lines);
            }
        }
        // All split attempts failed; the quad must not be flat.
        header.set_error(DiagKind::ConcaveQuad, "concave quad; unable to split");
        None
    }

    /// Split along a diagonal when an opposite pair of corner normals in
    /// this ordering disagrees. The emitted triangles always use the
    /// stored point order.
    fn try_split(&self, header: &mut LineHeader, order: [usize; 4]) -> Option<Replacements> {
        let normals = corner_normals(
            self.points[order[0]],
            self.points[order[1]],
            self.points[order[2]],
            self.points[order[3]],
        )?;
        const PAIRS: [((usize, usize), ([usize; 3], [usize; 3])); 4] = [
            ((0, 1), ([0, 1, 3], [1, 2, 3])),
            ((1, 2), ([0, 1, 2], [0, 2, 3])),
            ((2, 3), ([0, 1, 3], [1, 2, 3])),
            ((3, 0), ([0, 1, 2], [0, 2, 3])),
        ];
        for ((a, b), (t1, t2)) in PAIRS {
            let dot = normals[a].dot(&normals[b]);
            if dot <= 0.0 {
                let lines = SmallVec::from_iter([
                    self.new_triangle(header, t1),
                    self.new_triangle(header, t2),
                ]);
                let kind = if dot < -0.9 {
                    DiagKind::ConcaveQuad
                } else {
                    DiagKind::NonFlatQuad
                };
                let shape = if dot < -0.9 { "concave" } else { "non-flat" };
                header.set_warning(
                    kind,
                    format!(
                        "{} quad split into triangles <{} {} {}> and <{} {} {}>",
                        shape,
                        print_point(&header.text, t1[0]),
                        print_point(&header.text, t1[1]),
                        print_point(&header.text, t1[2]),
                        print_point(&header.text, t2[0]),
                        print_point(&header.text, t2[1]),
                        print_point(&header.text, t2[2]),
                    ),
                );
                return Some(lines);
            }
        }
        None
    }
}

/// Type-5 line: a segment drawn only when its two control points project
/// to the same side of it
#[derive(Debug, Clone, Default)]
pub struct CondLine {
    pub color_number: u32,
    pub points: [Vector3; 2],
    pub control_points: [Vector3; 2],
    pub flags: ActionFlags,
}

impl CondLine {
    pub fn parse(&mut self, header: &mut LineHeader, skip_validation: bool) -> bool {
        let mut fields = [0.0f32; 12];
        match scan_color_and_floats(&header.text, 12, &mut fields) {
            Some(color) => {
                self.color_number = color;
                self.points = [
                    Vector3::new(fields[0], fields[1], fields[2]),
                    Vector3::new(fields[3], fields[4], fields[5]),
                ];
                self.control_points = [
                    Vector3::new(fields[6], fields[7], fields[8]),
                    Vector3::new(fields[9], fields[10], fields[11]),
                ];
                header.formatted = Some(format_shape(
                    &header.text,
                    5,
                    color,
                    &[
                        self.points[0],
                        self.points[1],
                        self.control_points[0],
                        self.control_points[1],
                    ],
                ));
                if !skip_validation {
                    if self.points[0] == self.points[1] {
                        header.valid = false;
                        header.set_error(
                            DiagKind::MatchingPoints,
                            "identical vertices in conditional segment",
                        );
                    } else if self.control_points[0] == self.control_points[1] {
                        header.valid = false;
                        header.set_error(
                            DiagKind::MatchingPoints,
                            "identical control points in conditional segment",
                        );
                    }
                }
                true
            }
            None => {
                header.valid = false;
                header.set_error(DiagKind::Parse, "error parsing conditional segment line");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::LinePayload;

    fn header(text: &str) -> LineHeader {
        LineHeader::new(text.to_owned(), 1, None)
    }

    #[test]
    fn test_segment_round_trip() {
        let mut h = header("2 24 0 0 0 1.5 2 3");
        let mut seg = SegmentLine::default();
        assert!(seg.parse(&mut h, false));
        assert!(h.valid);
        assert_eq!(seg.color_number, 24);
        assert_eq!(seg.points[1], Vector3::new(1.5, 2.0, 3.0));
        assert_eq!(h.formatted.as_deref(), Some("2 24  0 0 0  1.5 2 3"));
    }

    #[test]
    fn test_quad_reserialization_round_trip() {
        // Messy spacing in, canonical spacing out; a rescan of the
        // formatted text yields the same point set.
        let mut h = header("4  16   0 0 0  1 0 0\t1 1 0   0 1 0");
        let mut quad = QuadLine::default();
        assert!(quad.parse(&mut h, false));
        assert!(h.valid);
        let mut h2 = header(h.display_text());
        let mut again = QuadLine::default();
        assert!(again.parse(&mut h2, false));
        assert!(h2.valid);
        assert!(h2.diagnostic.is_none());
        assert_eq!(again.points, quad.points);
        assert_eq!(again.color_number, 16);
    }

    #[test]
    fn test_segment_matching_points_unrepairable() {
        let mut h = header("2 24 1 2 3 1 2 3");
        let mut seg = SegmentLine::default();
        assert!(seg.parse(&mut h, false));
        assert!(!h.valid);
        let diag = h.diagnostic.as_ref().unwrap();
        assert_eq!(diag.kind, DiagKind::MatchingPoints);
        assert!(diag.is_error());
    }

    #[test]
    fn test_segment_parse_error() {
        let mut h = header("2 24 0 0 0 1 2");
        let mut seg = SegmentLine::default();
        assert!(!seg.parse(&mut h, false));
        assert_eq!(h.diagnostic.as_ref().unwrap().kind, DiagKind::Parse);
    }

    #[test]
    fn test_triangle_well_formed() {
        let mut h = header("3 16 0 0 0 1 0 0 0 1 0");
        let mut tri = TriangleLine::default();
        assert!(tri.parse(&mut h, false));
        assert!(h.valid);
        assert!(tri.replacement_lines(&mut h).is_none());
    }

    #[test]
    fn test_triangle_matching_becomes_segment() {
        let mut h = header("3 16 0 0 0 1 0 0 0 0 0");
        let mut tri = TriangleLine::default();
        assert!(tri.parse(&mut h, false));
        assert!(!h.valid);
        let lines = tri.replacement_lines(&mut h).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(matches!(lines[0].payload, LinePayload::Segment(_)));
        // The two distinct points survive, original spelling preserved
        assert_eq!(lines[0].header.text, "2 16 1 0 0 0 0 0");
        assert_eq!(h.diagnostic.as_ref().unwrap().kind, DiagKind::MatchingPoints);
        assert!(!h.diagnostic.as_ref().unwrap().is_error());
    }

    #[test]
    fn test_triangle_colinear_drops_middle() {
        let mut h = header("3 16 0 0 0 2 0 0 1 0 0");
        let mut tri = TriangleLine::default();
        assert!(tri.parse(&mut h, false));
        assert!(!h.valid);
        let lines = tri.replacement_lines(&mut h).unwrap();
        assert_eq!(lines.len(), 1);
        // The middle point (1,0,0) is dropped
        assert_eq!(lines[0].header.text, "2 16 0 0 0 2 0 0");
        assert_eq!(h.diagnostic.as_ref().unwrap().kind, DiagKind::Colinear);
    }

    #[test]
    fn test_quad_well_formed() {
        let mut h = header("4 16 0 0 0 1 0 0 1 1 0 0 1 0");
        let mut quad = QuadLine::default();
        assert!(quad.parse(&mut h, false));
        assert!(h.valid);
        assert!(h.diagnostic.is_none());
        assert!(quad.replacement_lines(&mut h).is_none());
    }

    #[test]
    fn test_quad_bad_winding_repaired() {
        // Bowtie order of a unit square: 0,1 swapped across the diagonal
        let mut h = header("4 16 0 0 0 1 1 0 1 0 0 0 1 0");
        let mut quad = QuadLine::default();
        quad.flags.bfc_clip = true;
        assert!(quad.parse(&mut h, false));
        assert!(h.valid);
        // Clip survives the repair; a vertex-order warning is attached
        assert!(quad.flags.bfc_clip);
        assert_eq!(h.diagnostic.as_ref().unwrap().kind, DiagKind::VertexOrder);
        assert!(!h.diagnostic.as_ref().unwrap().is_error());
        // Point set unchanged, order fixed so all adjacent normals agree
        let normals = corner_normals(
            quad.points[0],
            quad.points[1],
            quad.points[2],
            quad.points[3],
        )
        .unwrap();
        for i in 0..3 {
            for j in i + 1..4 {
                assert!(normals[i].dot(&normals[j]) > 0.0);
            }
        }
        let mut sorted: Vec<_> = quad.points.iter().map(|p| (p.x as i32, p.y as i32)).collect();
        sorted.sort();
        assert_eq!(sorted, [(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_quad_bad_winding_warning_without_clip() {
        let mut h = header("4 16 0 0 0 1 1 0 1 0 0 0 1 0");
        let mut quad = QuadLine::default();
        assert!(quad.parse(&mut h, false));
        assert!(h.valid);
        assert!(!h.diagnostic.as_ref().unwrap().is_error());
    }

    #[test]
    fn test_quad_matching_becomes_triangle() {
        let mut h = header("4 16 0 0 0 1 0 0 1 0 0 0 1 0");
        let mut quad = QuadLine::default();
        assert!(quad.parse(&mut h, false));
        assert!(!h.valid);
        let lines = quad.replacement_lines(&mut h).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(matches!(lines[0].payload, LinePayload::Triangle(_)));
        assert_eq!(lines[0].header.text, "3 16 0 0 0 1 0 0 0 1 0");
    }

    #[test]
    fn test_quad_colinear_splits_into_two_triangles() {
        // p2 lies on the segment p1..p3
        let mut h = header("4 16 0 0 0 1 0 0 2 0 0 0 2 0");
        let mut quad = QuadLine::default();
        assert!(quad.parse(&mut h, false));
        assert!(!h.valid);
        let index = 1; // reported middle corner
        let lines = quad.replacement_lines(&mut h).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0].payload, LinePayload::Triangle(_)));
        assert!(matches!(lines[1].payload, LinePayload::Triangle(_)));
        let diag = h.diagnostic.as_ref().unwrap();
        assert_eq!(diag.kind, DiagKind::Colinear);
        assert!(diag.message.contains(&format!("vertex {}", index + 1)));
        // The two triangles partition the original four points
        assert_eq!(lines[0].header.text, "3 16 1 0 0 2 0 0 0 2 0");
        assert_eq!(lines[1].header.text, "3 16 0 2 0 0 0 0 1 0 0");
    }

    #[test]
    fn test_quad_concave_split() {
        // Concave: p3 pulled inside the triangle of the other three
        let mut h = header("4 16 0 0 0 4 0 0 1 1 0 0 4 0");
        let mut quad = QuadLine::default();
        assert!(quad.parse(&mut h, false));
        assert!(!h.valid);
        let lines = quad.replacement_lines(&mut h).unwrap();
        assert_eq!(lines.len(), 2);
        let diag = h.diagnostic.as_ref().unwrap();
        assert!(diag.kind == DiagKind::ConcaveQuad || diag.kind == DiagKind::NonFlatQuad);
        assert!(!diag.is_error());
    }

    #[test]
    fn test_cond_line_control_points() {
        let mut h = header("5 24 0 0 0 1 0 0 0 1 0 1 1 0");
        let mut cond = CondLine::default();
        assert!(cond.parse(&mut h, false));
        assert!(h.valid);
        assert_eq!(cond.control_points[1], Vector3::new(1.0, 1.0, 0.0));

        let mut h = header("5 24 0 0 0 1 0 0 2 2 0 2 2 0");
        let mut cond = CondLine::default();
        assert!(cond.parse(&mut h, false));
        assert!(!h.valid);
        assert!(h.diagnostic.as_ref().unwrap().is_error());
    }

    #[test]
    fn test_middle_index() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(1.0, 0.0, 0.0);
        let c = Vector3::new(2.0, 0.0, 0.0);
        assert_eq!(middle_index(&a, &b, &c), 1);
        assert_eq!(middle_index(&b, &a, &c), 0);
        assert_eq!(middle_index(&a, &c, &b), 2);
    }
}
