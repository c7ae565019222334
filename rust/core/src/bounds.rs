// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Axis-aligned bounding box accumulator used by the point scans.

use crate::vector::Vector3;

/// Min/max bounds over a stream of points
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds3 {
    pub min: Vector3,
    pub max: Vector3,
    /// Number of points accumulated
    pub count: usize,
}

impl Bounds3 {
    /// Create new bounds initialized to invalid state
    pub fn new() -> Self {
        Self {
            min: Vector3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Vector3::new(f32::MIN, f32::MIN, f32::MIN),
            count: 0,
        }
    }

    /// Check if bounds are valid (at least one point added)
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.count > 0
    }

    /// Expand bounds to include a point
    #[inline]
    pub fn expand(&mut self, p: &Vector3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
        self.count += 1;
    }

    /// Center of the box, or the origin when empty
    #[inline]
    pub fn center(&self) -> Vector3 {
        if !self.is_valid() {
            return Vector3::ZERO;
        }
        (self.min + self.max) * 0.5
    }

    /// The 8 corner points of the box
    pub fn corners(&self) -> [Vector3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Vector3::new(lo.x, lo.y, lo.z),
            Vector3::new(hi.x, lo.y, lo.z),
            Vector3::new(lo.x, hi.y, lo.z),
            Vector3::new(hi.x, hi.y, lo.z),
            Vector3::new(lo.x, lo.y, hi.z),
            Vector3::new(hi.x, lo.y, hi.z),
            Vector3::new(lo.x, hi.y, hi.z),
            Vector3::new(hi.x, hi.y, hi.z),
        ]
    }
}

impl Default for Bounds3 {
    fn default() -> Self {
        Self::new()
    }
}
