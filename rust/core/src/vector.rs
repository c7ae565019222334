// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal f32 vector/matrix math for line geometry.
//!
//! Deliberately small: the document engine only needs cross/dot products,
//! point transforms, and 3x3 determinants. Anything heavier lives in the
//! camera crate on top of nalgebra.

use std::ops::{Add, Index, IndexMut, Mul, Neg, Sub};

/// A point or direction in model space
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[inline]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(&self, other: &Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    #[inline]
    pub fn length_squared(&self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit vector in this direction; the zero vector stays zero
    pub fn normalized(&self) -> Vector3 {
        let len = self.length();
        if len == 0.0 {
            Vector3::ZERO
        } else {
            *self * (1.0 / len)
        }
    }

    /// Componentwise minimum
    #[inline]
    pub fn min(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
            z: self.z.min(other.z),
        }
    }

    /// Componentwise maximum
    #[inline]
    pub fn max(&self, other: &Vector3) -> Vector3 {
        Vector3 {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
            z: self.z.max(other.z),
        }
    }

    #[inline]
    pub fn squared_distance(&self, other: &Vector3) -> f32 {
        (*self - *other).length_squared()
    }
}

impl Index<usize> for Vector3 {
    type Output = f32;

    #[inline]
    fn index(&self, index: usize) -> &f32 {
        match index {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }
}

impl IndexMut<usize> for Vector3 {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut f32 {
        match index {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => &mut self.z,
        }
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    #[inline]
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    #[inline]
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;

    #[inline]
    fn mul(self, rhs: f32) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    #[inline]
    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

/// Column-major 4x4 transform, OpenGL layout: `m[col * 4 + row]`,
/// translation in elements 12..15.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matrix4(pub [f32; 16]);

impl Matrix4 {
    pub const IDENTITY: Matrix4 = Matrix4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Uniform-per-axis scale about the origin
    pub fn scale(sx: f32, sy: f32, sz: f32) -> Matrix4 {
        let mut m = Matrix4::IDENTITY;
        m.0[0] = sx;
        m.0[5] = sy;
        m.0[10] = sz;
        m
    }

    pub fn translation(v: Vector3) -> Matrix4 {
        let mut m = Matrix4::IDENTITY;
        m.0[12] = v.x;
        m.0[13] = v.y;
        m.0[14] = v.z;
        m
    }

    #[inline]
    pub fn transform_point(&self, p: &Vector3) -> Vector3 {
        let m = &self.0;
        Vector3 {
            x: m[0] * p.x + m[4] * p.y + m[8] * p.z + m[12],
            y: m[1] * p.x + m[5] * p.y + m[9] * p.z + m[13],
            z: m[2] * p.x + m[6] * p.y + m[10] * p.z + m[14],
        }
    }

    /// Determinant of the upper-left 3x3 block
    pub fn determinant(&self) -> f32 {
        let m = &self.0;
        m[0] * (m[5] * m[10] - m[9] * m[6]) - m[4] * (m[1] * m[10] - m[9] * m[2])
            + m[8] * (m[1] * m[6] - m[5] * m[2])
    }

    /// Scale that pulls geometry in by `amount` units along each axis of
    /// the box wider than `amount`, about the box center. Used to shrink
    /// parts so seams show between them.
    pub fn seam_scale(amount: f32, min: &Vector3, max: &Vector3) -> Matrix4 {
        let mut m = Matrix4::IDENTITY;
        let delta = *max - *min;
        let center = (*min + *max) * 0.5;
        for i in 0..3 {
            if delta[i] > amount {
                m.0[i * 4 + i] = 1.0 - amount / delta[i];
                if center[i] != 0.0 {
                    m.0[12 + i] = amount / delta[i] * center[i];
                }
            }
        }
        m
    }

    /// `self * rhs` (apply `rhs` first, then `self`)
    pub fn multiply(&self, rhs: &Matrix4) -> Matrix4 {
        let a = &self.0;
        let b = &rhs.0;
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += a[k * 4 + row] * b[col * 4 + k];
                }
                out[col * 4 + row] = sum;
            }
        }
        Matrix4(out)
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Matrix4::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_dot() {
        let x = Vector3::new(1.0, 0.0, 0.0);
        let y = Vector3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(&y), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(x.dot(&y), 0.0);
    }

    #[test]
    fn test_transform_point_translation() {
        let m = Matrix4::translation(Vector3::new(1.0, 2.0, 3.0));
        let p = m.transform_point(&Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Vector3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn test_determinant_scale() {
        let m = Matrix4::scale(2.0, 3.0, 4.0);
        assert_eq!(m.determinant(), 24.0);
    }

    #[test]
    fn test_multiply_composes() {
        let t = Matrix4::translation(Vector3::new(1.0, 0.0, 0.0));
        let s = Matrix4::scale(2.0, 2.0, 2.0);
        // t * s: scale first, then translate
        let p = t.multiply(&s).transform_point(&Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(p, Vector3::new(3.0, 2.0, 2.0));
    }
}
