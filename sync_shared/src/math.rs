//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

/// Unit quaternion (conceptually). Components are `x, y, z` imaginary and `w` real.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `radians` around the vertical (Z) axis.
    pub fn from_yaw(radians: f32) -> Self {
        let half = radians * 0.5;
        Self::new(0.0, 0.0, half.sin(), half.cos())
    }

    pub fn len_sq(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Returns the normalized quaternion, or identity for a degenerate input.
    pub fn normalized(self) -> Self {
        let len_sq = self.len_sq();
        if !len_sq.is_finite() || len_sq <= f32::EPSILON {
            return Self::IDENTITY;
        }
        let inv = len_sq.sqrt().recip();
        Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_add_and_scale() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(a.add(Vec3::new(0.0, 3.0, 4.0)), Vec3::new(1.0, 5.0, 7.0));
        assert_eq!(a.scale(2.0), Vec3::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn quat_yaw_is_unit() {
        let q = Quat::from_yaw(1.2);
        assert!((q.len_sq() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_quat_normalizes_to_identity() {
        assert_eq!(Quat::new(0.0, 0.0, 0.0, 0.0).normalized(), Quat::IDENTITY);
        let q = Quat::new(0.0, 0.0, 0.0, 2.0).normalized();
        assert_eq!(q, Quat::IDENTITY);
    }
}
