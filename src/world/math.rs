//! Vector types used for element transforms and shape geometry

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// 3D position/rotation/velocity (world units, rotations in degrees)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
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

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    pub fn distance_to(&self, other: &Vector3) -> f32 {
        self.distance_squared_to(other).sqrt()
    }

    pub fn distance_squared_to(&self, other: &Vector3) -> f32 {
        (*self - *other).length_squared()
    }

    /// Drop the z component
    pub fn xy(&self) -> Vector2 {
        Vector2::new(self.x, self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;

    fn mul(self, rhs: f32) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// 2D point, used by flat shapes and turret rotation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_squared_to(&self, other: &Vector2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Orthonormal axes of a rotated element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub right: Vector3,
    pub forward: Vector3,
    pub up: Vector3,
}

impl Basis {
    /// Axes for an euler rotation in degrees, applied as Z * X * Y
    pub fn from_rotation(rotation: Vector3) -> Self {
        let (sx, cx) = rotation.x.to_radians().sin_cos();
        let (sy, cy) = rotation.y.to_radians().sin_cos();
        let (sz, cz) = rotation.z.to_radians().sin_cos();

        Self {
            right: Vector3::new(cz * cy - sz * sx * sy, sz * cy + cz * sx * sy, -cx * sy),
            forward: Vector3::new(-sz * cx, cz * cx, sx),
            up: Vector3::new(cz * sy + sz * sx * cy, sz * sy - cz * sx * cy, cx * cy),
        }
    }

    /// Transform a local offset (right, forward, up) into world space
    pub fn apply(&self, offset: Vector3) -> Vector3 {
        self.right * offset.x + self.forward * offset.y + self.up * offset.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vector3, b: Vector3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn identity_rotation_keeps_axes() {
        let basis = Basis::from_rotation(Vector3::ZERO);
        assert!(approx(basis.right, Vector3::new(1.0, 0.0, 0.0)));
        assert!(approx(basis.forward, Vector3::new(0.0, 1.0, 0.0)));
        assert!(approx(basis.up, Vector3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn yaw_quarter_turn_rotates_forward_to_negative_x() {
        let basis = Basis::from_rotation(Vector3::new(0.0, 0.0, 90.0));
        assert!(approx(basis.forward, Vector3::new(-1.0, 0.0, 0.0)));
        assert!(approx(basis.right, Vector3::new(0.0, 1.0, 0.0)));
        assert!(approx(
            basis.apply(Vector3::new(0.0, 2.0, 1.0)),
            Vector3::new(-2.0, 0.0, 1.0)
        ));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Vector3::new(1.0, 1.0, 1.0);
        assert!((a.distance_to(&Vector3::ZERO) - 3f32.sqrt()).abs() < 1e-6);
    }
}
