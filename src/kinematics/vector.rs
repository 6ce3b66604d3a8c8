//! Plain 2D/3D vectors used by the swerve kinematics.
//!
//! Bearings follow the compass convention used on the dashboard:
//! 0° points "up" (+y) and angles grow clockwise.

use core::f64::consts::PI;
use core::ops::Add;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean norm.
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Compass bearing in degrees, in `[0, 360)`.
    ///
    /// `(180/π · (π − atan2(y, x)) − 90 + 360) mod 360`. The zero vector is
    /// not special-cased: `f64::atan2(0.0, 0.0)` is `0.0`, which yields 90°.
    pub fn angle(&self) -> f64 {
        let degrees = (PI - self.y.atan2(self.x)) * 180.0 / PI;
        (degrees - 90.0 + 360.0) % 360.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Drops `z`.
    pub fn xy(&self) -> Vector2 {
        Vector2::new(self.x, self.y)
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, other: Vector3) -> Vector3 {
        Vector3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}
