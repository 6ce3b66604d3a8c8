//! Swerve-drive wheel kinematics.
//!
//! A wheel at offset `r` from the chassis centre moves with the rigid-body
//! velocity `v + ω × r`. Joystick deflections are in percent, so the raw
//! wheel speed of a full diagonal push is `‖(100, 100)‖`; that maps back to
//! a speed of 100.

use super::vector::{Vector2, Vector3};
use crate::config::MAX_AXIS_VALUE;

/// Velocity vector of the wheel at `(rx, ry)` for chassis motion
/// `(vx, vy, omega)`.
///
/// - vx: velocity in the x direction
/// - vy: velocity in the y direction
/// - omega: angular velocity
/// - rx, ry: wheel position relative to the chassis centre
pub fn swerve_drive(vx: f64, vy: f64, omega: f64, rx: f64, ry: f64) -> Vector3 {
    let velocity = Vector3::new(vx, vy, omega);
    let omega_axis = Vector3::new(0.0, 0.0, omega);
    let position = Vector3::new(rx, ry, 0.0);

    velocity + omega_axis.cross(&position)
}

/// Rescale a raw wheel speed so a full diagonal deflection reads 100.
pub fn normalize_swerve_speed(speed: f64) -> f64 {
    let max_speed = Vector2::new(MAX_AXIS_VALUE, MAX_AXIS_VALUE).length();
    speed / max_speed * 100.0
}

/// Target speed (percent) and steering bearing (degrees) of one module.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SwerveModuleState {
    pub speed: f64,
    pub angle: f64,
}

impl SwerveModuleState {
    pub const fn new(speed: f64, angle: f64) -> Self {
        Self { speed, angle }
    }

    /// State for the wheel vector `v`: bearing of `v`, normalised length.
    pub fn from_wheel_vector(v: Vector2) -> Self {
        Self::new(normalize_swerve_speed(v.length()), v.angle())
    }

    /// Avoid steering more than 90°: if the target bearing is further than
    /// that from `current_angle`, turn to the opposite bearing and drive
    /// backwards instead.
    pub fn optimize(&self, current_angle: f64) -> Self {
        let delta = wrap_degrees(self.angle - current_angle);
        if delta.abs() > 90.0 {
            Self::new(-self.speed, (self.angle + 180.0).rem_euclid(360.0))
        } else {
            *self
        }
    }
}

/// Wrap an angle difference to `(-180, 180]`.
fn wrap_degrees(delta: f64) -> f64 {
    let wrapped = delta.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Scale every module down by the same factor so none exceeds 100.
pub fn desaturate(states: &mut [SwerveModuleState]) {
    let max = states.iter().map(|s| s.speed.abs()).fold(0.0_f64, f64::max);
    if max > 100.0 {
        let scale = 100.0 / max;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
    }
}
