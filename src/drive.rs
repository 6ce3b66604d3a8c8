//! Joystick input to swerve commands.
//!
//! Left stick `(x1, y1)` is translation, right stick `x2` is rotation.
//! The hub firmware reads one `vx,vy,omega` line per update and does its
//! own per-module kinematics; [`module_states`] computes the same thing
//! on the host for display and testing.

use crate::ble::BluetoothBackend;
use crate::config::{MAX_AXIS_VALUE, SWERVE_MODULE_POSITIONS};
use crate::error::Result;
use crate::hub::{Hub, SendOptions, SendOutcome};
use crate::kinematics::{desaturate, swerve_drive, SwerveModuleState};

/// One gamepad poll, each axis in `[-100, 100]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisUpdate {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl AxisUpdate {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Parse `x1,y1,x2,y2`. Missing trailing axes read as zero; values are
    /// clamped to full scale.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut axes = [0.0; 4];
        let mut fields = line.trim().split(',');
        for axis in axes.iter_mut() {
            match fields.next() {
                Some(field) => {
                    let value: f64 = field.trim().parse().ok()?;
                    if !value.is_finite() {
                        return None;
                    }
                    *axis = value.clamp(-MAX_AXIS_VALUE, MAX_AXIS_VALUE);
                }
                None => break,
            }
        }
        if fields.next().is_some() {
            return None;
        }
        let [x1, y1, x2, y2] = axes;
        Some(Self::new(x1, y1, x2, y2))
    }

    pub fn is_idle(&self) -> bool {
        self.x1 == 0.0 && self.y1 == 0.0 && self.x2 == 0.0 && self.y2 == 0.0
    }
}

/// Desired chassis motion.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChassisVelocity {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl From<AxisUpdate> for ChassisVelocity {
    fn from(axes: AxisUpdate) -> Self {
        Self {
            vx: axes.x1,
            vy: axes.y1,
            omega: axes.x2,
        }
    }
}

impl ChassisVelocity {
    /// Arguments of the `vx,vy,omega` command line.
    pub fn args(&self) -> [f64; 3] {
        [self.vx, self.vy, self.omega]
    }

    pub fn is_stopped(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }

    /// Module states for the default chassis geometry.
    pub fn module_states(&self) -> Vec<SwerveModuleState> {
        module_states(*self, &SWERVE_MODULE_POSITIONS)
    }
}

/// One state per module position, desaturated so no module exceeds 100.
pub fn module_states(velocity: ChassisVelocity, positions: &[(f64, f64)]) -> Vec<SwerveModuleState> {
    let mut states: Vec<SwerveModuleState> = positions
        .iter()
        .map(|&(rx, ry)| {
            let wheel = swerve_drive(velocity.vx, velocity.vy, velocity.omega, rx, ry);
            SwerveModuleState::from_wheel_vector(wheel.xy())
        })
        .collect();
    desaturate(&mut states);
    states
}

/// Per-hub velocity streaming at the control rate.
///
/// Velocities go out best-effort, so any tick may be dropped while the hub
/// is still working through the previous line. Motion is resent every
/// tick anyway; a stop is resent until the hub has actually taken it.
#[derive(Clone, Copy, Debug, Default)]
pub struct VelocityStream {
    delivered: Option<ChassisVelocity>,
}

impl VelocityStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last velocity written to the hub.
    pub fn delivered(&self) -> Option<ChassisVelocity> {
        self.delivered
    }

    /// Whether `velocity` still needs sending this tick.
    pub fn is_due(&self, velocity: ChassisVelocity) -> bool {
        !(velocity.is_stopped() && self.delivered == Some(velocity))
    }

    /// Note the outcome of sending `velocity`. Only a written line counts.
    pub fn record(&mut self, velocity: ChassisVelocity, outcome: SendOutcome) {
        if outcome == SendOutcome::Sent {
            self.delivered = Some(velocity);
        }
    }

    /// Send `velocity` to `hub` if due. `None` when nothing was due.
    pub async fn tick<B: BluetoothBackend>(
        &mut self,
        hub: &mut Hub<B>,
        velocity: ChassisVelocity,
    ) -> Result<Option<SendOutcome>> {
        if !self.is_due(velocity) {
            return Ok(None);
        }
        let outcome = hub
            .send_message("", &velocity.args(), SendOptions::best_effort())
            .await?;
        self.record(velocity, outcome);
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    // ════════════════════════════════════════════════════════════════════════
    // Axis parsing
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn parse_full_line() {
        assert_eq!(
            AxisUpdate::parse_line("10, -20,30,0\n"),
            Some(AxisUpdate::new(10.0, -20.0, 30.0, 0.0))
        );
    }

    #[test]
    fn parse_short_line_pads_with_zero() {
        assert_eq!(AxisUpdate::parse_line("50,50"), Some(AxisUpdate::new(50.0, 50.0, 0.0, 0.0)));
    }

    #[test]
    fn parse_clamps_to_full_scale() {
        assert_eq!(
            AxisUpdate::parse_line("250,-250,0,0"),
            Some(AxisUpdate::new(100.0, -100.0, 0.0, 0.0))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(AxisUpdate::parse_line("a,b"), None);
        assert_eq!(AxisUpdate::parse_line("1,2,3,4,5"), None);
        assert_eq!(AxisUpdate::parse_line("NaN,0"), None);
        assert_eq!(AxisUpdate::parse_line(""), None);
    }

    #[test]
    fn velocity_from_axes() {
        let v = ChassisVelocity::from(AxisUpdate::new(10.0, 20.0, 30.0, 40.0));
        assert_eq!(v.args(), [10.0, 20.0, 30.0]);
        assert!(!v.is_stopped());
        assert!(ChassisVelocity::from(AxisUpdate::default()).is_stopped());
    }

    // ════════════════════════════════════════════════════════════════════════
    // Velocity stream
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn dropped_stop_stays_due() {
        let moving = ChassisVelocity::from(AxisUpdate::new(0.0, 100.0, 0.0, 0.0));
        let stop = ChassisVelocity::default();
        let mut stream = VelocityStream::new();

        stream.record(moving, SendOutcome::Sent);
        assert!(stream.is_due(stop));
        stream.record(stop, SendOutcome::Dropped);
        assert_eq!(stream.delivered(), Some(moving));
        assert!(stream.is_due(stop));

        stream.record(stop, SendOutcome::Sent);
        assert!(!stream.is_due(stop));
        assert!(stream.is_due(moving));
    }

    #[test]
    fn motion_is_always_due() {
        let moving = ChassisVelocity::from(AxisUpdate::new(10.0, 0.0, 0.0, 0.0));
        let mut stream = VelocityStream::new();
        stream.record(moving, SendOutcome::Sent);
        assert!(stream.is_due(moving));
    }

    // ════════════════════════════════════════════════════════════════════════
    // Module states
    // ════════════════════════════════════════════════════════════════════════

    #[test]
    fn pure_translation_moves_all_modules_alike() {
        let states = ChassisVelocity::from(AxisUpdate::new(0.0, 100.0, 0.0, 0.0)).module_states();
        assert_eq!(states.len(), 4);
        for state in &states {
            assert!(close(state.speed, states[0].speed));
            assert!(close(state.angle, states[0].angle));
        }
    }

    #[test]
    fn full_diagonal_reads_100() {
        let states = module_states(
            ChassisVelocity {
                vx: 100.0,
                vy: 100.0,
                omega: 0.0,
            },
            &[(0.0, 0.0)],
        );
        assert!(close(states[0].speed, 100.0));
    }

    #[test]
    fn rotation_with_translation_is_desaturated() {
        let states = ChassisVelocity {
            vx: 100.0,
            vy: 100.0,
            omega: 100.0,
        }
        .module_states();
        let max = states.iter().map(|s| s.speed).fold(0.0_f64, f64::max);
        assert!(close(max, 100.0));
        assert!(states.iter().all(|s| s.speed <= 100.0 + EPS));
    }

    #[test]
    fn pure_rotation_is_tangential() {
        let states = module_states(
            ChassisVelocity {
                vx: 0.0,
                vy: 0.0,
                omega: 50.0,
            },
            &SWERVE_MODULE_POSITIONS,
        );
        // All modules sit at the same radius, so they spin equally fast.
        for state in &states {
            assert!(close(state.speed, states[0].speed));
        }
        assert!(close(states[0].speed, 50.0));
    }
}
