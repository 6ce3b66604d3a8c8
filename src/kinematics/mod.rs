//! Pure swerve-drive math. No state, no I/O.

pub mod swerve;
pub mod vector;

pub use swerve::{desaturate, normalize_swerve_speed, swerve_drive, SwerveModuleState};
pub use vector::{Vector2, Vector3};
