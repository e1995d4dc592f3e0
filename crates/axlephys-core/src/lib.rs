pub mod scalar;
pub mod types;
pub mod error;
pub mod quat_ops;
pub mod digest;

pub use scalar::Scalar;
pub use types::{Vec3, Mat3, vec3, quat_identity};
pub use error::Error;
pub use quat_ops::{quat_l, quat_r, project, project_multiply_left_right, orthonormal_basis};
pub use digest::StateDigest;
pub use glam::Quat;
