use glam::{Mat3A, Quat, Vec3A};

use crate::Scalar;

pub type Vec3 = Vec3A;
pub type Mat3 = Mat3A;

#[inline] pub fn vec3(x: Scalar, y: Scalar, z: Scalar) -> Vec3 { Vec3::new(x, y, z) }
#[inline] pub fn quat_identity() -> Quat { Quat::IDENTITY }
