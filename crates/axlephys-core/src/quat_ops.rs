//! Quaternion multiplication matrices and the bilinear form used by
//! rotational constraint Jacobians.
//!
//! Quaternions follow the Hamilton convention (`ij = k`). The 4x4 matrices
//! act on quaternions laid out as column vectors in basis order
//! `(w, x, y, z)`, so the imaginary block is the bottom-right 3x3.

use glam::{Mat4, Quat, Vec4};

use crate::types::{Mat3, Vec3};

/// Left multiplication matrix: `quat_l(q) * p` represents `q * p`.
#[rustfmt::skip]
pub fn quat_l(q: Quat) -> Mat4 {
    let (w, x, y, z) = (q.w, q.x, q.y, q.z);
    Mat4::from_cols(
        Vec4::new( w,  x,  y,  z),
        Vec4::new(-x,  w,  z, -y),
        Vec4::new(-y, -z,  w,  x),
        Vec4::new(-z,  y, -x,  w),
    )
}

/// Right multiplication matrix: `quat_r(q) * p` represents `p * q`.
#[rustfmt::skip]
pub fn quat_r(q: Quat) -> Mat4 {
    let (w, x, y, z) = (q.w, q.x, q.y, q.z);
    Mat4::from_cols(
        Vec4::new( w,  x,  y,  z),
        Vec4::new(-x,  w, -z,  y),
        Vec4::new(-y,  z,  w, -x),
        Vec4::new(-z, -y,  x,  w),
    )
}

/// Extracts the imaginary 3x3 block (rows and columns 1..=3) of a 4x4
/// quaternion operator.
pub fn project(m: &Mat4) -> Mat3 {
    let c1 = m.y_axis;
    let c2 = m.z_axis;
    let c3 = m.w_axis;
    Mat3::from_cols(
        Vec3::new(c1.y, c1.z, c1.w),
        Vec3::new(c2.y, c2.z, c2.w),
        Vec3::new(c3.y, c3.z, c3.w),
    )
}

/// Closed form of `project(quat_l(a) * quat_r(b))`.
///
/// This exact expansion is what the hinge Jacobian is built from; the
/// matrix-product route must agree with it entry for entry.
pub fn project_multiply_left_right(a: Quat, b: Quat) -> Mat3 {
    let m11 = a.w * b.w - a.x * b.x + a.y * b.y + a.z * b.z;
    let m12 = a.w * b.z - a.x * b.y - a.y * b.x - a.z * b.w;
    let m13 = -a.w * b.y + a.y * b.w - a.x * b.z - a.z * b.x;
    let m21 = -a.w * b.z - a.x * b.y - a.y * b.x + a.z * b.w;
    let m22 = a.w * b.w + a.x * b.x - a.y * b.y + a.z * b.z;
    let m23 = a.w * b.x - a.x * b.w - a.y * b.z - a.z * b.y;
    let m31 = a.w * b.y - a.y * b.w - a.x * b.z - a.z * b.x;
    let m32 = -a.w * b.x + a.x * b.w - a.y * b.z - a.z * b.y;
    let m33 = a.w * b.w + a.x * b.x + a.y * b.y - a.z * b.z;
    Mat3::from_cols(
        Vec3::new(m11, m21, m31),
        Vec3::new(m12, m22, m32),
        Vec3::new(m13, m23, m33),
    )
}

/// Two unit vectors completing a right-handed orthonormal triad with `n`.
///
/// `n` must be unit length.
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let ax = n.x.abs();
    let ay = n.y.abs();
    let az = n.z.abs();
    let base = if ax <= ay && ax <= az {
        Vec3::new(1.0, 0.0, 0.0)
    } else if ay <= az {
        Vec3::new(0.0, 1.0, 0.0)
    } else {
        Vec3::new(0.0, 0.0, 1.0)
    };
    let t1 = base.cross(n).normalize();
    let t2 = n.cross(t1);
    (t1, t2)
}
