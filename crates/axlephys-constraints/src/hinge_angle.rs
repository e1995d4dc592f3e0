//! Hinge-angle row: constrains the relative orientation of two bodies to a
//! rotation about a single axis, with optional angular limits.
//!
//! The Jacobian comes from the derivative of the relative orientation
//! `dq = q0 * conj(q1) * q2`: projecting the imaginary part of `dq` onto the
//! triad `(p0, p1, axis)` gives the three constraint errors, and
//! `m0 = -1/2 * project_multiply_left_right(q0 * conj(q1), q2)` maps relative
//! angular velocity onto the derivative of that imaginary part.

use axlephys_core::error::{Error, Result};
use axlephys_core::{orthonormal_basis, project_multiply_left_right, Mat3, Quat, Scalar, Vec3};
use axlephys_dynamics::{BodyHandle, SolverBodies};

use crate::row::{ConstraintRow, LargePayload, LimitClamp, Row, TAG_HINGE_ANGLE};

/// Softness and bias tuning for a hinge-angle row.
#[derive(Clone, Copy, Debug)]
pub struct HingeParams {
    /// Compliance of the two locked rotation rows.
    pub softness: Scalar,
    /// Position-error feedback for the locked rows.
    pub bias_factor: Scalar,
    /// Compliance of the limit row.
    pub limit_softness: Scalar,
    /// Position-error feedback for the limit row.
    pub limit_bias: Scalar,
}

impl Default for HingeParams {
    fn default() -> Self {
        Self { softness: 0.001, bias_factor: 0.2, limit_softness: 0.0001, limit_bias: 0.1 }
    }
}

/// Hinge-angle payload. Angular limits are stored as `sin(angle / 2)` so the
/// comparison happens in the same space as the quaternion error.
pub struct HingeAngleRow {
    /// Hinge axis in body 2's frame.
    pub local_axis: Vec3,
    /// Relative reference orientation; the rotation that maps the initial
    /// relative pose to identity.
    pub q0: Quat,
    /// Triad completing `local_axis`, fixed at initialization.
    pub p0: Vec3,
    pub p1: Vec3,
    pub accumulated_impulse: Vec3,
    pub bias: Vec3,
    pub effective_mass: Mat3,
    /// Rows: `(m0^T p0, m0^T p1, m0^T axis)`, acting on both angular
    /// velocities with opposite signs.
    pub jacobian: Mat3,
    /// `sin(min_angle / 2)`; `-inf` when the hinge is unlimited.
    pub min_half_sin: Scalar,
    /// `sin(max_angle / 2)`; `+inf` when the hinge is unlimited.
    pub max_half_sin: Scalar,
    pub softness: Scalar,
    pub limit_softness: Scalar,
    pub bias_factor: Scalar,
    pub limit_bias: Scalar,
    pub clamp: LimitClamp,
}

/// Builds a hinge-angle row between two bodies.
///
/// `axis` is the hinge axis in body 2's frame and must be unit length.
/// `limits` are angles in radians with `min <= 0 <= max`, both within
/// `(-pi, pi)`; `None` leaves the hinge free.
pub fn new_row(
    body1: BodyHandle,
    body2: BodyHandle,
    orientation1: Quat,
    orientation2: Quat,
    axis: Vec3,
    limits: Option<(Scalar, Scalar)>,
    params: HingeParams,
) -> Result<ConstraintRow> {
    if body1 == body2 {
        return Err(Error::InvalidArgument("hinge needs two distinct bodies"));
    }
    if !axis.is_finite() {
        return Err(Error::InvalidArgument("hinge axis must be finite"));
    }
    if (axis.length() - 1.0).abs() > 1.0e-4 {
        return Err(Error::InvalidArgument("hinge axis must be unit length"));
    }
    let (min_half_sin, max_half_sin) = match limits {
        None => (Scalar::NEG_INFINITY, Scalar::INFINITY),
        Some((min, max)) => {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(Error::InvalidArgument("hinge limits must be finite and ordered"));
            }
            if min <= -core::f32::consts::PI || max >= core::f32::consts::PI {
                return Err(Error::InvalidArgument("hinge limits must lie within (-pi, pi)"));
            }
            ((min * 0.5).sin(), (max * 0.5).sin())
        }
    };
    let (p0, p1) = orthonormal_basis(axis);
    let payload = HingeAngleRow {
        local_axis: axis,
        q0: orientation2.conjugate() * orientation1,
        p0,
        p1,
        accumulated_impulse: Vec3::ZERO,
        bias: Vec3::ZERO,
        effective_mass: Mat3::IDENTITY,
        jacobian: Mat3::ZERO,
        min_half_sin,
        max_half_sin,
        softness: params.softness,
        limit_softness: params.limit_softness,
        bias_factor: params.bias_factor,
        limit_bias: params.limit_bias,
        clamp: LimitClamp::Free,
    };
    Ok(Row {
        tag: TAG_HINGE_ANGLE,
        prepare,
        iterate,
        body1,
        body2,
        warm_started: false,
        payload: LargePayload::HingeAngle(payload),
    })
}

/// Replaces the third row and column of `k` with the identity row/column,
/// decoupling the limit row while it is inactive.
fn decouple_limit_row(k: Mat3) -> Mat3 {
    let mut c0 = k.col(0);
    let mut c1 = k.col(1);
    c0.z = 0.0;
    c1.z = 0.0;
    Mat3::from_cols(c0, c1, Vec3::new(0.0, 0.0, 1.0))
}

fn zero_limit_jacobian_row(j: Mat3) -> Mat3 {
    let mut c0 = j.col(0);
    let mut c1 = j.col(1);
    let mut c2 = j.col(2);
    c0.z = 0.0;
    c1.z = 0.0;
    c2.z = 0.0;
    Mat3::from_cols(c0, c1, c2)
}

fn prepare(row: &mut ConstraintRow, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };
    let LargePayload::HingeAngle(this) = &mut row.payload else { return };

    let ql = this.q0 * b1.orientation.conjugate();
    let dq = ql * b2.orientation;

    let mut m0 = project_multiply_left_right(ql, b2.orientation) * -0.5;
    let im = Vec3::new(dq.x, dq.y, dq.z);
    let mut error = Vec3::new(this.p0.dot(im), this.p1.dot(im), this.local_axis.dot(im));
    // Shortest-arc fix: map the relative rotation into the hemisphere nearest
    // the reference so a flip through 180 degrees cannot invert the Jacobian.
    if dq.w < 0.0 {
        error = -error;
        m0 = m0 * -1.0;
    }

    let m0t = m0.transpose();
    let mut jacobian =
        Mat3::from_cols(m0t * this.p0, m0t * this.p1, m0t * this.local_axis).transpose();

    let e = error.z;
    if e > this.max_half_sin {
        this.clamp = LimitClamp::AtMax;
        error.z = e - this.max_half_sin;
    } else if e < this.min_half_sin {
        this.clamp = LimitClamp::AtMin;
        error.z = e - this.min_half_sin;
    } else {
        this.clamp = LimitClamp::Free;
        this.accumulated_impulse.z = 0.0;
    }

    let inertia_sum = b1.inverse_inertia_world + b2.inverse_inertia_world;
    let softness_diag = Vec3::new(this.softness, this.softness, this.limit_softness) * inv_dt;
    let mut k = jacobian * inertia_sum * jacobian.transpose()
        + Mat3::from_diagonal(softness_diag.into());
    if this.clamp == LimitClamp::Free {
        k = decouple_limit_row(k);
        jacobian = zero_limit_jacobian_row(jacobian);
    }
    this.effective_mass = k.inverse();
    this.jacobian = jacobian;

    this.bias = Vec3::new(
        error.x * this.bias_factor,
        error.y * this.bias_factor,
        error.z * this.limit_bias,
    ) * inv_dt;

    if !row.warm_started {
        let tau = this.jacobian.transpose() * this.accumulated_impulse;
        b1.apply_angular_impulse(tau);
        b2.apply_angular_impulse(-tau);
        row.warm_started = true;
    }
}

fn iterate(row: &mut ConstraintRow, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
    row.warm_started = false;
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };
    let LargePayload::HingeAngle(this) = &mut row.payload else { return };

    let jv = this.jacobian * (b1.angular_velocity - b2.angular_velocity);
    let softness_term = Vec3::new(
        this.accumulated_impulse.x * this.softness,
        this.accumulated_impulse.y * this.softness,
        this.accumulated_impulse.z * this.limit_softness,
    ) * inv_dt;
    let lambda = -(this.effective_mass * (jv + this.bias + softness_term));

    let mut old = this.accumulated_impulse;
    let mut new = old + lambda;
    match this.clamp {
        LimitClamp::Free => {
            old.z = 0.0;
            new.z = 0.0;
        }
        LimitClamp::AtMax => new.z = new.z.min(0.0),
        LimitClamp::AtMin => new.z = new.z.max(0.0),
    }
    this.accumulated_impulse = new;

    let tau = this.jacobian.transpose() * (new - old);
    b1.apply_angular_impulse(tau);
    b2.apply_angular_impulse(-tau);
}
