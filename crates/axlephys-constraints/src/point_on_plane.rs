//! Point-on-plane row: keeps the signed distance of an anchor on body 2 from
//! a plane carried by body 1 inside a `[min, max]` band.
//!
//! Inside the band the row is inert; only a violated bound produces a
//! unilateral impulse, which makes the row double as a slider limit or a
//! one-sided support.

use axlephys_core::error::{Error, Result};
use axlephys_core::{Quat, Scalar, Vec3};
use axlephys_dynamics::{BodyHandle, SolverBodies};

use crate::row::{ConstraintRow, LargePayload, LimitClamp, Row, TAG_POINT_ON_PLANE};

/// Softness and bias tuning for a point-on-plane row.
#[derive(Clone, Copy, Debug)]
pub struct PlaneParams {
    pub softness: Scalar,
    pub bias_factor: Scalar,
}

impl Default for PlaneParams {
    fn default() -> Self {
        Self { softness: 0.0001, bias_factor: 0.2 }
    }
}

pub struct PointOnPlaneRow {
    /// Plane normal in body 1's frame; normalized at initialization.
    pub local_axis: Vec3,
    pub local_anchor1: Vec3,
    pub local_anchor2: Vec3,
    /// `(J_v1, J_w1, J_v2, J_w2)`, rebuilt by prepare.
    pub jacobian: [Vec3; 4],
    pub effective_mass: Scalar,
    pub accumulated_impulse: Scalar,
    pub bias: Scalar,
    pub min_dist: Scalar,
    pub max_dist: Scalar,
    pub softness: Scalar,
    pub bias_factor: Scalar,
    pub clamp: LimitClamp,
}

/// Builds a point-on-plane row. `axis` is the plane normal in body 1's
/// frame; it is normalized here and must not be near zero. `limits` is the
/// allowed `(min, max)` band of the signed anchor distance.
pub fn new_row(
    body1: BodyHandle,
    body2: BodyHandle,
    axis: Vec3,
    anchor1: Vec3,
    anchor2: Vec3,
    limits: (Scalar, Scalar),
    params: PlaneParams,
) -> Result<ConstraintRow> {
    if body1 == body2 {
        return Err(Error::InvalidArgument("plane row needs two distinct bodies"));
    }
    if !axis.is_finite() || !anchor1.is_finite() || !anchor2.is_finite() {
        return Err(Error::InvalidArgument("plane row inputs must be finite"));
    }
    if axis.length_squared() < 1.0e-8 {
        return Err(Error::InvalidArgument("plane normal must not be zero"));
    }
    let (min, max) = limits;
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(Error::InvalidArgument("plane limits must be finite and ordered"));
    }
    let payload = PointOnPlaneRow {
        local_axis: axis.normalize(),
        local_anchor1: anchor1,
        local_anchor2: anchor2,
        jacobian: [Vec3::ZERO; 4],
        effective_mass: 0.0,
        accumulated_impulse: 0.0,
        bias: 0.0,
        min_dist: min,
        max_dist: max,
        softness: params.softness,
        bias_factor: params.bias_factor,
        clamp: LimitClamp::Free,
    };
    Ok(Row {
        tag: TAG_POINT_ON_PLANE,
        prepare,
        iterate,
        body1,
        body2,
        warm_started: false,
        payload: LargePayload::PointOnPlane(payload),
    })
}

fn rotate(q: Quat, v: Vec3) -> Vec3 {
    q * v
}

fn prepare(row: &mut ConstraintRow, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };
    let LargePayload::PointOnPlane(this) = &mut row.payload else { return };

    let axis = rotate(b1.orientation, this.local_axis);
    let r1 = rotate(b1.orientation, this.local_anchor1);
    let r2 = rotate(b2.orientation, this.local_anchor2);
    let p1 = b1.position + r1;
    let p2 = b2.position + r2;
    let u = p2 - p1;

    this.jacobian = [-axis, -(r1 + u).cross(axis), axis, r2.cross(axis)];

    let mut error = u.dot(axis);
    if error > this.max_dist {
        this.clamp = LimitClamp::AtMax;
        error -= this.max_dist;
    } else if error < this.min_dist {
        this.clamp = LimitClamp::AtMin;
        error -= this.min_dist;
    } else {
        // Inside the band the row contributes nothing this step.
        this.clamp = LimitClamp::Free;
        this.accumulated_impulse = 0.0;
        return;
    }

    let [jv1, jw1, jv2, jw2] = this.jacobian;
    let k = b1.inverse_mass
        + b2.inverse_mass
        + (b1.inverse_inertia_world * jw1).dot(jw1)
        + (b2.inverse_inertia_world * jw2).dot(jw2)
        + this.softness * inv_dt;
    this.effective_mass = 1.0 / k;
    this.bias = error * this.bias_factor * inv_dt;

    if !row.warm_started {
        let acc = this.accumulated_impulse;
        b1.apply_impulse(jv1 * acc);
        b1.apply_angular_impulse(jw1 * acc);
        b2.apply_impulse(jv2 * acc);
        b2.apply_angular_impulse(jw2 * acc);
        row.warm_started = true;
    }
}

fn iterate(row: &mut ConstraintRow, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
    row.warm_started = false;
    let LargePayload::PointOnPlane(this) = &mut row.payload else { return };
    if this.clamp == LimitClamp::Free {
        return;
    }
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };

    let [jv1, jw1, jv2, jw2] = this.jacobian;
    let jv = jv1.dot(b1.velocity)
        + jw1.dot(b1.angular_velocity)
        + jv2.dot(b2.velocity)
        + jw2.dot(b2.angular_velocity);
    let softness_term = this.accumulated_impulse * this.softness * inv_dt;
    let lambda = -this.effective_mass * (jv + this.bias + softness_term);

    let old = this.accumulated_impulse;
    let mut new = old + lambda;
    match this.clamp {
        LimitClamp::AtMax => new = new.min(0.0),
        LimitClamp::AtMin => new = new.max(0.0),
        LimitClamp::Free => return,
    }
    this.accumulated_impulse = new;
    let actual = new - old;

    b1.apply_impulse(jv1 * actual);
    b1.apply_angular_impulse(jw1 * actual);
    b2.apply_impulse(jv2 * actual);
    b2.apply_angular_impulse(jw2 * actual);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use axlephys_arena::Arena;
    use axlephys_core::vec3;
    use axlephys_dynamics::{BodyDesc, MassProps, RigidBody};

    fn plane_rig(height: Scalar) -> (Arena<RigidBody>, BodyHandle, BodyHandle) {
        let mut arena = Arena::with_capacity(4);
        let plane = arena.insert(RigidBody::new(BodyDesc::default())).unwrap();
        let mover = arena
            .insert(RigidBody::new(BodyDesc {
                position: vec3(0.0, height, 0.0),
                mass: MassProps::unit(),
                ..Default::default()
            }))
            .unwrap();
        (arena, plane, mover)
    }

    fn default_row(
        plane: BodyHandle,
        mover: BodyHandle,
        limits: (Scalar, Scalar),
    ) -> ConstraintRow {
        new_row(
            plane,
            mover,
            vec3(0.0, 1.0, 0.0),
            Vec3::ZERO,
            Vec3::ZERO,
            limits,
            PlaneParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn inert_inside_the_band() {
        let (mut arena, plane, mover) = plane_rig(0.3);
        arena.get_mut(mover).unwrap().velocity = vec3(0.0, -0.1, 0.0);
        let mut row = default_row(plane, mover, (0.0, 0.5));
        row.as_point_on_plane_mut().unwrap().accumulated_impulse = 0.7;

        let view = SolverBodies::new(&mut arena);
        row.prepare(&view, 60.0);
        assert_eq!(row.as_point_on_plane().unwrap().clamp, LimitClamp::Free);
        assert_eq!(row.as_point_on_plane().unwrap().accumulated_impulse, 0.0);
        for _ in 0..4 {
            row.iterate(&view, 60.0);
        }
        let body = view.get(mover).unwrap();
        assert_relative_eq!(body.velocity.y, -0.1, epsilon = 1e-6);
        assert_eq!(row.as_point_on_plane().unwrap().accumulated_impulse, 0.0);
    }

    #[test]
    fn min_limit_supports_from_below() {
        // Anchor sits below the allowed band: the row pushes the body up.
        let (mut arena, plane, mover) = plane_rig(-0.2);
        arena.get_mut(mover).unwrap().velocity = vec3(0.0, -9.81 / 60.0, 0.0);
        let mut row = default_row(plane, mover, (0.0, 0.5));

        let view = SolverBodies::new(&mut arena);
        row.prepare(&view, 60.0);
        assert_eq!(row.as_point_on_plane().unwrap().clamp, LimitClamp::AtMin);

        let mut last = 0.0;
        for _ in 0..8 {
            row.iterate(&view, 60.0);
            let acc = row.as_point_on_plane().unwrap().accumulated_impulse;
            assert!(acc >= last - 1e-4, "support impulse must not shrink");
            last = acc;
        }
        assert!(last > 0.0);
        let body = view.get(mover).unwrap();
        assert!(body.velocity.y >= 0.0, "support must cancel the fall, got {}", body.velocity.y);
    }

    #[test]
    fn max_limit_reins_the_anchor_back() {
        let (mut arena, plane, mover) = plane_rig(0.8);
        arena.get_mut(mover).unwrap().velocity = vec3(0.0, 1.0, 0.0);
        let mut row = default_row(plane, mover, (0.0, 0.5));

        let view = SolverBodies::new(&mut arena);
        row.prepare(&view, 60.0);
        assert_eq!(row.as_point_on_plane().unwrap().clamp, LimitClamp::AtMax);

        let mut last = 0.0;
        for _ in 0..8 {
            row.iterate(&view, 60.0);
            let acc = row.as_point_on_plane().unwrap().accumulated_impulse;
            assert!(acc <= last + 1e-4, "limit impulse must stay non-positive");
            last = acc;
        }
        assert!(last < 0.0);
        let body = view.get(mover).unwrap();
        assert!(body.velocity.y < 0.0, "the limit must pull the anchor back");
    }

    #[test]
    fn static_body_is_never_moved() {
        let (mut arena, plane, mover) = plane_rig(-0.2);
        let mut row = default_row(plane, mover, (0.0, 0.5));
        let view = SolverBodies::new(&mut arena);
        row.prepare(&view, 60.0);
        for _ in 0..4 {
            row.iterate(&view, 60.0);
        }
        let anchor_body = view.get(plane).unwrap();
        assert_eq!(anchor_body.velocity, Vec3::ZERO);
        assert_eq!(anchor_body.angular_velocity, Vec3::ZERO);
    }

    #[test]
    fn rejects_zero_normals() {
        let (_arena, plane, mover) = plane_rig(0.0);
        assert!(new_row(
            plane,
            mover,
            Vec3::ZERO,
            Vec3::ZERO,
            Vec3::ZERO,
            (0.0, 1.0),
            PlaneParams::default(),
        )
        .is_err());
    }
}
