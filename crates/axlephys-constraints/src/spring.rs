//! Spring row: a soft distance constraint between two anchors, the
//! small-arena worked example. Same header contract as the large rows with a
//! deliberately small payload, sized for soft-body style rigs with many rows.

use axlephys_core::error::{Error, Result};
use axlephys_core::{Scalar, Vec3};
use axlephys_dynamics::{BodyHandle, SolverBodies};

use crate::row::{Row, SmallConstraintRow, SmallPayload, TAG_SPRING};

#[derive(Clone, Copy, Debug)]
pub struct SpringParams {
    pub softness: Scalar,
    pub bias_factor: Scalar,
}

impl Default for SpringParams {
    fn default() -> Self {
        Self { softness: 0.01, bias_factor: 0.2 }
    }
}

pub struct SpringRow {
    pub local_anchor1: Vec3,
    pub local_anchor2: Vec3,
    pub rest_length: Scalar,
    pub accumulated_impulse: Scalar,
    pub softness: Scalar,
    pub bias_factor: Scalar,
    // Rebuilt by prepare.
    jacobian: [Vec3; 4],
    effective_mass: Scalar,
    bias: Scalar,
}

/// Builds a spring row driving the anchor distance towards `rest_length`.
pub fn new_row(
    body1: BodyHandle,
    body2: BodyHandle,
    anchor1: Vec3,
    anchor2: Vec3,
    rest_length: Scalar,
    params: SpringParams,
) -> Result<SmallConstraintRow> {
    if body1 == body2 {
        return Err(Error::InvalidArgument("spring needs two distinct bodies"));
    }
    if !anchor1.is_finite() || !anchor2.is_finite() {
        return Err(Error::InvalidArgument("spring anchors must be finite"));
    }
    if !rest_length.is_finite() || rest_length < 0.0 {
        return Err(Error::InvalidArgument("spring rest length must be finite and non-negative"));
    }
    Ok(Row {
        tag: TAG_SPRING,
        prepare,
        iterate,
        body1,
        body2,
        warm_started: false,
        payload: SmallPayload::Spring(SpringRow {
            local_anchor1: anchor1,
            local_anchor2: anchor2,
            rest_length,
            accumulated_impulse: 0.0,
            softness: params.softness,
            bias_factor: params.bias_factor,
            jacobian: [Vec3::ZERO; 4],
            effective_mass: 0.0,
            bias: 0.0,
        }),
    })
}

fn prepare(row: &mut SmallConstraintRow, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };
    let SmallPayload::Spring(this) = &mut row.payload;

    let r1 = b1.orientation * this.local_anchor1;
    let r2 = b2.orientation * this.local_anchor2;
    let u = (b2.position + r2) - (b1.position + r1);
    let length = u.length();
    let n = if length > 1.0e-6 { u / length } else { Vec3::X };

    this.jacobian = [-n, -r1.cross(n), n, r2.cross(n)];
    let [_, jw1, _, jw2] = this.jacobian;
    let k = b1.inverse_mass
        + b2.inverse_mass
        + (b1.inverse_inertia_world * jw1).dot(jw1)
        + (b2.inverse_inertia_world * jw2).dot(jw2)
        + this.softness * inv_dt;
    this.effective_mass = 1.0 / k;
    this.bias = (length - this.rest_length) * this.bias_factor * inv_dt;

    if !row.warm_started {
        let acc = this.accumulated_impulse;
        let [jv1, jw1, jv2, jw2] = this.jacobian;
        b1.apply_impulse(jv1 * acc);
        b1.apply_angular_impulse(jw1 * acc);
        b2.apply_impulse(jv2 * acc);
        b2.apply_angular_impulse(jw2 * acc);
        row.warm_started = true;
    }
}

fn iterate(row: &mut SmallConstraintRow, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
    row.warm_started = false;
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };
    let SmallPayload::Spring(this) = &mut row.payload;

    let [jv1, jw1, jv2, jw2] = this.jacobian;
    let jv = jv1.dot(b1.velocity)
        + jw1.dot(b1.angular_velocity)
        + jv2.dot(b2.velocity)
        + jw2.dot(b2.angular_velocity);
    let softness_term = this.accumulated_impulse * this.softness * inv_dt;
    let lambda = -this.effective_mass * (jv + this.bias + softness_term);
    this.accumulated_impulse += lambda;

    b1.apply_impulse(jv1 * lambda);
    b1.apply_angular_impulse(jw1 * lambda);
    b2.apply_impulse(jv2 * lambda);
    b2.apply_angular_impulse(jw2 * lambda);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axlephys_arena::Arena;
    use axlephys_core::vec3;
    use axlephys_dynamics::{BodyDesc, MassProps, RigidBody};

    #[test]
    fn stretched_spring_pulls_the_bodies_together() {
        let mut arena = Arena::with_capacity(4);
        let pivot = arena.insert(RigidBody::new(BodyDesc::default())).unwrap();
        let bob = arena
            .insert(RigidBody::new(BodyDesc {
                position: vec3(4.0, 0.0, 0.0),
                mass: MassProps::unit(),
                ..Default::default()
            }))
            .unwrap();
        let mut row =
            new_row(pivot, bob, Vec3::ZERO, Vec3::ZERO, 3.0, SpringParams::default()).unwrap();

        let view = SolverBodies::new(&mut arena);
        row.prepare(&view, 60.0);
        for _ in 0..4 {
            row.iterate(&view, 60.0);
        }
        let bob_body = view.get(bob).unwrap();
        assert!(bob_body.velocity.x < 0.0, "spring must pull the bob back");
        let SmallPayload::Spring(spring) = &row.payload;
        assert!(spring.accumulated_impulse != 0.0);
    }

    #[test]
    fn spring_at_rest_stays_at_rest() {
        let mut arena = Arena::with_capacity(4);
        let pivot = arena.insert(RigidBody::new(BodyDesc::default())).unwrap();
        let bob = arena
            .insert(RigidBody::new(BodyDesc {
                position: vec3(3.0, 0.0, 0.0),
                mass: MassProps::unit(),
                ..Default::default()
            }))
            .unwrap();
        let mut row =
            new_row(pivot, bob, Vec3::ZERO, Vec3::ZERO, 3.0, SpringParams::default()).unwrap();

        let view = SolverBodies::new(&mut arena);
        row.prepare(&view, 60.0);
        for _ in 0..4 {
            row.iterate(&view, 60.0);
        }
        let bob_body = view.get(bob).unwrap();
        assert!(bob_body.velocity.length() < 1e-6);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let mut arena: Arena<RigidBody> = Arena::with_capacity(2);
        let a = arena.insert(RigidBody::new(BodyDesc::default())).unwrap();
        let b = arena.insert(RigidBody::new(BodyDesc::default())).unwrap();
        assert!(new_row(a, a, Vec3::ZERO, Vec3::ZERO, 1.0, SpringParams::default()).is_err());
        assert!(new_row(
            a,
            b,
            vec3(Scalar::NAN, 0.0, 0.0),
            Vec3::ZERO,
            1.0,
            SpringParams::default()
        )
        .is_err());
        assert!(new_row(a, b, Vec3::ZERO, Vec3::ZERO, -1.0, SpringParams::default()).is_err());
    }
}
