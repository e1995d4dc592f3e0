//! Contact rows: manifolds of up to four points between a body pair.
//!
//! The engine does not generate contacts; callers feed world-space points
//! from their own collision pipeline and the manifold turns them into
//! unilateral normal rows plus two friction rows per point, warm-started
//! across frames through the accumulated impulses.

use axlephys_core::error::{Error, Result};
use axlephys_core::{orthonormal_basis, Scalar, Vec3};
use axlephys_dynamics::{BodyHandle, RigidBody, SolverBodies};

use crate::row::{ContactRow, Row, TAG_CONTACT};

pub const MAX_CONTACT_POINTS: usize = 4;

/// Two points whose body-1 anchors sit closer than this are treated as the
/// same feature when manifolds build incrementally.
const MERGE_DISTANCE: Scalar = 0.05;

/// Penetration under this depth draws no position-error bias.
const PENETRATION_SLOP: Scalar = 0.005;

/// World-space contact point handed in by a collision pipeline.
#[derive(Clone, Copy, Debug)]
pub struct ContactPointDesc {
    pub point_on_1: Vec3,
    pub point_on_2: Vec3,
    /// Unit normal from body 1 towards body 2.
    pub normal: Vec3,
    pub penetration: Scalar,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ContactPoint {
    pub local_anchor1: Vec3,
    pub local_anchor2: Vec3,
    /// Normal in body 1's frame.
    pub local_normal: Vec3,
    pub penetration: Scalar,
    pub normal_impulse: Scalar,
    pub tangent_impulse: [Scalar; 2],
    // World-frame solve state, rebuilt by prepare.
    r1: Vec3,
    r2: Vec3,
    normal: Vec3,
    tangent: [Vec3; 2],
    normal_mass: Scalar,
    tangent_mass: [Scalar; 2],
    bias: Scalar,
}

/// Contact-row payload.
#[derive(Clone, Copy)]
pub struct ContactManifold {
    pub points: [ContactPoint; MAX_CONTACT_POINTS],
    pub len: u8,
    pub friction: Scalar,
    pub restitution: Scalar,
}

/// Builds an empty contact row for a body pair.
pub fn new_row(
    body1: BodyHandle,
    body2: BodyHandle,
    friction: Scalar,
    restitution: Scalar,
) -> Result<ContactRow> {
    if body1 == body2 {
        return Err(Error::InvalidArgument("contact needs two distinct bodies"));
    }
    if !friction.is_finite() || friction < 0.0 || !restitution.is_finite() {
        return Err(Error::InvalidArgument("contact material values must be finite"));
    }
    Ok(Row {
        tag: TAG_CONTACT,
        prepare,
        iterate,
        body1,
        body2,
        warm_started: false,
        payload: ContactManifold {
            points: [ContactPoint::default(); MAX_CONTACT_POINTS],
            len: 0,
            friction,
            restitution,
        },
    })
}

impl ContactManifold {
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Feeds fresh world-space points into the manifold.
    ///
    /// With `auxiliary` set the batch replaces the whole manifold in one
    /// frame, carrying accumulated impulses over from matching old points.
    /// Without it points accrete one per call: a point close to an existing
    /// feature updates it in place, otherwise it is appended, displacing the
    /// shallowest point once the manifold is full.
    pub fn feed(&mut self, b1: &RigidBody, b2: &RigidBody, descs: &[ContactPointDesc], auxiliary: bool) {
        if auxiliary {
            let old = *self;
            self.len = 0;
            for desc in descs.iter().take(MAX_CONTACT_POINTS) {
                let mut point = make_point(b1, b2, desc);
                if let Some(prev) = old.points[..old.len()]
                    .iter()
                    .find(|p| (p.local_anchor1 - point.local_anchor1).length() < MERGE_DISTANCE)
                {
                    point.normal_impulse = prev.normal_impulse;
                    point.tangent_impulse = prev.tangent_impulse;
                }
                self.points[self.len()] = point;
                self.len += 1;
            }
        } else {
            for desc in descs {
                self.feed_one(b1, b2, desc);
            }
        }
    }

    fn feed_one(&mut self, b1: &RigidBody, b2: &RigidBody, desc: &ContactPointDesc) {
        let point = make_point(b1, b2, desc);
        let len = self.len();
        if let Some(existing) = self.points[..len]
            .iter_mut()
            .find(|p| (p.local_anchor1 - point.local_anchor1).length() < MERGE_DISTANCE)
        {
            let normal_impulse = existing.normal_impulse;
            let tangent_impulse = existing.tangent_impulse;
            *existing = point;
            existing.normal_impulse = normal_impulse;
            existing.tangent_impulse = tangent_impulse;
            return;
        }
        if self.len() < MAX_CONTACT_POINTS {
            self.points[self.len()] = point;
            self.len += 1;
            return;
        }
        let shallowest = (0..self.len())
            .min_by(|&a, &b| {
                self.points[a]
                    .penetration
                    .partial_cmp(&self.points[b].penetration)
                    .unwrap_or(core::cmp::Ordering::Equal)
            })
            .unwrap_or(0);
        if point.penetration > self.points[shallowest].penetration {
            self.points[shallowest] = point;
        }
    }
}

fn make_point(b1: &RigidBody, b2: &RigidBody, desc: &ContactPointDesc) -> ContactPoint {
    let inv_q1 = b1.orientation.conjugate();
    ContactPoint {
        local_anchor1: inv_q1 * (desc.point_on_1 - b1.position),
        local_anchor2: b2.orientation.conjugate() * (desc.point_on_2 - b2.position),
        local_normal: inv_q1 * desc.normal,
        penetration: desc.penetration,
        ..Default::default()
    }
}

fn prepare(row: &mut ContactRow, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };
    let this = &mut row.payload;

    for point in &mut this.points[..this.len as usize] {
        point.r1 = b1.orientation * point.local_anchor1;
        point.r2 = b2.orientation * point.local_anchor2;
        point.normal = b1.orientation * point.local_normal;
        let (t1, t2) = orthonormal_basis(point.normal);
        point.tangent = [t1, t2];

        let n = point.normal;
        point.normal_mass = inverse_or_zero(effective_mass_along(b1, b2, point.r1, point.r2, n));
        point.tangent_mass = [
            inverse_or_zero(effective_mass_along(b1, b2, point.r1, point.r2, t1)),
            inverse_or_zero(effective_mass_along(b1, b2, point.r1, point.r2, t2)),
        ];

        // Position bias pushes the pair apart; restitution keeps part of the
        // approach speed when the pair comes in fast.
        let depth = (point.penetration - PENETRATION_SLOP).max(0.0);
        let mut bias = -0.2 * inv_dt * depth;
        let approach = relative_velocity(b1, b2, point.r1, point.r2).dot(n);
        if this.restitution > 0.0 && approach < -1.0 {
            bias += this.restitution * approach;
        }
        point.bias = bias;
    }

    if !row.warm_started {
        for point in &this.points[..this.len as usize] {
            let impulse = point.normal * point.normal_impulse
                + point.tangent[0] * point.tangent_impulse[0]
                + point.tangent[1] * point.tangent_impulse[1];
            apply_at(b1, b2, point.r1, point.r2, impulse);
        }
        row.warm_started = true;
    }
}

fn iterate(row: &mut ContactRow, bodies: &SolverBodies<'_>, _inv_dt: Scalar) {
    row.warm_started = false;
    let Some((b1, b2)) = bodies.get_pair(row.body1, row.body2) else { return };
    let this = &mut row.payload;

    for point in &mut this.points[..this.len as usize] {
        // Normal row: unilateral, accumulated impulse stays non-negative.
        let jv = relative_velocity(b1, b2, point.r1, point.r2).dot(point.normal);
        let lambda = -point.normal_mass * (jv + point.bias);
        let old = point.normal_impulse;
        point.normal_impulse = (old + lambda).max(0.0);
        apply_at(b1, b2, point.r1, point.r2, point.normal * (point.normal_impulse - old));

        // Friction rows, boxed by the normal impulse.
        let max_friction = this.friction * point.normal_impulse;
        for axis in 0..2 {
            let t = point.tangent[axis];
            let jv_t = relative_velocity(b1, b2, point.r1, point.r2).dot(t);
            let lambda_t = -point.tangent_mass[axis] * jv_t;
            let old_t = point.tangent_impulse[axis];
            point.tangent_impulse[axis] = (old_t + lambda_t).clamp(-max_friction, max_friction);
            apply_at(b1, b2, point.r1, point.r2, t * (point.tangent_impulse[axis] - old_t));
        }
    }
}

/// A pair with no mass anywhere (two static bodies) takes no impulse.
#[inline]
fn inverse_or_zero(k: Scalar) -> Scalar {
    if k > 0.0 { 1.0 / k } else { 0.0 }
}

#[inline]
fn relative_velocity(b1: &RigidBody, b2: &RigidBody, r1: Vec3, r2: Vec3) -> Vec3 {
    (b2.velocity + b2.angular_velocity.cross(r2)) - (b1.velocity + b1.angular_velocity.cross(r1))
}

#[inline]
fn effective_mass_along(b1: &RigidBody, b2: &RigidBody, r1: Vec3, r2: Vec3, dir: Vec3) -> Scalar {
    let rn1 = r1.cross(dir);
    let rn2 = r2.cross(dir);
    b1.inverse_mass
        + b2.inverse_mass
        + (b1.inverse_inertia_world * rn1).dot(rn1)
        + (b2.inverse_inertia_world * rn2).dot(rn2)
}

/// Applies `impulse` at the contact arms: positively to body 2, negatively to
/// body 1, matching a normal that points from body 1 to body 2.
#[inline]
fn apply_at(b1: &mut RigidBody, b2: &mut RigidBody, r1: Vec3, r2: Vec3, impulse: Vec3) {
    b1.apply_impulse(-impulse);
    b1.apply_angular_impulse(r1.cross(-impulse));
    b2.apply_impulse(impulse);
    b2.apply_angular_impulse(r2.cross(impulse));
}
