use axlephys_core::error::{Error, Result};
use axlephys_core::Scalar;
use axlephys_dynamics::{BodyHandle, SolverBodies};

use crate::contact::ContactManifold;
use crate::hinge_angle::HingeAngleRow;
use crate::point_on_plane::PointOnPlaneRow;
use crate::spring::SpringRow;

pub const TAG_HINGE_ANGLE: u32 = 1;
pub const TAG_POINT_ON_PLANE: u32 = 2;
pub const TAG_CONTACT: u32 = 3;
pub const TAG_SPRING: u32 = 4;

/// Which unilateral limit, if any, the last prepare found active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LimitClamp {
    #[default]
    Free = 0,
    AtMax = 1,
    AtMin = 2,
}

/// Per-row solve callback. `inv_dt` is the inverse substep length.
pub type RowFn<P> = fn(&mut Row<P>, &SolverBodies<'_>, Scalar);

/// Common row layout: header fields first, then the variant payload.
///
/// `prepare` and `iterate` are fixed at construction; the tag validates typed
/// views handed out by accessors. `warm_started` guards the warm-start
/// impulse so a repeated prepare cannot apply it twice; the first iterate of
/// a pass clears it.
#[repr(C)]
pub struct Row<P> {
    pub tag: u32,
    pub prepare: RowFn<P>,
    pub iterate: RowFn<P>,
    pub body1: BodyHandle,
    pub body2: BodyHandle,
    pub warm_started: bool,
    pub payload: P,
}

impl<P> Row<P> {
    /// Runs the row's prepare callback.
    #[inline]
    pub fn prepare(&mut self, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
        let prepare = self.prepare;
        prepare(self, bodies, inv_dt);
    }

    /// Runs the row's iterate callback.
    #[inline]
    pub fn iterate(&mut self, bodies: &SolverBodies<'_>, inv_dt: Scalar) {
        let iterate = self.iterate;
        iterate(self, bodies, inv_dt);
    }

    /// Whether the row is attached to the given body.
    #[inline]
    pub fn references(&self, body: BodyHandle) -> bool {
        self.body1 == body || self.body2 == body
    }
}

/// Payload of the large-row arena.
pub enum LargePayload {
    HingeAngle(HingeAngleRow),
    PointOnPlane(PointOnPlaneRow),
}

/// Payload of the small-row arena; same contract, smaller fixed footprint.
pub enum SmallPayload {
    Spring(SpringRow),
}

pub type ConstraintRow = Row<LargePayload>;
pub type SmallConstraintRow = Row<SmallPayload>;
pub type ContactRow = Row<ContactManifold>;

impl ConstraintRow {
    pub fn as_hinge_angle(&self) -> Result<&HingeAngleRow> {
        match (self.tag, &self.payload) {
            (TAG_HINGE_ANGLE, LargePayload::HingeAngle(row)) => Ok(row),
            _ => Err(Error::InvalidArgument("row is not a hinge-angle constraint")),
        }
    }

    pub fn as_hinge_angle_mut(&mut self) -> Result<&mut HingeAngleRow> {
        match (self.tag, &mut self.payload) {
            (TAG_HINGE_ANGLE, LargePayload::HingeAngle(row)) => Ok(row),
            _ => Err(Error::InvalidArgument("row is not a hinge-angle constraint")),
        }
    }

    pub fn as_point_on_plane(&self) -> Result<&PointOnPlaneRow> {
        match (self.tag, &self.payload) {
            (TAG_POINT_ON_PLANE, LargePayload::PointOnPlane(row)) => Ok(row),
            _ => Err(Error::InvalidArgument("row is not a point-on-plane constraint")),
        }
    }

    pub fn as_point_on_plane_mut(&mut self) -> Result<&mut PointOnPlaneRow> {
        match (self.tag, &mut self.payload) {
            (TAG_POINT_ON_PLANE, LargePayload::PointOnPlane(row)) => Ok(row),
            _ => Err(Error::InvalidArgument("row is not a point-on-plane constraint")),
        }
    }
}

impl SmallConstraintRow {
    pub fn as_spring(&self) -> Result<&SpringRow> {
        match (self.tag, &self.payload) {
            (TAG_SPRING, SmallPayload::Spring(row)) => Ok(row),
            _ => Err(Error::InvalidArgument("row is not a spring constraint")),
        }
    }

    pub fn as_spring_mut(&mut self) -> Result<&mut SpringRow> {
        match (self.tag, &mut self.payload) {
            (TAG_SPRING, SmallPayload::Spring(row)) => Ok(row),
            _ => Err(Error::InvalidArgument("row is not a spring constraint")),
        }
    }
}
