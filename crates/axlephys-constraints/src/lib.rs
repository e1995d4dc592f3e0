//! Constraint rows: fixed-layout records solved iteratively at the velocity
//! level.
//!
//! Every row starts with the same header: a tag, two function pointers set at
//! construction, and the two body handles. The solver walks the active prefix
//! of a row arena and makes two indirect calls per row; it never touches a
//! vtable or leaves the arena's contiguous storage.

pub mod row;
pub mod hinge_angle;
pub mod point_on_plane;
pub mod contact;
pub mod spring;

pub use row::{
    ConstraintRow, ContactRow, LargePayload, LimitClamp, Row, SmallConstraintRow, SmallPayload,
    TAG_CONTACT, TAG_HINGE_ANGLE, TAG_POINT_ON_PLANE, TAG_SPRING,
};
pub use hinge_angle::{HingeAngleRow, HingeParams};
pub use point_on_plane::{PointOnPlaneRow, PlaneParams};
pub use contact::{ContactManifold, ContactPoint, ContactPointDesc, MAX_CONTACT_POINTS};
pub use spring::{SpringParams, SpringRow};
