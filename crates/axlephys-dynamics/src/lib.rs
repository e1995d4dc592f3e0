//! Rigid-body records and the operations the step pipeline runs on them.

use core::marker::PhantomData;

use axlephys_arena::{Arena, Handle};
use axlephys_core::{Mat3, Quat, Scalar, Vec3};

mod mass;
pub use mass::MassProps;

pub type BodyHandle = Handle<RigidBody>;

/// Island id of a body that has never been assigned one.
pub const NO_ISLAND: u32 = u32::MAX;

/// Rigid body state. One record per body, owned by the world's body arena.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug)]
pub struct RigidBody {
    /// Position of the center of mass.
    pub position: Vec3,
    /// Orientation, kept unit length by the integrator.
    pub orientation: Quat,
    /// Linear velocity.
    pub velocity: Vec3,
    /// Angular velocity (world frame).
    pub angular_velocity: Vec3,
    /// Inverse mass; 0 marks a static or kinematic body.
    pub inverse_mass: Scalar,
    /// Inverse inertia tensor in the body frame.
    pub inverse_inertia_local: Mat3,
    /// `R * inverse_inertia_local * R^T`, rebuilt after every position
    /// integration because constraint preparation consumes it next.
    pub inverse_inertia_world: Mat3,
    /// Force accumulator, cleared by velocity integration.
    pub accumulated_force: Vec3,
    /// Torque accumulator, cleared by velocity integration.
    pub accumulated_torque: Vec3,
    /// Seconds spent below the sleep velocity threshold.
    pub sleep_time: Scalar,
    /// Whether the body sits in the awake prefix of the arena.
    pub active: bool,
    /// Island assigned by the last sleep pass.
    pub island_id: u32,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inverse_mass: 0.0,
            inverse_inertia_local: Mat3::ZERO,
            inverse_inertia_world: Mat3::ZERO,
            accumulated_force: Vec3::ZERO,
            accumulated_torque: Vec3::ZERO,
            sleep_time: 0.0,
            active: true,
            island_id: NO_ISLAND,
        }
    }
}

/// Input descriptor when creating a body.
#[derive(Copy, Clone, Debug)]
pub struct BodyDesc {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub mass: MassProps,
}

impl Default for BodyDesc {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: MassProps::infinite(),
        }
    }
}

impl RigidBody {
    pub fn new(desc: BodyDesc) -> Self {
        let mut body = Self {
            position: desc.position,
            orientation: desc.orientation.normalize(),
            velocity: desc.velocity,
            angular_velocity: desc.angular_velocity,
            inverse_mass: desc.mass.inv_mass,
            inverse_inertia_local: desc.mass.inverse_inertia(),
            ..Self::default()
        };
        body.recompute_world_inertia();
        body
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.inverse_mass == 0.0
    }

    /// Accumulate a force through the center of mass.
    #[inline]
    pub fn apply_force(&mut self, force: Vec3) {
        self.accumulated_force += force;
    }

    #[inline]
    pub fn apply_torque(&mut self, torque: Vec3) {
        self.accumulated_torque += torque;
    }

    /// Instantaneous impulse at the center of mass.
    #[inline]
    pub fn apply_impulse(&mut self, impulse: Vec3) {
        if !self.is_static() {
            self.velocity += impulse * self.inverse_mass;
        }
    }

    /// Instantaneous angular impulse: `dw = I^-1_world * tau`.
    #[inline]
    pub fn apply_angular_impulse(&mut self, tau: Vec3) {
        if !self.is_static() {
            self.angular_velocity += self.inverse_inertia_world * tau;
        }
    }

    /// Impulse at a world-space point, inducing both linear and angular change.
    pub fn apply_impulse_at(&mut self, impulse: Vec3, point: Vec3) {
        if !self.is_static() {
            self.velocity += impulse * self.inverse_mass;
            let r = point - self.position;
            self.angular_velocity += self.inverse_inertia_world * r.cross(impulse);
        }
    }

    /// Semi-implicit Euler velocity update from accumulated forces and
    /// gravity. Clears the accumulators.
    pub fn integrate_velocity(&mut self, dt: Scalar, gravity: Vec3) {
        if !self.is_static() {
            self.velocity += self.accumulated_force * (self.inverse_mass * dt) + gravity * dt;
            self.angular_velocity += self.inverse_inertia_world * self.accumulated_torque * dt;
        }
        self.accumulated_force = Vec3::ZERO;
        self.accumulated_torque = Vec3::ZERO;
    }

    /// Position update from current velocities, followed by orientation
    /// renormalisation and the world-inertia rebuild.
    pub fn integrate_position(&mut self, dt: Scalar) {
        if self.is_static() {
            return;
        }
        self.position += self.velocity * dt;
        let w = self.angular_velocity;
        let spin = Quat::from_xyzw(w.x, w.y, w.z, 0.0) * self.orientation;
        self.orientation = (self.orientation + spin * (0.5 * dt)).normalize();
        self.recompute_world_inertia();
    }

    pub fn normalize_orientation(&mut self) {
        self.orientation = self.orientation.normalize();
    }

    pub fn recompute_world_inertia(&mut self) {
        if self.is_static() {
            self.inverse_inertia_world = Mat3::ZERO;
        } else {
            let r = Mat3::from_quat(self.orientation);
            self.inverse_inertia_world = r * self.inverse_inertia_local * r.transpose();
        }
    }
}

/// Unsynchronized view over the body arena handed to constraint rows during
/// solver passes.
///
/// Rows scheduled into the same colour never share a body, so handing out
/// disjoint `&mut RigidBody` from several threads at once is sound; the view
/// never touches arena structure, only resolved records.
pub struct SolverBodies<'a> {
    slots: *mut RigidBody,
    arena: *const Arena<RigidBody>,
    _marker: PhantomData<&'a mut Arena<RigidBody>>,
}

unsafe impl Send for SolverBodies<'_> {}
unsafe impl Sync for SolverBodies<'_> {}

impl<'a> Clone for SolverBodies<'a> {
    fn clone(&self) -> Self { *self }
}
impl<'a> Copy for SolverBodies<'a> {}

impl<'a> SolverBodies<'a> {
    pub fn new(arena: &'a mut Arena<RigidBody>) -> Self {
        let slots = arena.as_mut_ptr();
        Self { slots, arena: arena as *const _, _marker: PhantomData }
    }

    /// Builds a view from a raw arena pointer for tasks shipped to the
    /// worker pool.
    ///
    /// # Safety
    /// The arena must stay alive and structurally untouched for as long as
    /// the view is used, and concurrent users must only resolve disjoint
    /// bodies.
    pub unsafe fn from_raw(arena: *mut Arena<RigidBody>) -> SolverBodies<'static> {
        SolverBodies {
            slots: (*arena).as_mut_ptr(),
            arena: arena as *const _,
            _marker: PhantomData,
        }
    }

    /// Resolves one body. Returns `None` on a stale handle, which the world
    /// rules out for rows it steps.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn get(&self, handle: BodyHandle) -> Option<&'a mut RigidBody> {
        // SAFETY: only the indirection table is read through the shared
        // arena reference; record writes go through the dense base pointer.
        let arena = unsafe { &*self.arena };
        let slot = arena.resolve_slot(handle).ok()?;
        Some(unsafe { &mut *self.slots.add(slot) })
    }

    /// Resolves both endpoints of a row. The two handles must differ.
    #[inline]
    pub fn get_pair(
        &self,
        h1: BodyHandle,
        h2: BodyHandle,
    ) -> Option<(&'a mut RigidBody, &'a mut RigidBody)> {
        debug_assert!(h1 != h2, "constraint rows join two distinct bodies");
        let first = self.get(h1)?;
        let second = self.get(h2)?;
        Some((first, second))
    }
}
