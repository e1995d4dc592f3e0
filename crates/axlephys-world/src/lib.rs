//! The world: arenas for bodies and rows, and the step pipeline that drives
//! them.
//!
//! A step runs, per substep: velocity integration, one serial prepare pass
//! over every active row, the solver passes, position integration, and the
//! relaxation passes. The worker pool is used only for solver and relaxation,
//! over a greedy colouring of the rows in which no two rows of a colour share
//! a dynamic body.

use serde::{Deserialize, Serialize};

use axlephys_arena::{Arena, Handle};
use axlephys_constraints::{
    contact, hinge_angle, point_on_plane, spring, ConstraintRow, ContactPointDesc, ContactRow,
    HingeParams, PlaneParams, SmallConstraintRow, SpringParams,
};
use axlephys_core::error::{Error, Result};
use axlephys_core::{Scalar, StateDigest, Vec3};
use axlephys_dynamics::{BodyHandle, RigidBody, SolverBodies, NO_ISLAND};
use axlephys_threads::WorkerPool;

mod partition;
mod sleep;

use partition::{Partition, SolverCtx};

pub use axlephys_constraints as constraints;
pub use axlephys_core::vec3;
pub use axlephys_dynamics::{BodyDesc, MassProps};
pub use axlephys_threads::ThreadModel;

pub type ConstraintHandle = Handle<ConstraintRow>;
pub type SmallConstraintHandle = Handle<SmallConstraintRow>;
pub type ContactHandle = Handle<ContactRow>;

/// Arena capacities, fixed at construction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WorldCapacity {
    pub body_count: usize,
    pub contact_count: usize,
    pub constraint_count: usize,
    pub small_constraint_count: usize,
}

impl Default for WorldCapacity {
    fn default() -> Self {
        Self {
            body_count: 256,
            contact_count: 512,
            constraint_count: 128,
            small_constraint_count: 128,
        }
    }
}

/// Per-step solver configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StepConfig {
    /// `(solver, relaxation)` pass counts.
    pub solver_iterations: (u32, u32),
    /// `step(dt)` performs this many substeps of `dt / substep_count`.
    pub substep_count: u32,
    /// Full manifolds per feed when set; incremental accretion otherwise.
    pub enable_auxiliary_contacts: bool,
    pub thread_model: ThreadModel,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            solver_iterations: (8, 2),
            substep_count: 1,
            enable_auxiliary_contacts: true,
            thread_model: ThreadModel::Regular,
        }
    }
}

/// Sleep thresholds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SleepConfig {
    /// A body with `|v| + |w|` under this is a sleep candidate.
    pub velocity_threshold: Scalar,
    /// Seconds a whole island must stay under the threshold before it sleeps.
    pub time_until_sleep: Scalar,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self { velocity_threshold: 0.05, time_until_sleep: 0.5 }
    }
}

/// Per-step counters, returned by [`World::step`].
#[derive(Copy, Clone, Debug, Default)]
pub struct StepStats {
    pub substeps: u32,
    pub constraint_rows: u32,
    pub small_rows: u32,
    pub contact_rows: u32,
    pub islands: u32,
    pub sleeping_bodies: u32,
}

pub struct WorldBuilder {
    capacity: WorldCapacity,
    step: StepConfig,
    sleep: SleepConfig,
    gravity: Vec3,
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self {
            capacity: WorldCapacity::default(),
            step: StepConfig::default(),
            sleep: SleepConfig::default(),
            gravity: Vec3::new(0.0, -9.81, 0.0),
        }
    }

    pub fn with_capacity(mut self, capacity: WorldCapacity) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_step_config(mut self, step: StepConfig) -> Self {
        self.step = step;
        self
    }

    pub fn with_sleep_config(mut self, sleep: SleepConfig) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn build(self) -> World {
        World {
            gravity: self.gravity,
            step_config: self.step,
            sleep_config: self.sleep,
            bodies: Arena::with_capacity(self.capacity.body_count),
            constraints: Arena::with_capacity(self.capacity.constraint_count),
            small_constraints: Arena::with_capacity(self.capacity.small_constraint_count),
            contacts: Arena::with_capacity(self.capacity.contact_count),
            partition: Partition::new(),
            tick: 0,
        }
    }
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct World {
    pub gravity: Vec3,
    step_config: StepConfig,
    sleep_config: SleepConfig,
    bodies: Arena<RigidBody>,
    constraints: Arena<ConstraintRow>,
    small_constraints: Arena<SmallConstraintRow>,
    contacts: Arena<ContactRow>,
    partition: Partition,
    tick: u64,
}

impl World {
    /* ---------- composition ---------- */

    pub fn add_body(&mut self, desc: BodyDesc) -> Result<BodyHandle> {
        if !desc.position.is_finite()
            || !desc.orientation.is_finite()
            || !desc.velocity.is_finite()
            || !desc.angular_velocity.is_finite()
        {
            return Err(Error::InvalidArgument("body state must be finite"));
        }
        if !desc.mass.inv_mass.is_finite() || desc.mass.inv_mass < 0.0 {
            return Err(Error::InvalidArgument("inverse mass must be finite and non-negative"));
        }
        self.partition.dirty = true;
        self.bodies.insert(RigidBody::new(desc))
    }

    /// Frees the body and every row attached to it; surviving partners of
    /// the detached rows are woken.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<()> {
        // Resolve first so a stale handle cannot detach anything.
        self.bodies.get(handle)?;
        let mut partners: Vec<BodyHandle> = Vec::new();
        let other = |b1: BodyHandle, b2: BodyHandle| if b1 == handle { b2 } else { b1 };

        let orphans: Vec<ConstraintHandle> = (0..self.constraints.len())
            .filter(|&slot| self.constraints.slot(slot).references(handle))
            .map(|slot| self.constraints.handle_at_slot(slot))
            .collect();
        for row_handle in orphans {
            if let Ok(row) = self.constraints.free(row_handle) {
                partners.push(other(row.body1, row.body2));
            }
        }
        let orphans: Vec<SmallConstraintHandle> = (0..self.small_constraints.len())
            .filter(|&slot| self.small_constraints.slot(slot).references(handle))
            .map(|slot| self.small_constraints.handle_at_slot(slot))
            .collect();
        for row_handle in orphans {
            if let Ok(row) = self.small_constraints.free(row_handle) {
                partners.push(other(row.body1, row.body2));
            }
        }
        let orphans: Vec<ContactHandle> = (0..self.contacts.len())
            .filter(|&slot| self.contacts.slot(slot).references(handle))
            .map(|slot| self.contacts.handle_at_slot(slot))
            .collect();
        for row_handle in orphans {
            if let Ok(row) = self.contacts.free(row_handle) {
                partners.push(other(row.body1, row.body2));
            }
        }

        self.partition.dirty = true;
        self.bodies.free(handle)?;
        for partner in partners {
            let _ = self.activate(partner);
        }
        Ok(())
    }

    pub fn body(&self, handle: BodyHandle) -> Result<&RigidBody> {
        self.bodies.get(handle)
    }

    /// Mutable body access. Wakes the body's island, since the caller is
    /// about to change state the sleep pass reasoned about.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Result<&mut RigidBody> {
        self.activate(handle)?;
        self.bodies.get_mut(handle)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn awake_body_count(&self) -> usize {
        self.bodies.active_count()
    }

    /// Accumulates a force through the body's center of mass, waking it.
    pub fn apply_force(&mut self, handle: BodyHandle, force: Vec3) -> Result<()> {
        if !force.is_finite() {
            return Err(Error::InvalidArgument("force must be finite"));
        }
        self.activate(handle)?;
        self.bodies.get_mut(handle)?.apply_force(force);
        Ok(())
    }

    /// Applies an instantaneous impulse at the center of mass, waking the
    /// body.
    pub fn apply_impulse(&mut self, handle: BodyHandle, impulse: Vec3) -> Result<()> {
        if !impulse.is_finite() {
            return Err(Error::InvalidArgument("impulse must be finite"));
        }
        self.activate(handle)?;
        self.bodies.get_mut(handle)?.apply_impulse(impulse);
        Ok(())
    }

    /* ---------- constraints ---------- */

    pub fn add_hinge_angle(
        &mut self,
        body1: BodyHandle,
        body2: BodyHandle,
        axis: Vec3,
        limits: Option<(Scalar, Scalar)>,
        params: HingeParams,
    ) -> Result<ConstraintHandle> {
        let q1 = self.bodies.get(body1)?.orientation;
        let q2 = self.bodies.get(body2)?.orientation;
        let row = hinge_angle::new_row(body1, body2, q1, q2, axis, limits, params)?;
        self.activate(body1)?;
        self.activate(body2)?;
        self.partition.dirty = true;
        self.constraints.insert(row)
    }

    pub fn add_point_on_plane(
        &mut self,
        body1: BodyHandle,
        body2: BodyHandle,
        axis: Vec3,
        anchor1: Vec3,
        anchor2: Vec3,
        limits: (Scalar, Scalar),
        params: PlaneParams,
    ) -> Result<ConstraintHandle> {
        self.bodies.get(body1)?;
        self.bodies.get(body2)?;
        let row = point_on_plane::new_row(body1, body2, axis, anchor1, anchor2, limits, params)?;
        self.activate(body1)?;
        self.activate(body2)?;
        self.partition.dirty = true;
        self.constraints.insert(row)
    }

    pub fn add_spring(
        &mut self,
        body1: BodyHandle,
        body2: BodyHandle,
        anchor1: Vec3,
        anchor2: Vec3,
        rest_length: Scalar,
        params: SpringParams,
    ) -> Result<SmallConstraintHandle> {
        self.bodies.get(body1)?;
        self.bodies.get(body2)?;
        let row = spring::new_row(body1, body2, anchor1, anchor2, rest_length, params)?;
        self.activate(body1)?;
        self.activate(body2)?;
        self.partition.dirty = true;
        self.small_constraints.insert(row)
    }

    /// Registers an empty contact manifold for a body pair.
    pub fn add_contact(
        &mut self,
        body1: BodyHandle,
        body2: BodyHandle,
        friction: Scalar,
        restitution: Scalar,
    ) -> Result<ContactHandle> {
        self.bodies.get(body1)?;
        self.bodies.get(body2)?;
        let row = contact::new_row(body1, body2, friction, restitution)?;
        self.partition.dirty = true;
        self.contacts.insert(row)
    }

    /// Feeds world-space contact points into a manifold, honouring the
    /// auxiliary-contacts switch, and wakes the pair.
    pub fn push_contact_points(
        &mut self,
        handle: ContactHandle,
        points: &[ContactPointDesc],
    ) -> Result<()> {
        for desc in points {
            if !desc.point_on_1.is_finite()
                || !desc.point_on_2.is_finite()
                || !desc.normal.is_finite()
                || !desc.penetration.is_finite()
            {
                return Err(Error::InvalidArgument("contact points must be finite"));
            }
        }
        let auxiliary = self.step_config.enable_auxiliary_contacts;
        let (body1, body2) = {
            let row = self.contacts.get(handle)?;
            (row.body1, row.body2)
        };
        let b1 = *self.bodies.get(body1)?;
        let b2 = *self.bodies.get(body2)?;
        self.contacts.get_mut(handle)?.payload.feed(&b1, &b2, points, auxiliary);
        self.activate(body1)?;
        self.activate(body2)?;
        Ok(())
    }

    pub fn remove_constraint(&mut self, handle: ConstraintHandle) -> Result<()> {
        self.partition.dirty = true;
        self.constraints.free(handle).map(|_| ())
    }

    pub fn remove_small_constraint(&mut self, handle: SmallConstraintHandle) -> Result<()> {
        self.partition.dirty = true;
        self.small_constraints.free(handle).map(|_| ())
    }

    pub fn remove_contact(&mut self, handle: ContactHandle) -> Result<()> {
        self.partition.dirty = true;
        self.contacts.free(handle).map(|_| ())
    }

    pub fn constraint(&self, handle: ConstraintHandle) -> Result<&ConstraintRow> {
        self.constraints.get(handle)
    }

    pub fn constraint_mut(&mut self, handle: ConstraintHandle) -> Result<&mut ConstraintRow> {
        self.constraints.get_mut(handle)
    }

    pub fn small_constraint(&self, handle: SmallConstraintHandle) -> Result<&SmallConstraintRow> {
        self.small_constraints.get(handle)
    }

    pub fn small_constraint_mut(
        &mut self,
        handle: SmallConstraintHandle,
    ) -> Result<&mut SmallConstraintRow> {
        self.small_constraints.get_mut(handle)
    }

    pub fn contact(&self, handle: ContactHandle) -> Result<&ContactRow> {
        self.contacts.get(handle)
    }

    pub fn contact_mut(&mut self, handle: ContactHandle) -> Result<&mut ContactRow> {
        self.contacts.get_mut(handle)
    }

    /* ---------- stepping ---------- */

    pub fn step_config(&self) -> StepConfig {
        self.step_config
    }

    pub fn set_step_config(&mut self, config: StepConfig) {
        self.step_config = config;
    }

    pub fn sleep_config(&self) -> SleepConfig {
        self.sleep_config
    }

    pub fn set_sleep_config(&mut self, config: SleepConfig) {
        self.sleep_config = config;
    }

    /// Advances the world by `dt`, optionally fanning the solver passes out
    /// across the process worker pool.
    pub fn step(&mut self, dt: Scalar, multi_thread: bool) -> Result<StepStats> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(Error::InvalidArgument("dt must be finite and positive"));
        }
        if self.step_config.substep_count < 1 {
            return Err(Error::InvalidArgument("substep count must be at least 1"));
        }
        let substeps = self.step_config.substep_count;
        let sdt = dt / substeps as Scalar;
        let inv_sdt = 1.0 / sdt;
        let (solver_passes, relax_passes) = self.step_config.solver_iterations;

        let pool = WorkerPool::global();
        let active_rows = self.constraints.active_count()
            + self.small_constraints.active_count()
            + self.contacts.active_count();
        let use_pool = multi_thread && pool.thread_count() > 1 && active_rows > 0;
        if use_pool {
            pool.set_thread_model(self.step_config.thread_model);
            if self.partition.dirty {
                self.partition.rebuild(
                    &self.bodies,
                    &self.constraints,
                    &self.small_constraints,
                    &self.contacts,
                );
            }
        }
        tracing::trace!(tick = self.tick, dt, substeps, use_pool, "step");

        for _ in 0..substeps {
            let gravity = self.gravity;
            for body in self.bodies.iter_active_mut() {
                body.integrate_velocity(sdt, gravity);
            }

            self.prepare_rows(inv_sdt);

            for _ in 0..solver_passes {
                self.solve_pass(pool, use_pool, inv_sdt);
            }

            for body in self.bodies.iter_active_mut() {
                body.integrate_position(sdt);
            }

            // Relaxation reuses the prepared rows; position-error bias keeps
            // its pre-integration value on purpose, and these extra passes
            // drain the energy it injected.
            for _ in 0..relax_passes {
                self.solve_pass(pool, use_pool, inv_sdt);
            }
        }

        let sleep = self.update_sleep(dt);
        self.tick += 1;

        Ok(StepStats {
            substeps,
            constraint_rows: self.constraints.active_count() as u32,
            small_rows: self.small_constraints.active_count() as u32,
            contact_rows: self.contacts.active_count() as u32,
            islands: sleep.islands,
            sleeping_bodies: sleep.sleeping_bodies,
        })
    }

    /// One serial prepare sweep; this is what applies warm-start impulses,
    /// so it runs before the first iterate pass.
    fn prepare_rows(&mut self, inv_sdt: Scalar) {
        let World { bodies, constraints, small_constraints, contacts, .. } = self;
        let view = SolverBodies::new(bodies);
        for slot in 0..constraints.active_count() {
            constraints.slot_mut(slot).prepare(&view, inv_sdt);
        }
        for slot in 0..small_constraints.active_count() {
            small_constraints.slot_mut(slot).prepare(&view, inv_sdt);
        }
        for slot in 0..contacts.active_count() {
            contacts.slot_mut(slot).prepare(&view, inv_sdt);
        }
    }

    fn solve_pass(&mut self, pool: &WorkerPool, use_pool: bool, inv_sdt: Scalar) {
        let World { bodies, constraints, small_constraints, contacts, partition, .. } = self;
        if use_pool {
            let ctx = SolverCtx::new(bodies, constraints, small_constraints, contacts);
            partition.run_pass(pool, ctx, inv_sdt);
        } else {
            let view = SolverBodies::new(bodies);
            for slot in 0..constraints.active_count() {
                constraints.slot_mut(slot).iterate(&view, inv_sdt);
            }
            for slot in 0..small_constraints.active_count() {
                small_constraints.slot_mut(slot).iterate(&view, inv_sdt);
            }
            for slot in 0..contacts.active_count() {
                contacts.slot_mut(slot).iterate(&view, inv_sdt);
            }
        }
    }

    /* ---------- sleeping ---------- */

    /// Wakes the body and everything in its island.
    pub fn activate(&mut self, handle: BodyHandle) -> Result<()> {
        let island = self.bodies.get(handle)?.island_id;
        let mut woken: Vec<BodyHandle> = Vec::new();

        if !self.bodies.is_active(handle)? {
            woken.push(handle);
        }
        if island != NO_ISLAND {
            for slot in self.bodies.active_count()..self.bodies.len() {
                let candidate = self.bodies.handle_at_slot(slot);
                if candidate != handle && self.bodies.slot(slot).island_id == island {
                    woken.push(candidate);
                }
            }
        }
        if woken.is_empty() {
            return Ok(());
        }

        for &body in &woken {
            let record = self.bodies.get_mut(body)?;
            record.active = true;
            record.sleep_time = 0.0;
            self.bodies.set_active(body, true)?;
        }
        self.wake_rows_referencing(&woken);
        self.partition.dirty = true;
        Ok(())
    }

    fn wake_rows_referencing(&mut self, bodies: &[BodyHandle]) {
        let mut to_wake: Vec<ConstraintHandle> = Vec::new();
        for slot in self.constraints.active_count()..self.constraints.len() {
            if bodies.iter().any(|b| self.constraints.slot(slot).references(*b)) {
                to_wake.push(self.constraints.handle_at_slot(slot));
            }
        }
        for handle in to_wake {
            let _ = self.constraints.set_active(handle, true);
        }
        let mut to_wake: Vec<SmallConstraintHandle> = Vec::new();
        for slot in self.small_constraints.active_count()..self.small_constraints.len() {
            if bodies.iter().any(|b| self.small_constraints.slot(slot).references(*b)) {
                to_wake.push(self.small_constraints.handle_at_slot(slot));
            }
        }
        for handle in to_wake {
            let _ = self.small_constraints.set_active(handle, true);
        }
        let mut to_wake: Vec<ContactHandle> = Vec::new();
        for slot in self.contacts.active_count()..self.contacts.len() {
            if bodies.iter().any(|b| self.contacts.slot(slot).references(*b)) {
                to_wake.push(self.contacts.handle_at_slot(slot));
            }
        }
        for handle in to_wake {
            let _ = self.contacts.set_active(handle, true);
        }
    }

    /* ---------- observability ---------- */

    /// Deterministic digest of the body state, for comparing runs.
    pub fn state_hash(&self) -> [u8; 32] {
        let mut digest = StateDigest::new();
        digest.record_u64(self.tick);
        for slot in 0..self.bodies.len() {
            let handle = self.bodies.handle_at_slot(slot);
            let body = self.bodies.slot(slot);
            let p = body.position;
            let q = body.orientation;
            let v = body.velocity;
            let w = body.angular_velocity;
            digest.record_u32(handle.index());
            digest.record_scalars(&[p.x, p.y, p.z]);
            digest.record_scalars(&[q.x, q.y, q.z, q.w]);
            digest.record_scalars(&[v.x, v.y, v.z]);
            digest.record_scalars(&[w.x, w.y, w.z]);
        }
        digest.finish()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}

/// Convenience: a water-density dynamic sphere descriptor at a position.
pub fn dynamic_sphere(position: Vec3, radius: Scalar) -> BodyDesc {
    BodyDesc { position, mass: MassProps::from_sphere(radius, 1000.0), ..Default::default() }
}

/// Convenience: a static body descriptor at a position.
pub fn static_body(position: Vec3) -> BodyDesc {
    BodyDesc { position, ..Default::default() }
}
