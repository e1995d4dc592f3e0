//! Island-based sleeping.
//!
//! Islands are connected components of awake dynamic bodies over the active
//! rows; static bodies never join an island. An island sleeps only when every
//! member has idled below the velocity threshold for the configured time, at
//! which point its bodies and rows leave the arenas' active prefixes and the
//! bodies' velocities are zeroed. Waking is the mirror image and lives in
//! [`World::activate`].

use axlephys_core::{Scalar, Vec3};
use axlephys_dynamics::{BodyHandle, RigidBody};

use crate::{ConstraintHandle, ContactHandle, SmallConstraintHandle, World};

pub(crate) struct SleepOutcome {
    pub islands: u32,
    pub sleeping_bodies: u32,
}

struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self { parent: (0..len as u32).collect() }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] as usize != node {
            let grandparent = self.parent[self.parent[node] as usize];
            self.parent[node] = grandparent;
            node = grandparent as usize;
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra as u32;
        }
    }
}

fn dynamic_key(bodies: &axlephys_arena::Arena<RigidBody>, handle: BodyHandle) -> Option<usize> {
    let body = bodies.get(handle).ok()?;
    if body.is_static() {
        None
    } else {
        Some(handle.index() as usize)
    }
}

impl World {
    pub(crate) fn update_sleep(&mut self, dt: Scalar) -> SleepOutcome {
        let threshold = self.sleep_config.velocity_threshold;
        let deadline = self.sleep_config.time_until_sleep;

        for body in self.bodies.iter_active_mut() {
            if body.is_static() {
                continue;
            }
            let speed = body.velocity.length() + body.angular_velocity.length();
            if speed < threshold {
                body.sleep_time += dt;
            } else {
                body.sleep_time = 0.0;
            }
        }

        let mut islands = UnionFind::new(self.bodies.capacity());
        for slot in 0..self.constraints.active_count() {
            let row = self.constraints.slot(slot);
            union_pair(&self.bodies, &mut islands, row.body1, row.body2);
        }
        for slot in 0..self.small_constraints.active_count() {
            let row = self.small_constraints.slot(slot);
            union_pair(&self.bodies, &mut islands, row.body1, row.body2);
        }
        for slot in 0..self.contacts.active_count() {
            let row = self.contacts.slot(slot);
            union_pair(&self.bodies, &mut islands, row.body1, row.body2);
        }

        // Readiness per island root: every member must be past the deadline.
        let mut island_ready: Vec<Option<bool>> = vec![None; self.bodies.capacity()];
        let mut island_count = 0u32;
        let mut members: Vec<(BodyHandle, usize, bool)> = Vec::new();
        for slot in 0..self.bodies.active_count() {
            let body = self.bodies.slot(slot);
            if body.is_static() {
                continue;
            }
            let handle = self.bodies.handle_at_slot(slot);
            let root = islands.find(handle.index() as usize);
            let rested = body.sleep_time >= deadline;
            match island_ready[root] {
                None => {
                    island_ready[root] = Some(rested);
                    island_count += 1;
                }
                Some(ready) => island_ready[root] = Some(ready && rested),
            }
            members.push((handle, root, rested));
        }

        let mut slept: Vec<BodyHandle> = Vec::new();
        for (handle, root, _) in &members {
            let sleeps = island_ready[*root] == Some(true);
            if let Ok(body) = self.bodies.get_mut(*handle) {
                body.island_id = *root as u32;
                if sleeps {
                    body.active = false;
                    body.velocity = Vec3::ZERO;
                    body.angular_velocity = Vec3::ZERO;
                    slept.push(*handle);
                }
            }
        }
        for handle in &slept {
            let _ = self.bodies.set_active(*handle, false);
        }

        if !slept.is_empty() {
            self.sleep_rows();
            self.partition.dirty = true;
        }

        SleepOutcome {
            islands: island_count,
            sleeping_bodies: (self.bodies.len() - self.bodies.active_count()) as u32,
        }
    }

    /// Moves every active row whose dynamic endpoints are all asleep out of
    /// the active prefix.
    fn sleep_rows(&mut self) {
        let endpoints_asleep = |bodies: &axlephys_arena::Arena<RigidBody>,
                                b1: BodyHandle,
                                b2: BodyHandle| {
            let asleep = |h: BodyHandle| match bodies.get(h) {
                Ok(body) => body.is_static() || !body.active,
                Err(_) => true,
            };
            asleep(b1) && asleep(b2)
        };

        let mut to_sleep: Vec<ConstraintHandle> = Vec::new();
        for slot in 0..self.constraints.active_count() {
            let row = self.constraints.slot(slot);
            if endpoints_asleep(&self.bodies, row.body1, row.body2) {
                to_sleep.push(self.constraints.handle_at_slot(slot));
            }
        }
        for handle in to_sleep {
            let _ = self.constraints.set_active(handle, false);
        }

        let mut to_sleep: Vec<SmallConstraintHandle> = Vec::new();
        for slot in 0..self.small_constraints.active_count() {
            let row = self.small_constraints.slot(slot);
            if endpoints_asleep(&self.bodies, row.body1, row.body2) {
                to_sleep.push(self.small_constraints.handle_at_slot(slot));
            }
        }
        for handle in to_sleep {
            let _ = self.small_constraints.set_active(handle, false);
        }

        let mut to_sleep: Vec<ContactHandle> = Vec::new();
        for slot in 0..self.contacts.active_count() {
            let row = self.contacts.slot(slot);
            if endpoints_asleep(&self.bodies, row.body1, row.body2) {
                to_sleep.push(self.contacts.handle_at_slot(slot));
            }
        }
        for handle in to_sleep {
            let _ = self.contacts.set_active(handle, false);
        }
    }
}

fn union_pair(
    bodies: &axlephys_arena::Arena<RigidBody>,
    islands: &mut UnionFind,
    b1: BodyHandle,
    b2: BodyHandle,
) {
    if let (Some(k1), Some(k2)) = (dynamic_key(bodies, b1), dynamic_key(bodies, b2)) {
        islands.union(k1, k2);
    }
}
