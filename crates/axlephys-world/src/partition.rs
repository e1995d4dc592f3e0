//! Greedy graph colouring of the constraint rows and the parallel pass
//! dispatcher built on it.
//!
//! Rows of one colour share no dynamic body, so a colour can be chunked
//! across the pool and solved concurrently; colours run one after another
//! with an `execute` barrier in between. Each row is touched by exactly one
//! task per pass. Static bodies never take velocity writes, so they do not
//! count as conflicts and a whole stack resting on one ground body still
//! colours flat.

use std::sync::Arc;

use axlephys_arena::Arena;
use axlephys_constraints::{ConstraintRow, ContactRow, SmallConstraintRow};
use axlephys_core::Scalar;
use axlephys_dynamics::{BodyHandle, RigidBody, SolverBodies};
use axlephys_threads::WorkerPool;

/// Below this many rows a colour is solved inline on the producer.
const MIN_ROWS_PER_TASK: usize = 8;

#[derive(Clone, Copy, Debug)]
pub(crate) enum RowKind {
    Large,
    Small,
    Contact,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RowRef {
    pub kind: RowKind,
    pub slot: u32,
}

pub(crate) struct Partition {
    colors: Vec<Arc<Vec<RowRef>>>,
    pub dirty: bool,
}

impl Partition {
    pub fn new() -> Self {
        Self { colors: Vec::new(), dirty: true }
    }

    pub fn rebuild(
        &mut self,
        bodies: &Arena<RigidBody>,
        large: &Arena<ConstraintRow>,
        small: &Arena<SmallConstraintRow>,
        contacts: &Arena<ContactRow>,
    ) {
        let mut colors: Vec<Vec<RowRef>> = Vec::new();
        // Conflict sets are keyed by the stable handle index, which is
        // bounded by the arena capacity.
        let mut body_colors: Vec<Vec<usize>> = vec![Vec::new(); bodies.capacity()];

        let mut place = |kind: RowKind, slot: usize, b1: BodyHandle, b2: BodyHandle| {
            let k1 = dynamic_key(bodies, b1);
            let k2 = dynamic_key(bodies, b2);
            let color = find_free_color(&body_colors, k1, k2);
            while colors.len() <= color {
                colors.push(Vec::new());
            }
            colors[color].push(RowRef { kind, slot: slot as u32 });
            if let Some(k) = k1 {
                body_colors[k].push(color);
            }
            if let Some(k) = k2 {
                body_colors[k].push(color);
            }
        };

        for slot in 0..large.active_count() {
            let row = large.slot(slot);
            place(RowKind::Large, slot, row.body1, row.body2);
        }
        for slot in 0..small.active_count() {
            let row = small.slot(slot);
            place(RowKind::Small, slot, row.body1, row.body2);
        }
        for slot in 0..contacts.active_count() {
            let row = contacts.slot(slot);
            place(RowKind::Contact, slot, row.body1, row.body2);
        }

        self.colors = colors.into_iter().map(Arc::new).collect();
        self.dirty = false;
        tracing::trace!(colors = self.colors.len(), "row partition rebuilt");
    }

    /// One iterate sweep over every active row, colour by colour.
    pub fn run_pass(&self, pool: &WorkerPool, ctx: SolverCtx, inv_dt: Scalar) {
        let workers = pool.thread_count();
        for color in &self.colors {
            if color.is_empty() {
                continue;
            }
            let chunk = color.len().div_ceil(workers).max(MIN_ROWS_PER_TASK);
            if workers == 1 || color.len() <= chunk {
                for row in color.iter() {
                    // SAFETY: rows of a colour are disjoint and this is the
                    // only thread touching them.
                    unsafe { ctx.iterate_row(*row, inv_dt) };
                }
                continue;
            }
            let mut start = 0;
            while start < color.len() {
                let end = (start + chunk).min(color.len());
                let color = Arc::clone(color);
                pool.add_task(move || {
                    for row in &color[start..end] {
                        // SAFETY: chunks of a colour are disjoint slot
                        // ranges over rows that share no dynamic body.
                        unsafe { ctx.iterate_row(*row, inv_dt) };
                    }
                });
                start = end;
            }
            pool.execute();
        }
    }
}

fn dynamic_key(bodies: &Arena<RigidBody>, handle: BodyHandle) -> Option<usize> {
    let body = bodies.get(handle).ok()?;
    if body.is_static() {
        None
    } else {
        Some(handle.index() as usize)
    }
}

fn find_free_color(
    body_colors: &[Vec<usize>],
    a: Option<usize>,
    b: Option<usize>,
) -> usize {
    let mut color = 0;
    loop {
        let a_free = a.map_or(true, |k| !body_colors[k].contains(&color));
        let b_free = b.map_or(true, |k| !body_colors[k].contains(&color));
        if a_free && b_free {
            return color;
        }
        color += 1;
    }
}

/// Raw access to the four arenas for tasks shipped to the pool. Copyable so
/// every chunk task can carry it by value.
#[derive(Clone, Copy)]
pub(crate) struct SolverCtx {
    view: SolverBodies<'static>,
    large: *mut ConstraintRow,
    small: *mut SmallConstraintRow,
    contacts: *mut ContactRow,
}

unsafe impl Send for SolverCtx {}
unsafe impl Sync for SolverCtx {}

impl SolverCtx {
    pub fn new(
        bodies: &mut Arena<RigidBody>,
        large: &mut Arena<ConstraintRow>,
        small: &mut Arena<SmallConstraintRow>,
        contacts: &mut Arena<ContactRow>,
    ) -> Self {
        Self {
            // SAFETY: the world keeps the arenas alive and structurally
            // frozen for the duration of the pass.
            view: unsafe { SolverBodies::from_raw(bodies as *mut _) },
            large: large.as_mut_ptr(),
            small: small.as_mut_ptr(),
            contacts: contacts.as_mut_ptr(),
        }
    }

    /// # Safety
    /// `row.slot` must lie in the active prefix of its arena and be visited
    /// by exactly one task during the current pass.
    unsafe fn iterate_row(&self, row: RowRef, inv_dt: Scalar) {
        match row.kind {
            RowKind::Large => {
                let record = &mut *self.large.add(row.slot as usize);
                record.iterate(&self.view, inv_dt);
            }
            RowKind::Small => {
                let record = &mut *self.small.add(row.slot as usize);
                record.iterate(&self.view, inv_dt);
            }
            RowKind::Contact => {
                let record = &mut *self.contacts.add(row.slot as usize);
                record.iterate(&self.view, inv_dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axlephys_constraints::{spring, SpringParams};
    use axlephys_core::vec3;
    use axlephys_dynamics::{BodyDesc, MassProps};

    #[test]
    fn rows_sharing_a_dynamic_body_get_distinct_colors() {
        let mut bodies: Arena<RigidBody> = Arena::with_capacity(8);
        let a = bodies
            .insert(RigidBody::new(BodyDesc { mass: MassProps::unit(), ..Default::default() }))
            .unwrap();
        let b = bodies
            .insert(RigidBody::new(BodyDesc {
                position: vec3(1.0, 0.0, 0.0),
                mass: MassProps::unit(),
                ..Default::default()
            }))
            .unwrap();
        let c = bodies
            .insert(RigidBody::new(BodyDesc {
                position: vec3(2.0, 0.0, 0.0),
                mass: MassProps::unit(),
                ..Default::default()
            }))
            .unwrap();

        let large: Arena<ConstraintRow> = Arena::with_capacity(4);
        let contacts: Arena<ContactRow> = Arena::with_capacity(4);
        let mut small: Arena<SmallConstraintRow> = Arena::with_capacity(4);
        let zero = vec3(0.0, 0.0, 0.0);
        small
            .insert(spring::new_row(a, b, zero, zero, 1.0, SpringParams::default()).unwrap())
            .unwrap();
        small
            .insert(spring::new_row(b, c, zero, zero, 1.0, SpringParams::default()).unwrap())
            .unwrap();
        small
            .insert(spring::new_row(a, c, zero, zero, 1.0, SpringParams::default()).unwrap())
            .unwrap();

        let mut partition = Partition::new();
        partition.rebuild(&bodies, &large, &small, &contacts);
        assert!(!partition.dirty);
        // A triangle of rows needs three colours.
        assert_eq!(partition.colors.len(), 3);
        let total: usize = partition.colors.iter().map(|c| c.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn static_bodies_do_not_conflict() {
        let mut bodies: Arena<RigidBody> = Arena::with_capacity(8);
        let ground = bodies.insert(RigidBody::new(BodyDesc::default())).unwrap();
        let m1 = bodies
            .insert(RigidBody::new(BodyDesc { mass: MassProps::unit(), ..Default::default() }))
            .unwrap();
        let m2 = bodies
            .insert(RigidBody::new(BodyDesc { mass: MassProps::unit(), ..Default::default() }))
            .unwrap();

        let large: Arena<ConstraintRow> = Arena::with_capacity(4);
        let contacts: Arena<ContactRow> = Arena::with_capacity(4);
        let mut small: Arena<SmallConstraintRow> = Arena::with_capacity(4);
        let zero = vec3(0.0, 0.0, 0.0);
        small
            .insert(spring::new_row(ground, m1, zero, zero, 1.0, SpringParams::default()).unwrap())
            .unwrap();
        small
            .insert(spring::new_row(ground, m2, zero, zero, 1.0, SpringParams::default()).unwrap())
            .unwrap();

        let mut partition = Partition::new();
        partition.rebuild(&bodies, &large, &small, &contacts);
        // Both rows hang off the same static body and still share a colour.
        assert_eq!(partition.colors.len(), 1);
    }
}
