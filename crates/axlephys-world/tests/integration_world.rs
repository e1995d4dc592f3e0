//! End-to-end scenarios: whole-world stepping, limits, sleeping, and the
//! worker pool.

use axlephys_world::constraints::{ContactPointDesc, HingeParams, PlaneParams, SpringParams};
use axlephys_world::{
    dynamic_sphere, static_body, vec3, BodyDesc, MassProps, SleepConfig, StepConfig, ThreadModel,
    World, WorldBuilder, WorldCapacity,
};

use axlephys_threads::WorkerPool;

fn no_sleep() -> SleepConfig {
    SleepConfig { velocity_threshold: 0.05, time_until_sleep: 1.0e9 }
}

fn unit_body(position: glam::Vec3A) -> BodyDesc {
    BodyDesc { position, mass: MassProps::unit(), ..Default::default() }
}

#[test]
fn two_body_hinge_constrains_off_axis_spin() {
    let mut world = WorldBuilder::new().with_sleep_config(no_sleep()).build();
    let anchor = world.add_body(static_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let swinger = world
        .add_body(BodyDesc {
            position: vec3(0.0, 2.0, 0.0),
            angular_velocity: vec3(1.0, 0.0, 0.0),
            mass: MassProps::unit(),
            ..Default::default()
        })
        .unwrap();
    world
        .add_hinge_angle(anchor, swinger, vec3(0.0, 1.0, 0.0), None, HingeParams::default())
        .unwrap();

    for _ in 0..60 {
        world.step(1.0 / 60.0, false).unwrap();
    }

    let body = world.body(swinger).unwrap();
    assert!(body.angular_velocity.x.abs() <= 1e-3, "got {:?}", body.angular_velocity);
    // The anchor is static and must never pick up any velocity.
    let anchor_body = world.body(anchor).unwrap();
    assert_eq!(anchor_body.velocity, glam::Vec3A::ZERO);
    assert_eq!(anchor_body.angular_velocity, glam::Vec3A::ZERO);
    // Orientations stay unit length through the whole run.
    assert!((body.orientation.length() - 1.0).abs() < 1e-6);
}

#[test]
fn hinge_spin_along_the_axis_stays_free() {
    let mut world = WorldBuilder::new()
        .with_sleep_config(no_sleep())
        .with_gravity(vec3(0.0, 0.0, 0.0))
        .build();
    let anchor = world.add_body(static_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let swinger = world
        .add_body(BodyDesc {
            position: vec3(0.0, 2.0, 0.0),
            angular_velocity: vec3(0.0, 2.0, 0.0),
            mass: MassProps::unit(),
            ..Default::default()
        })
        .unwrap();
    world
        .add_hinge_angle(anchor, swinger, vec3(0.0, 1.0, 0.0), None, HingeParams::default())
        .unwrap();

    for _ in 0..60 {
        world.step(1.0 / 60.0, false).unwrap();
    }
    let w = world.body(swinger).unwrap().angular_velocity;
    assert!((w.y - 2.0).abs() < 1e-3, "free-axis spin must persist, got {w:?}");
}

#[test]
fn point_on_plane_min_limit_supports_a_falling_body() {
    let mut world = WorldBuilder::new().with_sleep_config(no_sleep()).build();
    let plane = world.add_body(static_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let mover = world.add_body(unit_body(vec3(0.0, -0.2, 0.0))).unwrap();
    world
        .add_point_on_plane(
            plane,
            mover,
            vec3(0.0, 1.0, 0.0),
            vec3(0.0, 0.0, 0.0),
            vec3(0.0, 0.0, 0.0),
            (0.0, 0.5),
            PlaneParams::default(),
        )
        .unwrap();

    world.step(1.0 / 60.0, false).unwrap();
    let body = world.body(mover).unwrap();
    assert!(
        body.velocity.y >= 0.0,
        "the min limit must push the anchor back up, got {}",
        body.velocity.y
    );
}

#[test]
fn point_on_plane_inside_band_is_inert_under_gravity() {
    let mut world = WorldBuilder::new().with_sleep_config(no_sleep()).build();
    let plane = world.add_body(static_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let mover = world.add_body(unit_body(vec3(0.0, 0.3, 0.0))).unwrap();
    world
        .add_point_on_plane(
            plane,
            mover,
            vec3(0.0, 1.0, 0.0),
            vec3(0.0, 0.0, 0.0),
            vec3(0.0, 0.0, 0.0),
            (0.0, 0.5),
            PlaneParams::default(),
        )
        .unwrap();

    world.step(1.0 / 60.0, false).unwrap();
    let body = world.body(mover).unwrap();
    // Inside the band the row writes nothing: plain free fall.
    assert!((body.velocity.y - (-9.81 / 60.0)).abs() < 1e-5);
}

#[test]
fn removing_a_body_detaches_its_rows() {
    let mut world = WorldBuilder::new().with_sleep_config(no_sleep()).build();
    let mut handles = Vec::new();
    for i in 0..10 {
        handles.push(world.add_body(unit_body(vec3(i as f32, 0.0, 0.0))).unwrap());
    }
    let spring = world
        .add_spring(
            handles[3],
            handles[4],
            vec3(0.0, 0.0, 0.0),
            vec3(0.0, 0.0, 0.0),
            1.0,
            SpringParams::default(),
        )
        .unwrap();

    world.remove_body(handles[3]).unwrap();
    assert_eq!(world.body_count(), 9);
    assert!(world.small_constraint(spring).is_err(), "orphaned rows must be freed");
    // Survivors, including the record that filled the hole, still resolve.
    for (i, handle) in handles.iter().enumerate() {
        if i == 3 {
            assert!(world.body(*handle).is_err());
        } else {
            assert!((world.body(*handle).unwrap().position.x - i as f32).abs() < 1e-6);
        }
    }
    // The world still steps cleanly afterwards.
    world.step(1.0 / 60.0, false).unwrap();
}

#[test]
fn substep_split_differs_from_one_big_solve() {
    let build = |substeps: u32, iterations: (u32, u32)| {
        let mut world = WorldBuilder::new()
            .with_sleep_config(no_sleep())
            .with_step_config(StepConfig {
                solver_iterations: iterations,
                substep_count: substeps,
                ..Default::default()
            })
            .build();
        let anchor = world.add_body(static_body(vec3(0.0, 4.0, 0.0))).unwrap();
        let bob = world.add_body(dynamic_sphere(vec3(2.0, 4.0, 0.0), 0.25)).unwrap();
        world
            .add_spring(
                anchor,
                bob,
                vec3(0.0, 0.0, 0.0),
                vec3(0.0, 0.0, 0.0),
                1.0,
                SpringParams::default(),
            )
            .unwrap();
        (world, bob)
    };

    let (mut split, bob_a) = build(4, (2, 1));
    let (mut whole, bob_b) = build(1, (12, 1));
    split.step(1.0 / 60.0, false).unwrap();
    whole.step(1.0 / 60.0, false).unwrap();

    let pa = split.body(bob_a).unwrap().position;
    let pb = whole.body(bob_b).unwrap().position;
    assert!(pa.is_finite() && pb.is_finite());
    // Twelve applications through four substeps re-integrate between solves;
    // the trajectories must not coincide.
    assert!((pa - pb).length() > 1e-7, "substepping must change the result");
}

#[test]
fn identical_runs_hash_identically() {
    let run = || {
        let mut world = WorldBuilder::new().with_sleep_config(no_sleep()).build();
        let anchor = world.add_body(static_body(vec3(0.0, 4.0, 0.0))).unwrap();
        let bob = world.add_body(dynamic_sphere(vec3(1.5, 4.0, 0.0), 0.25)).unwrap();
        world
            .add_spring(
                anchor,
                bob,
                vec3(0.0, 0.0, 0.0),
                vec3(0.0, 0.0, 0.0),
                1.0,
                SpringParams::default(),
            )
            .unwrap();
        for _ in 0..30 {
            world.step(1.0 / 60.0, false).unwrap();
        }
        world.state_hash()
    };
    assert_eq!(run(), run());
}

#[test]
fn resting_island_falls_asleep_and_wakes_on_impulse() {
    let mut world = WorldBuilder::new()
        .with_sleep_config(SleepConfig { velocity_threshold: 0.05, time_until_sleep: 0.25 })
        .with_gravity(vec3(0.0, 0.0, 0.0))
        .build();
    let a = world.add_body(unit_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let b = world.add_body(unit_body(vec3(2.0, 0.0, 0.0))).unwrap();
    world
        .add_spring(a, b, vec3(0.0, 0.0, 0.0), vec3(0.0, 0.0, 0.0), 2.0, SpringParams::default())
        .unwrap();

    for _ in 0..30 {
        world.step(1.0 / 60.0, false).unwrap();
    }
    assert_eq!(world.awake_body_count(), 0, "the island must be asleep");
    assert_eq!(world.body(a).unwrap().velocity, glam::Vec3A::ZERO);

    world.apply_impulse(b, vec3(0.0, 1.0, 0.0)).unwrap();
    assert_eq!(world.awake_body_count(), 2, "an impulse must wake the whole island");
    let stats = world.step(1.0 / 60.0, false).unwrap();
    assert!(stats.small_rows > 0, "the spring row must be solving again");
}

#[test]
fn a_moving_neighbour_keeps_the_island_awake() {
    let mut world = WorldBuilder::new()
        .with_sleep_config(SleepConfig { velocity_threshold: 0.05, time_until_sleep: 0.25 })
        .with_gravity(vec3(0.0, 0.0, 0.0))
        .build();
    let still = world.add_body(unit_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let mover = world
        .add_body(BodyDesc {
            position: vec3(2.0, 0.0, 0.0),
            angular_velocity: vec3(0.0, 4.0, 0.0),
            mass: MassProps::unit(),
            ..Default::default()
        })
        .unwrap();
    world
        .add_spring(
            still,
            mover,
            vec3(0.0, 0.0, 0.0),
            vec3(0.0, 0.0, 0.0),
            2.0,
            SpringParams::default(),
        )
        .unwrap();

    for _ in 0..60 {
        world.step(1.0 / 60.0, false).unwrap();
    }
    // The spinning neighbour holds the whole island awake.
    assert_eq!(world.awake_body_count(), 2);
}

#[test]
fn contact_manifold_supports_a_dropped_body() {
    let mut world = WorldBuilder::new().with_sleep_config(no_sleep()).build();
    let ground = world.add_body(static_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let ball = world
        .add_body(BodyDesc {
            position: vec3(0.0, 0.45, 0.0),
            velocity: vec3(0.0, -2.0, 0.0),
            mass: MassProps::from_sphere(0.5, 1000.0),
            ..Default::default()
        })
        .unwrap();
    let contact = world.add_contact(ground, ball, 0.6, 0.0).unwrap();
    world
        .push_contact_points(
            contact,
            &[ContactPointDesc {
                point_on_1: vec3(0.0, 0.0, 0.0),
                point_on_2: vec3(0.0, -0.05, 0.0),
                normal: vec3(0.0, 1.0, 0.0),
                penetration: 0.05,
            }],
        )
        .unwrap();

    let stats = world.step(1.0 / 60.0, false).unwrap();
    assert_eq!(stats.contact_rows, 1);
    let body = world.body(ball).unwrap();
    assert!(body.velocity.y > -2.0, "the contact must brake the fall");
}

#[test]
fn pool_runs_match_the_serial_reference() {
    // Disjoint pairs keep every row in one colour, so the parallel sweep is
    // order-identical to the serial one and the trajectories must agree.
    let build = || {
        let mut world = WorldBuilder::new()
            .with_capacity(WorldCapacity { body_count: 128, ..Default::default() })
            .with_sleep_config(no_sleep())
            .with_step_config(StepConfig {
                thread_model: ThreadModel::Regular,
                ..Default::default()
            })
            .build();
        let mut probes = Vec::new();
        for pair in 0..24 {
            let x = pair as f32 * 3.0;
            let anchor = world.add_body(static_body(vec3(x, 4.0, 0.0))).unwrap();
            let bob = world
                .add_body(BodyDesc {
                    position: vec3(x + 1.2, 4.0, 0.0),
                    velocity: vec3(0.0, 0.4, 0.0),
                    mass: MassProps::unit(),
                    ..Default::default()
                })
                .unwrap();
            world
                .add_spring(
                    anchor,
                    bob,
                    vec3(0.0, 0.0, 0.0),
                    vec3(0.0, 0.0, 0.0),
                    1.0,
                    SpringParams::default(),
                )
                .unwrap();
            probes.push(bob);
        }
        (world, probes)
    };

    let (mut serial, serial_probes) = build();
    for _ in 0..4 {
        serial.step(1.0 / 60.0, false).unwrap();
    }

    let pool = WorkerPool::global();
    let original = pool.thread_count();
    pool.change_thread_count(4).unwrap();

    let (mut threaded, threaded_probes) = build();
    for _ in 0..2 {
        threaded.step(1.0 / 60.0, true).unwrap();
    }
    pool.change_thread_count(1).unwrap();
    for _ in 0..2 {
        threaded.step(1.0 / 60.0, true).unwrap();
    }
    pool.change_thread_count(original.max(1)).unwrap();

    for (a, b) in serial_probes.iter().zip(threaded_probes.iter()) {
        let pa = serial.body(*a).unwrap().position;
        let pb = threaded.body(*b).unwrap().position;
        assert!(
            (pa - pb).length() < 1e-5,
            "threaded trajectory diverged: {pa:?} vs {pb:?}"
        );
    }
}

#[test]
fn step_rejects_bad_arguments() {
    let mut world = WorldBuilder::new().build();
    assert!(world.step(0.0, false).is_err());
    assert!(world.step(-1.0, false).is_err());
    assert!(world.step(f32::NAN, false).is_err());

    let mut config = world.step_config();
    config.substep_count = 0;
    world.set_step_config(config);
    assert!(world.step(1.0 / 60.0, false).is_err());
}

#[test]
fn capacity_is_enforced_at_the_world_surface() {
    let mut world = WorldBuilder::new()
        .with_capacity(WorldCapacity {
            body_count: 2,
            contact_count: 1,
            constraint_count: 1,
            small_constraint_count: 1,
        })
        .build();
    let a = world.add_body(unit_body(vec3(0.0, 0.0, 0.0))).unwrap();
    let b = world.add_body(unit_body(vec3(1.0, 0.0, 0.0))).unwrap();
    assert!(world.add_body(unit_body(vec3(2.0, 0.0, 0.0))).is_err());
    world
        .add_spring(a, b, vec3(0.0, 0.0, 0.0), vec3(0.0, 0.0, 0.0), 1.0, SpringParams::default())
        .unwrap();
    assert!(world
        .add_spring(a, b, vec3(0.0, 0.0, 0.0), vec3(0.0, 0.0, 0.0), 1.0, SpringParams::default())
        .is_err());
}
