//! Small deterministic scenes exercising each row kind end to end.

use anyhow::Result;

use axlephys_world::constraints::{ContactPointDesc, HingeParams, PlaneParams, SpringParams};
use axlephys_world::{
    dynamic_sphere, static_body, vec3, BodyDesc, MassProps, World, WorldBuilder,
};

pub fn run() -> Result<()> {
    hinge_chain()?;
    slider_with_stops()?;
    resting_stack()?;
    Ok(())
}

/// Five links hanging off a static anchor through hinge-angle rows.
fn hinge_chain() -> Result<()> {
    let mut world = WorldBuilder::new().build();
    let mut previous = world.add_body(static_body(vec3(0.0, 10.0, 0.0)))?;
    let mut links = Vec::new();
    for i in 0..5 {
        let link = world.add_body(BodyDesc {
            position: vec3(0.0, 9.0 - i as f32, 0.0),
            angular_velocity: vec3(0.6, 0.0, 0.2 * i as f32),
            mass: MassProps::unit(),
            ..Default::default()
        })?;
        world.add_hinge_angle(
            previous,
            link,
            vec3(0.0, 0.0, 1.0),
            Some((-1.0, 1.0)),
            HingeParams::default(),
        )?;
        links.push(link);
        previous = link;
    }

    let mut stats = Default::default();
    for _ in 0..240 {
        stats = world.step(1.0 / 60.0, false)?;
    }
    report("hinge-chain", &world, &stats);
    for link in links {
        let w = world.body(link)?.angular_velocity;
        anyhow::ensure!(w.is_finite(), "link spun out: {w:?}");
    }
    Ok(())
}

/// A mass riding a vertical slider band, bouncing between the two stops.
fn slider_with_stops() -> Result<()> {
    let mut world = WorldBuilder::new().build();
    let rail = world.add_body(static_body(vec3(0.0, 0.0, 0.0)))?;
    let slider = world.add_body(BodyDesc {
        position: vec3(0.0, 0.8, 0.0),
        mass: MassProps::unit(),
        ..Default::default()
    })?;
    world.add_point_on_plane(
        rail,
        slider,
        vec3(0.0, 1.0, 0.0),
        vec3(0.0, 0.0, 0.0),
        vec3(0.0, 0.0, 0.0),
        (0.2, 1.0),
        PlaneParams::default(),
    )?;

    let mut stats = Default::default();
    for _ in 0..240 {
        stats = world.step(1.0 / 60.0, false)?;
    }
    report("slider-with-stops", &world, &stats);
    let y = world.body(slider)?.position.y;
    anyhow::ensure!(y > -0.5 && y < 1.5, "slider escaped its band: y={y}");
    Ok(())
}

/// A sphere dropped onto a manifold fed by hand, coming to rest and sleeping.
fn resting_stack() -> Result<()> {
    let mut world = WorldBuilder::new().build();
    let ground = world.add_body(static_body(vec3(0.0, 0.0, 0.0)))?;
    let ball = world.add_body(dynamic_sphere(vec3(0.0, 0.5, 0.0), 0.5))?;
    let contact = world.add_contact(ground, ball, 0.6, 0.0)?;

    let mut stats = Default::default();
    for _ in 0..240 {
        // Stand-in for a narrowphase: refresh the single support point from
        // the current ball height.
        let height = world.body(ball)?.position.y;
        let penetration = (0.5 - height).max(0.0);
        world.push_contact_points(
            contact,
            &[ContactPointDesc {
                point_on_1: vec3(0.0, 0.0, 0.0),
                point_on_2: vec3(0.0, height - 0.5, 0.0),
                normal: vec3(0.0, 1.0, 0.0),
                penetration,
            }],
        )?;
        stats = world.step(1.0 / 60.0, false)?;
    }
    report("resting-stack", &world, &stats);
    let body = world.body(ball)?;
    anyhow::ensure!(body.position.y > 0.0, "ball fell through the support");
    Ok(())
}

fn report(name: &str, world: &World, stats: &axlephys_world::StepStats) {
    let hash = world.state_hash();
    println!(
        "{name:18} rows={:3} small={:3} contacts={:3} islands={:2} sleeping={:2} hash={:02x}{:02x}{:02x}{:02x}",
        stats.constraint_rows,
        stats.small_rows,
        stats.contact_rows,
        stats.islands,
        stats.sleeping_bodies,
        hash[0],
        hash[1],
        hash[2],
        hash[3],
    );
}
