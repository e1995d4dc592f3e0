use axlephys_core::{Mat3, Scalar, Vec3};

/// Mass and body-frame inertia, as fed to body construction.
#[derive(Copy, Clone, Debug)]
pub struct MassProps {
    pub mass: Scalar,
    pub inv_mass: Scalar,
    pub inertia: Mat3,
}

impl MassProps {
    /// Finite or infinite mass with a diagonal inertia tensor built from
    /// principal moments. An infinite mass yields a zero inverse.
    fn from_principal(mass: Scalar, principal: Vec3) -> Self {
        Self { mass, inv_mass: mass.recip(), inertia: Mat3::from_diagonal(principal.into()) }
    }

    /// Static/kinematic bodies: nothing moves them.
    pub fn infinite() -> Self {
        Self::from_principal(Scalar::INFINITY, Vec3::ONE)
    }

    pub fn from_sphere(radius: Scalar, density: Scalar) -> Self {
        let mass = density * (4.0 / 3.0) * core::f32::consts::PI * radius.powi(3);
        // Solid sphere: 2/5 m r^2 about every axis.
        Self::from_principal(mass, Vec3::splat(0.4 * mass * radius.powi(2)))
    }

    pub fn from_box(half: Vec3, density: Scalar) -> Self {
        let extents = half * 2.0;
        let mass = density * extents.x * extents.y * extents.z;
        // Solid cuboid: each axis resists by the squared extents of the
        // other two.
        let sq = extents * extents;
        let principal = Vec3::new(sq.y + sq.z, sq.x + sq.z, sq.x + sq.y) * (mass / 12.0);
        Self::from_principal(mass, principal)
    }

    /// Unit mass with a unit inertia tensor; handy for tests and simple rigs.
    pub fn unit() -> Self {
        Self::from_principal(1.0, Vec3::ONE)
    }

    /// Body-frame inverse inertia; zero for infinite mass.
    pub fn inverse_inertia(&self) -> Mat3 {
        if self.inv_mass == 0.0 {
            Mat3::ZERO
        } else {
            self.inertia.inverse()
        }
    }
}
