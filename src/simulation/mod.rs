pub mod bem;
pub mod body;
pub mod collection;
pub mod concurrency;
pub mod convection;
pub mod diffusion;
pub mod features;
pub mod kernels;
pub mod merge;
pub mod neighborhood;
pub mod nnls;
pub mod points;
pub mod reflect;
pub mod scene;
pub mod simulation;
pub mod split;
pub mod status;
pub mod surfaces;
pub mod vrm;

#[cfg(feature = "double-precision")]
pub mod floating_type_mod {
    pub type FT = f64;
    pub use std::f64::consts::{FRAC_1_PI, PI, TAU};
}

#[cfg(not(feature = "double-precision"))]
pub mod floating_type_mod {
    pub type FT = f32;
    pub use std::f32::consts::{FRAC_1_PI, PI, TAU};
}

use floating_type_mod::FT;

use nalgebra::{SMatrix, SVector};

/// Storage vector and tensor types. BEM and NNLS solves always run in `f64`
/// regardless of the storage float.
pub type V3 = SVector<FT, 3>;
pub type M3 = SMatrix<FT, 3, 3>;

pub type V3D = SVector<f64, 3>;

pub fn vec3f(x: FT, y: FT, z: FT) -> V3 {
    [x, y, z].into()
}

/// Number of values per particle in a flat packet: x,y,z, sx,sy,sz, radius.
pub const PARTICLE_PACKET_STRIDE: usize = 7;
/// Number of values per field point in a flat packet: x,y,z.
pub const POINT_PACKET_STRIDE: usize = 3;

#[allow(dead_code)]
pub fn assert_ft_approx_eq(a: FT, b: FT, tolerance: FT, context: impl Fn() -> String) {
    if (a - b).abs() > tolerance {
        panic!("{}: {} != {} (tolerance {})", context(), a, b, tolerance);
    }
}

pub use simulation::*;
