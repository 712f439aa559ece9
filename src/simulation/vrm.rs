use nalgebra::{DMatrix, DVector};

use crate::{
    floating_type_mod::FT,
    neighborhood::NeighborTree,
    nnls::{nnls, residual},
    points::Points,
    V3, V3D,
};

/// How many nominal separations around a particle count as its
/// redistribution neighborhood. Chosen to cover the tetrahedral insertion
/// sites with margin.
const SEARCH_RADIUS_SCALE: FT = 2.0;

/// Acceptable moment-matching residual relative to the unit zeroth moment.
const MOMENT_RESIDUAL_TOL: f64 = 1e-6;

/// Tetrahedral lattice directions for filling rank-deficient neighborhoods.
const TETRA_SITES: [[FT; 3]; 4] = [
    [1., 1., 1.],
    [1., -1., -1.],
    [-1., 1., -1.],
    [-1., -1., 1.],
];

/// The Vorticity Redistribution Method: per-particle non-negative
/// moment-matching of the diffused strength over the local neighborhood.
pub struct Vrm {
    /// Particles with strength magnitude below this are not diffused and are
    /// dropped after their strength has been handed to neighbors.
    pub ignore_thresh: f64,
    /// Interpret `ignore_thresh` (and `adapt_thresh`) relative to the
    /// strongest particle instead of absolutely.
    pub relative_thresh: bool,
    /// Allow weak particles to grow their core radius.
    pub adaptive_radii: bool,
    /// Strength threshold below which a particle may adapt its radius.
    pub adapt_thresh: f64,
    /// Maximum spatial gradient of the core radius under adaptation.
    pub radius_lapse: FT,
}

impl Default for Vrm {
    fn default() -> Vrm {
        Vrm {
            ignore_thresh: 1e-5,
            relative_thresh: true,
            adaptive_radii: false,
            adapt_thresh: 1e-3,
            radius_lapse: 0.1,
        }
    }
}

impl Vrm {
    /// One diffusion pass over an active particle collection.
    ///
    /// May append new zero-strength particles where the neighborhood cannot
    /// match the diffusion moments, and removes particles whose strength has
    /// fallen below the ignore threshold (their strength goes to neighbors
    /// first). Total strength is conserved; indices are not stable.
    pub fn diffuse_all(&self, pts: &mut Points, h_nu: FT, nom_sep: FT, v_delta: FT) {
        let n0 = pts.n();
        if n0 == 0 {
            return;
        }

        let max_str = pts.e.strength.iter().map(|s| s.norm()).fold(0., FT::max);
        let ignore_f64 = if self.relative_thresh {
            self.ignore_thresh * max_str as f64
        } else {
            self.ignore_thresh
        };
        let ignore = ignore_f64 as FT;

        let search_radius = SEARCH_RADIUS_SCALE * nom_sep;
        let tree = NeighborTree::build(&pts.e.pos);

        // diffusion of a point vortex over dt in neighborhood-scaled
        // coordinates: unit zeroth moment, zero first moments, isotropic
        // second moment of 2 h_nu^2
        let second_moment = 2.0 * (h_nu / nom_sep) as f64 * (h_nu / nom_sep) as f64;
        let mut rhs = DVector::<f64>::zeros(10);
        rhs[0] = 1.0;
        rhs[4] = second_moment;
        rhs[5] = second_moment;
        rhs[6] = second_moment;

        // redistributed strength accumulates here in f64
        let mut ds: Vec<V3D> = vec![V3D::zeros(); n0];
        // particles appended this pass: position plus accumulator
        let mut new_pos: Vec<V3> = Vec::new();
        let mut new_ds: Vec<V3D> = Vec::new();

        for i in 0..n0 {
            let si = pts.e.strength[i];
            if si.norm() <= ignore {
                // weak particles are not diffused; the drop pass below hands
                // their strength to neighbors
                ds[i] += V3D::new(si.x as f64, si.y as f64, si.z as f64);
                continue;
            }

            let xi = pts.e.pos[i];
            let mut neighbors = gather_neighbors(&tree, &pts.e.pos, &new_pos, xi, search_radius);
            let mut frac = solve_fractions(&neighbors, xi, nom_sep, &rhs);

            if residual_too_large(&neighbors, xi, nom_sep, &rhs, &frac) {
                // rank-deficient neighborhood: seed the tetrahedral lattice
                // sites that are not already occupied, then re-solve
                for site in &TETRA_SITES {
                    let offs = V3::new(site[0], site[1], site[2]).normalize() * nom_sep;
                    let candidate = xi + offs;
                    let occupied = neighbors
                        .iter()
                        .any(|nb| (nb.pos - candidate).norm() < 0.55 * nom_sep);
                    if !occupied {
                        new_pos.push(candidate);
                        new_ds.push(V3D::zeros());
                    }
                }
                neighbors = gather_neighbors(&tree, &pts.e.pos, &new_pos, xi, search_radius);
                frac = solve_fractions(&neighbors, xi, nom_sep, &rhs);
                if residual_too_large(&neighbors, xi, nom_sep, &rhs, &frac) {
                    println!(
                        "    VRM: particle {} kept a residual above {:.0e} with {} neighbors",
                        i,
                        MOMENT_RESIDUAL_TOL,
                        neighbors.len()
                    );
                }
            }

            // exact unit sum so the total strength is conserved bit-for-bit
            // in the f64 accumulators
            let fsum: f64 = frac.iter().sum();
            assert!(fsum > 0., "VRM produced an all-zero fraction vector");
            let sid = V3D::new(si.x as f64, si.y as f64, si.z as f64) / fsum;
            for (nb, &f) in neighbors.iter().zip(frac.iter()) {
                if f == 0.0 {
                    continue;
                }
                match nb.slot {
                    Slot::Old(j) => ds[j] += f * sid,
                    Slot::New(j) => new_ds[j] += f * sid,
                }
            }
        }

        // write back, appending the inserted particles
        for i in 0..n0 {
            pts.e.strength[i] = V3::new(ds[i].x as FT, ds[i].y as FT, ds[i].z as FT);
        }
        let appended = new_pos.len();
        if appended > 0 {
            pts.e.extend(appended);
            for k in 0..appended {
                pts.e.pos[n0 + k] = new_pos[k];
                pts.e.strength[n0 + k] = V3::new(new_ds[k].x as FT, new_ds[k].y as FT, new_ds[k].z as FT);
                pts.e.radius[n0 + k] = v_delta;
            }
        }

        self.drop_weak_particles(pts, ignore, search_radius);

        if self.adaptive_radii {
            self.adapt_radii(pts, search_radius);
        }

        for s in &pts.e.strength {
            assert!(s.iter().all(|v| v.is_finite()), "VRM produced a non-finite strength");
        }

        pts.update_max_str();
    }

    /// Remove particles whose strength magnitude is at or below the ignore
    /// threshold, first redistributing their strength evenly among their
    /// in-range neighbors. Isolated weak particles are kept.
    fn drop_weak_particles(&self, pts: &mut Points, ignore: FT, search_radius: FT) {
        if ignore <= 0. {
            return;
        }

        let tree = NeighborTree::build(&pts.e.pos);
        let n = pts.n();
        let mut receive: Vec<V3D> = vec![V3D::zeros(); n];
        let mut drop = vec![false; n];

        for i in 0..n {
            let si = pts.e.strength[i];
            if si.norm() > ignore {
                continue;
            }
            let neighbors: Vec<usize> = tree
                .within(pts.e.pos[i], search_radius)
                .filter(|&j| j != i)
                .collect();
            if neighbors.is_empty() {
                continue;
            }
            let share = V3D::new(si.x as f64, si.y as f64, si.z as f64) / neighbors.len() as f64;
            for &j in &neighbors {
                receive[j] += share;
            }
            drop[i] = true;
        }

        for j in 0..n {
            if receive[j] != V3D::zeros() {
                let s = pts.e.strength[j];
                pts.e.strength[j] = V3::new(
                    (s.x as f64 + receive[j].x) as FT,
                    (s.y as f64 + receive[j].y) as FT,
                    (s.z as f64 + receive[j].z) as FT,
                );
            }
        }

        // swap-to-end compaction; receivers of redistributed strength are
        // never themselves dropped in the same pass
        let mut last = n;
        let mut i = 0;
        while i < last {
            if drop[i] && receive[i] == V3D::zeros() {
                last -= 1;
                pts.e.swap(i, last);
                drop.swap(i, last);
                receive.swap(i, last);
            } else {
                i += 1;
            }
        }
        pts.e.truncate(last);
    }

    /// Let weak particles grow their core radius toward the local radius
    /// envelope, capped by the configured lapse rate.
    fn adapt_radii(&self, pts: &mut Points, search_radius: FT) {
        let max_str = pts.e.strength.iter().map(|s| s.norm()).fold(0., FT::max);
        let adapt_f64 = if self.relative_thresh {
            self.adapt_thresh * max_str as f64
        } else {
            self.adapt_thresh
        };
        let adapt = adapt_f64 as FT;

        let tree = NeighborTree::build(&pts.e.pos);
        let n = pts.n();
        let mut new_radius = pts.e.radius.clone();

        for i in 0..n {
            if pts.e.strength[i].norm() >= adapt {
                continue;
            }
            let mut envelope = FT::INFINITY;
            for j in tree.within(pts.e.pos[i], search_radius) {
                if j == i {
                    continue;
                }
                let dist = (pts.e.pos[j] - pts.e.pos[i]).norm();
                envelope = envelope.min(pts.e.radius[j] + self.radius_lapse * dist);
            }
            if envelope.is_finite() && envelope > pts.e.radius[i] {
                new_radius[i] = envelope;
            }
        }

        pts.e.radius = new_radius;
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Old(usize),
    New(usize),
}

struct Neighbor {
    slot: Slot,
    pos: V3,
}

fn gather_neighbors(
    tree: &NeighborTree,
    positions: &[V3],
    new_pos: &[V3],
    xi: V3,
    radius: FT,
) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = tree
        .within(xi, radius)
        .map(|j| Neighbor {
            slot: Slot::Old(j),
            pos: positions[j],
        })
        .collect();
    // particles inserted earlier in this pass are not in the tree yet
    for (k, &p) in new_pos.iter().enumerate() {
        if (p - xi).norm_squared() <= radius * radius {
            neighbors.push(Neighbor {
                slot: Slot::New(k),
                pos: p,
            });
        }
    }
    neighbors
}

fn moment_matrix(neighbors: &[Neighbor], xi: V3, nom_sep: FT) -> DMatrix<f64> {
    let m = neighbors.len();
    let mut a = DMatrix::<f64>::zeros(10, m);
    for (k, nb) in neighbors.iter().enumerate() {
        let xi_k = (nb.pos - xi) / nom_sep;
        let (dx, dy, dz) = (xi_k.x as f64, xi_k.y as f64, xi_k.z as f64);
        a[(0, k)] = 1.0;
        a[(1, k)] = dx;
        a[(2, k)] = dy;
        a[(3, k)] = dz;
        a[(4, k)] = dx * dx;
        a[(5, k)] = dy * dy;
        a[(6, k)] = dz * dz;
        a[(7, k)] = dx * dy;
        a[(8, k)] = dx * dz;
        a[(9, k)] = dy * dz;
    }
    a
}

fn solve_fractions(neighbors: &[Neighbor], xi: V3, nom_sep: FT, rhs: &DVector<f64>) -> DVector<f64> {
    let a = moment_matrix(neighbors, xi, nom_sep);
    nnls(&a, rhs)
}

fn residual_too_large(
    neighbors: &[Neighbor],
    xi: V3,
    nom_sep: FT,
    rhs: &DVector<f64>,
    frac: &DVector<f64>,
) -> bool {
    let a = moment_matrix(neighbors, xi, nom_sep);
    residual(&a, rhs, frac) > MOMENT_RESIDUAL_TOL
}

#[cfg(test)]
fn lattice_cloud(nx: i32, spacing: FT) -> Points {
    use crate::collection::{ElementKind, Motion};

    let mut packet: Vec<FT> = Vec::new();
    for i in -nx..=nx {
        for j in -nx..=nx {
            for k in -nx..=nx {
                let x = spacing * i as FT;
                let y = spacing * j as FT;
                let z = spacing * k as FT;
                let r2 = x * x + y * y + z * z;
                let w = (-r2 / (spacing * spacing * 4.)).exp();
                packet.extend_from_slice(&[x, y, z, 0.1 * w, -0.2 * w, w, 1.5 * spacing]);
            }
        }
    }
    Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None)
}

#[test]
fn vrm_conserves_total_strength_test() {
    let h_nu: FT = 0.05;
    let nom_sep = h_nu * (8.0 as FT).sqrt();
    let mut pts = lattice_cloud(2, nom_sep);

    let before = pts.total_circulation();
    let max_before = pts.max_str();

    let vrm = Vrm::default();
    vrm.diffuse_all(&mut pts, h_nu, nom_sep, 1.5 * nom_sep);

    let after = pts.total_circulation();

    #[cfg(feature = "double-precision")]
    let tolerance = 1e-10 * max_before;
    #[cfg(not(feature = "double-precision"))]
    let tolerance = 1e-4 * max_before * pts.n() as FT;

    for d in 0..3 {
        assert!(
            (after[d] - before[d]).abs() <= tolerance,
            "component {} drifted: {} -> {}",
            d,
            before[d],
            after[d]
        );
    }
}

#[test]
fn vrm_fills_isolated_neighborhood_test() {
    use crate::collection::{ElementKind, Motion};

    // a single particle has a rank-deficient neighborhood; the VRM must
    // insert lattice sites to make the moment system solvable
    let packet: Vec<FT> = vec![0., 0., 0., 0., 0., 1., 0.2];
    let mut pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);

    let h_nu: FT = 0.05;
    let nom_sep = h_nu * (8.0 as FT).sqrt();
    let vrm = Vrm::default();
    vrm.diffuse_all(&mut pts, h_nu, nom_sep, 1.5 * nom_sep);

    assert!(pts.n() > 1, "no particles were inserted");
    let total = pts.total_circulation();
    assert!((total - V3::new(0., 0., 1.)).norm() < 1e-4);
    assert!(!pts.has_nan());
}

#[test]
fn vrm_second_moment_growth_test() {
    use crate::collection::{ElementKind, Motion};

    // single-sign cloud: each accepted redistribution matches the second
    // moment of one step of heat diffusion, so the strength-weighted second
    // moment of the whole cloud grows by 6 h_nu^2 per unit strength
    let h_nu: FT = 0.05;
    let nom_sep = h_nu * (8.0 as FT).sqrt();
    let mut packet: Vec<FT> = Vec::new();
    for i in -2i32..=2 {
        for j in -2i32..=2 {
            for k in -2i32..=2 {
                let x = nom_sep * i as FT;
                let y = nom_sep * j as FT;
                let z = nom_sep * k as FT;
                let w = (-(x * x + y * y + z * z) / (nom_sep * nom_sep * 4.)).exp();
                packet.extend_from_slice(&[x, y, z, 0., 0., w, 1.5 * nom_sep]);
            }
        }
    }
    let mut pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);

    let second_moment = |pts: &Points| -> f64 {
        pts.e
            .pos
            .iter()
            .zip(pts.e.strength.iter())
            .map(|(x, s)| s.z as f64 * x.norm_squared() as f64)
            .sum()
    };

    let total: f64 = pts.e.strength.iter().map(|s| s.z as f64).sum();
    let before = second_moment(&pts);

    let vrm = Vrm::default();
    vrm.diffuse_all(&mut pts, h_nu, nom_sep, 1.5 * nom_sep);

    let after = second_moment(&pts);
    let expected_growth = 6.0 * (h_nu as f64) * (h_nu as f64) * total;
    let growth = after - before;
    assert!(
        (growth - expected_growth).abs() < 0.05 * expected_growth,
        "second moment grew by {} instead of {}",
        growth,
        expected_growth
    );
}

#[test]
fn vrm_never_nan_test() {
    let h_nu: FT = 0.02;
    let nom_sep = h_nu * (8.0 as FT).sqrt();
    let mut pts = lattice_cloud(1, nom_sep);
    let vrm = Vrm::default();
    for _ in 0..3 {
        vrm.diffuse_all(&mut pts, h_nu, nom_sep, 1.5 * nom_sep);
        assert!(!pts.has_nan());
    }
}
