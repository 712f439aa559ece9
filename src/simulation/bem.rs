use nalgebra::{DMatrix, DVector};

use crate::{
    collection::{Collection, ElementKind},
    concurrency::par_iter_mut1,
    floating_type_mod::{FRAC_1_PI, FT},
    kernels::{kernel_0v_0p, rkernel_2vs_0p, MAX_SUBPANEL_LEVELS},
    V3,
};

/// Refusing larger systems happens upstream in the initialization check; a
/// dense matrix beyond this runs the machine out of memory.
pub const BEM_MAX_PANELS: usize = 21000;

/// Holds the boundary element solver state between steps.
pub struct Bem {
    /// Time of the last accepted solve, for diagnostics.
    pub last_solve_time: Option<f64>,
}

impl Bem {
    pub fn new() -> Bem {
        Bem { last_solve_time: None }
    }

    pub fn reset(&mut self) {
        self.last_solve_time = None;
    }
}

impl Default for Bem {
    fn default() -> Bem {
        Bem::new()
    }
}

/// World-frame snapshot of one panel used during assembly.
struct PanelRef {
    corners: [V3; 3],
    centroid: V3,
    x1: V3,
    x2: V3,
    area: FT,
    bc: [FT; 2],
    vs: [FT; 2],
    vel: V3,
}

fn gather_panels(time: f64, bdry: &[Collection]) -> Vec<PanelRef> {
    let mut panels = Vec::new();
    for coll in bdry {
        if coll.kind() != ElementKind::Reactive {
            continue;
        }
        let Some(surf) = coll.as_surfaces() else {
            continue;
        };
        for i in 0..surf.n_panels() {
            panels.push(PanelRef {
                corners: surf.corners(i),
                centroid: surf.centroid(i),
                x1: surf.x1[i],
                x2: surf.x2[i],
                area: surf.area[i],
                bc: surf.bc[i],
                vs: surf.vs[i],
                vel: surf.panel_vel(i, time),
            });
        }
    }
    panels
}

/// Velocity induced at a bare point by all active vortex particles,
/// including the 1/4pi factor.
pub fn particle_vel_at_point(vort: &[Collection], tx: V3) -> V3 {
    let mut u = V3::zeros();
    for coll in vort {
        let Some(pts) = coll.as_points() else {
            continue;
        };
        if pts.is_inert() {
            continue;
        }
        for i in 0..pts.n() {
            kernel_0v_0p(pts.e.pos[i], pts.e.radius[i], pts.e.strength[i], tx, &mut u);
        }
    }
    u * (0.25 * FRAC_1_PI)
}

/// Velocity induced at a bare point by the current panel sheet strengths,
/// including the sheet jump when the point is a panel centroid (`self_panel`).
fn panel_vel_at_point(panels: &[PanelRef], vs: impl Fn(usize) -> [FT; 2], tx: V3, self_panel: Option<usize>) -> V3 {
    let mut u = V3::zeros();
    for (j, p) in panels.iter().enumerate() {
        if Some(j) == self_panel {
            continue;
        }
        let sheet = vs(j)[0] * p.x1 + vs(j)[1] * p.x2;
        rkernel_2vs_0p(
            p.corners[0],
            p.corners[1],
            p.corners[2],
            sheet,
            0.0,
            tx,
            p.area,
            0,
            MAX_SUBPANEL_LEVELS,
            &mut u,
        );
    }
    u *= 0.25 * FRAC_1_PI;
    if let Some(t) = self_panel {
        // principal value of the self integral: the exterior side of a sheet
        // of strength gamma sees gamma x n / 2, i.e. (-g1 x2 + g2 x1) / 2
        let g = vs(t);
        u += 0.5 * (g[1] * panels[t].x1 - g[0] * panels[t].x2);
    }
    u
}

/// Assemble and solve the boundary element system, writing the resulting
/// sheet strengths back onto every reactive surface.
///
/// Each pair of rows enforces the two tangential velocity components at a
/// panel centroid; the unknowns are the two tangential sheet strength
/// components of every panel. The dense system is solved by LU with full
/// pivoting; a singular matrix is reported, never silently solved.
pub fn solve_bem(
    time: f64,
    fs: V3,
    vort: &[Collection],
    bdry: &mut [Collection],
    bem: &mut Bem,
) -> Result<(), String> {
    for coll in bdry.iter_mut() {
        if coll.kind() != ElementKind::Reactive {
            continue;
        }
        if let Some(surf) = coll.as_surfaces_mut() {
            surf.set_time(time);
        }
    }

    let panels = gather_panels(time, bdry);
    let np = panels.len();
    if np == 0 {
        return Ok(());
    }

    // influence matrix: velocity at target centroids per unit sheet strength
    // component, tangential projections only
    let mut rows: Vec<[Vec<f64>; 2]> = (0..np).map(|_| [vec![0.0; 2 * np], vec![0.0; 2 * np]]).collect();
    par_iter_mut1(&mut rows, |t, row_pair| {
        let tp = &panels[t];
        for s in 0..np {
            if s == t {
                // sheet jump at the centroid: unit gamma_1 induces -x2/2 on
                // the exterior side, unit gamma_2 induces +x1/2
                row_pair[1][2 * s] = -0.5;
                row_pair[0][2 * s + 1] = 0.5;
                continue;
            }
            for comp in 0..2 {
                let mut u = V3::zeros();
                let p = &panels[s];
                let sheet = if comp == 0 { p.x1 } else { p.x2 };
                rkernel_2vs_0p(
                    p.corners[0],
                    p.corners[1],
                    p.corners[2],
                    sheet,
                    0.0,
                    tp.centroid,
                    p.area,
                    0,
                    MAX_SUBPANEL_LEVELS,
                    &mut u,
                );
                u *= 0.25 * FRAC_1_PI;
                row_pair[0][2 * s + comp] = u.dot(&tp.x1) as f64;
                row_pair[1][2 * s + comp] = u.dot(&tp.x2) as f64;
            }
        }
    });

    let m = DMatrix::<f64>::from_fn(2 * np, 2 * np, |r, c| rows[r / 2][r % 2][c]);

    // right-hand side: whatever tangential velocity the panels must cancel
    let mut rhs = DVector::<f64>::zeros(2 * np);
    for (t, tp) in panels.iter().enumerate() {
        let u_other = particle_vel_at_point(vort, tp.centroid) + fs - tp.vel;
        rhs[2 * t] = (tp.bc[0] - u_other.dot(&tp.x1)) as f64;
        rhs[2 * t + 1] = (tp.bc[1] - u_other.dot(&tp.x2)) as f64;
    }

    let solution = m
        .full_piv_lu()
        .solve(&rhs)
        .ok_or_else(|| format!("BEM influence matrix for {} panels is singular", np))?;

    // scatter back into per-panel solution arrays
    let mut offset = 0;
    for coll in bdry.iter_mut() {
        if coll.kind() != ElementKind::Reactive {
            continue;
        }
        let Some(surf) = coll.as_surfaces_mut() else {
            continue;
        };
        for i in 0..surf.n_panels() {
            surf.vs[i] = [
                solution[2 * (offset + i)] as FT,
                solution[2 * (offset + i) + 1] as FT,
            ];
        }
        offset += surf.n_panels();
    }

    bem.last_solve_time = Some(time);
    Ok(())
}

/// Tangential velocity residual vs. the prescribed BC at every panel
/// centroid, for the consistency check and for divergence detection.
pub fn max_bc_residual(time: f64, fs: V3, vort: &[Collection], bdry: &[Collection]) -> FT {
    let panels = gather_panels(time, bdry);
    let np = panels.len();
    let mut worst: FT = 0.;
    for t in 0..np {
        let tp = &panels[t];
        let mut u = particle_vel_at_point(vort, tp.centroid) + fs - tp.vel;
        u += panel_vel_at_point(&panels, |j| panels[j].vs, tp.centroid, Some(t));
        worst = worst.max((u.dot(&tp.x1) - tp.bc[0]).abs());
        worst = worst.max((u.dot(&tp.x2) - tp.bc[1]).abs());
    }
    worst
}

#[cfg(test)]
use crate::{collection::Motion, surfaces::Surfaces, vec3f};

#[test]
fn bem_reproduces_boundary_condition_test() {
    // a small square plate in a uniform in-plane stream: after solving, the
    // tangential velocity at every centroid must match the zero-velocity BC
    let x: Vec<FT> = vec![
        0., 0., 0., //
        1., 0., 0., //
        1., 1., 0., //
        0., 1., 0.,
    ];
    let idx: Vec<u32> = vec![0, 1, 2, 0, 2, 3];
    let surf = Surfaces::new(&x, &idx, &[], ElementKind::Reactive, Motion::Fixed, None);
    let mut bdry = vec![Collection::Surfaces(surf)];
    let vort: Vec<Collection> = Vec::new();
    let mut bem = Bem::new();

    let fs = vec3f(1.0, 0.0, 0.0);
    solve_bem(0.0, fs, &vort, &mut bdry, &mut bem).unwrap();

    let surf = bdry[0].as_surfaces().unwrap();
    assert!(surf.vs.iter().any(|v| v[0].abs() + v[1].abs() > 1e-6), "solve left vs zero");

    let residual = max_bc_residual(0.0, fs, &vort, &bdry);
    assert!(residual < 1e-4, "BC residual {} too large", residual);
}

#[test]
fn bem_no_panels_is_noop_test() {
    let vort: Vec<Collection> = Vec::new();
    let mut bdry: Vec<Collection> = Vec::new();
    let mut bem = Bem::new();
    solve_bem(0.0, V3::zeros(), &vort, &mut bdry, &mut bem).unwrap();
    assert!(bem.last_solve_time.is_none());
}
