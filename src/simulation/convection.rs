use crate::{
    bem::{solve_bem, Bem},
    collection::{Collection, Motion},
    concurrency::{par_iter_mut1, par_iter_mut2},
    floating_type_mod::{FRAC_1_PI, FT},
    kernels::{kernel_0v_0bg, kernel_0v_0p, rkernel_2vs_0p, rkernel_2vs_0pg, MAX_SUBPANEL_LEVELS},
    points::Points,
    M3, V3,
};

/// Snapshot of one vortex particle source.
#[derive(Clone, Copy)]
struct SrcPoint {
    pos: V3,
    rad: FT,
    strength: V3,
}

/// Snapshot of one panel source carrying its sheet strength.
#[derive(Clone, Copy)]
struct SrcPanel {
    corners: [V3; 3],
    sheet: V3,
    area: FT,
}

fn gather_point_sources(vort: &[Collection]) -> Vec<SrcPoint> {
    let mut out = Vec::new();
    for coll in vort {
        let Some(pts) = coll.as_points() else {
            continue;
        };
        if pts.is_inert() {
            continue;
        }
        for i in 0..pts.n() {
            out.push(SrcPoint {
                pos: pts.e.pos[i],
                rad: pts.e.radius[i],
                strength: pts.e.strength[i],
            });
        }
    }
    out
}

fn gather_panel_sources(bdry: &[Collection]) -> Vec<SrcPanel> {
    let mut out = Vec::new();
    for coll in bdry {
        let Some(surf) = coll.as_surfaces() else {
            continue;
        };
        for i in 0..surf.n_panels() {
            out.push(SrcPanel {
                corners: surf.corners(i),
                sheet: surf.sheet_strength(i),
                area: surf.area[i],
            });
        }
    }
    out
}

/// Sum every source onto every target element, in parallel over targets.
/// Active targets also accumulate the velocity gradient they need for
/// stretch; inert ones only get velocity.
fn eval_targets(src_pts: &[SrcPoint], src_panels: &[SrcPanel], fs: V3, targets: &mut [Collection]) {
    for coll in targets.iter_mut() {
        let Some(pts) = coll.as_points_mut() else {
            continue;
        };
        let want_grads = !pts.is_inert();
        let e = &mut pts.e;
        let pos = &e.pos;
        let radius = &e.radius;
        par_iter_mut2(&mut e.vel, &mut e.vel_grad, |i, u_out, g_out| {
            let tx = pos[i];
            let mut u = V3::zeros();
            let mut g = M3::zeros();
            if want_grads {
                let tr = radius[i];
                for s in src_pts {
                    kernel_0v_0bg(s.pos, s.rad, s.strength, tx, tr, &mut u, &mut g);
                }
                for p in src_panels {
                    rkernel_2vs_0pg(
                        p.corners[0],
                        p.corners[1],
                        p.corners[2],
                        p.sheet,
                        0.0,
                        tx,
                        p.area,
                        0,
                        MAX_SUBPANEL_LEVELS,
                        &mut u,
                        &mut g,
                    );
                }
            } else {
                for s in src_pts {
                    kernel_0v_0p(s.pos, s.rad, s.strength, tx, &mut u);
                }
                for p in src_panels {
                    rkernel_2vs_0p(
                        p.corners[0],
                        p.corners[1],
                        p.corners[2],
                        p.sheet,
                        0.0,
                        tx,
                        p.area,
                        0,
                        MAX_SUBPANEL_LEVELS,
                        &mut u,
                    );
                }
            }
            *u_out = u * (0.25 * FRAC_1_PI) + fs;
            *g_out = g * (0.25 * FRAC_1_PI);
        });
    }
}

/// Runge-Kutta style advancement of all Lagrangian elements, with a BEM
/// re-solve at every stage.
pub struct Convection;

impl Convection {
    pub fn new() -> Convection {
        Convection
    }

    /// Induced velocities (plus gradients on active elements) at every
    /// target from every source plus the freestream.
    pub fn find_vels(&self, fs: V3, vort: &[Collection], bdry: &[Collection], targets: &mut [Collection]) {
        let src_pts = gather_point_sources(vort);
        let src_panels = gather_panel_sources(bdry);
        eval_targets(&src_pts, &src_panels, fs, targets);
    }

    /// `find_vels` where the active collections are their own targets.
    /// Self-influence is fine: the regularized core has a finite self-term.
    pub fn find_vels_in_place(&self, fs: V3, vort: &mut Vec<Collection>, bdry: &[Collection]) {
        let src_pts = gather_point_sources(vort);
        let src_panels = gather_panel_sources(bdry);
        eval_targets(&src_pts, &src_panels, fs, vort);
    }

    /// First-order (Euler) advancement.
    pub fn advect_1st(
        &self,
        time: f64,
        dt: f64,
        fs: V3,
        _ips: FT,
        vort: &mut Vec<Collection>,
        bdry: &mut [Collection],
        fldpt: &mut [Collection],
        bem: &mut Bem,
    ) -> Result<(), String> {
        solve_bem(time, fs, vort, bdry, bem)?;
        self.find_vels_in_place(fs, vort, bdry);
        self.find_vels(fs, vort, bdry, fldpt);

        advance_elements(vort, time, dt, true);
        advance_elements(fldpt, time, dt, false);
        Ok(())
    }

    /// Second-order midpoint advancement: evaluate at `t`, predict half a
    /// step, re-solve the BEM there, then update the original state with the
    /// midpoint derivatives. On failure the element state is restored and
    /// nothing is left half-updated.
    pub fn advect_2nd(
        &self,
        time: f64,
        dt: f64,
        fs: V3,
        _ips: FT,
        vort: &mut Vec<Collection>,
        bdry: &mut [Collection],
        fldpt: &mut [Collection],
        bem: &mut Bem,
    ) -> Result<(), String> {
        solve_bem(time, fs, vort, bdry, bem)?;
        self.find_vels_in_place(fs, vort, bdry);
        self.find_vels(fs, vort, bdry, fldpt);

        let saved_vort = save_state(vort);
        let saved_fldpt = save_state(fldpt);

        // predictor: half step with the stage-1 derivatives
        advance_elements(vort, time, 0.5 * dt, true);
        advance_elements(fldpt, time, 0.5 * dt, false);

        // the midpoint BEM solve sees the predicted particle state
        if let Err(e) = solve_bem(time + 0.5 * dt, fs, vort, bdry, bem) {
            restore_state(vort, &saved_vort);
            restore_state(fldpt, &saved_fldpt);
            return Err(e);
        }
        self.find_vels_in_place(fs, vort, bdry);
        self.find_vels(fs, vort, bdry, fldpt);

        // corrector: full step from the original state, midpoint derivatives
        restore_state(vort, &saved_vort);
        restore_state(fldpt, &saved_fldpt);
        advance_elements(vort, time, dt, true);
        advance_elements(fldpt, time, dt, false);
        Ok(())
    }
}

impl Default for Convection {
    fn default() -> Convection {
        Convection::new()
    }
}

struct SavedState {
    pos: Vec<V3>,
    strength: Vec<V3>,
    elong: Vec<FT>,
}

fn save_state(colls: &[Collection]) -> Vec<Option<SavedState>> {
    colls
        .iter()
        .map(|coll| {
            coll.as_points().map(|pts| SavedState {
                pos: pts.e.pos.clone(),
                strength: pts.e.strength.clone(),
                elong: pts.e.elong.clone(),
            })
        })
        .collect()
}

fn restore_state(colls: &mut [Collection], saved: &[Option<SavedState>]) {
    for (coll, s) in colls.iter_mut().zip(saved.iter()) {
        if let (Some(pts), Some(s)) = (coll.as_points_mut(), s.as_ref()) {
            pts.e.pos.clone_from(&s.pos);
            pts.e.strength.clone_from(&s.strength);
            pts.e.elong.clone_from(&s.elong);
        }
    }
}

/// Apply one Euler update with the derivatives currently stored on the
/// elements. `stretch` applies the vortex stretching term and the elongation
/// bookkeeping to active collections.
fn advance_elements(colls: &mut [Collection], time: f64, dt: f64, stretch: bool) {
    for coll in colls.iter_mut() {
        let motion = coll.motion();
        let body = coll.body().cloned();
        let Some(pts) = coll.as_points_mut() else {
            continue;
        };
        let dtf = dt as FT;
        let apply_stretch = stretch && !pts.is_inert();

        match motion {
            Motion::Lagrangian => advance_lagrangian(pts, dtf, apply_stretch),
            Motion::BodyBound => {
                if let Some(body) = body {
                    for x in pts.e.pos.iter_mut() {
                        *x = body.displace(*x, time, dt);
                    }
                }
            }
            Motion::Fixed => {}
        }
    }
}

fn advance_lagrangian(pts: &mut Points, dt: FT, apply_stretch: bool) {
    let e = &mut pts.e;
    if apply_stretch {
        let vel = &e.vel;
        let vel_grad = &e.vel_grad;
        par_iter_mut2(&mut e.pos, &mut e.strength, |i, x, s| {
            *x += vel[i] * dt;
            if s.norm_squared() > 0. {
                let ds: V3 = vel_grad[i] * *s;
                *s += ds * dt;
            }
        });
        let strength = &e.strength;
        par_iter_mut1(&mut e.elong, |i, el| {
            let s = strength[i];
            if s.norm_squared() > 0. {
                let shat = s.normalize();
                // stretch rate projected on the vortex axis, so pure rotation
                // (a blob's self-induced gradient) leaves elongation alone
                let rate = shat.dot(&(vel_grad[i] * shat));
                *el *= (1.0 + dt * rate).abs();
            }
        });
    } else {
        let vel = &e.vel;
        par_iter_mut1(&mut e.pos, |i, x| {
            *x += vel[i] * dt;
        });
    }
}

#[cfg(test)]
use crate::collection::ElementKind;
#[cfg(test)]
use crate::vec3f;

#[test]
fn single_particle_self_convection_test() {
    // one particle in a uniform stream: self-influence is exactly zero, so
    // after 100 steps of dt=0.01 it sits at x=1 with its strength untouched
    let packet: Vec<FT> = vec![0., 0., 0., 0., 0., 1., 0.1];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut vort = vec![Collection::Points(pts)];
    let mut bdry: Vec<Collection> = Vec::new();
    let mut fldpt: Vec<Collection> = Vec::new();
    let mut bem = Bem::new();
    let conv = Convection::new();
    let fs = vec3f(1., 0., 0.);

    let mut time = 0.0;
    for _ in 0..100 {
        conv.advect_2nd(time, 0.01, fs, 0.1, &mut vort, &mut bdry, &mut fldpt, &mut bem)
            .unwrap();
        time += 0.01;
    }

    let pts = vort[0].as_points().unwrap();
    assert!((pts.e.pos[0] - vec3f(1., 0., 0.)).norm() < 1e-5);
    assert!((pts.e.strength[0] - vec3f(0., 0., 1.)).norm() < 1e-6);
    assert!((pts.e.elong[0] - 1.0).abs() < 1e-5);
}

#[test]
fn two_particle_mutual_advection_symmetry_test() {
    // a pair with aligned strengths: induced velocities are equal and
    // opposite along x, none along the separation axis
    let packet: Vec<FT> = vec![
        0., -0.5, 0., 0., 0., 1., 0.1, //
        0., 0.5, 0., 0., 0., 1., 0.1,
    ];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut vort = vec![Collection::Points(pts)];
    let bdry: Vec<Collection> = Vec::new();
    let conv = Convection::new();

    conv.find_vels_in_place(V3::zeros(), &mut vort, &bdry);
    let pts = vort[0].as_points().unwrap();
    assert!((pts.e.vel[0] + pts.e.vel[1]).norm() < 1e-6);
    assert!(pts.e.vel[0].x.abs() > 0.);
    assert!(pts.e.vel[0].y.abs() < 1e-7);
}

#[test]
fn zero_vorticity_zero_freestream_is_still_test() {
    let packet: Vec<FT> = vec![0.3, 0.4, 0.5, 0., 0., 0., 0.1];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut vort = vec![Collection::Points(pts)];
    let mut bdry: Vec<Collection> = Vec::new();
    let mut fldpt: Vec<Collection> = Vec::new();
    let mut bem = Bem::new();
    let conv = Convection::new();

    conv.advect_2nd(0.0, 0.01, V3::zeros(), 0.1, &mut vort, &mut bdry, &mut fldpt, &mut bem)
        .unwrap();

    let pts = vort[0].as_points().unwrap();
    assert!((pts.e.pos[0] - vec3f(0.3, 0.4, 0.5)).norm() < 1e-7);
    assert!(pts.e.vel[0].norm() < 1e-7);
}

#[test]
fn inert_tracers_follow_the_stream_test() {
    let tracer: Vec<FT> = vec![0., 0., 0.];
    let pts = Points::new_inert(&tracer, Motion::Lagrangian, None);
    let mut fldpt = vec![Collection::Points(pts)];
    let mut vort: Vec<Collection> = Vec::new();
    let mut bdry: Vec<Collection> = Vec::new();
    let mut bem = Bem::new();
    let conv = Convection::new();
    let fs = vec3f(0., 2., 0.);

    conv.advect_1st(0.0, 0.5, fs, 0.1, &mut vort, &mut bdry, &mut fldpt, &mut bem)
        .unwrap();

    let pts = fldpt[0].as_points().unwrap();
    assert!((pts.e.pos[0] - vec3f(0., 1., 0.)).norm() < 1e-6);
}
