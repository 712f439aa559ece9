use crate::{floating_type_mod::FT, M3, V3};

#[derive(Clone, Copy, PartialEq, Eq)]
#[allow(unused)]
pub enum CoreVariant {
    /// `G = (1 - exp(-d^3/sigma^3)) / d^3` with far-field and singular-limit branches.
    CompactExp,
    /// `G = 1 / (d^2 + sigma^2)^(3/2)`.
    RosenheadMoore,
}

#[cfg(feature = "rm-kernel")]
pub const CORE: CoreVariant = CoreVariant::RosenheadMoore;

#[cfg(not(feature = "rm-kernel"))]
pub const CORE: CoreVariant = CoreVariant::CompactExp;

/// Recursion limit for the subdividing panel kernels.
pub const MAX_SUBPANEL_LEVELS: usize = 3;

//
// core functions
//
// Each returns the regularized `1/r^3` factor for a source at squared
// distance `distsq`. The `_st` variants combine source and target radii.
//

#[inline(always)]
fn core_rm(distsq: FT, sr: FT) -> FT {
    let r2 = distsq + sr * sr;
    1.0 / (r2 * r2.sqrt())
}

#[inline(always)]
fn core_rm_st(distsq: FT, sr: FT, tr: FT) -> FT {
    let r2 = distsq + sr * sr + tr * tr;
    1.0 / (r2 * r2.sqrt())
}

#[inline(always)]
fn core_rm_grad(distsq: FT, sr: FT) -> (FT, FT) {
    let r2 = distsq + sr * sr;
    let g = 1.0 / (r2 * r2.sqrt());
    (g, -3.0 * g / r2)
}

#[inline(always)]
fn core_rm_grad_st(distsq: FT, sr: FT, tr: FT) -> (FT, FT) {
    let r2 = distsq + sr * sr + tr * tr;
    let g = 1.0 / (r2 * r2.sqrt());
    (g, -3.0 * g / r2)
}

#[inline(always)]
fn core_exp(distsq: FT, corefac: FT) -> FT {
    let dist = distsq.sqrt();
    let d3 = distsq * dist;
    let reld3 = d3 * corefac;
    if reld3 > 16.0 {
        1.0 / d3
    } else if reld3 < 0.001 {
        corefac
    } else {
        (1.0 - (-reld3).exp()) / d3
    }
}

#[inline(always)]
fn core_exp_grad(distsq: FT, corefac: FT) -> (FT, FT) {
    let dist = distsq.sqrt();
    let d3 = distsq * dist;
    let reld3 = d3 * corefac;
    if reld3 > 16.0 {
        let g = 1.0 / d3;
        (g, -3.0 / (d3 * distsq))
    } else if reld3 < 0.001 {
        (corefac, -1.5 * dist * corefac * corefac)
    } else {
        let expreld3 = (-reld3).exp();
        let g = (1.0 - expreld3) / d3;
        (g, 3.0 * (corefac * expreld3 - g) / distsq)
    }
}

#[inline(always)]
pub fn core_func(distsq: FT, sr: FT) -> FT {
    match CORE {
        CoreVariant::RosenheadMoore => core_rm(distsq, sr),
        CoreVariant::CompactExp => core_exp(distsq, 1.0 / (sr * sr * sr)),
    }
}

#[inline(always)]
pub fn core_func_st(distsq: FT, sr: FT, tr: FT) -> FT {
    match CORE {
        CoreVariant::RosenheadMoore => core_rm_st(distsq, sr, tr),
        CoreVariant::CompactExp => core_exp(distsq, 1.0 / (sr * sr * sr + tr * tr * tr)),
    }
}

/// Returns `(G, B)` where `B` feeds the outer-product term of the velocity
/// gradient.
#[inline(always)]
pub fn core_func_grad(distsq: FT, sr: FT) -> (FT, FT) {
    match CORE {
        CoreVariant::RosenheadMoore => core_rm_grad(distsq, sr),
        CoreVariant::CompactExp => core_exp_grad(distsq, 1.0 / (sr * sr * sr)),
    }
}

#[inline(always)]
pub fn core_func_grad_st(distsq: FT, sr: FT, tr: FT) -> (FT, FT) {
    match CORE {
        CoreVariant::RosenheadMoore => core_rm_grad_st(distsq, sr, tr),
        CoreVariant::CompactExp => core_exp_grad(distsq, 1.0 / (sr * sr * sr + tr * tr * tr)),
    }
}

//
// velocity influence functions
//
// Naming follows kernel_NS_MT: N source dimensions (0 point, 2 panel),
// S source type ('v' vortex, 's' source, 'vs' both), M target dimensions,
// T target type ('p' singular point, 'b' blob; trailing 'g' adds gradients).
//
// All kernels accumulate with `+=`, never read the target strength, and omit
// the 1/4pi Biot-Savart factor (applied once per target by the caller).
//

/// Matrix of the linear map `v -> s x v`.
#[inline(always)]
fn cross_matrix(s: V3) -> M3 {
    M3::new(0.0, -s.z, s.y, s.z, 0.0, -s.x, -s.y, s.x, 0.0)
}

#[inline(always)]
pub fn kernel_0v_0b(sx: V3, sr: FT, ss: V3, tx: V3, tr: FT, tu: &mut V3) {
    let d = tx - sx;
    let g = core_func_st(d.norm_squared(), sr, tr);
    *tu += g * ss.cross(&d);
}

#[inline(always)]
pub fn kernel_0v_0p(sx: V3, sr: FT, ss: V3, tx: V3, tu: &mut V3) {
    let d = tx - sx;
    let g = core_func(d.norm_squared(), sr);
    *tu += g * ss.cross(&d);
}

#[inline(always)]
pub fn kernel_0vs_0b(sx: V3, sr: FT, ss: V3, ssc: FT, tx: V3, tr: FT, tu: &mut V3) {
    let d = tx - sx;
    let g = core_func_st(d.norm_squared(), sr, tr);
    *tu += g * (ss.cross(&d) + ssc * d);
}

#[inline(always)]
pub fn kernel_0vs_0p(sx: V3, sr: FT, ss: V3, ssc: FT, tx: V3, tu: &mut V3) {
    let d = tx - sx;
    let g = core_func(d.norm_squared(), sr);
    *tu += g * (ss.cross(&d) + ssc * d);
}

#[inline(always)]
pub fn kernel_0s_0p(sx: V3, sr: FT, ssc: FT, tx: V3, tu: &mut V3) {
    let d = tx - sx;
    let g = ssc * core_func(d.norm_squared(), sr);
    *tu += g * d;
}

#[inline(always)]
pub fn kernel_0v_0bg(sx: V3, sr: FT, ss: V3, tx: V3, tr: FT, tu: &mut V3, tg: &mut M3) {
    let d = tx - sx;
    let (g, b) = core_func_grad_st(d.norm_squared(), sr, tr);
    let sxd = ss.cross(&d);
    *tu += g * sxd;
    *tg += b * (sxd * d.transpose()) + g * cross_matrix(ss);
}

#[inline(always)]
pub fn kernel_0v_0pg(sx: V3, sr: FT, ss: V3, tx: V3, tu: &mut V3, tg: &mut M3) {
    let d = tx - sx;
    let (g, b) = core_func_grad(d.norm_squared(), sr);
    let sxd = ss.cross(&d);
    *tu += g * sxd;
    *tg += b * (sxd * d.transpose()) + g * cross_matrix(ss);
}

#[inline(always)]
pub fn kernel_0vs_0bg(sx: V3, sr: FT, ss: V3, ssc: FT, tx: V3, tr: FT, tu: &mut V3, tg: &mut M3) {
    let d = tx - sx;
    let (g, b) = core_func_grad_st(d.norm_squared(), sr, tr);
    let sxd = ss.cross(&d);
    *tu += g * (sxd + ssc * d);
    *tg += b * (sxd * d.transpose()) + g * cross_matrix(ss);
    // gradients of the scalar source term
    *tg += (b * ssc) * (d * d.transpose()) + (g * ssc) * M3::identity();
}

#[inline(always)]
pub fn kernel_0vs_0pg(sx: V3, sr: FT, ss: V3, ssc: FT, tx: V3, tu: &mut V3, tg: &mut M3) {
    let d = tx - sx;
    let (g, b) = core_func_grad(d.norm_squared(), sr);
    let sxd = ss.cross(&d);
    *tu += g * (sxd + ssc * d);
    *tg += b * (sxd * d.transpose()) + g * cross_matrix(ss);
    *tg += (b * ssc) * (d * d.transpose()) + (g * ssc) * M3::identity();
}

//
// panel (2d source) influence functions
//
// Four singular integration stations: the centroid plus three points biased
// 4:1:1 toward each corner. Strengths are pre-scaled by 1/4.
//

const QUAD_STATIONS: [[FT; 3]; 4] = [
    [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    [4.0 / 6.0, 1.0 / 6.0, 1.0 / 6.0],
    [1.0 / 6.0, 4.0 / 6.0, 1.0 / 6.0],
    [1.0 / 6.0, 1.0 / 6.0, 4.0 / 6.0],
];

#[inline(always)]
pub fn kernel_2v_0p(s0: V3, s1: V3, s2: V3, ss: V3, tx: V3, tu: &mut V3) {
    let str4 = 0.25 * ss;
    for w in &QUAD_STATIONS {
        let sx = w[0] * s0 + w[1] * s1 + w[2] * s2;
        kernel_0v_0p(sx, 0.0, str4, tx, tu);
    }
}

#[inline(always)]
pub fn kernel_2v_0b(s0: V3, s1: V3, s2: V3, ss: V3, tx: V3, tr: FT, tu: &mut V3) {
    let str4 = 0.25 * ss;
    for w in &QUAD_STATIONS {
        let sx = w[0] * s0 + w[1] * s1 + w[2] * s2;
        kernel_0v_0b(sx, 0.0, str4, tx, tr, tu);
    }
}

#[inline(always)]
pub fn kernel_2vs_0p(s0: V3, s1: V3, s2: V3, ss: V3, ssc: FT, tx: V3, tu: &mut V3) {
    let str4 = 0.25 * ss;
    let strs4 = 0.25 * ssc;
    for w in &QUAD_STATIONS {
        let sx = w[0] * s0 + w[1] * s1 + w[2] * s2;
        kernel_0vs_0p(sx, 0.0, str4, strs4, tx, tu);
    }
}

#[inline(always)]
pub fn kernel_2v_0pg(s0: V3, s1: V3, s2: V3, ss: V3, tx: V3, tu: &mut V3, tg: &mut M3) {
    let str4 = 0.25 * ss;
    for w in &QUAD_STATIONS {
        let sx = w[0] * s0 + w[1] * s1 + w[2] * s2;
        kernel_0v_0pg(sx, 0.0, str4, tx, tu, tg);
    }
}

#[inline(always)]
pub fn kernel_2v_0bg(s0: V3, s1: V3, s2: V3, ss: V3, tx: V3, tr: FT, tu: &mut V3, tg: &mut M3) {
    let str4 = 0.25 * ss;
    for w in &QUAD_STATIONS {
        let sx = w[0] * s0 + w[1] * s1 + w[2] * s2;
        kernel_0v_0bg(sx, 0.0, str4, tx, tr, tu, tg);
    }
}

//
// subdividing panel influence functions
//
// The initial call takes a sheet strength; level 0 converts it to an absolute
// strength. A panel is split into 4 children whenever the target sits closer
// than 4x the triangle length scale, down to `maxlev`. Leaf evaluations are
// desingularized with half the triangle length scale.
//

/// Child triangles over the 6 nodes (3 corners + 3 edge midpoints).
const CHILD_IDS: [[usize; 3]; 4] = [[0, 1, 3], [1, 2, 4], [1, 4, 3], [3, 4, 5]];

#[inline(always)]
fn subdivide_nodes(s0: V3, s1: V3, s2: V3) -> [V3; 6] {
    [
        s0,
        0.5 * (s0 + s1),
        s1,
        0.5 * (s0 + s2),
        0.5 * (s1 + s2),
        s2,
    ]
}

pub fn rkernel_2vs_0p(
    s0: V3,
    s1: V3,
    s2: V3,
    ss: V3,
    ssc: FT,
    tx: V3,
    sa: FT,
    lev: usize,
    maxlev: usize,
    tu: &mut V3,
) {
    // convert from sheet strength into absolute strength - only once
    let (mut strv, mut strs) = (ss, ssc);
    if lev == 0 {
        strv *= sa;
        strs *= sa;
    }

    let sx = (s0 + s1 + s2) / 3.0;
    let trisize = sa.sqrt();
    let dist = (tx - sx).norm();

    if dist > trisize * 4.0 || lev == maxlev {
        // run just one influence calculation, desingularized only a little
        kernel_0vs_0p(sx, 0.5 * trisize, strv, strs, tx, tu);
    } else {
        strv *= 0.25;
        strs *= 0.25;
        let sca = 0.25 * sa;
        let nodes = subdivide_nodes(s0, s1, s2);
        for id in &CHILD_IDS {
            rkernel_2vs_0p(
                nodes[id[0]],
                nodes[id[1]],
                nodes[id[2]],
                strv,
                strs,
                tx,
                sca,
                lev + 1,
                maxlev,
                tu,
            );
        }
    }
}

pub fn rkernel_2vs_0pg(
    s0: V3,
    s1: V3,
    s2: V3,
    ss: V3,
    ssc: FT,
    tx: V3,
    sa: FT,
    lev: usize,
    maxlev: usize,
    tu: &mut V3,
    tg: &mut M3,
) {
    let (mut strv, mut strs) = (ss, ssc);
    if lev == 0 {
        strv *= sa;
        strs *= sa;
    }

    let sx = (s0 + s1 + s2) / 3.0;
    let trisize = sa.sqrt();
    let dist = (tx - sx).norm();

    if dist > trisize * 4.0 || lev == maxlev {
        kernel_0vs_0pg(sx, 0.5 * trisize, strv, strs, tx, tu, tg);
    } else {
        strv *= 0.25;
        strs *= 0.25;
        let sca = 0.25 * sa;
        let nodes = subdivide_nodes(s0, s1, s2);
        for id in &CHILD_IDS {
            rkernel_2vs_0pg(
                nodes[id[0]],
                nodes[id[1]],
                nodes[id[2]],
                strv,
                strs,
                tx,
                sca,
                lev + 1,
                maxlev,
                tu,
                tg,
            );
        }
    }
}

/// Panel-on-panel influence with subpaneling of both sides; the target
/// velocity is the area-average over the target panel.
pub fn rkernel_2vs_2p(
    s0: V3,
    s1: V3,
    s2: V3,
    ss: V3,
    ssc: FT,
    t0: V3,
    t1: V3,
    t2: V3,
    sa: FT,
    ta: FT,
    lev: usize,
    maxlev: usize,
    tu: &mut V3,
) {
    let (mut strv, mut strs) = (ss, ssc);
    if lev == 0 {
        strv *= sa;
        strs *= sa;
    }

    let sx = (s0 + s1 + s2) / 3.0;
    let tx = (t0 + t1 + t2) / 3.0;
    let trisize = sa.sqrt() + ta.sqrt();
    let dist = (tx - sx).norm();

    if dist > trisize * 4.0 || lev == maxlev {
        kernel_0vs_0p(sx, 0.5 * trisize, strv, strs, tx, tu);
    } else {
        // split source and target into 4 each: strength scales by both the
        // reduced source strength and the reduced target area
        strv *= 0.0625;
        strs *= 0.0625;
        let sca = 0.25 * sa;
        let tca = 0.25 * ta;
        let snodes = subdivide_nodes(s0, s1, s2);
        let tnodes = subdivide_nodes(t0, t1, t2);
        for sid in &CHILD_IDS {
            for tid in &CHILD_IDS {
                rkernel_2vs_2p(
                    snodes[sid[0]],
                    snodes[sid[1]],
                    snodes[sid[2]],
                    strv,
                    strs,
                    tnodes[tid[0]],
                    tnodes[tid[1]],
                    tnodes[tid[2]],
                    sca,
                    tca,
                    lev + 1,
                    maxlev,
                    tu,
                );
            }
        }
    }
}

#[test]
fn core_antisymmetry_test() {
    use crate::vec3f;

    let sx = vec3f(0.1, -0.3, 0.2);
    let tx = vec3f(1.1, 0.4, -0.6);
    let ss = vec3f(0.3, 0.1, -0.9);

    // swapping source and target roles flips the induced velocity
    let mut fwd = V3::zeros();
    kernel_0v_0b(sx, 0.07, ss, tx, 0.11, &mut fwd);

    let mut bwd = V3::zeros();
    kernel_0v_0b(tx, 0.11, ss, sx, 0.07, &mut bwd);

    for d in 0..3 {
        assert!(
            (fwd[d] + bwd[d]).abs() < 1e-6 * fwd.norm().max(1e-12),
            "velocity does not flip sign under source/target swap"
        );
    }

    // swapping roles with the strength negated flips the velocity gradient
    let mut gfwd = M3::zeros();
    let mut gbwd = M3::zeros();
    let mut scratch = V3::zeros();
    kernel_0v_0bg(sx, 0.07, ss, tx, 0.11, &mut scratch, &mut gfwd);
    kernel_0v_0bg(tx, 0.11, -ss, sx, 0.07, &mut scratch, &mut gbwd);
    assert!((gfwd + gbwd).norm() < 1e-5 * gfwd.norm().max(1e-12));
}

#[test]
fn far_field_recovery_test() {
    // both cores agree with the singular 1/d^3 law within 1% at d/sigma > 10
    let sigma: FT = 0.05;
    for dist in [0.75, 1.0, 4.0] {
        let distsq = dist * dist;
        let singular = 1.0 / (distsq * dist);
        let rm = core_rm(distsq, sigma);
        let exp = core_exp(distsq, 1.0 / (sigma * sigma * sigma));
        assert!((rm - singular).abs() < 0.01 * singular, "RM off at d={}", dist);
        assert!((exp - singular).abs() < 0.01 * singular, "exp off at d={}", dist);
    }
}

#[test]
fn gradient_matches_finite_difference_test() {
    use crate::vec3f;

    let sx = vec3f(0.0, 0.0, 0.0);
    let ss = vec3f(0.2, -0.4, 1.0);
    let tx = vec3f(0.31, 0.22, -0.17);
    let sr: FT = 0.08;

    let mut u = V3::zeros();
    let mut g = M3::zeros();
    kernel_0v_0pg(sx, sr, ss, tx, &mut u, &mut g);

    let eps: FT = 1e-3;
    for j in 0..3 {
        let mut dx = V3::zeros();
        dx[j] = eps;
        let mut up = V3::zeros();
        let mut um = V3::zeros();
        kernel_0v_0p(sx, sr, ss, tx + dx, &mut up);
        kernel_0v_0p(sx, sr, ss, tx - dx, &mut um);
        let fd = (up - um) / (2.0 * eps);
        for i in 0..3 {
            assert!(
                (g[(i, j)] - fd[i]).abs() < 2e-2 * g.norm().max(1.0),
                "gradient entry ({},{}) analytic {} vs fd {}",
                i,
                j,
                g[(i, j)],
                fd[i]
            );
        }
    }
}

#[test]
fn panel_quadrature_accuracy_test() {
    use crate::vec3f;

    // 4-point rule vs. a 16-point reference (one forced subdivision) for a
    // target 4 panel-sizes away: under 1% velocity error
    let s0 = vec3f(0.0, 0.0, 0.0);
    let s1 = vec3f(0.2, 0.0, 0.0);
    let s2 = vec3f(0.0, 0.2, 0.0);
    let ss = vec3f(0.0, 0.0, 1.0);
    let area: FT = 0.5 * 0.2 * 0.2;
    let tx = vec3f(1.0, 0.7, 0.6);

    let mut coarse = V3::zeros();
    kernel_2v_0p(s0, s1, s2, area * ss, tx, &mut coarse);

    // reference: force one level of subdivision with 4 stations per child
    let mut refv = V3::zeros();
    let nodes = subdivide_nodes(s0, s1, s2);
    for id in &CHILD_IDS {
        kernel_2v_0p(
            nodes[id[0]],
            nodes[id[1]],
            nodes[id[2]],
            0.25 * area * ss,
            tx,
            &mut refv,
        );
    }

    assert!((coarse - refv).norm() < 0.01 * refv.norm());
}

#[test]
fn panel_panel_far_field_matches_point_eval_test() {
    use crate::vec3f;

    // for well-separated panels the panel-panel kernel collapses to a single
    // centroid-to-centroid evaluation
    let s0 = vec3f(0.0, 0.0, 0.0);
    let s1 = vec3f(0.1, 0.0, 0.0);
    let s2 = vec3f(0.0, 0.1, 0.0);
    let t0 = vec3f(3.0, 0.0, 1.0);
    let t1 = vec3f(3.1, 0.0, 1.0);
    let t2 = vec3f(3.0, 0.1, 1.0);
    let sheet = vec3f(0.5, 1.0, 0.0);
    let sa: FT = 0.005;
    let ta: FT = 0.005;

    let mut panel = V3::zeros();
    rkernel_2vs_2p(
        s0, s1, s2, sheet, 0.0, t0, t1, t2, sa, ta, 0, MAX_SUBPANEL_LEVELS, &mut panel,
    );

    let mut point = V3::zeros();
    let trisize = sa.sqrt() + ta.sqrt();
    kernel_0vs_0p(
        (s0 + s1 + s2) / 3.0,
        0.5 * trisize,
        sa * sheet,
        0.0,
        (t0 + t1 + t2) / 3.0,
        &mut point,
    );

    assert!((panel - point).norm() < 1e-6 * point.norm().max(1e-12));
}

#[test]
fn source_term_is_radial_test() {
    use crate::vec3f;

    // a pure source pushes straight away from itself
    let sx = vec3f(0.0, 0.0, 0.0);
    let tx = vec3f(0.4, 0.3, 0.0);
    let mut u = V3::zeros();
    kernel_0s_0p(sx, 0.05, 2.0, tx, &mut u);

    let radial = (tx - sx).normalize();
    assert!(u.norm() > 0.);
    assert!((u.normalize() - radial).norm() < 1e-6);

    // and the combined vortex+source kernel reduces to it for zero vorticity
    let mut u2 = V3::zeros();
    kernel_0vs_0p(sx, 0.05, V3::zeros(), 2.0, tx, &mut u2);
    assert!((u - u2).norm() < 1e-7 * u.norm());
}

#[test]
fn subpanel_sheet_strength_conversion_test() {
    use crate::vec3f;

    // a well-separated target must see the same velocity from the recursive
    // kernel as from the flat 4-point rule with pre-multiplied area
    let s0 = vec3f(0.0, 0.0, 0.0);
    let s1 = vec3f(0.1, 0.0, 0.0);
    let s2 = vec3f(0.0, 0.1, 0.0);
    let sheet = vec3f(1.0, -2.0, 0.5);
    let area: FT = 0.005;
    let tx = vec3f(2.0, 1.0, 1.5);

    let mut direct = V3::zeros();
    kernel_0vs_0p(
        (s0 + s1 + s2) / 3.0,
        0.5 * area.sqrt(),
        area * sheet,
        0.0,
        tx,
        &mut direct,
    );

    let mut recursive = V3::zeros();
    rkernel_2vs_0p(s0, s1, s2, sheet, 0.0, tx, area, 0, MAX_SUBPANEL_LEVELS, &mut recursive);

    assert!((direct - recursive).norm() < 1e-6 * direct.norm().max(1e-12));
}
