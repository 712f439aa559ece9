use crate::{
    collection::{Collection, ElementKind, Motion},
    floating_type_mod::FT,
    surfaces::Surfaces,
    V3,
};

/// Closest point on triangle `abc` to `p` (Ericson, Real-Time Collision
/// Detection, 5.1.5).
fn closest_point_on_triangle(p: V3, a: V3, b: V3, c: V3) -> V3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0. && d2 <= 0. {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0. && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0. && d1 >= 0. && d3 <= 0. {
        let v = d1 / (d1 - d3);
        return a + v * ab;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0. && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0. && d2 >= 0. && d6 <= 0. {
        let w = d2 / (d2 - d6);
        return a + w * ac;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0. && (d4 - d3) >= 0. && (d5 - d6) <= 0. {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + w * (c - b);
    }

    let denom = 1. / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + v * ab + w * ac
}

struct SurfaceHit {
    /// Positive on the side the panel normal points to.
    dist_signed: FT,
    normal: V3,
    point: V3,
}

fn nearest_point_on_surface(surf: &Surfaces, x: V3) -> Option<SurfaceHit> {
    let mut best: Option<(FT, SurfaceHit)> = None;
    for i in 0..surf.n_panels() {
        let [a, b, c] = surf.corners(i);
        let cp = closest_point_on_triangle(x, a, b, c);
        let d2 = (x - cp).norm_squared();
        if best.as_ref().map_or(true, |(bd2, _)| d2 < *bd2) {
            let n = surf.norm[i];
            best = Some((
                d2,
                SurfaceHit {
                    dist_signed: (x - cp).dot(&n),
                    normal: n,
                    point: cp,
                },
            ));
        }
    }
    best.map(|(_, hit)| hit)
}

fn nearest_hit(bdry: &[Collection], x: V3) -> Option<SurfaceHit> {
    let mut best: Option<SurfaceHit> = None;
    for coll in bdry {
        if coll.kind() != ElementKind::Reactive {
            continue;
        }
        let Some(surf) = coll.as_surfaces() else {
            continue;
        };
        if let Some(hit) = nearest_point_on_surface(surf, x) {
            let replace = best
                .as_ref()
                .map_or(true, |b| (x - hit.point).norm_squared() < (x - b.point).norm_squared());
            if replace {
                best = Some(hit);
            }
        }
    }
    best
}

/// Mirror particles that ended up on the interior side of a surface back to
/// the exterior along the surface normal. Returns the number moved.
pub fn reflect_interior(bdry: &[Collection], vort: &mut [Collection]) -> usize {
    if bdry.iter().all(|c| c.kind() != ElementKind::Reactive) {
        return 0;
    }

    let mut num_moved = 0;
    for coll in vort.iter_mut() {
        let Some(pts) = coll.as_points_mut() else {
            continue;
        };
        if pts.is_inert() || pts.motion() != Motion::Lagrangian {
            continue;
        }
        for i in 0..pts.n() {
            let x = pts.e.pos[i];
            if let Some(hit) = nearest_hit(bdry, x) {
                if hit.dist_signed < 0. {
                    pts.e.pos[i] = x - 2.0 * hit.dist_signed * hit.normal;
                    num_moved += 1;
                }
            }
        }
    }
    num_moved
}

/// Push Lagrangian elements that sit closer than `cushion * length` to a
/// reactive surface out to exactly that standoff distance. Used to clear the
/// layer whose vorticity is represented implicitly by the panel strengths.
/// Returns the number moved.
pub fn clear_inner_layer(bdry: &[Collection], targets: &mut [Collection], cushion: FT, length: FT) -> usize {
    if bdry.iter().all(|c| c.kind() != ElementKind::Reactive) {
        return 0;
    }

    let standoff = cushion * length;
    let mut num_moved = 0;
    for coll in targets.iter_mut() {
        let Some(pts) = coll.as_points_mut() else {
            continue;
        };
        if pts.motion() != Motion::Lagrangian {
            continue;
        }
        for i in 0..pts.n() {
            let x = pts.e.pos[i];
            if let Some(hit) = nearest_hit(bdry, x) {
                if hit.dist_signed < standoff {
                    pts.e.pos[i] = hit.point + standoff * hit.normal;
                    num_moved += 1;
                }
            }
        }
    }
    num_moved
}

#[cfg(test)]
fn plate_z0() -> Collection {
    let x: Vec<FT> = vec![
        -1., -1., 0., //
        1., -1., 0., //
        1., 1., 0., //
        -1., 1., 0.,
    ];
    let idx: Vec<u32> = vec![0, 1, 2, 0, 2, 3];
    Collection::Surfaces(Surfaces::new(
        &x,
        &idx,
        &[],
        ElementKind::Reactive,
        Motion::Fixed,
        None,
    ))
}

#[test]
fn closest_point_regions_test() {
    use crate::vec3f;

    let a = vec3f(0., 0., 0.);
    let b = vec3f(1., 0., 0.);
    let c = vec3f(0., 1., 0.);

    // above the interior: projects onto the face
    let cp = closest_point_on_triangle(vec3f(0.2, 0.2, 1.), a, b, c);
    assert!((cp - vec3f(0.2, 0.2, 0.)).norm() < 1e-6);

    // beyond a corner: snaps to the corner
    let cp = closest_point_on_triangle(vec3f(-1., -1., 0.5), a, b, c);
    assert!((cp - a).norm() < 1e-6);

    // beyond an edge: snaps onto the edge
    let cp = closest_point_on_triangle(vec3f(0.5, -1., 0.), a, b, c);
    assert!((cp - vec3f(0.5, 0., 0.)).norm() < 1e-6);
}

#[test]
fn reflect_interior_test() {
    use crate::points::Points;

    let bdry = vec![plate_z0()];
    let packet: Vec<FT> = vec![0.1, 0.1, -0.05, 0., 0., 1., 0.1];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut vort = vec![Collection::Points(pts)];

    let moved = reflect_interior(&bdry, &mut vort);
    assert_eq!(moved, 1);
    let z = vort[0].as_points().unwrap().e.pos[0].z;
    assert!((z - 0.05).abs() < 1e-6, "particle not mirrored to the exterior");
}

#[test]
fn clear_inner_layer_pushes_to_standoff_test() {
    use crate::points::Points;

    let bdry = vec![plate_z0()];
    let packet: Vec<FT> = vec![
        0.1, 0.1, 0.01, 0., 0., 1., 0.1, // inside the layer
        0.1, 0.1, 0.50, 0., 0., 1., 0.1, // already clear
    ];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut vort = vec![Collection::Points(pts)];

    let moved = clear_inner_layer(&bdry, &mut vort, 0.4, 0.25);
    assert_eq!(moved, 1);
    let pts = vort[0].as_points().unwrap();
    assert!((pts.e.pos[0].z - 0.1).abs() < 1e-6);
    assert!((pts.e.pos[1].z - 0.5).abs() < 1e-6);
}
