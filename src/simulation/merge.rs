use crate::{
    collection::Collection, floating_type_mod::FT, neighborhood::NeighborTree, points::Points, V3,
};

/// Radius compatibility bound for merging under adaptive radii.
const RADIUS_RATIO_LIMIT: FT = 1.3;

/// Merge pairs of active particles closer than `merge_thresh` nominal
/// separations. Returns the number of merges performed.
pub fn merge_operation(
    vort: &mut [Collection],
    particle_overlap: FT,
    merge_thresh: FT,
    adaptive_radii: bool,
) -> usize {
    let mut num_merged = 0;
    for coll in vort.iter_mut() {
        if coll.is_inert() {
            continue;
        }
        if let Some(pts) = coll.as_points_mut() {
            num_merged += merge_close_particles(pts, particle_overlap, merge_thresh, adaptive_radii);
        }
    }
    num_merged
}

fn merge_close_particles(
    pts: &mut Points,
    particle_overlap: FT,
    merge_thresh: FT,
    adaptive_radii: bool,
) -> usize {
    let n = pts.n();
    if n < 2 {
        return 0;
    }

    let tree = NeighborTree::build(&pts.e.pos);
    let mut absorbed = vec![false; n];
    let mut num_merged = 0;

    for i in 0..n {
        if absorbed[i] {
            continue;
        }

        // nominal separation for this particle comes back out of its core
        // radius, which was set to overlap * nom_sep at creation
        let nom_sep_i = pts.e.radius[i] / particle_overlap;
        let threshold = merge_thresh * nom_sep_i;

        let partner = tree
            .within(pts.e.pos[i], threshold)
            .filter(|&j| j != i && j > i && !absorbed[j])
            .min_by(|&a, &b| {
                let da = (pts.e.pos[a] - pts.e.pos[i]).norm_squared();
                let db = (pts.e.pos[b] - pts.e.pos[i]).norm_squared();
                da.partial_cmp(&db).unwrap()
            });
        let Some(j) = partner else {
            continue;
        };

        if adaptive_radii {
            let (ra, rb) = (pts.e.radius[i], pts.e.radius[j]);
            if ra.max(rb) > RADIUS_RATIO_LIMIT * ra.min(rb) {
                continue;
            }
        }

        merge_pair(pts, i, j);
        absorbed[j] = true;
        num_merged += 1;
    }

    if num_merged > 0 {
        // delete absorbed particles by swapping them to the end of the array
        let mut last = n;
        let mut i = 0;
        while i < last {
            if absorbed[i] {
                last -= 1;
                pts.e.swap(i, last);
                absorbed.swap(i, last);
            } else {
                i += 1;
            }
        }
        pts.e.truncate(last);
        pts.update_max_str();
    }

    num_merged
}

/// Combine particle `j` into particle `i`: strength-weighted centroid, summed
/// strength, radius preserving the combined second moment of |strength|.
fn merge_pair(pts: &mut Points, i: usize, j: usize) {
    let (xa, xb) = (pts.e.pos[i], pts.e.pos[j]);
    let (sa, sb) = (pts.e.strength[i], pts.e.strength[j]);
    let (ra, rb) = (pts.e.radius[i], pts.e.radius[j]);

    let (mut wa, mut wb) = (sa.norm(), sb.norm());
    if wa + wb == 0. {
        wa = 1.;
        wb = 1.;
    }
    let wsum = wa + wb;

    let xc: V3 = (wa * xa + wb * xb) / wsum;
    let da2 = (xa - xc).norm_squared();
    let db2 = (xb - xc).norm_squared();
    let r2 = (wa * (ra * ra + da2) + wb * (rb * rb + db2)) / wsum;

    pts.e.pos[i] = xc;
    pts.e.strength[i] = sa + sb;
    pts.e.radius[i] = r2.sqrt();
    pts.e.vel[i] = (wa * pts.e.vel[i] + wb * pts.e.vel[j]) / wsum;
    pts.e.elong[i] = (wa * pts.e.elong[i] + wb * pts.e.elong[j]) / wsum;
}

#[cfg(test)]
use crate::collection::{ElementKind, Motion};

#[test]
fn merge_conserves_strength_and_centroid_test() {
    // two close particles and one far away
    let overlap: FT = 1.5;
    let radius: FT = 0.15; // nom_sep = 0.1
    let packet: Vec<FT> = vec![
        0.00, 0., 0., 0., 0., 1., radius, //
        0.01, 0., 0., 0., 0., 3., radius, //
        5.00, 0., 0., 0., 0., 1., radius,
    ];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut colls = vec![Collection::Points(pts)];

    let before_str = colls[0].total_circulation(0.0);
    let before_imp = colls[0].total_impulse();

    let merged = merge_operation(&mut colls, overlap, 0.2, false);
    assert_eq!(merged, 1);

    let pts = colls[0].as_points().unwrap();
    assert_eq!(pts.n(), 2);
    assert!((pts.total_circulation() - before_str).norm() < 1e-6);
    // strength-weighted centroid keeps the first strength moment
    assert!((pts.total_impulse() - before_imp).norm() < 1e-5);

    // merged radius grows to hold the combined second moment
    let rmax = pts.e.radius.iter().cloned().fold(0., FT::max);
    assert!(rmax >= radius);
}

#[test]
fn distant_particles_do_not_merge_test() {
    let packet: Vec<FT> = vec![
        0., 0., 0., 0., 0., 1., 0.15, //
        1., 0., 0., 0., 0., 1., 0.15,
    ];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut colls = vec![Collection::Points(pts)];
    assert_eq!(merge_operation(&mut colls, 1.5, 0.2, false), 0);
    assert_eq!(colls[0].as_points().unwrap().n(), 2);
}
