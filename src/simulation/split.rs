use crate::{floating_type_mod::FT, points::Points};

/// Split particles whose accumulated elongation exceeds `elong_thresh`.
///
/// Each split replaces the parent with two children offset half a nominal
/// separation along the stretch direction (the strength axis), each carrying
/// half the strength, with elongation reset to one. Returns the number of
/// splits.
pub fn split_elongated(pts: &mut Points, particle_overlap: FT, elong_thresh: FT) -> usize {
    let n = pts.n();
    let mut num_split = 0;
    let mut new_id = n;

    for i in 0..n {
        if pts.e.elong[i] <= elong_thresh {
            continue;
        }
        let s = pts.e.strength[i];
        if s.norm_squared() == 0. {
            // no stretch direction to split along
            pts.e.elong[i] = 1.0;
            continue;
        }

        let dir = s.normalize();
        let nom_sep = pts.e.radius[i] / particle_overlap;
        let offset = 0.5 * nom_sep * dir;
        let half = 0.5 * s;

        pts.e.extend(1);
        pts.e.pos[new_id] = pts.e.pos[i] + offset;
        pts.e.strength[new_id] = half;
        pts.e.radius[new_id] = pts.e.radius[i];
        pts.e.vel[new_id] = pts.e.vel[i];
        pts.e.vel_grad[new_id] = pts.e.vel_grad[i];
        pts.e.elong[new_id] = 1.0;

        pts.e.pos[i] -= offset;
        pts.e.strength[i] = half;
        pts.e.elong[i] = 1.0;

        new_id += 1;
        num_split += 1;
    }

    if num_split > 0 {
        pts.update_max_str();
    }
    num_split
}

#[cfg(test)]
use crate::collection::{ElementKind, Motion};
#[cfg(test)]
use crate::V3;

#[test]
fn split_resets_elongation_test() {
    let packet: Vec<FT> = vec![0., 0., 0., 0., 0., 2., 0.15];
    let mut pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    pts.e.elong[0] = 1.3;

    let before = pts.total_circulation();
    let n_split = split_elongated(&mut pts, 1.5, 1.2);

    assert_eq!(n_split, 1);
    assert_eq!(pts.n(), 2);
    for i in 0..2 {
        assert!((pts.e.elong[i] - 1.0).abs() < 1e-12, "child elongation not reset");
        assert!((pts.e.strength[i] - V3::new(0., 0., 1.)).norm() < 1e-7);
    }
    assert!((pts.total_circulation() - before).norm() < 1e-6);

    // children straddle the parent along the strength axis
    assert!((pts.e.pos[0] + pts.e.pos[1]).norm() < 1e-6);
    assert!(pts.e.pos[0].z.abs() > 0. && pts.e.pos[0].x.abs() < 1e-12);
}

#[test]
fn unstretched_particles_untouched_test() {
    let packet: Vec<FT> = vec![0., 0., 0., 0., 0., 2., 0.15];
    let mut pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    assert_eq!(split_elongated(&mut pts, 1.5, 1.2), 0);
    assert_eq!(pts.n(), 1);
}
