use rstar::{primitives::GeomWithData, RTree};

use crate::{floating_type_mod::FT, V3};

type TreeElem = GeomWithData<[FT; 3], usize>;

/// Spatial index over particle positions, rebuilt whenever the diffusion
/// operators need neighbor queries. Indices refer into the position slice the
/// tree was built from and go stale on any merge/split/VRM compaction.
pub struct NeighborTree {
    tree: RTree<TreeElem>,
}

impl NeighborTree {
    pub fn build(positions: &[V3]) -> NeighborTree {
        let elems: Vec<TreeElem> = positions
            .iter()
            .enumerate()
            .map(|(idx, p)| TreeElem::new([p.x, p.y, p.z], idx))
            .collect();
        NeighborTree {
            tree: RTree::bulk_load(elems),
        }
    }

    /// Indices of all points within `radius` of `x`, including `x` itself if
    /// it is in the tree.
    pub fn within<'a>(&'a self, x: V3, radius: FT) -> impl Iterator<Item = usize> + 'a {
        self.tree
            .locate_within_distance([x.x, x.y, x.z], radius * radius)
            .map(|e| e.data)
    }

    pub fn nearest_other(&self, x: V3, this: usize) -> Option<usize> {
        self.tree
            .nearest_neighbor_iter(&[x.x, x.y, x.z])
            .map(|e| e.data)
            .find(|&j| j != this)
    }
}

#[test]
fn within_radius_test() {
    use crate::vec3f;

    let positions = vec![
        vec3f(0., 0., 0.),
        vec3f(0.5, 0., 0.),
        vec3f(0., 0.9, 0.),
        vec3f(3., 3., 3.),
    ];
    let tree = NeighborTree::build(&positions);

    let mut found: Vec<usize> = tree.within(vec3f(0., 0., 0.), 1.0).collect();
    found.sort();
    assert_eq!(found, vec![0, 1, 2]);

    assert_eq!(tree.nearest_other(vec3f(0., 0., 0.), 0), Some(1));
}
