use std::sync::Arc;

use crate::{
    body::Body,
    collection::{ElementKind, Motion},
    floating_type_mod::FT,
    V3, PARTICLE_PACKET_STRIDE,
};

/// A set of two-dimensional elements: linear triangular panels carrying a
/// piecewise-constant vortex sheet strength.
///
/// Panels never grow at runtime; the solution `vs` is overwritten by every
/// BEM solve. Node positions are kept in the body frame so world-frame
/// geometry can be recomputed whenever the body moves.
pub struct Surfaces {
    nodes_body: Vec<V3>,
    pub nodes: Vec<V3>,
    pub tris: Vec<[u32; 3]>,

    // per-panel orthonormal frame and area, world frame, valid after set_time
    pub x1: Vec<V3>,
    pub x2: Vec<V3>,
    pub norm: Vec<V3>,
    pub area: Vec<FT>,

    /// Two tangential sheet strength components per panel (along x1, x2).
    pub vs: Vec<[FT; 2]>,
    /// Prescribed tangential boundary condition per panel.
    pub bc: Vec<[FT; 2]>,

    kind: ElementKind,
    motion: Motion,
    body: Option<Arc<Body>>,
}

impl Surfaces {
    /// Build from flat node coordinates, triangle index triples, and one
    /// pair of tangential BC values per panel (or empty for zero BCs).
    pub fn new(
        x: &[FT],
        idx: &[u32],
        val: &[FT],
        kind: ElementKind,
        motion: Motion,
        body: Option<Arc<Body>>,
    ) -> Surfaces {
        assert!(x.len() % 3 == 0, "node coordinate array is not a multiple of 3");
        assert!(idx.len() % 3 == 0, "triangle index array is not a multiple of 3");
        let nn = x.len() / 3;
        let np = idx.len() / 3;
        assert!(
            val.is_empty() || val.len() == 2 * np,
            "panel BC array must hold 2 values per panel"
        );

        let nodes_body: Vec<V3> = (0..nn).map(|i| V3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2])).collect();
        let tris: Vec<[u32; 3]> = (0..np)
            .map(|i| {
                let t = [idx[3 * i], idx[3 * i + 1], idx[3 * i + 2]];
                for &n in &t {
                    assert!((n as usize) < nn, "triangle references node {} of {}", n, nn);
                }
                t
            })
            .collect();
        let bc: Vec<[FT; 2]> = if val.is_empty() {
            vec![[0.; 2]; np]
        } else {
            (0..np).map(|i| [val[2 * i], val[2 * i + 1]]).collect()
        };

        let mut surf = Surfaces {
            nodes: nodes_body.clone(),
            nodes_body,
            tris,
            x1: vec![V3::zeros(); np],
            x2: vec![V3::zeros(); np],
            norm: vec![V3::zeros(); np],
            area: vec![0.; np],
            vs: vec![[0.; 2]; np],
            bc,
            kind,
            motion,
            body,
        };
        surf.set_time(0.0);
        surf
    }

    pub fn n_panels(&self) -> usize {
        self.tris.len()
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn motion(&self) -> Motion {
        self.motion
    }

    pub fn body(&self) -> Option<&Arc<Body>> {
        self.body.as_ref()
    }

    /// Append more panels (same packet layout as `new`). Only used while a
    /// scene is being assembled, never during a step.
    pub fn add_new(&mut self, x: &[FT], idx: &[u32], val: &[FT]) {
        let node_offset = self.nodes_body.len() as u32;
        assert!(x.len() % 3 == 0);
        assert!(idx.len() % 3 == 0);
        let added_np = idx.len() / 3;
        assert!(val.is_empty() || val.len() == 2 * added_np);

        for i in 0..x.len() / 3 {
            self.nodes_body.push(V3::new(x[3 * i], x[3 * i + 1], x[3 * i + 2]));
        }
        for i in 0..added_np {
            self.tris.push([
                node_offset + idx[3 * i],
                node_offset + idx[3 * i + 1],
                node_offset + idx[3 * i + 2],
            ]);
            self.bc.push(if val.is_empty() {
                [0.; 2]
            } else {
                [val[2 * i], val[2 * i + 1]]
            });
        }
        let np = self.tris.len();
        self.nodes.resize(self.nodes_body.len(), V3::zeros());
        self.x1.resize(np, V3::zeros());
        self.x2.resize(np, V3::zeros());
        self.norm.resize(np, V3::zeros());
        self.area.resize(np, 0.);
        self.vs.resize(np, [0.; 2]);
        self.set_time(0.0);
    }

    /// Recompute world-frame nodes and per-panel frames from the body pose.
    /// The BC components live in the panel frame and rotate with it.
    pub fn set_time(&mut self, time: f64) {
        match &self.body {
            Some(body) => {
                for (w, b) in self.nodes.iter_mut().zip(self.nodes_body.iter()) {
                    *w = body.to_world(*b, time);
                }
            }
            None => self.nodes.copy_from_slice(&self.nodes_body),
        }

        for (i, t) in self.tris.iter().enumerate() {
            let n0 = self.nodes[t[0] as usize];
            let n1 = self.nodes[t[1] as usize];
            let n2 = self.nodes[t[2] as usize];
            let e1 = n1 - n0;
            let e2 = n2 - n0;
            let cr = e1.cross(&e2);
            let twice_area = cr.norm();
            assert!(twice_area > 0., "panel {} is degenerate", i);
            self.area[i] = 0.5 * twice_area;
            self.norm[i] = cr / twice_area;
            self.x1[i] = e1.normalize();
            self.x2[i] = self.norm[i].cross(&self.x1[i]);
        }
    }

    pub fn centroid(&self, i: usize) -> V3 {
        let t = self.tris[i];
        (self.nodes[t[0] as usize] + self.nodes[t[1] as usize] + self.nodes[t[2] as usize]) / 3.0
    }

    pub fn corners(&self, i: usize) -> [V3; 3] {
        let t = self.tris[i];
        [
            self.nodes[t[0] as usize],
            self.nodes[t[1] as usize],
            self.nodes[t[2] as usize],
        ]
    }

    /// In-plane sheet strength vector of panel `i`.
    pub fn sheet_strength(&self, i: usize) -> V3 {
        self.vs[i][0] * self.x1[i] + self.vs[i][1] * self.x2[i]
    }

    /// Velocity of the body material at the centroid of panel `i`.
    pub fn panel_vel(&self, i: usize, time: f64) -> V3 {
        match &self.body {
            Some(body) => body.point_vel(self.centroid(i), time),
            None => V3::zeros(),
        }
    }

    /// Candidate shed particles: one per panel at the centroid offset along
    /// the outward normal, radius `v_delta`, strength = sheet strength times
    /// panel area. Returned as a flat particle packet.
    pub fn represent_as_particles(&self, offset: FT, v_delta: FT) -> Vec<FT> {
        let mut packet = Vec::with_capacity(PARTICLE_PACKET_STRIDE * self.n_panels());
        for i in 0..self.n_panels() {
            let x = self.centroid(i) + offset * self.norm[i];
            let s = self.sheet_strength(i) * self.area[i];
            packet.extend_from_slice(&[x.x, x.y, x.z, s.x, s.y, s.z, v_delta]);
        }
        packet
    }

    pub fn total_circulation(&self) -> V3 {
        let mut sum = V3::zeros();
        for i in 0..self.n_panels() {
            sum += self.sheet_strength(i) * self.area[i];
        }
        sum
    }

    /// Circulation implied by rigid rotation of the enclosed volume,
    /// `2 Omega V` with the volume from the divergence theorem.
    pub fn body_circulation(&self, _time: f64) -> V3 {
        let rot_vel = match &self.body {
            Some(body) => body.rot_vel(),
            None => return V3::zeros(),
        };
        if rot_vel.norm_squared() == 0. {
            return V3::zeros();
        }
        let mut volume: FT = 0.;
        for i in 0..self.n_panels() {
            volume += self.centroid(i).dot(&self.norm[i]) * self.area[i] / 3.0;
        }
        2.0 * volume * rot_vel
    }

    pub fn total_impulse(&self) -> V3 {
        let mut sum = V3::zeros();
        for i in 0..self.n_panels() {
            sum += self.centroid(i).cross(&(self.sheet_strength(i) * self.area[i]));
        }
        sum
    }

    pub fn max_bc_value(&self) -> FT {
        self.bc
            .iter()
            .flat_map(|b| b.iter())
            .map(|v| v.abs())
            .fold(0., FT::max)
    }
}

#[cfg(test)]
fn unit_square_plate() -> Surfaces {
    // two triangles spanning the unit square in the x-y plane
    let x: Vec<FT> = vec![
        0., 0., 0., //
        1., 0., 0., //
        1., 1., 0., //
        0., 1., 0.,
    ];
    let idx: Vec<u32> = vec![0, 1, 2, 0, 2, 3];
    Surfaces::new(&x, &idx, &[], ElementKind::Reactive, Motion::Fixed, None)
}

#[test]
fn panel_frame_test() {
    let surf = unit_square_plate();
    assert_eq!(surf.n_panels(), 2);
    for i in 0..2 {
        assert!((surf.area[i] - 0.5).abs() < 1e-6);
        assert!((surf.norm[i] - V3::z()).norm() < 1e-6);
        // orthonormal frame
        assert!(surf.x1[i].dot(&surf.x2[i]).abs() < 1e-6);
        assert!((surf.x1[i].cross(&surf.x2[i]) - surf.norm[i]).norm() < 1e-6);
    }
}

#[test]
fn represent_as_particles_test() {
    let mut surf = unit_square_plate();
    surf.vs[0] = [2.0, 0.0];
    surf.vs[1] = [0.0, -1.0];

    let packet = surf.represent_as_particles(0.01, 0.05);
    assert_eq!(packet.len(), 2 * PARTICLE_PACKET_STRIDE);

    // offset along +z, radius as given
    assert!((packet[2] - 0.01).abs() < 1e-6);
    assert!((packet[6] - 0.05).abs() < 1e-6);

    // strength = sheet strength * area
    let s0 = V3::new(packet[3], packet[4], packet[5]);
    assert!((s0 - surf.sheet_strength(0) * surf.area[0]).norm() < 1e-6);
}

#[test]
#[should_panic]
fn degenerate_panel_panics_test() {
    let x: Vec<FT> = vec![0., 0., 0., 1., 0., 0., 2., 0., 0.];
    let idx: Vec<u32> = vec![0, 1, 2];
    Surfaces::new(&x, &idx, &[], ElementKind::Reactive, Motion::Fixed, None);
}
