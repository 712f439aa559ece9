use std::sync::Arc;

use nalgebra::zero;

use crate::{
    body::Body,
    collection::{ElementKind, Motion},
    floating_type_mod::FT,
    M3, V3, PARTICLE_PACKET_STRIDE, POINT_PACKET_STRIDE,
};

macro_rules! decl_elem_vec {
    (pub struct $struct_name:ident { $(pub $field_name:ident: Vec<$field_type:ty> | $default_value:expr),*$(,)?  }) => {
        pub struct $struct_name {
            $(
                pub $field_name : Vec<$field_type>,
            )*
        }

        impl $struct_name {
            pub fn swap(&mut self, i: usize, j: usize) {
                $(
                    self.$field_name.swap(i, j);
                )*
            }

            pub fn truncate(&mut self, len: usize) {
                $(
                    self.$field_name.truncate(len);
                )*
            }

            pub fn extend(&mut self, num_elements: usize) {
                $(
                    self.$field_name.extend((0..num_elements).map::<$field_type, _>(|_| $default_value));
                )*
            }

            pub fn default(len: usize) -> Self {
                Self {
                    $(
                        $field_name: (0..len).map(|_| $default_value).collect::<Vec<$field_type>>(),
                    )*
                }
            }
        }
    }
}

decl_elem_vec! {
    pub struct ElemVec {
        pub pos: Vec<V3> | zero(),
        pub strength: Vec<V3> | zero(),
        pub radius: Vec<FT> | 0.,
        pub vel: Vec<V3> | zero(),
        pub vel_grad: Vec<M3> | zero(),
        pub elong: Vec<FT> | 1.,
    }
}

/// A set of zero-dimensional elements: vortex particles or passive probes.
///
/// Storage is parallel arrays which always share one length. Inert
/// collections keep `strength` and `vel_grad` zeroed and never read them.
pub struct Points {
    pub e: ElemVec,
    kind: ElementKind,
    motion: Motion,
    body: Option<Arc<Body>>,
    max_str: FT,
}

impl Points {
    /// Build from an interleaved packet of `[x,y,z, sx,sy,sz, r]` values.
    pub fn new(packet: &[FT], kind: ElementKind, motion: Motion, body: Option<Arc<Body>>) -> Points {
        assert!(
            packet.len() % PARTICLE_PACKET_STRIDE == 0,
            "particle packet length {} is not a multiple of {}",
            packet.len(),
            PARTICLE_PACKET_STRIDE
        );
        let n = packet.len() / PARTICLE_PACKET_STRIDE;
        let mut e = ElemVec::default(n);
        for i in 0..n {
            let p = &packet[PARTICLE_PACKET_STRIDE * i..];
            e.pos[i] = V3::new(p[0], p[1], p[2]);
            e.strength[i] = V3::new(p[3], p[4], p[5]);
            e.radius[i] = p[6];
        }
        let mut pts = Points {
            e,
            kind,
            motion,
            body,
            max_str: 0.,
        };
        pts.update_max_str();
        pts
    }

    /// Build an inert set from an interleaved packet of `[x,y,z]` values.
    pub fn new_inert(packet: &[FT], motion: Motion, body: Option<Arc<Body>>) -> Points {
        assert!(
            packet.len() % POINT_PACKET_STRIDE == 0,
            "field point packet length {} is not a multiple of {}",
            packet.len(),
            POINT_PACKET_STRIDE
        );
        let n = packet.len() / POINT_PACKET_STRIDE;
        let mut e = ElemVec::default(n);
        for i in 0..n {
            let p = &packet[POINT_PACKET_STRIDE * i..];
            e.pos[i] = V3::new(p[0], p[1], p[2]);
        }
        Points {
            e,
            kind: ElementKind::Inert,
            motion,
            body,
            max_str: 0.,
        }
    }

    pub fn n(&self) -> usize {
        self.e.pos.len()
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

    pub fn is_inert(&self) -> bool {
        self.kind == ElementKind::Inert
    }

    /// Append a packet of new particles (same layout as `new`).
    pub fn add_new(&mut self, packet: &[FT]) {
        assert!(
            packet.len() % PARTICLE_PACKET_STRIDE == 0,
            "particle packet length {} is not a multiple of {}",
            packet.len(),
            PARTICLE_PACKET_STRIDE
        );
        let old_n = self.n();
        let added = packet.len() / PARTICLE_PACKET_STRIDE;
        self.e.extend(added);
        for i in 0..added {
            let p = &packet[PARTICLE_PACKET_STRIDE * i..];
            self.e.pos[old_n + i] = V3::new(p[0], p[1], p[2]);
            self.e.strength[old_n + i] = V3::new(p[3], p[4], p[5]);
            self.e.radius[old_n + i] = p[6];
        }
        self.update_max_str();
    }

    pub fn add_new_inert(&mut self, packet: &[FT]) {
        assert!(packet.len() % POINT_PACKET_STRIDE == 0);
        let old_n = self.n();
        let added = packet.len() / POINT_PACKET_STRIDE;
        self.e.extend(added);
        for i in 0..added {
            let p = &packet[POINT_PACKET_STRIDE * i..];
            self.e.pos[old_n + i] = V3::new(p[0], p[1], p[2]);
        }
    }

    /// Grow or shrink all parallel arrays to `n`. Diffusion uses this after
    /// the VRM pass has appended to positions, strengths and radii only.
    pub fn resize(&mut self, n: usize) {
        let old_n = self.e.vel.len();
        if n > old_n {
            // the VRM already extended pos/strength/radius; bring the rest up
            self.e.vel.resize(n, zero());
            self.e.vel_grad.resize(n, zero());
            self.e.elong.resize(n, 1.);
            self.e.pos.resize(n, zero());
            self.e.strength.resize(n, zero());
            self.e.radius.resize(n, 0.);
        } else {
            self.e.truncate(n);
        }
    }

    pub fn total_circulation(&self) -> V3 {
        let mut sum = V3::zeros();
        for s in &self.e.strength {
            sum += s;
        }
        sum
    }

    /// Hydrodynamic impulse contribution, sum of x cross s.
    pub fn total_impulse(&self) -> V3 {
        let mut sum = V3::zeros();
        for (x, s) in self.e.pos.iter().zip(self.e.strength.iter()) {
            sum += x.cross(s);
        }
        sum
    }

    pub fn max_elong(&self) -> FT {
        self.e.elong.iter().cloned().fold(0., FT::max)
    }

    pub fn update_max_str(&mut self) {
        self.max_str = self.e.strength.iter().map(|s| s.norm()).fold(0., FT::max);
    }

    pub fn max_str(&self) -> FT {
        self.max_str
    }

    pub fn has_nan(&self) -> bool {
        self.e.pos.iter().any(|x| !x.iter().all(|v| v.is_finite()))
            || self.e.strength.iter().any(|s| !s.iter().all(|v| v.is_finite()))
    }
}

#[test]
fn packet_ingestion_test() {
    let packet: Vec<FT> = vec![
        0., 1., 2., 0.1, 0.2, 0.3, 0.05, //
        3., 4., 5., -0.1, -0.2, -0.3, 0.05,
    ];
    let mut pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    assert_eq!(pts.n(), 2);
    assert!((pts.total_circulation() - V3::zeros()).norm() < 1e-7);
    assert!(pts.max_str() > 0.);

    pts.add_new(&[1., 1., 1., 0., 0., 1., 0.05]);
    assert_eq!(pts.n(), 3);
    assert_eq!(pts.e.vel.len(), 3);
    assert!((pts.e.elong[2] - 1.0).abs() < 1e-12);
}

#[test]
#[should_panic]
fn ragged_packet_panics_test() {
    let packet: Vec<FT> = vec![0., 1., 2., 0.1];
    Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
}

#[test]
fn impulse_test() {
    use crate::vec3f;

    let packet: Vec<FT> = vec![1., 0., 0., 0., 0., 2., 0.1];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    // (1,0,0) x (0,0,2) = (0,-2,0)
    assert!((pts.total_impulse() - vec3f(0., -2., 0.)).norm() < 1e-7);
}
