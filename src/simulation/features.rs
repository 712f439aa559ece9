use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{floating_type_mod::FT, floating_type_mod::PI, V3};

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

/// Orthonormal basis completing a unit normal (Duff et al. 2017).
pub fn branchless_onb(n: V3) -> (V3, V3) {
    let sign = (1.0 as FT).copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    (
        V3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x),
        V3::new(b, sign + n.y * n.y * a, -n.y),
    )
}

/// Scene-level descriptions of initial and per-step vorticity. Each feature
/// produces flat particle packets: 7 floats per particle, radius left at
/// zero for the simulation to fill in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum FlowFeature {
    #[serde(rename = "single particle")]
    SingleParticle {
        center: [FT; 3],
        strength: [FT; 3],
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "vortex blob")]
    VortexBlob {
        center: [FT; 3],
        strength: [FT; 3],
        radius: FT,
        softness: FT,
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "block of random")]
    BlockOfRandom {
        center: [FT; 3],
        size: [FT; 3],
        #[serde(rename = "max strength")]
        max_strength: FT,
        num: usize,
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "particle emitter")]
    ParticleEmitter {
        center: [FT; 3],
        strength: [FT; 3],
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "singular ring")]
    SingularRing {
        center: [FT; 3],
        normal: [FT; 3],
        #[serde(rename = "major radius")]
        major_radius: FT,
        circulation: FT,
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "thick ring")]
    ThickRing {
        center: [FT; 3],
        normal: [FT; 3],
        #[serde(rename = "major radius")]
        major_radius: FT,
        #[serde(rename = "minor radius")]
        minor_radius: FT,
        circulation: FT,
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

impl FlowFeature {
    pub fn is_enabled(&self) -> bool {
        match self {
            FlowFeature::SingleParticle { enabled, .. }
            | FlowFeature::VortexBlob { enabled, .. }
            | FlowFeature::BlockOfRandom { enabled, .. }
            | FlowFeature::ParticleEmitter { enabled, .. }
            | FlowFeature::SingularRing { enabled, .. }
            | FlowFeature::ThickRing { enabled, .. } => *enabled,
        }
    }

    pub fn set_enabled(&mut self, v: bool) {
        match self {
            FlowFeature::SingleParticle { enabled, .. }
            | FlowFeature::VortexBlob { enabled, .. }
            | FlowFeature::BlockOfRandom { enabled, .. }
            | FlowFeature::ParticleEmitter { enabled, .. }
            | FlowFeature::SingularRing { enabled, .. }
            | FlowFeature::ThickRing { enabled, .. } => *enabled = v,
        }
    }

    /// Particles to seed at simulation start.
    pub fn init_particles(&self, ips: FT) -> Vec<FT> {
        if !self.is_enabled() {
            return Vec::new();
        }
        match *self {
            FlowFeature::SingleParticle { center, strength, .. } => {
                vec![
                    center[0], center[1], center[2], strength[0], strength[1], strength[2], 0.0,
                ]
            }

            FlowFeature::VortexBlob {
                center,
                strength,
                radius,
                softness,
                ..
            } => vortex_blob_particles(center, strength, radius, softness, ips),

            FlowFeature::BlockOfRandom {
                center,
                size,
                max_strength,
                num,
                ..
            } => {
                let mut rng = rand::thread_rng();
                let mut x = Vec::with_capacity(7 * num);
                for _ in 0..num {
                    for d in 0..3 {
                        x.push(center[d] + size[d] * (rng.gen::<FT>() - 0.5));
                    }
                    for _ in 0..3 {
                        x.push(max_strength * (rng.gen::<FT>() - 0.5) / num as FT);
                    }
                    x.push(0.0);
                }
                x
            }

            FlowFeature::ParticleEmitter { .. } => Vec::new(),

            FlowFeature::SingularRing {
                center,
                normal,
                major_radius,
                circulation,
                ..
            } => singular_ring_particles(center, normal, major_radius, circulation, ips),

            FlowFeature::ThickRing {
                center,
                normal,
                major_radius,
                minor_radius,
                circulation,
                ..
            } => thick_ring_particles(center, normal, major_radius, minor_radius, circulation, ips),
        }
    }

    /// Particles to emit every step; empty except for emitters.
    pub fn step_particles(&self, _ips: FT) -> Vec<FT> {
        if !self.is_enabled() {
            return Vec::new();
        }
        match *self {
            FlowFeature::ParticleEmitter { center, strength, .. } => {
                vec![
                    center[0], center[1], center[2], strength[0], strength[1], strength[2], 0.0,
                ]
            }
            _ => Vec::new(),
        }
    }

    pub fn is_generator(&self) -> bool {
        matches!(self, FlowFeature::ParticleEmitter { .. })
    }
}

/// Fill a ball with lattice particles, fading the weight through a sine
/// shell and normalizing so the integrated strength matches the target.
fn vortex_blob_particles(center: [FT; 3], strength: [FT; 3], rad: FT, softness: FT, ips: FT) -> Vec<FT> {
    let mut x: Vec<FT> = Vec::new();
    let irad = (1.0 + (rad + 0.5 * softness) / ips) as i32;
    println!("blob needs {} to {} spaces", -irad, irad);

    let mut tot_wgt: f64 = 0.0;
    for i in -irad..=irad {
        for j in -irad..=irad {
            for k in -irad..=irad {
                let dr = ((i * i + j * j + k * k) as FT).sqrt() * ips;
                if dr >= rad + 0.5 * softness {
                    continue;
                }
                x.push(center[0] + ips * i as FT);
                x.push(center[1] + ips * j as FT);
                x.push(center[2] + ips * k as FT);

                let mut this_wgt: f64 = 1.0;
                if dr > rad - 0.5 * softness {
                    this_wgt = 0.5 - 0.5 * (PI * (dr - rad) / softness).sin() as f64;
                }
                tot_wgt += this_wgt;
                x.push(strength[0] * this_wgt as FT);
                x.push(strength[1] * this_wgt as FT);
                x.push(strength[2] * this_wgt as FT);
                x.push(0.0);
            }
        }
    }

    // normalize so the whole blob carries exactly the requested strength
    println!("blob had {} initial circulation", tot_wgt);
    if tot_wgt > 0.0 {
        let str_scale = (1.0 / tot_wgt) as FT;
        for i in (3..x.len()).step_by(7) {
            x[i] *= str_scale;
            x[i + 1] *= str_scale;
            x[i + 2] *= str_scale;
        }
    }
    x
}

/// One row of particles around a circle, strengths tangent to the ring.
fn singular_ring_particles(center: [FT; 3], normal: [FT; 3], majrad: FT, circ: FT, ips: FT) -> Vec<FT> {
    let ndiam = (1.0 + (2.0 * PI * majrad) / ips) as usize;
    println!("  ring needs {} particles", ndiam);
    let this_ips = (2.0 * PI * majrad) / ndiam as FT;

    let norm = V3::new(normal[0], normal[1], normal[2]).normalize();
    let (b1, b2) = branchless_onb(norm);
    let c = V3::new(center[0], center[1], center[2]);

    let mut x: Vec<FT> = Vec::with_capacity(7 * ndiam);
    for i in 0..ndiam {
        let theta = 2.0 * PI * i as FT / ndiam as FT;
        let (st, ct) = theta.sin_cos();

        let pos = c + majrad * (b1 * ct + b2 * st);
        let tang = b2 * ct - b1 * st;
        let s = this_ips * circ * tang;

        x.extend_from_slice(&[pos.x, pos.y, pos.z, s.x, s.y, s.z, 0.0]);
    }
    x
}

/// A disk of particles at each azimuthal station around the ring; strengths
/// scale with the local major-circumference ratio so circulation along the
/// tube is preserved.
fn thick_ring_particles(
    center: [FT; 3],
    normal: [FT; 3],
    majrad: FT,
    minrad: FT,
    circ: FT,
    ips: FT,
) -> Vec<FT> {
    // the disk at one station: local in-plane x, y and a strength scale
    let mut disk: Vec<FT> = vec![0.0, 0.0, 1.0];
    let nlayers = (1.0 + minrad / ips) as usize;
    let mut nthisdisk = 1;
    for l in 1..nlayers {
        let thisrad = l as FT * ips;
        let nthislayer = (1.0 + (2.0 * PI * thisrad) / ips) as usize;
        for i in 0..nthislayer {
            let phi = 2.0 * PI * i as FT / nthislayer as FT;
            disk.push(thisrad * phi.cos());
            disk.push(thisrad * phi.sin());
            disk.push((majrad + thisrad * phi.cos()) / majrad);
        }
        nthisdisk += nthislayer;
    }
    println!(
        "  ring needs {} layers and {} particles per azimuthal station",
        nlayers, nthisdisk
    );

    let ndiam = (1.0 + (2.0 * PI * majrad) / ips) as usize;
    let this_ips = (2.0 * PI * majrad) / ndiam as FT;

    let norm = V3::new(normal[0], normal[1], normal[2]).normalize();
    let (b1, b2) = branchless_onb(norm);
    let c = V3::new(center[0], center[1], center[2]);

    let mut x: Vec<FT> = Vec::with_capacity(7 * ndiam * nthisdisk);
    for i in 0..ndiam {
        let theta = 2.0 * PI * i as FT / ndiam as FT;
        let (st, ct) = theta.sin_cos();

        for j in 0..nthisdisk {
            let dx = disk[3 * j];
            let dy = disk[3 * j + 1];
            let dl = disk[3 * j + 2];

            let pos = c + (majrad + dx) * (b1 * ct + b2 * st) + dy * norm;
            let sscale = dl * this_ips * circ / nthisdisk as FT;
            let s = sscale * (b2 * ct - b1 * st);

            x.extend_from_slice(&[pos.x, pos.y, pos.z, s.x, s.y, s.z, 0.0]);
        }
    }
    x
}

/// Scene-level descriptions of passive measurement points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MeasureFeature {
    #[serde(rename = "single point")]
    SinglePoint {
        center: [FT; 3],
        #[serde(default = "default_false")]
        moves: bool,
        #[serde(default = "default_true")]
        enabled: bool,
    },

    /// An immobile emitter releasing one drifting tracer per step.
    #[serde(rename = "tracer emitter")]
    TracerEmitter {
        center: [FT; 3],
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "tracer blob")]
    TracerBlob {
        center: [FT; 3],
        radius: FT,
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "tracer line")]
    TracerLine {
        center: [FT; 3],
        end: [FT; 3],
        #[serde(default = "default_true")]
        enabled: bool,
    },

    /// A line of static probes.
    #[serde(rename = "measurement line")]
    MeasurementLine {
        center: [FT; 3],
        end: [FT; 3],
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

impl MeasureFeature {
    pub fn is_enabled(&self) -> bool {
        match self {
            MeasureFeature::SinglePoint { enabled, .. }
            | MeasureFeature::TracerEmitter { enabled, .. }
            | MeasureFeature::TracerBlob { enabled, .. }
            | MeasureFeature::TracerLine { enabled, .. }
            | MeasureFeature::MeasurementLine { enabled, .. } => *enabled,
        }
    }

    /// Whether the points this feature produces ride with the flow.
    pub fn moves(&self) -> bool {
        match self {
            MeasureFeature::SinglePoint { moves, .. } => *moves,
            MeasureFeature::TracerEmitter { .. } => true,
            MeasureFeature::TracerBlob { .. } => true,
            MeasureFeature::TracerLine { .. } => true,
            MeasureFeature::MeasurementLine { .. } => false,
        }
    }

    /// Points present at simulation start, as a flat `[x,y,z]` packet.
    pub fn init_particles(&self, ips: FT) -> Vec<FT> {
        if !self.is_enabled() {
            return Vec::new();
        }
        match *self {
            MeasureFeature::SinglePoint { center, .. } => vec![center[0], center[1], center[2]],

            MeasureFeature::TracerEmitter { .. } => Vec::new(),

            MeasureFeature::TracerBlob { center, radius, .. } => {
                let mut x: Vec<FT> = Vec::new();
                let irad = (1.0 + radius / ips) as i32;
                for i in -irad..=irad {
                    for j in -irad..=irad {
                        for k in -irad..=irad {
                            let dr = ((i * i + j * j + k * k) as FT).sqrt() * ips;
                            if dr < radius {
                                x.push(center[0] + ips * i as FT);
                                x.push(center[1] + ips * j as FT);
                                x.push(center[2] + ips * k as FT);
                            }
                        }
                    }
                }
                x
            }

            MeasureFeature::TracerLine { center, end, .. }
            | MeasureFeature::MeasurementLine { center, end, .. } => {
                let c = V3::new(center[0], center[1], center[2]);
                let e = V3::new(end[0], end[1], end[2]);
                let len = (e - c).norm();
                let n = 1 + (len / ips) as usize;
                let mut x: Vec<FT> = Vec::with_capacity(3 * (n + 1));
                for i in 0..=n {
                    let p = c + (e - c) * (i as FT / n as FT);
                    x.extend_from_slice(&[p.x, p.y, p.z]);
                }
                x
            }
        }
    }

    /// Points to emit each step; one per step for tracer emitters.
    pub fn step_particles(&self, _ips: FT) -> Vec<FT> {
        if !self.is_enabled() {
            return Vec::new();
        }
        match *self {
            MeasureFeature::TracerEmitter { center, .. } => vec![center[0], center[1], center[2]],
            _ => Vec::new(),
        }
    }
}

#[test]
fn onb_is_orthonormal_test() {
    use crate::vec3f;

    for n in [
        vec3f(0., 0., 1.),
        vec3f(0., 0., -1.),
        vec3f(1., 0., 0.),
        vec3f(0.36, -0.48, 0.8),
    ] {
        let (b1, b2) = branchless_onb(n);
        assert!((b1.norm() - 1.).abs() < 1e-6);
        assert!((b2.norm() - 1.).abs() < 1e-6);
        assert!(b1.dot(&n).abs() < 1e-6);
        assert!(b2.dot(&n).abs() < 1e-6);
        assert!((b1.cross(&b2) - n).norm() < 1e-5);
    }
}

#[test]
fn vortex_blob_normalization_test() {
    let feature = FlowFeature::VortexBlob {
        center: [0., 0., 0.],
        strength: [0., 0., 1.],
        radius: 0.5,
        softness: 0.1,
        enabled: true,
    };
    let packet = feature.init_particles(0.1);
    assert!(packet.len() % 7 == 0);
    assert!(packet.len() / 7 > 100);

    // total strength is exactly the target after normalization
    let mut total = [0.0 as FT; 3];
    for i in (0..packet.len()).step_by(7) {
        total[0] += packet[i + 3];
        total[1] += packet[i + 4];
        total[2] += packet[i + 5];
    }
    assert!(total[0].abs() < 1e-5);
    assert!(total[1].abs() < 1e-5);
    assert!((total[2] - 1.0).abs() < 1e-4);
}

#[test]
fn disabled_feature_is_empty_test() {
    let mut feature = FlowFeature::SingularRing {
        center: [0., 0., 0.],
        normal: [1., 0., 0.],
        major_radius: 1.0,
        circulation: 1.0,
        enabled: false,
    };
    assert!(feature.init_particles(0.1).is_empty());

    // re-enabling reproduces the originally-enabled particle set
    feature.set_enabled(true);
    let packet = feature.init_particles(0.1);
    assert!(!packet.is_empty());
    let expected = 1 + (2.0 * PI * 1.0 / 0.1) as usize;
    assert_eq!(packet.len() / 7, expected);
}

#[test]
fn singular_ring_total_strength_is_zero_test() {
    // tangential strengths around a closed ring sum to zero
    let feature = FlowFeature::SingularRing {
        center: [0., 0., 0.],
        normal: [0., 0., 1.],
        major_radius: 1.0,
        circulation: 2.0,
        enabled: true,
    };
    let packet = feature.init_particles(0.05);
    let mut total = [0.0 as FT; 3];
    for i in (0..packet.len()).step_by(7) {
        total[0] += packet[i + 3];
        total[1] += packet[i + 4];
        total[2] += packet[i + 5];
    }
    for t in total {
        assert!(t.abs() < 1e-4, "net ring strength {} should cancel", t);
    }
}

#[test]
fn emitter_emits_one_per_step_test() {
    let feature = FlowFeature::ParticleEmitter {
        center: [1., 2., 3.],
        strength: [0., 0., 0.1],
        enabled: true,
    };
    assert!(feature.init_particles(0.1).is_empty());
    assert_eq!(feature.step_particles(0.1).len(), 7);
    assert!(feature.is_generator());

    let tracer = MeasureFeature::TracerEmitter {
        center: [0., 0., 0.],
        enabled: true,
    };
    assert!(tracer.init_particles(0.1).is_empty());
    assert_eq!(tracer.step_particles(0.1).len(), 3);
    assert!(tracer.moves());
}
