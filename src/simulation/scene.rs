use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    body::Body,
    collection::ElementPacket,
    features::{branchless_onb, FlowFeature, MeasureFeature},
    floating_type_mod::FT,
    simulation::Simulation,
    V3,
};

fn default_true() -> bool {
    true
}

/// Freestream velocity: either a single x-speed or a full vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Uinf {
    Speed(FT),
    Vector([FT; 3]),
}

impl Uinf {
    pub fn as_vector(&self) -> V3 {
        match *self {
            Uinf::Speed(u) => V3::new(u, 0., 0.),
            Uinf::Vector(v) => V3::new(v[0], v[1], v[2]),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeParams {
    #[serde(rename = "maxSteps", skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    #[serde(rename = "endTime", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(rename = "outputDt", skip_serializing_if = "Option::is_none")]
    pub output_dt: Option<f64>,
    #[serde(rename = "autoStart", default)]
    pub auto_start: bool,
    #[serde(rename = "quitOnStop", default)]
    pub quit_on_stop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowParams {
    #[serde(rename = "Re")]
    pub re: FT,
    #[serde(rename = "Uinf", skip_serializing_if = "Option::is_none")]
    pub uinf: Option<Uinf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VrmParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radgrad: Option<FT>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimParams {
    #[serde(rename = "nominalDt")]
    pub nominal_dt: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viscous: Option<String>,
    #[serde(rename = "adaptiveSize", default)]
    pub adaptive_size: bool,
    #[serde(rename = "VRM", skip_serializing_if = "Option::is_none")]
    pub vrm: Option<VrmParams>,
    #[serde(rename = "AMR", skip_serializing_if = "Option::is_none")]
    pub amr: Option<VrmParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodyDesc {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<[FT; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[FT; 3]>,
    #[serde(rename = "rotation axis", skip_serializing_if = "Option::is_none")]
    pub rotation_axis: Option<[FT; 3]>,
    #[serde(rename = "rotation rate", skip_serializing_if = "Option::is_none")]
    pub rotation_rate: Option<FT>,
}

/// Boundary geometry descriptions. External mesh files are referenced here
/// but loaded by the mesh tooling, not by the solver core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BoundaryFeature {
    #[serde(rename = "solid rect")]
    SolidRect {
        body: String,
        center: [FT; 3],
        normal: [FT; 3],
        size: [FT; 2],
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bc: Option<[FT; 2]>,
        #[serde(default = "default_true")]
        enabled: bool,
    },

    #[serde(rename = "mesh file")]
    MeshFile {
        body: String,
        path: String,
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

impl BoundaryFeature {
    pub fn body_name(&self) -> &str {
        match self {
            BoundaryFeature::SolidRect { body, .. } => body,
            BoundaryFeature::MeshFile { body, .. } => body,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            BoundaryFeature::SolidRect { enabled, .. } => *enabled,
            BoundaryFeature::MeshFile { enabled, .. } => *enabled,
        }
    }

    /// Triangulated panels for this boundary at the given resolution.
    pub fn init_elements(&self, ips: FT) -> Result<ElementPacket, String> {
        if !self.is_enabled() {
            return Ok(ElementPacket::default());
        }
        match *self {
            BoundaryFeature::SolidRect {
                center, normal, size, bc, ..
            } => Ok(solid_rect_panels(center, normal, size, bc.unwrap_or([0.; 2]), ips)),
            BoundaryFeature::MeshFile { ref path, .. } => Err(format!(
                "boundary mesh files ({}) are loaded by the external mesh tooling",
                path
            )),
        }
    }
}

/// A rectangular plate triangulated on a regular grid, panel resolution tied
/// to the particle spacing.
fn solid_rect_panels(center: [FT; 3], normal: [FT; 3], size: [FT; 2], bc: [FT; 2], ips: FT) -> ElementPacket {
    let n = V3::new(normal[0], normal[1], normal[2]).normalize();
    let (b1, b2) = branchless_onb(n);
    let c = V3::new(center[0], center[1], center[2]);

    let nx = ((size[0] / ips).round() as usize).max(1);
    let ny = ((size[1] / ips).round() as usize).max(1);

    let mut packet = ElementPacket::default();
    for j in 0..=ny {
        for i in 0..=nx {
            let u = (i as FT / nx as FT - 0.5) * size[0];
            let v = (j as FT / ny as FT - 0.5) * size[1];
            let p = c + u * b1 + v * b2;
            packet.x.extend_from_slice(&[p.x, p.y, p.z]);
        }
    }
    let node = |i: usize, j: usize| (j * (nx + 1) + i) as u32;
    for j in 0..ny {
        for i in 0..nx {
            packet.idx.extend_from_slice(&[node(i, j), node(i + 1, j), node(i + 1, j + 1)]);
            packet.idx.extend_from_slice(&[node(i, j), node(i + 1, j + 1), node(i, j + 1)]);
            for _ in 0..2 {
                packet.val.extend_from_slice(&bc);
            }
        }
    }
    packet
}

/// The whole scene file, kept close to the JSON so parse/serialize/parse is
/// the identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub runtime: RuntimeParams,
    pub flowparams: FlowParams,
    pub simparams: SimParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bodies: Vec<BodyDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flowstructures: Vec<FlowFeature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundaries: Vec<BoundaryFeature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measurements: Vec<MeasureFeature>,
}

impl SceneFile {
    pub fn from_str(s: &str) -> Result<SceneFile, String> {
        serde_json::from_str(s).map_err(|e| format!("failed parsing scene json: {}", e))
    }

    pub fn from_file(path: &Path) -> Result<SceneFile, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed reading scene file {}: {}", path.display(), e))?;
        SceneFile::from_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("failed writing scene json: {}", e))
    }

    /// Apply the scene parameters, bodies and boundaries to a simulation.
    /// Flow and measurement features are seeded by the caller so emitters
    /// can keep producing per step.
    pub fn populate(&self, sim: &mut Simulation) -> Result<(), String> {
        if let Some(desc) = &self.description {
            sim.set_description(desc.clone());
        }

        if self.flowparams.re <= 0. {
            return Err(format!("flowparams.Re must be positive, got {}", self.flowparams.re));
        }
        if self.simparams.nominal_dt <= 0. {
            return Err(format!(
                "simparams.nominalDt must be positive, got {}",
                self.simparams.nominal_dt
            ));
        }

        sim.set_re(self.flowparams.re);
        sim.set_dt(self.simparams.nominal_dt);
        if let Some(uinf) = &self.flowparams.uinf {
            sim.set_freestream(uinf.as_vector());
        }

        if let Some(n) = self.runtime.max_steps {
            sim.set_max_steps(n);
        }
        if let Some(t) = self.runtime.end_time {
            sim.set_end_time(t);
        }
        if let Some(dt) = self.runtime.output_dt {
            sim.set_output_dt(dt);
        }
        sim.set_auto_start(self.runtime.auto_start);
        sim.set_quit_on_stop(self.runtime.quit_on_stop);

        if let Some(viscous) = &self.simparams.viscous {
            let is_vrm = viscous == "vrm";
            sim.set_diffuse(is_vrm);
            println!("  setting is_viscous= {}", is_vrm);
        }
        if self.simparams.adaptive_size {
            sim.set_amr(true);
            println!("  enabling amr");
        }
        for params in [&self.simparams.vrm, &self.simparams.amr].into_iter().flatten() {
            let vrm = sim.diffusion_mut().vrm_mut();
            if let Some(v) = params.ignore {
                vrm.ignore_thresh = v;
            }
            if let Some(v) = params.relative {
                vrm.relative_thresh = v;
            }
            if let Some(v) = params.adapt {
                vrm.adapt_thresh = v;
            }
            if let Some(v) = params.radgrad {
                vrm.radius_lapse = v;
            }
        }

        for desc in &self.bodies {
            let pos0 = desc.position.map_or(V3::zeros(), |p| V3::new(p[0], p[1], p[2]));
            let vel = desc.velocity.map_or(V3::zeros(), |v| V3::new(v[0], v[1], v[2]));
            let axis = desc
                .rotation_axis
                .map_or(V3::z(), |a| V3::new(a[0], a[1], a[2]));
            let rate = desc.rotation_rate.unwrap_or(0.);
            sim.add_body(Arc::new(Body::with_motion(desc.name.clone(), pos0, vel, axis, rate)));
        }

        let ips = sim.get_ips();
        for bf in &self.boundaries {
            let packet = bf.init_elements(ips)?;
            let body = if self.bodies.iter().any(|b| b.name == bf.body_name()) {
                Some(sim.get_pointer_to_body(bf.body_name()))
            } else {
                None
            };
            sim.add_boundary(body, packet);
        }

        sim.set_has_generators(self.flowstructures.iter().any(|f| f.is_generator()));

        Ok(())
    }
}

#[test]
fn scene_round_trip_test() {
    let text = r#"{
        "description": "a blob in a stream",
        "runtime": { "maxSteps": 50, "outputDt": 0.1 },
        "flowparams": { "Re": 100.0, "Uinf": [1.0, 0.0, 0.0] },
        "simparams": { "nominalDt": 0.02, "viscous": "vrm" },
        "flowstructures": [
            { "type": "vortex blob", "center": [0,0,0], "strength": [0,0,1],
              "radius": 0.5, "softness": 0.1 },
            { "type": "particle emitter", "center": [1,0,0], "strength": [0,0,0.1],
              "enabled": false }
        ],
        "measurements": [
            { "type": "tracer line", "center": [0,0,0], "end": [1,0,0] }
        ]
    }"#;

    let scene = SceneFile::from_str(text).unwrap();
    assert_eq!(scene.runtime.max_steps, Some(50));
    assert_eq!(scene.flowstructures.len(), 2);
    assert!(!scene.flowstructures[1].is_enabled());

    // parse -> serialize -> parse is the identity
    let serialized = scene.to_json_string().unwrap();
    let again = SceneFile::from_str(&serialized).unwrap();
    assert_eq!(scene, again);
}

#[test]
fn scalar_uinf_test() {
    let text = r#"{
        "flowparams": { "Re": 50.0, "Uinf": 2.0 },
        "simparams": { "nominalDt": 0.01 }
    }"#;
    let scene = SceneFile::from_str(text).unwrap();
    let u = scene.flowparams.uinf.as_ref().unwrap().as_vector();
    assert!((u - V3::new(2., 0., 0.)).norm() < 1e-7);
}

#[test]
fn bad_params_are_rejected_test() {
    let text = r#"{
        "flowparams": { "Re": -1.0 },
        "simparams": { "nominalDt": 0.01 }
    }"#;
    let scene = SceneFile::from_str(text).unwrap();
    let mut sim = Simulation::new();
    assert!(scene.populate(&mut sim).is_err());
}

#[test]
fn solid_rect_panels_test() {
    let packet = solid_rect_panels([0., 0., 0.], [0., 0., 1.], [1., 1.], [0., 0.], 0.5);
    // 2x2 grid of cells, two triangles each
    assert_eq!(packet.idx.len() / 3, 8);
    assert_eq!(packet.val.len(), 2 * 8);
    // all nodes lie in the z=0 plane
    for i in (2..packet.x.len()).step_by(3) {
        assert!(packet.x[i].abs() < 1e-6);
    }
}

#[test]
fn populate_builds_boundary_test() {
    let text = r#"{
        "flowparams": { "Re": 100.0, "Uinf": 1.0 },
        "simparams": { "nominalDt": 0.02, "viscous": "vrm" },
        "boundaries": [
            { "type": "solid rect", "body": "plate", "center": [0,0,0],
              "normal": [1,0,0], "size": [0.4, 0.4] }
        ],
        "bodies": [ { "name": "plate" } ]
    }"#;
    let scene = SceneFile::from_str(text).unwrap();
    let mut sim = Simulation::new();
    scene.populate(&mut sim).unwrap();
    assert!(sim.get_npanels() > 0);
}
