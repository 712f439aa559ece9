use crate::{
    bem::{solve_bem, Bem},
    collection::{Collection, ElementKind, Motion},
    floating_type_mod::{FT, PI},
    merge::merge_operation,
    points::Points,
    reflect::{clear_inner_layer, reflect_interior},
    vrm::Vrm,
    V3,
};

/// Exchange of strength from surfaces to particles and among particles:
/// shedding, the VRM, reflection, merging, and inner-layer hygiene.
pub struct Diffusion {
    vrm: Vrm,
    h_nu: FT,

    is_inviscid: bool,
    adaptive_radii: bool,

    /// Nominal particle separation normalized by `h_nu`.
    nom_sep_scaled: FT,
    /// Core radius at creation is the nominal separation times this.
    particle_overlap: FT,
    /// Merge pairs closer than this fraction of the nominal separation.
    merge_thresh: FT,
}

impl Diffusion {
    pub fn new() -> Diffusion {
        Diffusion {
            vrm: Vrm::default(),
            h_nu: 0.1,
            is_inviscid: false,
            adaptive_radii: false,
            nom_sep_scaled: (8.0 as FT).sqrt(),
            particle_overlap: 1.5,
            merge_thresh: 0.2,
        }
    }

    pub fn set_diffuse(&mut self, do_diffuse: bool) {
        self.is_inviscid = !do_diffuse;
    }

    pub fn get_diffuse(&self) -> bool {
        !self.is_inviscid
    }

    /// Adaptive radii force viscous mode on.
    pub fn set_amr(&mut self, do_amr: bool) {
        self.adaptive_radii = do_amr;
        if do_amr {
            self.set_diffuse(true);
        }
    }

    pub fn get_amr(&self) -> bool {
        self.adaptive_radii
    }

    pub fn vrm_mut(&mut self) -> &mut Vrm {
        &mut self.vrm
    }

    pub fn nom_sep_scaled(&self) -> FT {
        self.nom_sep_scaled
    }

    pub fn nom_sep(&self, h_nu: FT) -> FT {
        self.nom_sep_scaled * h_nu
    }

    pub fn particle_overlap(&self) -> FT {
        self.particle_overlap
    }

    /// One full diffusion step. No-op when inviscid.
    pub fn step(
        &mut self,
        time: f64,
        dt: f64,
        re: FT,
        v_delta: FT,
        fs: V3,
        vort: &mut Vec<Collection>,
        bdry: &mut [Collection],
        bem: &mut Bem,
    ) -> Result<(), String> {
        if self.is_inviscid {
            return Ok(());
        }

        println!("  diffusion step with dt={}", dt);

        assert!(re != 0., "cannot compute the diffusive length scale with Re=0");
        self.h_nu = ((dt as FT) / re).sqrt();
        let nom_sep = self.nom_sep(self.h_nu);
        self.vrm.adaptive_radii = self.adaptive_radii;

        // push away particles inside or too close to a body, then re-run the
        // BEM so shedding sees a clean free field
        let cushion = 1.0 / (2.0 * PI).sqrt();
        clear_inner_layer(bdry, vort, cushion, nom_sep);
        solve_bem(time, fs, vort, bdry, bem)?;

        // shed at the boundary so the new particles take part in the
        // redistribution below
        self.shed_particles(0.01 * self.h_nu, v_delta, vort, bdry);

        // diffuse strength among existing particles
        for coll in vort.iter_mut() {
            if coll.is_inert() {
                continue;
            }
            if let Some(pts) = coll.as_points_mut() {
                println!("    computing diffusion among {} particles", pts.n());
                self.vrm.diffuse_all(pts, self.h_nu, nom_sep, v_delta);
            }
        }

        // the VRM works in free space; anything that ended up inside a body
        // belongs outside
        reflect_interior(bdry, vort);

        merge_operation(vort, self.particle_overlap, self.merge_thresh, self.adaptive_radii);

        // remove the innermost layer, the one represented by panel strengths
        let cleared = clear_inner_layer(bdry, vort, cushion, v_delta / self.particle_overlap);

        if cleared > 0 {
            merge_operation(vort, self.particle_overlap, self.merge_thresh, self.adaptive_radii);
        }

        for coll in vort.iter_mut() {
            coll.update_max_str();
        }

        Ok(())
    }

    /// Generate particles above every reactive surface and add them to the
    /// last active particle collection (creating one if none exists).
    fn shed_particles(&self, offset: FT, v_delta: FT, vort: &mut Vec<Collection>, bdry: &[Collection]) {
        for coll in bdry {
            if coll.kind() != ElementKind::Reactive {
                continue;
            }
            let Some(surf) = coll.as_surfaces() else {
                continue;
            };
            let packet = surf.represent_as_particles(offset, v_delta);
            if packet.is_empty() {
                continue;
            }

            match vort.iter_mut().rev().find_map(|c| c.as_points_mut()) {
                Some(pts) => pts.add_new(&packet),
                None => vort.push(Collection::Points(Points::new(
                    &packet,
                    ElementKind::Active,
                    Motion::Lagrangian,
                    None,
                ))),
            }
        }
    }
}

impl Default for Diffusion {
    fn default() -> Diffusion {
        Diffusion::new()
    }
}

#[cfg(test)]
use crate::surfaces::Surfaces;

#[test]
fn inviscid_step_is_noop_test() {
    let packet: Vec<FT> = vec![0., 0., 0., 0., 0., 1., 0.1];
    let pts = Points::new(&packet, ElementKind::Active, Motion::Lagrangian, None);
    let mut vort = vec![Collection::Points(pts)];
    let mut bdry: Vec<Collection> = Vec::new();
    let mut bem = Bem::new();

    let mut diff = Diffusion::new();
    diff.set_diffuse(false);
    diff.step(0.0, 0.01, 100., 0.05, V3::zeros(), &mut vort, &mut bdry, &mut bem)
        .unwrap();

    let pts = vort[0].as_points().unwrap();
    assert_eq!(pts.n(), 1);
    assert!((pts.e.strength[0] - V3::new(0., 0., 1.)).norm() < 1e-12);
}

#[test]
fn shedding_creates_particles_test() {
    let x: Vec<FT> = vec![
        0., 0., 0., //
        1., 0., 0., //
        1., 1., 0., //
        0., 1., 0.,
    ];
    let idx: Vec<u32> = vec![0, 1, 2, 0, 2, 3];
    let mut surf = Surfaces::new(&x, &idx, &[], ElementKind::Reactive, Motion::Fixed, None);
    surf.vs[0] = [1.0, 0.0];
    surf.vs[1] = [1.0, 0.0];
    let bdry = vec![Collection::Surfaces(surf)];
    let mut vort: Vec<Collection> = Vec::new();

    let diff = Diffusion::new();
    diff.shed_particles(0.001, 0.05, &mut vort, &bdry);

    assert_eq!(vort.len(), 1);
    let pts = vort[0].as_points().unwrap();
    assert_eq!(pts.n(), 2);
    assert!(pts.max_str() > 0.);
}

#[test]
fn amr_forces_viscous_test() {
    let mut diff = Diffusion::new();
    diff.set_diffuse(false);
    diff.set_amr(true);
    assert!(diff.get_diffuse());
    assert!(diff.get_amr());
}
