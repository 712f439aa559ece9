use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::{
    bem::{Bem, BEM_MAX_PANELS},
    body::Body,
    collection::{Collection, ElementKind, ElementPacket, Motion},
    convection::Convection,
    diffusion::Diffusion,
    floating_type_mod::FT,
    points::Points,
    reflect::clear_inner_layer,
    split::split_elongated,
    status::StatusFile,
    surfaces::Surfaces,
    V3, PARTICLE_PACKET_STRIDE, POINT_PACKET_STRIDE,
};

/// Elongation that triggers a split at the end of a step.
const SPLIT_ELONG_THRESH: FT = 1.2;
/// Elongation beyond which the run is considered diverged.
const ELONG_FAIL_THRESH: FT = 1.5;

/// The vortex method driver: owns the element collections and sequences
/// diffusion and convection under operator splitting.
pub struct Simulation {
    // primary simulation params
    re: FT,
    dt: f64,
    fs: V3,

    /// Independent rigid bodies; surfaces share them.
    bodies: Vec<Arc<Body>>,

    /// Active vorticity-carrying elements.
    pub vort: Vec<Collection>,
    /// Reactive elements with solvable strengths (BEM surfaces).
    pub bdry: Vec<Collection>,
    /// Inert tracers and field points.
    pub fldpt: Vec<Collection>,

    bem: Bem,
    diff: Diffusion,
    conv: Convection,
    sf: StatusFile,

    description: String,
    time: f64,
    output_dt: f64,
    end_time: f64,
    use_end_time: bool,
    nstep: usize,
    max_steps: usize,
    use_max_steps: bool,
    auto_start: bool,
    quit_on_stop: bool,
    has_generators: bool,
    sim_is_initialized: bool,

    // force-by-impulse bookkeeping
    last_time: f64,
    last_impulse: V3,
}

impl Simulation {
    pub fn new() -> Simulation {
        Simulation {
            re: 100.0,
            dt: 0.01,
            fs: V3::zeros(),
            bodies: Vec::new(),
            vort: Vec::new(),
            bdry: Vec::new(),
            fldpt: Vec::new(),
            bem: Bem::new(),
            diff: Diffusion::new(),
            conv: Convection::new(),
            sf: StatusFile::new(),
            description: String::new(),
            time: 0.0,
            output_dt: 0.0,
            end_time: 100.0,
            use_end_time: false,
            nstep: 0,
            max_steps: 100,
            use_max_steps: false,
            auto_start: false,
            quit_on_stop: false,
            has_generators: false,
            sim_is_initialized: false,
            last_time: 0.0,
            last_impulse: V3::zeros(),
        }
    }

    // primary parameter access

    pub fn set_re(&mut self, re: FT) {
        self.re = re;
    }

    pub fn get_re(&self) -> FT {
        self.re
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub fn get_dt(&self) -> f64 {
        self.dt
    }

    pub fn set_freestream(&mut self, fs: V3) {
        self.fs = fs;
    }

    pub fn get_freestream(&self) -> V3 {
        self.fs
    }

    /// Diffusive length scale sqrt(dt/Re).
    pub fn get_hnu(&self) -> FT {
        ((self.dt as FT) / self.re).sqrt()
    }

    /// Nominal inter-particle spacing.
    pub fn get_ips(&self) -> FT {
        self.diff.nom_sep(self.get_hnu())
    }

    /// Core radius given to newly created particles.
    pub fn get_vdelta(&self) -> FT {
        self.diff.particle_overlap() * self.get_ips()
    }

    /// Inviscid runs pick their resolution directly: back out the Reynolds
    /// number that gives the requested spacing, then turn diffusion off.
    pub fn set_re_for_ips(&mut self, ips: FT) {
        let scale = self.diff.nom_sep_scaled();
        self.re = scale * scale * (self.dt as FT) / (ips * ips);
        self.diff.set_diffuse(false);
    }

    pub fn set_diffuse(&mut self, do_diffuse: bool) {
        self.diff.set_diffuse(do_diffuse);
    }

    pub fn get_diffuse(&self) -> bool {
        self.diff.get_diffuse()
    }

    pub fn set_amr(&mut self, do_amr: bool) {
        self.diff.set_amr(do_amr);
    }

    pub fn diffusion_mut(&mut self) -> &mut Diffusion {
        &mut self.diff
    }

    pub fn get_time(&self) -> f64 {
        self.time
    }

    pub fn get_nstep(&self) -> usize {
        self.nstep
    }

    pub fn set_description(&mut self, desc: impl Into<String>) {
        self.description = desc.into();
    }

    pub fn get_description(&self) -> &str {
        &self.description
    }

    pub fn set_end_time(&mut self, t: f64) {
        self.end_time = t;
        self.use_end_time = true;
    }

    pub fn set_max_steps(&mut self, n: usize) {
        self.max_steps = n;
        self.use_max_steps = true;
    }

    pub fn set_output_dt(&mut self, dt: f64) {
        self.output_dt = dt;
    }

    pub fn get_output_dt(&self) -> f64 {
        self.output_dt
    }

    pub fn set_auto_start(&mut self, v: bool) {
        self.auto_start = v;
    }

    pub fn autostart(&self) -> bool {
        self.auto_start
    }

    pub fn set_quit_on_stop(&mut self, v: bool) {
        self.quit_on_stop = v;
    }

    pub fn quitonstop(&self) -> bool {
        self.quit_on_stop
    }

    pub fn set_has_generators(&mut self, v: bool) {
        self.has_generators = v;
    }

    pub fn set_status_file_name(&mut self, name: impl Into<String>) {
        self.sf.set_filename(name);
    }

    pub fn is_initialized(&self) -> bool {
        self.sim_is_initialized
    }

    pub fn set_initialized(&mut self) {
        self.sim_is_initialized = true;
    }

    // runtime status

    pub fn get_nparts(&self) -> usize {
        self.vort.iter().filter_map(|c| c.as_points()).map(|p| p.n()).sum()
    }

    pub fn get_npanels(&self) -> usize {
        self.bdry.iter().map(|c| c.n_panels()).sum()
    }

    pub fn get_nfldpts(&self) -> usize {
        self.fldpt.iter().filter_map(|c| c.as_points()).map(|p| p.n()).sum()
    }

    // element ingestion

    /// Receive and add a flat packet of particles. The incoming radius slot
    /// is overwritten with the simulation's particle core size.
    pub fn add_particles(&mut self, mut packet: Vec<FT>) {
        if packet.is_empty() {
            return;
        }
        assert!(
            packet.len() % PARTICLE_PACKET_STRIDE == 0,
            "input vector not a multiple of 7"
        );

        let vdelta = self.get_vdelta();
        for i in (6..packet.len()).step_by(PARTICLE_PACKET_STRIDE) {
            packet[i] = vdelta;
        }

        // add to the last particle collection, or start one
        match self.vort.iter_mut().rev().find_map(|c| c.as_points_mut()) {
            Some(pts) => pts.add_new(&packet),
            None => self.vort.push(Collection::Points(Points::new(
                &packet,
                ElementKind::Active,
                Motion::Lagrangian,
                None,
            ))),
        }
    }

    /// Receive and add a flat packet of field points. Lagrangian tracers are
    /// pooled into the first Lagrangian inert collection; fixed or
    /// body-bound families always get their own collection.
    pub fn add_fldpts(&mut self, packet: Vec<FT>, moves: bool) {
        if packet.is_empty() {
            return;
        }
        assert!(
            packet.len() % POINT_PACKET_STRIDE == 0,
            "input vector not a multiple of dimensions"
        );

        let motion = if moves { Motion::Lagrangian } else { Motion::Fixed };

        if motion == Motion::Lagrangian {
            for coll in self.fldpt.iter_mut() {
                if coll.motion() != Motion::Lagrangian {
                    continue;
                }
                if let Some(pts) = coll.as_points_mut() {
                    pts.add_new_inert(&packet);
                    return;
                }
            }
        }
        self.fldpt
            .push(Collection::Points(Points::new_inert(&packet, motion, None)));
    }

    /// Add boundary geometry, merging into an existing collection with the
    /// same element kind, movement type and body.
    pub fn add_boundary(&mut self, body: Option<Arc<Body>>, geom: ElementPacket) {
        // a disabled feature produces no panels
        if geom.idx.is_empty() {
            return;
        }

        let this_kind = ElementKind::Reactive;
        let this_motion = if body.is_some() { Motion::BodyBound } else { Motion::Fixed };

        let matches = |coll: &Collection| {
            if coll.kind() != this_kind || coll.motion() != this_motion {
                return false;
            }
            match (coll.body(), &body) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
        };

        let found = self.bdry.iter_mut().find(|c| matches(c));
        if let Some(surf) = found.and_then(|c| c.as_surfaces_mut()) {
            surf.add_new(&geom.x, &geom.idx, &geom.val);
            return;
        }

        self.bdry.push(Collection::Surfaces(Surfaces::new(
            &geom.x,
            &geom.idx,
            &geom.val,
            this_kind,
            this_motion,
            body,
        )));
    }

    pub fn add_body(&mut self, body: Arc<Body>) {
        println!("  added new body ({}), now have {}", body.name(), self.bodies.len() + 1);
        self.bodies.push(body);
    }

    /// Body matching the given name, or a newly created "ground" body.
    pub fn get_pointer_to_body(&mut self, name: &str) -> Arc<Body> {
        for b in &self.bodies {
            if b.name() == name {
                return b.clone();
            }
        }
        println!("  no body matching ({}) found, creating (ground)", name);
        let ground = Arc::new(Body::new("ground"));
        self.add_body(ground.clone());
        ground
    }

    // the step itself

    /// The vortex method: convection and diffusion under operator splitting.
    pub fn step(&mut self) -> Result<(), String> {
        println!(
            "\nTaking step {} at t={} with n={}",
            self.nstep,
            self.time,
            self.get_nparts()
        );

        // one full diffusion step (a no-op when inviscid)
        self.diff.step(
            self.time,
            self.dt,
            self.re,
            self.get_vdelta(),
            self.fs,
            &mut self.vort,
            &mut self.bdry,
            &mut self.bem,
        )?;

        // advect with no diffusion (re-solves BEM at each stage)
        let ips = self.get_ips();
        self.conv.advect_2nd(
            self.time,
            self.dt,
            self.fs,
            ips,
            &mut self.vort,
            &mut self.bdry,
            &mut self.fldpt,
            &mut self.bem,
        )?;

        // push field points out of objects every few steps
        if self.nstep % 5 == 0 {
            clear_inner_layer(&self.bdry, &mut self.fldpt, 0.5, ips);
        }

        // step complete, now split any elongated particles
        let overlap = self.diff.particle_overlap();
        for coll in self.vort.iter_mut() {
            if coll.is_inert() {
                continue;
            }
            if let Some(pts) = coll.as_points_mut() {
                split_elongated(pts, overlap, SPLIT_ELONG_THRESH);
            }
        }

        self.time += self.dt;
        self.nstep += 1;

        self.dump_stats_to_status();
        Ok(())
    }

    /// Diagnostics record appended after every step.
    fn dump_stats_to_status(&mut self) {
        let circ = self.total_circulation();
        let force = self.calculate_simple_forces();
        let nparts = self.get_nparts();
        if self.sf.is_active() {
            self.sf
                .write_line(self.time, nparts, circ, [force.x, force.y, force.z]);
        }
    }

    pub fn total_circulation(&self) -> V3 {
        let mut circ = V3::zeros();
        for coll in &self.vort {
            circ += coll.total_circulation(self.time);
        }
        for coll in &self.bdry {
            circ += coll.total_circulation(self.time);
            circ += coll.body_circulation(self.time);
        }
        circ
    }

    pub fn total_impulse(&self) -> V3 {
        let mut impulse = V3::zeros();
        for coll in &self.vort {
            impulse += coll.total_impulse();
        }
        for coll in &self.bdry {
            impulse += coll.total_impulse();
        }
        impulse
    }

    /// Force from the finite difference of the hydrodynamic impulse.
    pub fn calculate_simple_forces(&mut self) -> V3 {
        if self.time < 0.1 * self.dt {
            self.last_time = -self.dt;
            self.last_impulse = V3::zeros();
        }

        let this_impulse = self.total_impulse();
        let force = (this_impulse - self.last_impulse) / (self.time - self.last_time) as FT;

        self.last_time = self.time;
        self.last_impulse = this_impulse;
        force
    }

    /// Refresh element velocities for an output pass (BEM solve first so the
    /// panels contribute their current strengths).
    pub fn refresh_vels(&mut self) -> Result<(), String> {
        crate::bem::solve_bem(self.time, self.fs, &self.vort, &mut self.bdry, &mut self.bem)?;
        self.conv.find_vels_in_place(self.fs, &mut self.vort, &self.bdry);
        self.conv.find_vels(self.fs, &self.vort, &self.bdry, &mut self.fldpt);
        Ok(())
    }

    // lifecycle checks

    /// Conditions that prevent a run from starting. Returns a descriptive
    /// message for the first problems found.
    pub fn check_initialization(&self) -> Result<(), String> {
        let mut msg = String::new();

        if self.get_npanels() == 0 && self.get_nparts() == 0 && !self.has_generators {
            msg.push_str("No flow features and no bodies. Add one or both, reset, and run.\n");
        }

        if self.get_npanels() > 0 && self.get_nparts() == 0 {
            let zero_freestream = self.fs.norm_squared() < FT::EPSILON;
            let no_body_movement = !self.bodies.iter().any(|b| b.moves());
            let all_zero_bcs = !self.bdry.iter().any(|c| c.max_bc_value().abs() > FT::EPSILON);

            if zero_freestream && no_body_movement && all_zero_bcs {
                msg.push_str(
                    "No flow features, zero freestream speed, no movement, and no driven boundaries - try adding one of these.\n",
                );
                return Err(msg);
            }

            if !self.diff.get_diffuse() {
                msg.push_str(
                    "You have a solid body, but no diffusion. It will not shed vorticity. Turn on viscosity or add a flow feature, reset, and run.\n",
                );
            }
        }

        if self.get_npanels() > BEM_MAX_PANELS {
            msg.push_str(
                "Boundary features have too many panels, program will run out of memory. Reduce Reynolds number or increase time step or both.\n",
            );
        }

        let max_elong = self.vort.iter().map(|c| c.max_elong()).fold(0., FT::max);
        if max_elong > ELONG_FAIL_THRESH {
            msg.push_str("Elongation threshold exceeded! Reset and reduce the time step size.\n");
        }

        if msg.is_empty() {
            Ok(())
        } else {
            Err(msg)
        }
    }

    /// Dynamic conditions that should stop a running simulation.
    pub fn check_simulation(&self) -> Result<(), String> {
        for coll in &self.vort {
            if let Some(pts) = coll.as_points() {
                if pts.has_nan() {
                    return Err("A particle position or strength is not finite. The run has diverged.\n".into());
                }
            }
        }

        let max_elong = self.vort.iter().map(|c| c.max_elong()).fold(0., FT::max);
        if max_elong > ELONG_FAIL_THRESH {
            return Err("Elongation threshold exceeded! Reduce the time step size.\n".into());
        }

        Ok(())
    }

    /// Check vs. step count and end time to see if the run should stop.
    pub fn test_vs_stop(&self) -> bool {
        let mut should_stop = false;
        if self.use_max_steps && self.nstep >= self.max_steps {
            println!("Stopping at step {}", self.max_steps);
            should_stop = true;
        }
        if self.use_end_time && self.end_time <= self.time + 0.5 * self.dt {
            println!("Stopping at time {}", self.end_time);
            should_stop = true;
        }
        should_stop
    }

    pub fn reset(&mut self) {
        self.time = 0.0;
        self.nstep = 0;
        self.vort.clear();
        self.bdry.clear();
        self.fldpt.clear();
        self.bodies.clear();
        self.bem.reset();
        self.sf.reset_sim();
        self.sim_is_initialized = false;
        self.last_time = 0.0;
        self.last_impulse = V3::zeros();
    }
}

impl Default for Simulation {
    fn default() -> Simulation {
        Simulation::new()
    }
}

/// Asynchronous step lifecycle around a [`Simulation`].
///
/// One worker at a time runs `step()`; a second `async_step` before the
/// first completes is rejected, never run concurrently. Step errors surface
/// on the poll after they happen.
pub struct AsyncSim {
    sim: Arc<Mutex<Simulation>>,
    in_flight: Arc<AtomicBool>,
    step_error: Arc<Mutex<Option<String>>>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncSim {
    pub fn new(sim: Simulation) -> AsyncSim {
        AsyncSim {
            sim: Arc::new(Mutex::new(sim)),
            in_flight: Arc::new(AtomicBool::new(false)),
            step_error: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    /// Run a closure against the simulation. Blocks while a step is in
    /// flight, which is what GUI-side readers want.
    pub fn with_sim<R>(&self, f: impl FnOnce(&mut Simulation) -> R) -> R {
        let mut sim = self.sim.lock().unwrap();
        f(&mut sim)
    }

    /// Launch one step on a worker thread. Errors if a step is already in
    /// flight.
    pub fn async_step(&mut self) -> Result<(), String> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err("a step is already in flight".into());
        }

        // the previous worker is done; reap it
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        let sim = self.sim.clone();
        let in_flight = self.in_flight.clone();
        let step_error = self.step_error.clone();
        self.worker = Some(std::thread::spawn(move || {
            let result = sim.lock().unwrap().step();
            if let Err(e) = result {
                *step_error.lock().unwrap() = Some(e);
            }
            in_flight.store(false, Ordering::SeqCst);
        }));
        Ok(())
    }

    /// Non-blocking readiness check.
    pub fn poll_step_done(&self) -> bool {
        !self.in_flight.load(Ordering::SeqCst)
    }

    /// The error from the last finished step, if any.
    pub fn take_step_error(&self) -> Option<String> {
        self.step_error.lock().unwrap().take()
    }

    /// Wait for any in-flight step, then reset the simulation state.
    pub fn reset(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.sim.lock().unwrap().reset();
        *self.step_error.lock().unwrap() = None;
    }
}

#[cfg(test)]
use crate::vec3f;

#[test]
fn empty_scene_refuses_to_start_test() {
    let sim = Simulation::new();
    let err = sim.check_initialization().unwrap_err();
    assert!(!err.is_empty());
    assert!(err.contains("No flow features"));
}

#[test]
fn inviscid_single_particle_run_test() {
    // scenario: one particle, uniform freestream, 100 inviscid steps
    let mut sim = Simulation::new();
    sim.set_dt(0.01);
    sim.set_re_for_ips(0.1);
    sim.set_freestream(vec3f(1., 0., 0.));
    sim.add_particles(vec![0., 0., 0., 0., 0., 1., 0.]);

    sim.check_initialization().unwrap();

    for _ in 0..100 {
        sim.step().unwrap();
        sim.check_simulation().unwrap();
    }

    assert_eq!(sim.get_nparts(), 1);
    let pts = sim.vort[0].as_points().unwrap();
    assert!((pts.e.pos[0] - vec3f(1., 0., 0.)).norm() < 1e-5);
    assert!((pts.e.strength[0] - vec3f(0., 0., 1.)).norm() < 1e-6);
    assert!((sim.get_time() - 1.0).abs() < 1e-12);
}

#[test]
fn zero_everything_step_only_advances_time_test() {
    let mut sim = Simulation::new();
    sim.set_dt(0.02);
    sim.set_re_for_ips(0.1);
    sim.add_particles(vec![0.5, 0.5, 0.5, 0., 0., 0., 0.]);

    sim.step().unwrap();

    let pts = sim.vort[0].as_points().unwrap();
    assert!((pts.e.pos[0] - vec3f(0.5, 0.5, 0.5)).norm() < 1e-7);
    assert!((sim.get_time() - 0.02).abs() < 1e-12);
    assert_eq!(sim.get_nstep(), 1);
}

#[test]
fn stop_conditions_test() {
    let mut sim = Simulation::new();
    sim.set_dt(0.1);
    assert!(!sim.test_vs_stop());

    sim.set_max_steps(0);
    assert!(sim.test_vs_stop());

    let mut sim = Simulation::new();
    sim.set_dt(0.1);
    sim.set_end_time(0.04);
    // time + dt/2 already exceeds the end time
    assert!(sim.test_vs_stop());
}

#[test]
fn flat_plate_sheds_vorticity_test() {
    use crate::collection::ElementPacket;

    // a viscous plate in an in-plane stream must shed particles with net
    // circulation, and the cloud keeps growing over the first steps
    let mut sim = Simulation::new();
    sim.set_re(100.);
    sim.set_dt(0.02);
    sim.set_freestream(vec3f(1., 0., 0.));

    let s: FT = 0.4;
    let packet = ElementPacket {
        x: vec![
            -s, -s, 0., //
            s, -s, 0., //
            s, s, 0., //
            -s, s, 0.,
        ],
        idx: vec![0, 1, 2, 0, 2, 3],
        val: Vec::new(),
    };
    sim.add_boundary(None, packet);

    sim.check_initialization().unwrap();
    assert_eq!(sim.get_nparts(), 0);

    let mut counts = Vec::new();
    for _ in 0..3 {
        sim.step().unwrap();
        counts.push(sim.get_nparts());
    }

    assert!(counts[0] > 0, "nothing was shed");
    assert!(counts[2] > counts[0], "the shed cloud stopped growing");
    for coll in &sim.vort {
        assert!(!coll.as_points().unwrap().has_nan());
    }
}

#[test]
fn async_step_rejects_overlap_test() {
    let mut sim = Simulation::new();
    sim.set_dt(0.01);
    sim.set_re_for_ips(0.1);
    // enough particles that the step takes a little while
    let mut packet = Vec::new();
    for i in 0..400 {
        let x = 0.01 * i as FT;
        packet.extend_from_slice(&[x, 0., 0., 0., 0., 1e-4, 0.]);
    }
    sim.add_particles(packet);

    let mut asim = AsyncSim::new(sim);
    asim.async_step().unwrap();

    // an immediate second launch must be rejected while the first is in
    // flight; it can only succeed if the first step had already finished
    let second = asim.async_step();
    if second.is_ok() {
        assert!(
            asim.with_sim(|s| s.get_nstep()) >= 1,
            "second step was accepted while the first was still running"
        );
    }

    while !asim.poll_step_done() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(asim.take_step_error().is_none());
    asim.reset();
    assert_eq!(asim.with_sim(|s| s.get_nstep()), 0);
}
