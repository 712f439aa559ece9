use std::path::Path;

use clap::{App, Arg};

use crate::simulation::{scene::SceneFile, simulation::Simulation};

use super::vtk_exporter::VtkExporter;

const CARGO_PKG_AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &'static str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &'static str = env!("CARGO_PKG_DESCRIPTION");

/// Batch entry point: one positional argument naming the scene JSON.
/// Exit codes: 0 success, 1 the simulation refused to continue, -1 usage.
pub fn start() {
    let matches = App::new("vpm3d batch")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .arg(
            Arg::with_name("SCENE_JSON")
                .help("Scene description file")
                .required(true)
                .index(1),
        )
        .get_matches_safe();

    let matches = match matches {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e.message);
            std::process::exit(-1);
        }
    };

    let scene_path = matches.value_of("SCENE_JSON").expect("missing scene file");
    let code = run_batch(Path::new(scene_path));
    std::process::exit(code);
}

fn run_batch(scene_path: &Path) -> i32 {
    println!("\nvpm3d batch");

    let scene = match SceneFile::from_file(scene_path) {
        Ok(s) => s,
        Err(e) => {
            println!("\nERROR: {}", e);
            return 1;
        }
    };

    let mut sim = Simulation::new();
    if let Err(e) = scene.populate(&mut sim) {
        println!("\nERROR: {}", e);
        return 1;
    }

    println!("\nInitializing simulation");

    // initialize particle distributions
    let ips = sim.get_ips();
    for ff in &scene.flowstructures {
        sim.add_particles(ff.init_particles(ips));
    }

    // initialize measurement features
    for mf in &scene.measurements {
        sim.add_fldpts(mf.init_particles(0.1 * ips), mf.moves());
    }

    sim.set_initialized();

    if let Err(e) = sim.check_initialization() {
        println!("\nERROR: {}", e);
        return 1;
    }

    let mut vtk = if sim.get_output_dt() > 0.0 {
        Some(VtkExporter::new("./output", "vpm3d"))
    } else {
        None
    };
    let mut next_output = 0.0;

    // main loop
    loop {
        if let Err(e) = sim.check_simulation() {
            println!("\nERROR: {}", e);
            return 1;
        }

        // generate new particles from emitters
        for ff in &scene.flowstructures {
            sim.add_particles(ff.step_particles(ips));
        }
        for mf in &scene.measurements {
            sim.add_fldpts(mf.step_particles(0.1 * ips), mf.moves());
        }

        // begin a new dynamic step: convection and diffusion
        if let Err(e) = sim.step() {
            println!("\nERROR: {}", e);
            return 1;
        }

        if let Some(vtk) = &mut vtk {
            if sim.get_time() + 1e-12 >= next_output {
                if let Err(e) = sim.refresh_vels() {
                    println!("\nERROR: {}", e);
                    return 1;
                }
                vtk.write_snapshot(&sim);
                next_output += sim.get_output_dt();
            }
        }

        if sim.test_vs_stop() {
            break;
        }
    }

    sim.reset();
    println!("Quitting");
    0
}
