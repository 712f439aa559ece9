use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};

use crate::{floating_type_mod::FT, V3};

/// Append-only tab-separated run log: one line per step with time, particle
/// count, total circulation and the impulse-derived force.
pub struct StatusFile {
    filename: Option<String>,
    writer: Option<BufWriter<File>>,
}

impl StatusFile {
    pub fn new() -> StatusFile {
        StatusFile {
            filename: None,
            writer: None,
        }
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        let filename = filename.into();
        match OpenOptions::new().create(true).append(true).open(&filename) {
            Ok(f) => {
                self.writer = Some(BufWriter::new(f));
                self.filename = Some(filename);
            }
            Err(e) => {
                println!("could not open status file {}: {}", filename, e);
                self.writer = None;
                self.filename = None;
            }
        }
    }

    pub fn get_filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }

    pub fn reset_sim(&mut self) {
        self.writer = None;
        self.filename = None;
    }

    pub fn write_line(&mut self, time: f64, nparts: usize, circ: V3, force: [FT; 3]) {
        let Some(w) = self.writer.as_mut() else {
            return;
        };
        let result = writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            time, nparts, circ.x, circ.y, circ.z, force[0], force[1], force[2]
        )
        .and_then(|_| w.flush());
        if let Err(e) = result {
            println!("failed writing status line: {}", e);
        }
    }
}

impl Default for StatusFile {
    fn default() -> StatusFile {
        StatusFile::new()
    }
}

#[test]
fn status_file_appends_lines_test() {
    use crate::vec3f;

    let dir = std::env::temp_dir().join("vpm3d-status-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("status.tsv");
    let _ = std::fs::remove_file(&path);

    let mut sf = StatusFile::new();
    assert!(!sf.is_active());
    sf.set_filename(path.to_str().unwrap());
    assert!(sf.is_active());

    sf.write_line(0.01, 3, vec3f(0., 0., 1.), [0.5, 0., 0.]);
    sf.write_line(0.02, 4, vec3f(0., 0., 1.), [0.4, 0., 0.]);

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].split('\t').count(), 8);
}
