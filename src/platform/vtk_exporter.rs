use std::{
    fs::{create_dir_all, File},
    io::Write,
    path::PathBuf,
};

use vtkio::model::*;

use crate::simulation::{
    collection::Collection, floating_type_mod::FT, points::Points, simulation::Simulation,
    surfaces::Surfaces, V3,
};

fn to_vec3d(v: &V3) -> [FT; 3] {
    [v.x, v.y, v.z]
}

/// Writes one poly-data file per collection per snapshot, plus a
/// `.vtk.series` index so readers can animate the run.
pub struct VtkExporter {
    folder: PathBuf,
    basename: String,
    snapshot_number: usize,
    series_entries: usize,
    series_file: File,
}

impl VtkExporter {
    pub fn new(folder: impl Into<PathBuf>, basename: impl Into<String>) -> VtkExporter {
        let folder: PathBuf = folder.into();
        let basename: String = basename.into();

        create_dir_all(&folder).unwrap();

        let mut series_file = File::create(folder.join(format!("{}.vtk.series", basename))).unwrap();
        let series_prelude_str = "{\n\"file-series-version\": \"1.0\",\n\"files\": [";
        series_file.write_all(series_prelude_str.as_bytes()).unwrap();

        VtkExporter {
            series_file,
            folder,
            basename,
            snapshot_number: 1,
            series_entries: 0,
        }
    }

    /// Write every collection of the simulation at its current state.
    pub fn write_snapshot(&mut self, sim: &Simulation) {
        let time = sim.get_time();
        let groups: [(&str, &Vec<Collection>); 3] =
            [("parts", &sim.vort), ("bdry", &sim.bdry), ("fldpt", &sim.fldpt)];

        for (tag, colls) in groups {
            for (ci, coll) in colls.iter().enumerate() {
                let vtk_filename = format!(
                    "{}-{}{}-{:05}.vtk",
                    self.basename, tag, ci, self.snapshot_number
                );
                let path = self.folder.join(&vtk_filename);
                match coll {
                    Collection::Points(pts) => write_points_file(path, pts),
                    Collection::Surfaces(surf) => write_surfaces_file(path, surf),
                }

                if self.series_entries > 0 {
                    self.series_file.write_all(",".as_bytes()).unwrap();
                }
                self.series_entries += 1;
                write!(
                    self.series_file,
                    "\n{{ \"name\": \"{}\", \"time\": {} }}",
                    vtk_filename, time
                )
                .unwrap();
            }
        }

        self.snapshot_number += 1;
    }
}

impl Drop for VtkExporter {
    fn drop(&mut self) {
        let series_end_str = "\n]\n}";
        self.series_file.write_all(series_end_str.as_bytes()).unwrap();
    }
}

/// Point collections publish position, velocity, strength and radius.
fn write_points_file(path: PathBuf, pts: &Points) {
    let n = pts.n();

    let vtk_points: Vec<FT> = pts.e.pos.iter().flat_map(|x| to_vec3d(x)).collect();
    let vtk_verts: Vec<u32> = (0..n).flat_map(|i| [1, i as u32]).collect();

    let mut vtk_velocity = DataArray::scalars("velocity", 3);
    vtk_velocity.data = pts.e.vel.iter().flat_map(to_vec3d).collect::<Vec<_>>().into();

    let mut vtk_strength = DataArray::scalars("strength", 3);
    vtk_strength.data = pts.e.strength.iter().flat_map(to_vec3d).collect::<Vec<_>>().into();

    let mut vtk_radius = DataArray::scalars("radius", 1);
    vtk_radius.data = pts.e.radius.clone().into();

    let vtk = Vtk {
        version: Version::new((4, 2)),
        byte_order: ByteOrder::BigEndian,
        title: String::from("vortex particles"),
        file_path: Some(path.clone()),
        data: DataSet::PolyData {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(PolyDataPiece {
                points: vtk_points.into(),
                verts: VertexNumbers::Legacy {
                    num_cells: n as u32,
                    vertices: vtk_verts,
                }
                .into(),
                data: Attributes {
                    cell: Vec::new(),
                    point: vec![
                        Attribute::DataArray(vtk_velocity),
                        Attribute::DataArray(vtk_strength),
                        Attribute::DataArray(vtk_radius),
                    ],
                },
                ..Default::default()
            }))],
        },
    };
    vtk.export(path).unwrap();
}

/// Surface collections publish nodes, triangles, sheet strength and area.
fn write_surfaces_file(path: PathBuf, surf: &Surfaces) {
    let np = surf.n_panels();

    let vtk_points: Vec<FT> = surf.nodes.iter().flat_map(to_vec3d).collect();
    let vtk_polys: Vec<u32> = surf
        .tris
        .iter()
        .flat_map(|t| [3, t[0], t[1], t[2]])
        .collect();

    let mut vtk_vs = DataArray::scalars("sheet strength", 3);
    vtk_vs.data = (0..np)
        .flat_map(|i| to_vec3d(&surf.sheet_strength(i)))
        .collect::<Vec<_>>()
        .into();

    let mut vtk_area = DataArray::scalars("area", 1);
    vtk_area.data = surf.area.clone().into();

    let vtk = Vtk {
        version: Version::new((4, 2)),
        byte_order: ByteOrder::BigEndian,
        title: String::from("boundary panels"),
        file_path: Some(path.clone()),
        data: DataSet::PolyData {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(PolyDataPiece {
                points: vtk_points.into(),
                polys: VertexNumbers::Legacy {
                    num_cells: np as u32,
                    vertices: vtk_polys,
                }
                .into(),
                data: Attributes {
                    cell: vec![
                        Attribute::DataArray(vtk_vs),
                        Attribute::DataArray(vtk_area),
                    ],
                    point: Vec::new(),
                },
                ..Default::default()
            }))],
        },
    };
    vtk.export(path).unwrap();
}
