mod batch;
mod vtk_exporter;

pub use batch::start;
pub use vtk_exporter::VtkExporter;
