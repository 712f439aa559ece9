/*!
Library root: exposes the simulation core so integration tests and external
front ends can drive it without going through the batch binary.
*/

mod platform;
mod simulation;

pub use simulation::*;

/// Avoids 'unused' warnings.
pub use platform::start;
