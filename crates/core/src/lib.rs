//! Core library for the trajectory selection engine.
//!
//! Pure Rust collaborators the selection crate builds on: the topology model
//! and AMBER prmtop loader, frames, periodic boxes, position-reduction
//! kernels and neighbor searches.

pub mod amber;
pub mod frame;
pub mod neighbors;
pub mod pbc;
pub mod positions;
pub mod topology;

pub use frame::Frame;
pub use pbc::Pbc;
pub use positions::PositionType;
pub use topology::Topology;
