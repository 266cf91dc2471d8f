//! AMBER file format readers.

pub mod prmtop;
