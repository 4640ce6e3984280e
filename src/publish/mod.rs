//! The remote publish boundary and an in-memory stand-in for it.

pub mod gate;
pub mod memory;
