//! Geometric primitives shared by the local planners

pub mod safety_envelope;

pub use safety_envelope::*;
