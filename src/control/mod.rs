//! Control module
//!
//! The receding-horizon optimizer, its QP solver seam and the per-robot
//! acceleration limiter applied to every command.

pub mod acceleration_limiter;
pub mod mpc;
pub mod qp;

pub use acceleration_limiter::*;
pub use mpc::*;
pub use qp::*;
