//! Common types, traits, and error definitions for ssl_local_planner
//!
//! This module provides the data model shared by both local planners and the
//! facade that owns them.

pub mod types;
pub mod traits;
pub mod error;
pub mod slots;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use slots::*;
