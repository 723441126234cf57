//! Render Graph System
//!
//! Passes declare the resources they read and write; compilation turns those declarations into a
//! deterministic execution order with memory barriers between dependent passes.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;

pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
