//! Backend abstraction layer
//!
//! Provides common traits and types that the wgpu and recording backends implement.

pub mod recording;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;
