//! Resource management
//!
//! Meshes, textures, render targets and the scene triangle buffer.

mod mesh;
mod render_targets;
mod scene_buffer;
mod texture;

pub use mesh::*;
pub use render_targets::*;
pub use scene_buffer::*;
pub use texture::*;
