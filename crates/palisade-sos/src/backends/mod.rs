//! Concrete semidefinite solver backends.

pub mod csdp;
pub mod sdpa;
