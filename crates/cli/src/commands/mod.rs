//! CLI command implementations

pub mod disk;
pub mod normalize;
pub mod power;
pub mod summary;
