//! Utility modules for the builder.

pub mod exec;
pub mod hash;
pub mod minify;
