//! Database models.

pub mod subscription;

pub use subscription::*;
