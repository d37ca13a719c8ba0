//! Repository layer for database access.

pub mod epoch;
pub mod subscription;

pub use epoch::*;
pub use subscription::*;
