//! beacon-notifier library crate.
//!
//! Exposes the notification pipeline and its persistence layer for the
//! binary and for integration testing.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod notification;
pub mod utils;

pub use error::{Error, Result};
