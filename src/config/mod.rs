//! Configuration module
//!
//! Handles user configuration (`config.toml` in the platform config
//! directory) layered with `FLOWSYNC_` environment overrides.

mod settings;

pub use settings::*;
