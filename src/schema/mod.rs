//! Schema module - Playback configuration types.

mod config;

pub use config::*;
