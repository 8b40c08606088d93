//! Keyed table storage used for every per-frame, per-sprite and per-background table.

mod element;
mod vector;

pub use element::*;
pub use vector::*;
