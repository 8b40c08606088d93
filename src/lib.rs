//! Serum - colorization archive decoder and DMD frame colorizer.
//!
//! A colorization archive describes, for every known monochrome frame of a
//! pinball display, how to recognise it and how to paint it. This crate
//! reads those archives (both the legacy palettized layout and the current
//! RGB565 layout), keeps them in a compressed cache next to the source, and
//! plays raw frames through them in real time.
//!
//! # Architecture
//!
//! - `sparse`: per-frame tables that store only the ids carrying data
//! - `archive`: the archive model, its two source readers and the cache codec
//! - `engine`: frame identification, colorization and color rotations
//! - `schema`: playback configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use serum_decode::{ColorizeOutcome, Engine, PlaybackConfig};
//!
//! let mut engine = Engine::new(PlaybackConfig::default()).unwrap();
//! engine.load("roms/afm_113b/afm_113b.cRZ").unwrap();
//!
//! let raw = vec![0u8; 128 * 32];
//! if let ColorizeOutcome::Colorized { frame_id, first_rotation_in_ms, .. } = engine.colorize(&raw) {
//!     println!("frame {frame_id}, next rotation in {first_rotation_in_ms:?} ms");
//! }
//! ```

pub mod archive;
pub mod engine;
pub mod schema;
pub mod sparse;

mod wire;

// Re-export commonly used types
pub use archive::{Archive, ArchiveError, LoadOrigin, SourceFormat};
pub use engine::{ColorizeOutcome, Engine, Output, RotateOutcome};
pub use schema::{ConfigError, PlaybackConfig, RequestFlags, StandardPalette};

/// Full library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library version without the patch component ("major.minor").
pub fn minor_version() -> &'static str {
    match VERSION.match_indices('.').nth(1) {
        Some((i, _)) => &VERSION[..i],
        None => VERSION,
    }
}
