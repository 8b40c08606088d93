//! Engine module - Frame identification, colorization and playback.

mod checksum;
mod colorizer;
mod matcher;
mod output;
mod playback;
mod rotation;
mod sprites;

pub use checksum::*;
pub use colorizer::*;
pub use matcher::*;
pub use output::*;
pub use playback::*;
pub use rotation::*;
pub use sprites::*;
