//! Playback configuration for a colorization session.

use serde::{Deserialize, Serialize};

use crate::archive::PALETTE_SIZE;

fn default_true() -> bool {
    true
}

/// Which output planes the caller wants filled.
///
/// Only meaningful for current-format archives; legacy archives always
/// render a single palettized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFlags {
    /// Deliver the 32-line plane when available.
    pub want_32p: bool,
    /// Deliver the 64-line plane when available.
    pub want_64p: bool,
    /// Fill the per-pixel "modified by the last rotation" bitmaps.
    #[serde(default)]
    pub fill_modified: bool,
}

impl Default for RequestFlags {
    fn default() -> Self {
        Self {
            want_32p: true,
            want_64p: true,
            fill_modified: false,
        }
    }
}

impl RequestFlags {
    pub const REQUEST_32P: u8 = 1;
    pub const REQUEST_64P: u8 = 2;
    pub const FILL_MODIFIED: u8 = 4;

    pub fn to_bits(self) -> u8 {
        let mut flags = 0;
        if self.want_32p {
            flags |= Self::REQUEST_32P;
        }
        if self.want_64p {
            flags |= Self::REQUEST_64P;
        }
        if self.fill_modified {
            flags |= Self::FILL_MODIFIED;
        }
        flags
    }

    pub fn from_bits(v: u8) -> Self {
        Self {
            want_32p: (v & Self::REQUEST_32P) != 0,
            want_64p: (v & Self::REQUEST_64P) != 0,
            fill_modified: (v & Self::FILL_MODIFIED) != 0,
        }
    }

    /// Whether a plane of the given line height is requested.
    #[inline]
    pub fn wants_height(self, height: u32) -> bool {
        match height {
            32 => self.want_32p,
            64 => self.want_64p,
            _ => false,
        }
    }
}

/// Caller-supplied RGB palette used when a frame cannot be colorized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardPalette {
    /// RGB triplets, `3 << bit_depth` bytes.
    pub colors: Vec<u8>,
    /// Bits per raw pixel (2 for 4 shades, 4 for 16 shades).
    pub bit_depth: u8,
}

impl StandardPalette {
    /// Build a palette from the first `3 << bit_depth` bytes of `colors`.
    pub fn new(colors: &[u8], bit_depth: u8) -> Result<Self, ConfigError> {
        let expected = Self::byte_len(bit_depth)?;
        if colors.len() < expected {
            return Err(ConfigError::PaletteLength {
                expected,
                actual: colors.len(),
            });
        }
        Ok(Self {
            colors: colors[..expected].to_vec(),
            bit_depth,
        })
    }

    fn byte_len(bit_depth: u8) -> Result<usize, ConfigError> {
        if bit_depth == 0 || bit_depth > 8 {
            return Err(ConfigError::InvalidBitDepth(bit_depth));
        }
        let len = 3usize << bit_depth;
        if len > PALETTE_SIZE {
            return Err(ConfigError::InvalidBitDepth(bit_depth));
        }
        Ok(len)
    }

    /// Number of palette entries.
    pub fn len(&self) -> usize {
        self.colors.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Entry `index` converted to RGB565, or black when out of range.
    #[inline]
    pub fn rgb565(&self, index: u8) -> u16 {
        let i = index as usize * 3;
        match self.colors.get(i..i + 3) {
            Some(&[r, g, b]) => ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3),
            _ => 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let expected = Self::byte_len(self.bit_depth)?;
        if self.colors.len() != expected {
            return Err(ConfigError::PaletteLength {
                expected,
                actual: self.colors.len(),
            });
        }
        Ok(())
    }
}

/// Top-level playback configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Requested output planes.
    #[serde(default)]
    pub request: RequestFlags,
    /// Fall back to the standard palette after this many milliseconds without a match (0 disables).
    #[serde(default)]
    pub unknown_frame_timeout_ms: u16,
    /// Fall back to the standard palette after this many consecutive unmatched frames (0 disables).
    #[serde(default)]
    pub max_unknown_frames_to_skip: u8,
    /// Palette used by the fallback path.
    #[serde(default)]
    pub standard_palette: Option<StandardPalette>,
    /// Write a compressed cache next to a source archive after loading it.
    #[serde(default = "default_true")]
    pub write_cache: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            request: RequestFlags::default(),
            unknown_frame_timeout_ms: 0,
            max_unknown_frames_to_skip: 0,
            standard_palette: None,
            write_cache: true,
        }
    }
}

impl PlaybackConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.request.want_32p && !self.request.want_64p {
            return Err(ConfigError::NoPlaneRequested);
        }
        if let Some(palette) = &self.standard_palette {
            palette.validate()?;
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one of the 32-line or 64-line planes must be requested")]
    NoPlaneRequested,
    #[error("Palette bit depth {0} is out of range (1-8)")]
    InvalidBitDepth(u8),
    #[error("Palette needs {expected} bytes, got {actual}")]
    PaletteLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let flags = RequestFlags {
            want_32p: true,
            want_64p: false,
            fill_modified: true,
        };
        assert_eq!(flags.to_bits(), 5);
        assert_eq!(RequestFlags::from_bits(5), flags);
        assert!(flags.wants_height(32));
        assert!(!flags.wants_height(64));
    }

    #[test]
    fn test_standard_palette() {
        let mut colors = vec![0u8; 12];
        colors[9..12].copy_from_slice(&[255, 255, 255]);
        let palette = StandardPalette::new(&colors, 2).unwrap();
        assert_eq!(palette.len(), 4);
        assert_eq!(palette.rgb565(3), 0xFFFF);
        assert_eq!(palette.rgb565(0), 0);
        assert_eq!(palette.rgb565(9), 0);

        assert!(matches!(
            StandardPalette::new(&colors, 4),
            Err(ConfigError::PaletteLength { expected: 48, .. })
        ));
        assert!(matches!(
            StandardPalette::new(&colors, 0),
            Err(ConfigError::InvalidBitDepth(0))
        ));
    }

    #[test]
    fn test_config_json() {
        let config = PlaybackConfig::default();
        config.validate().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: PlaybackConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);

        let sparse: PlaybackConfig =
            serde_json::from_str(r#"{"max_unknown_frames_to_skip": 3}"#).unwrap();
        assert_eq!(sparse.max_unknown_frames_to_skip, 3);
        assert!(sparse.write_cache);
        assert!(sparse.request.want_32p);
    }

    #[test]
    fn test_config_rejects_no_planes() {
        let config = PlaybackConfig {
            request: RequestFlags::from_bits(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoPlaneRequested)
        ));
    }
}
