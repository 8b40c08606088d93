//! Colorization archive model and codecs.
//!
//! An [`Archive`] is read from one of two source layouts (legacy or current)
//! or from the compressed cache written next to the source after a
//! successful load. Every per-frame, per-sprite and per-background table is a
//! [`SparseVector`]; sprite detection data is kept in flat arrays because the
//! sprite scanner walks it on every identified frame.

mod cache;
mod current;
mod format;
mod legacy;
#[cfg(any(test, feature = "synth"))]
pub mod synth;

pub use cache::*;
pub use format::*;

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::schema::RequestFlags;
use crate::sparse::{Relation, SparseVector};

/// Number of palette rotations per frame in the legacy layout.
pub const MAX_COLOR_ROTATIONS: usize = 8;
/// Number of rotation slots per frame and plane in the current layout.
pub const MAX_COLOR_ROTATIONS_V2: usize = 16;
/// Entries per current-format rotation slot: length, delay, then up to 14 colors.
pub const MAX_LENGTH_COLOR_ROTATION: usize = 16;
/// Bytes of a full 256-color RGB palette.
pub const PALETTE_SIZE: usize = 768;
/// Bytes of the legacy output palette (64 RGB entries).
pub const LEGACY_PALETTE_SIZE: usize = 3 * 64;
pub const MAX_SPRITES_PER_FRAME: usize = 32;
pub const MAX_SPRITE_DETECT_AREAS: usize = 8;
/// Sprite templates are square.
pub const MAX_SPRITE_SIZE: usize = 32;
pub const SPRITE_PIXELS: usize = MAX_SPRITE_SIZE * MAX_SPRITE_SIZE;
pub const MAX_DYNA_4COLS_PER_FRAME: usize = 256;
pub const MAX_DYNA_SETS_PER_FRAME_V2: usize = 64;
pub const MAX_DYNA_SETS_PER_SPRITE: usize = 9;

/// Largest supported raster.
pub const MAX_FRAME_WIDTH: u32 = 256;
pub const MAX_FRAME_HEIGHT: u32 = 64;
pub const MAX_FRAME_PIXELS: usize = (MAX_FRAME_WIDTH * MAX_FRAME_HEIGHT) as usize;
pub const MAX_FRAMES: u32 = 0xFFFF;
pub const MAX_COLORS: u32 = 64;
pub const MAX_MASKS: u32 = 255;
pub const MAX_SPRITES: u32 = 255;

/// Trigger id sentinel.
pub const NO_TRIGGER: u32 = 0xFFFF_FFFF;
/// Background id sentinel.
pub const NO_BACKGROUND: u16 = 0xFFFF;
/// Comparison mask id meaning "checksum the whole raster".
pub const NO_MASK: u8 = 255;
/// Dynamic cell id meaning "not dynamic".
pub const NOT_DYNAMIC: u8 = 255;
/// Sprite reference sentinel, and transparent value in sprite templates.
pub const NO_SPRITE: u8 = 255;

/// Source layout an archive was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SourceFormat {
    /// Fixed layout with 8-bit palettized output.
    Legacy = 1,
    /// Extensible layout with RGB565 output in one or two resolutions.
    Current = 2,
}

impl SourceFormat {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(SourceFormat::Legacy),
            2 => Some(SourceFormat::Current),
            _ => None,
        }
    }
}

/// Archive loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Archive header declares zero {0}")]
    ZeroScalar(&'static str),
    #[error("Archive {field} {value} exceeds the supported maximum {max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    #[error("Unsupported frame height {0} (expected 32 or 64)")]
    UnsupportedHeight(u32),
    #[error("Invalid cache magic bytes")]
    BadMagic,
    #[error("Unsupported cache version: {0}")]
    UnsupportedCacheVersion(u16),
    #[error("Unknown source format tag: {0}")]
    UnknownFormat(u8),
    #[error("Cache {what} holds {actual} values, expected {expected}")]
    InconsistentCache {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("No archive or cache found for {0}")]
    NotFound(PathBuf),
}

/// Where a loaded archive came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    Cache,
    Source,
}

/// A fully parsed colorization archive.
#[derive(Debug, PartialEq)]
pub struct Archive {
    /// ROM name from the file header.
    pub name: String,
    pub format: SourceFormat,
    /// Base resolution.
    pub width: u32,
    pub height: u32,
    /// Extra resolution (current format only, 0 when absent).
    pub width_extra: u32,
    pub height_extra: u32,
    pub nframes: u32,
    /// Raw shades per pixel (4 or 16).
    pub nocolors: u32,
    /// Palette entries per frame (legacy only).
    pub nccolors: u32,
    pub ncompmasks: u32,
    /// Move-rectangle masks (legacy only, skipped on read).
    pub nmovmasks: u32,
    pub nsprites: u32,
    pub nbackgrounds: u16,
    /// Matching covers a 256x64 raster regardless of the frame size.
    pub is256x64: bool,

    pub hashcodes: SparseVector<u32>,
    pub shapecompmode: SparseVector<u8>,
    pub compmask_id: SparseVector<u8>,
    pub compmasks: SparseVector<u8>,
    /// Per-frame palette (legacy).
    pub cpal: SparseVector<u8>,
    pub is_extra_frame: SparseVector<u8>,
    /// Per-frame colorized pixels (legacy).
    pub cframes: SparseVector<u8>,
    pub cframes_v2: SparseVector<u16>,
    pub cframes_v2_extra: SparseVector<u16>,
    pub dynamasks: SparseVector<u8>,
    pub dynamasks_extra: SparseVector<u8>,
    /// Dynamic substitution colors (legacy).
    pub dyna4cols: SparseVector<u8>,
    pub dyna4cols_v2: SparseVector<u16>,
    pub dyna4cols_v2_extra: SparseVector<u16>,
    /// Sprite ids referenced by each frame, 255-terminated.
    pub framesprites: SparseVector<u8>,
    /// Sprite detection templates, `SPRITE_PIXELS` per sprite, 255 = transparent.
    pub sprite_original: Vec<u8>,
    /// Colorized legacy sprites, `SPRITE_PIXELS` per sprite.
    pub sprite_colored_v1: Vec<u8>,
    pub is_extra_sprite: SparseVector<u8>,
    pub sprite_colored: SparseVector<u16>,
    pub sprite_mask_extra: SparseVector<u8>,
    pub sprite_colored_extra: SparseVector<u16>,
    pub active_frames: SparseVector<u8>,
    /// Legacy palette rotations: `[first, count, delay / 10]` per slot.
    pub color_rotations: SparseVector<u8>,
    /// Current rotations: `[len, delay_ms, colors..]` per slot.
    pub color_rotations_v2: SparseVector<u16>,
    pub color_rotations_v2_extra: SparseVector<u16>,
    /// Detection signature per sprite and area.
    pub sprite_det_dwords: Vec<u32>,
    /// Signature position inside the sprite template.
    pub sprite_det_dword_pos: Vec<u16>,
    /// Detection areas `[x, y, w, h]`, x = 0xFFFF when unused.
    pub sprite_det_areas: Vec<u16>,
    /// Sprite matched on binarized pixels (current format).
    pub sprite_shape_mode: Vec<u8>,
    pub trigger_ids: SparseVector<u32>,
    /// Per-frame sprite search boxes `[min_x, min_y, max_x, max_y]`.
    pub frame_sprite_bb: SparseVector<u16>,
    pub is_extra_background: SparseVector<u8>,
    pub background_frames: SparseVector<u8>,
    pub background_frames_v2: SparseVector<u16>,
    pub background_frames_v2_extra: SparseVector<u16>,
    pub background_ids: SparseVector<u16>,
    /// Legacy background boxes `[min_x, min_y, max_x, max_y]`.
    pub background_bb: SparseVector<u16>,
    pub background_mask: SparseVector<u8>,
    pub background_mask_extra: SparseVector<u8>,
    pub dyna_shadows_dir: SparseVector<u8>,
    pub dyna_shadows_col: SparseVector<u16>,
    pub dyna_shadows_dir_extra: SparseVector<u8>,
    pub dyna_shadows_col_extra: SparseVector<u16>,
    pub dyna_sprite_4cols: SparseVector<u16>,
    pub dyna_sprite_4cols_extra: SparseVector<u16>,
    pub dyna_sprite_masks: SparseVector<u8>,
    pub dyna_sprite_masks_extra: SparseVector<u8>,
}

impl Archive {
    /// An archive with no data and every table configured.
    pub(crate) fn empty(format: SourceFormat) -> Self {
        Self {
            name: String::new(),
            format,
            width: 0,
            height: 0,
            width_extra: 0,
            height_extra: 0,
            nframes: 0,
            nocolors: 0,
            nccolors: 0,
            ncompmasks: 0,
            nmovmasks: 0,
            nsprites: 0,
            nbackgrounds: 0,
            is256x64: false,

            hashcodes: SparseVector::new_dense(0),
            shapecompmode: SparseVector::new_sparse(0, false),
            compmask_id: SparseVector::new_sparse(NO_MASK, false),
            compmasks: SparseVector::new_sparse(0, false),
            cpal: SparseVector::new_sparse(0, false),
            is_extra_frame: SparseVector::new_dense(0).providing(Relation::ExtraFrame),
            cframes: SparseVector::new_sparse(0, true),
            cframes_v2: SparseVector::new_sparse(0, true),
            cframes_v2_extra: SparseVector::new_sparse(0, true).with_relation(Relation::ExtraFrame),
            dynamasks: SparseVector::new_sparse(NOT_DYNAMIC, true),
            dynamasks_extra: SparseVector::new_sparse(NOT_DYNAMIC, true)
                .with_relation(Relation::ExtraFrame),
            dyna4cols: SparseVector::new_sparse(0, false),
            dyna4cols_v2: SparseVector::new_sparse(0, false),
            dyna4cols_v2_extra: SparseVector::new_sparse(0, false)
                .with_relation(Relation::ExtraFrame),
            framesprites: SparseVector::new_sparse(NO_SPRITE, false)
                .providing(Relation::FrameSprites),
            sprite_original: Vec::new(),
            sprite_colored_v1: Vec::new(),
            is_extra_sprite: SparseVector::new_dense(0).providing(Relation::ExtraSprite),
            sprite_colored: SparseVector::new_sparse(0, false),
            sprite_mask_extra: SparseVector::new_sparse(NO_SPRITE, false)
                .with_relation(Relation::ExtraSprite),
            sprite_colored_extra: SparseVector::new_sparse(0, false)
                .with_relation(Relation::ExtraSprite),
            active_frames: SparseVector::new_sparse(1, false),
            color_rotations: SparseVector::new_sparse(0, false),
            color_rotations_v2: SparseVector::new_sparse(0, false),
            color_rotations_v2_extra: SparseVector::new_sparse(0, false)
                .with_relation(Relation::ExtraFrame),
            sprite_det_dwords: Vec::new(),
            sprite_det_dword_pos: Vec::new(),
            sprite_det_areas: Vec::new(),
            sprite_shape_mode: Vec::new(),
            trigger_ids: SparseVector::new_sparse(NO_TRIGGER, false),
            frame_sprite_bb: SparseVector::new_sparse(0, false)
                .with_relation(Relation::FrameSprites),
            is_extra_background: SparseVector::new_dense(0).providing(Relation::ExtraBackground),
            background_frames: SparseVector::new_sparse(0, true),
            background_frames_v2: SparseVector::new_sparse(0, true),
            background_frames_v2_extra: SparseVector::new_sparse(0, true)
                .with_relation(Relation::ExtraBackground),
            background_ids: SparseVector::new_sparse(NO_BACKGROUND, false)
                .providing(Relation::FrameBackground),
            background_bb: SparseVector::new_sparse(0, false)
                .with_relation(Relation::FrameBackground),
            background_mask: SparseVector::new_sparse(0, true)
                .with_relation(Relation::FrameBackground),
            background_mask_extra: SparseVector::new_sparse(0, true)
                .with_relation(Relation::FrameBackground),
            dyna_shadows_dir: SparseVector::new_sparse(0, false),
            dyna_shadows_col: SparseVector::new_sparse(0, false),
            dyna_shadows_dir_extra: SparseVector::new_sparse(0, false)
                .with_relation(Relation::ExtraFrame),
            dyna_shadows_col_extra: SparseVector::new_sparse(0, false)
                .with_relation(Relation::ExtraFrame),
            dyna_sprite_4cols: SparseVector::new_sparse(0, false),
            dyna_sprite_4cols_extra: SparseVector::new_sparse(0, false)
                .with_relation(Relation::ExtraSprite),
            dyna_sprite_masks: SparseVector::new_sparse(NOT_DYNAMIC, false),
            dyna_sprite_masks_extra: SparseVector::new_sparse(NOT_DYNAMIC, false)
                .with_relation(Relation::ExtraSprite),
        }
    }

    /// Parse a source archive (either layout) from a stream.
    ///
    /// The returned archive keeps only the extra-resolution data `request` asks for.
    pub fn from_reader<R: Read>(r: &mut R, request: RequestFlags) -> Result<Self, ArchiveError> {
        let mut archive = Self::read_source(r)?;
        archive.apply_request(request);
        Ok(archive)
    }

    /// Parse a source archive held in memory.
    pub fn from_bytes(bytes: &[u8], request: RequestFlags) -> Result<Self, ArchiveError> {
        Self::from_reader(&mut Cursor::new(bytes), request)
    }

    /// Parse a source archive file.
    pub fn open_source<P: AsRef<Path>>(path: P, request: RequestFlags) -> Result<Self, ArchiveError> {
        let mut archive = Self::read_source_file(path.as_ref())?;
        archive.apply_request(request);
        Ok(archive)
    }

    fn read_source_file(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_source(&mut reader)
    }

    /// Parse a source archive keeping every extra-resolution table.
    pub(crate) fn read_source<R: Read>(r: &mut R) -> Result<Self, ArchiveError> {
        let preamble = SourcePreamble::read_from(r)?;
        let archive = if preamble.is_current_format() {
            current::read_current(r, &preamble)?
        } else {
            legacy::read_legacy(r, &preamble)?
        };
        info!(
            "Loaded {:?} archive '{}': {}x{}, {} frames, {} sprites, {} backgrounds",
            archive.format,
            archive.name,
            archive.width,
            archive.height,
            archive.nframes,
            archive.nsprites,
            archive.nbackgrounds
        );
        Ok(archive)
    }

    /// Load an archive, preferring an up-to-date cache.
    ///
    /// `path` names either the source file or the cache itself. When the
    /// source is read and `write_cache` is set, the cache is rebuilt next to
    /// it; a failure to write it is logged and otherwise ignored.
    pub fn load<P: AsRef<Path>>(
        path: P,
        request: RequestFlags,
        write_cache: bool,
    ) -> Result<(Self, LoadOrigin), ArchiveError> {
        let path = path.as_ref();
        if is_cache_path(path) {
            let mut archive = Self::load_cache(path)?;
            archive.apply_request(request);
            return Ok((archive, LoadOrigin::Cache));
        }

        let cache = cache_path_for(path);
        if cache_is_fresh(path, &cache) {
            match Self::load_cache(&cache) {
                Ok(mut archive) => {
                    debug!("Using cache {}", cache.display());
                    archive.apply_request(request);
                    return Ok((archive, LoadOrigin::Cache));
                }
                Err(e) => log::warn!("Ignoring unreadable cache {}: {}", cache.display(), e),
            }
        }

        if !path.exists() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }

        let mut archive = Self::read_source_file(path)?;
        if write_cache {
            if let Err(e) = archive.save_cache(&cache) {
                log::warn!("Could not write cache {}: {}", cache.display(), e);
            }
        }
        archive.apply_request(request);
        Ok((archive, LoadOrigin::Source))
    }

    /// Whether the caller asked for the extra plane and the archive declares a usable one.
    pub fn extra_requested(&self, request: RequestFlags) -> bool {
        self.format == SourceFormat::Current
            && self.has_extra_plane()
            && request.wants_height(self.height_extra)
    }

    /// Whether the base plane is requested.
    pub fn base_requested(&self, request: RequestFlags) -> bool {
        self.format == SourceFormat::Legacy || request.wants_height(self.height)
    }

    /// Whether the declared extra resolution is one the renderer supports.
    pub fn has_extra_plane(&self) -> bool {
        matches!(
            (self.height, self.height_extra),
            (32, 64) | (64, 32)
        ) && self.width_extra > 0
    }

    /// Drop extra-resolution data the caller did not request, then prune
    /// every child table against its parent.
    pub(crate) fn apply_request(&mut self, request: RequestFlags) {
        if !self.extra_requested(request) {
            self.is_extra_frame.clear();
            self.is_extra_sprite.clear();
            self.is_extra_background.clear();
        }
        self.apply_relations();
    }

    fn apply_relations(&mut self) {
        let Self {
            is_extra_frame,
            is_extra_sprite,
            is_extra_background,
            framesprites,
            background_ids,
            cframes_v2_extra,
            dynamasks_extra,
            dyna4cols_v2_extra,
            sprite_mask_extra,
            sprite_colored_extra,
            color_rotations_v2_extra,
            frame_sprite_bb,
            background_frames_v2_extra,
            background_bb,
            background_mask,
            background_mask_extra,
            dyna_shadows_dir_extra,
            dyna_shadows_col_extra,
            dyna_sprite_4cols_extra,
            dyna_sprite_masks_extra,
            ..
        } = self;

        cframes_v2_extra.filter_by_parent(&*is_extra_frame);
        dynamasks_extra.filter_by_parent(&*is_extra_frame);
        dyna4cols_v2_extra.filter_by_parent(&*is_extra_frame);
        color_rotations_v2_extra.filter_by_parent(&*is_extra_frame);
        dyna_shadows_dir_extra.filter_by_parent(&*is_extra_frame);
        dyna_shadows_col_extra.filter_by_parent(&*is_extra_frame);
        sprite_mask_extra.filter_by_parent(&*is_extra_sprite);
        sprite_colored_extra.filter_by_parent(&*is_extra_sprite);
        dyna_sprite_4cols_extra.filter_by_parent(&*is_extra_sprite);
        dyna_sprite_masks_extra.filter_by_parent(&*is_extra_sprite);
        background_frames_v2_extra.filter_by_parent(&*is_extra_background);
        frame_sprite_bb.filter_by_parent(&*framesprites);
        background_bb.filter_by_parent(&*background_ids);
        background_mask.filter_by_parent(&*background_ids);
        background_mask_extra.filter_by_parent(&*background_ids);
    }

    /// Pixels in one base-resolution frame.
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixels in one extra-resolution frame.
    #[inline]
    pub fn extra_frame_len(&self) -> usize {
        self.width_extra as usize * self.height_extra as usize
    }

    /// Pixels covered by the matching checksum.
    #[inline]
    pub fn comparison_len(&self) -> usize {
        if self.is256x64 {
            MAX_FRAME_PIXELS
        } else {
            self.frame_len()
        }
    }

    /// Number of frames that carry a trigger.
    pub fn trigger_count(&self) -> u32 {
        (0..self.nframes)
            .filter(|&id| self.trigger_ids.value(id) != NO_TRIGGER)
            .count() as u32
    }

    /// Whether at least one frame records extra-resolution data.
    pub fn extra_available(&self) -> bool {
        self.is_extra_frame.stored_count() > 0
    }

    /// Whether the extra plane can be rendered for `frame`: the frame, its
    /// background and every sprite it references all carry extra data.
    pub fn extra_frame_available(&self, frame: u32) -> bool {
        if !self.is_extra_frame.has(frame) {
            return false;
        }
        let background = self.background_ids.value(frame);
        if background != NO_BACKGROUND && !self.is_extra_background.has(background as u32) {
            return false;
        }
        self.framesprites
            .get(frame)
            .iter()
            .filter(|&&s| s != NO_SPRITE)
            .all(|&s| self.is_extra_sprite.has(s as u32))
    }

    /// Detection template of `sprite`.
    #[inline]
    pub fn sprite_template(&self, sprite: u8) -> &[u8] {
        let start = sprite as usize * SPRITE_PIXELS;
        self.sprite_original
            .get(start..start + SPRITE_PIXELS)
            .unwrap_or(&[])
    }

    /// Colorized legacy sprite.
    #[inline]
    pub fn sprite_colors_v1(&self, sprite: u8) -> &[u8] {
        let start = sprite as usize * SPRITE_PIXELS;
        self.sprite_colored_v1
            .get(start..start + SPRITE_PIXELS)
            .unwrap_or(&[])
    }

    /// Whether `sprite` is matched on binarized pixels.
    #[inline]
    pub fn sprite_uses_shape(&self, sprite: u8) -> bool {
        self.sprite_shape_mode
            .get(sprite as usize)
            .is_some_and(|&m| m > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::synth::{CurrentBuilder, LegacyBuilder};

    #[test]
    fn test_legacy_archive_basics() {
        let mut builder = LegacyBuilder::new(8, 8, 2, 4);
        builder.trigger(1, 42);
        let archive = Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap();
        assert_eq!(archive.format, SourceFormat::Legacy);
        assert_eq!(archive.nframes, 2);
        assert_eq!(archive.trigger_count(), 1);
        assert_eq!(archive.trigger_ids.value(1), 42);
        assert_eq!(archive.trigger_ids.value(0), NO_TRIGGER);
        assert!(!archive.extra_available());
        assert_eq!(archive.comparison_len(), 64);
    }

    #[test]
    fn test_extra_tables_pruned_when_not_requested() {
        let mut builder = CurrentBuilder::new(16, 32, 2, 4);
        builder.extra_frame(0, 7);
        let bytes = builder.build();

        let full = Archive::from_bytes(&bytes, RequestFlags::default()).unwrap();
        assert!(full.extra_available());
        assert!(full.cframes_v2_extra.has(0));
        assert!(full.extra_frame_available(0));
        assert!(!full.extra_frame_available(1));

        let base_only = Archive::from_bytes(&bytes, RequestFlags::from_bits(RequestFlags::REQUEST_32P)).unwrap();
        assert!(!base_only.extra_available());
        assert!(!base_only.cframes_v2_extra.has(0));
        assert!(base_only.cframes_v2.has(0));
    }

    #[test]
    fn test_truncated_source_is_an_error() {
        let bytes = LegacyBuilder::new(8, 8, 2, 4).build();
        let err = Archive::from_bytes(&bytes[..bytes.len() - 10], RequestFlags::default());
        assert!(matches!(err, Err(ArchiveError::Io(_))));
    }
}
