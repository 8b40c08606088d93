//! Compressed archive cache ("concentrate").
//!
//! The cache holds every table of a parsed archive, including extra-resolution
//! data, inside a single LZ4 frame stream:
//!
//! ```text
//! "CONC" | version u16 | name (u32 len + bytes) | format u8
//! | width | height | width_extra | height_extra | nframes | nocolors | nccolors
//! | ncompmasks | nmovmasks | nsprites (u32 each) | nbackgrounds u16 | is256x64 u8
//! | tables in fixed order | flat sprite arrays
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::format::{check_max, check_nonzero, read_flat, write_flat};
use super::{
    Archive, ArchiveError, SourceFormat, MAX_COLORS, MAX_COLOR_ROTATIONS,
    MAX_COLOR_ROTATIONS_V2, MAX_DYNA_4COLS_PER_FRAME, MAX_DYNA_SETS_PER_FRAME_V2,
    MAX_DYNA_SETS_PER_SPRITE, MAX_FRAMES, MAX_FRAME_HEIGHT, MAX_FRAME_PIXELS, MAX_FRAME_WIDTH,
    MAX_LENGTH_COLOR_ROTATION, MAX_MASKS, MAX_SPRITES, MAX_SPRITES_PER_FRAME,
    MAX_SPRITE_DETECT_AREAS, SPRITE_PIXELS,
};
use crate::wire::{read_len, read_u8, read_u16, read_u32, write_u8, write_u16, write_u32};

/// Magic bytes at the start of the decompressed cache stream.
pub const CACHE_MAGIC: &[u8; 4] = b"CONC";

/// Current cache version.
pub const CACHE_VERSION: u16 = 1;

/// File extension of cache files.
pub const CACHE_EXTENSION: &str = "cROMc";

const MAX_NAME_LEN: usize = 1024;

/// Apply `$op` to every table of `$archive`, in cache order.
macro_rules! cache_tables {
    ($archive:expr, $io:expr, $op:ident) => {
        $archive.hashcodes.$op($io)?;
        $archive.shapecompmode.$op($io)?;
        $archive.compmask_id.$op($io)?;
        $archive.compmasks.$op($io)?;
        $archive.cpal.$op($io)?;
        $archive.is_extra_frame.$op($io)?;
        $archive.cframes.$op($io)?;
        $archive.cframes_v2.$op($io)?;
        $archive.cframes_v2_extra.$op($io)?;
        $archive.dynamasks.$op($io)?;
        $archive.dynamasks_extra.$op($io)?;
        $archive.dyna4cols.$op($io)?;
        $archive.dyna4cols_v2.$op($io)?;
        $archive.dyna4cols_v2_extra.$op($io)?;
        $archive.framesprites.$op($io)?;
        $archive.is_extra_sprite.$op($io)?;
        $archive.sprite_colored.$op($io)?;
        $archive.sprite_mask_extra.$op($io)?;
        $archive.sprite_colored_extra.$op($io)?;
        $archive.active_frames.$op($io)?;
        $archive.color_rotations.$op($io)?;
        $archive.color_rotations_v2.$op($io)?;
        $archive.color_rotations_v2_extra.$op($io)?;
        $archive.trigger_ids.$op($io)?;
        $archive.frame_sprite_bb.$op($io)?;
        $archive.is_extra_background.$op($io)?;
        $archive.background_frames.$op($io)?;
        $archive.background_frames_v2.$op($io)?;
        $archive.background_frames_v2_extra.$op($io)?;
        $archive.background_ids.$op($io)?;
        $archive.background_bb.$op($io)?;
        $archive.background_mask.$op($io)?;
        $archive.background_mask_extra.$op($io)?;
        $archive.dyna_shadows_dir.$op($io)?;
        $archive.dyna_shadows_col.$op($io)?;
        $archive.dyna_shadows_dir_extra.$op($io)?;
        $archive.dyna_shadows_col_extra.$op($io)?;
        $archive.dyna_sprite_4cols.$op($io)?;
        $archive.dyna_sprite_4cols_extra.$op($io)?;
        $archive.dyna_sprite_masks.$op($io)?;
        $archive.dyna_sprite_masks_extra.$op($io)?;
    };
}

/// Cache path used for a source archive: same stem, `.cROMc` extension.
pub fn cache_path_for(source: &Path) -> PathBuf {
    source.with_extension(CACHE_EXTENSION)
}

/// Whether `path` names a cache file.
pub fn is_cache_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(CACHE_EXTENSION))
}

/// A cache is used when it exists and is at least as new as its source
/// (or the source is gone).
pub(crate) fn cache_is_fresh(source: &Path, cache: &Path) -> bool {
    let Ok(cache_meta) = fs::metadata(cache) else {
        return false;
    };
    let Ok(source_meta) = fs::metadata(source) else {
        return true;
    };
    match (cache_meta.modified(), source_meta.modified()) {
        (Ok(c), Ok(s)) => c >= s,
        _ => false,
    }
}

fn check_len(what: &'static str, actual: usize, expected: usize) -> Result<(), ArchiveError> {
    if actual != expected {
        return Err(ArchiveError::InconsistentCache {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Check that every table and sprite array has the shape a source read gives it.
///
/// Tables a layout never reads keep zero-length elements.
fn check_layout(a: &Archive) -> Result<(), ArchiveError> {
    let legacy = a.format == SourceFormat::Legacy;
    let by_format = |old: usize, new: usize| if legacy { old } else { new };
    let px = a.frame_len();
    let pxx = a.extra_frame_len();
    let ns = a.nsprites as usize;
    let nocolors = a.nocolors as usize;
    let mask_len = if a.is256x64 { MAX_FRAME_PIXELS } else { px };
    let rot_len = MAX_LENGTH_COLOR_ROTATION * MAX_COLOR_ROTATIONS_V2;
    let dyna_len = MAX_DYNA_SETS_PER_FRAME_V2 * nocolors;
    let sprite_dyna_len = MAX_DYNA_SETS_PER_SPRITE * nocolors;

    let tables = [
        ("hashcodes", a.hashcodes.element_len(), 1),
        ("shapecompmode", a.shapecompmode.element_len(), 1),
        ("compmask_id", a.compmask_id.element_len(), 1),
        ("compmasks", a.compmasks.element_len(), by_format(px, mask_len)),
        ("cpal", a.cpal.element_len(), by_format(3 * a.nccolors as usize, 0)),
        ("is_extra_frame", a.is_extra_frame.element_len(), by_format(0, 1)),
        ("cframes", a.cframes.element_len(), by_format(px, 0)),
        ("cframes_v2", a.cframes_v2.element_len(), by_format(0, px)),
        ("cframes_v2_extra", a.cframes_v2_extra.element_len(), by_format(0, pxx)),
        ("dynamasks", a.dynamasks.element_len(), px),
        ("dynamasks_extra", a.dynamasks_extra.element_len(), by_format(0, pxx)),
        (
            "dyna4cols",
            a.dyna4cols.element_len(),
            by_format(MAX_DYNA_4COLS_PER_FRAME * nocolors, 0),
        ),
        ("dyna4cols_v2", a.dyna4cols_v2.element_len(), by_format(0, dyna_len)),
        ("dyna4cols_v2_extra", a.dyna4cols_v2_extra.element_len(), by_format(0, dyna_len)),
        ("framesprites", a.framesprites.element_len(), MAX_SPRITES_PER_FRAME),
        ("is_extra_sprite", a.is_extra_sprite.element_len(), by_format(0, 1)),
        ("sprite_colored", a.sprite_colored.element_len(), by_format(0, SPRITE_PIXELS)),
        ("sprite_mask_extra", a.sprite_mask_extra.element_len(), by_format(0, SPRITE_PIXELS)),
        ("sprite_colored_extra", a.sprite_colored_extra.element_len(), by_format(0, SPRITE_PIXELS)),
        ("active_frames", a.active_frames.element_len(), 1),
        (
            "color_rotations",
            a.color_rotations.element_len(),
            by_format(3 * MAX_COLOR_ROTATIONS, 0),
        ),
        ("color_rotations_v2", a.color_rotations_v2.element_len(), by_format(0, rot_len)),
        (
            "color_rotations_v2_extra",
            a.color_rotations_v2_extra.element_len(),
            by_format(0, rot_len),
        ),
        ("trigger_ids", a.trigger_ids.element_len(), 1),
        ("frame_sprite_bb", a.frame_sprite_bb.element_len(), MAX_SPRITES_PER_FRAME * 4),
        ("is_extra_background", a.is_extra_background.element_len(), by_format(0, 1)),
        ("background_frames", a.background_frames.element_len(), by_format(px, 0)),
        ("background_frames_v2", a.background_frames_v2.element_len(), by_format(0, px)),
        (
            "background_frames_v2_extra",
            a.background_frames_v2_extra.element_len(),
            by_format(0, pxx),
        ),
        ("background_ids", a.background_ids.element_len(), 1),
        ("background_bb", a.background_bb.element_len(), by_format(4, 0)),
        ("background_mask", a.background_mask.element_len(), by_format(0, px)),
        ("background_mask_extra", a.background_mask_extra.element_len(), by_format(0, pxx)),
        (
            "dyna_shadows_dir",
            a.dyna_shadows_dir.element_len(),
            by_format(0, MAX_DYNA_SETS_PER_FRAME_V2),
        ),
        (
            "dyna_shadows_col",
            a.dyna_shadows_col.element_len(),
            by_format(0, MAX_DYNA_SETS_PER_FRAME_V2),
        ),
        (
            "dyna_shadows_dir_extra",
            a.dyna_shadows_dir_extra.element_len(),
            by_format(0, MAX_DYNA_SETS_PER_FRAME_V2),
        ),
        (
            "dyna_shadows_col_extra",
            a.dyna_shadows_col_extra.element_len(),
            by_format(0, MAX_DYNA_SETS_PER_FRAME_V2),
        ),
        ("dyna_sprite_4cols", a.dyna_sprite_4cols.element_len(), by_format(0, sprite_dyna_len)),
        (
            "dyna_sprite_4cols_extra",
            a.dyna_sprite_4cols_extra.element_len(),
            by_format(0, sprite_dyna_len),
        ),
        ("dyna_sprite_masks", a.dyna_sprite_masks.element_len(), by_format(0, SPRITE_PIXELS)),
        (
            "dyna_sprite_masks_extra",
            a.dyna_sprite_masks_extra.element_len(),
            by_format(0, SPRITE_PIXELS),
        ),
    ];
    for (what, actual, expected) in tables {
        check_len(what, actual, expected)?;
    }

    let areas = ns * MAX_SPRITE_DETECT_AREAS;
    check_len("sprite_original", a.sprite_original.len(), ns * SPRITE_PIXELS)?;
    check_len(
        "sprite_colored_v1",
        a.sprite_colored_v1.len(),
        by_format(ns * SPRITE_PIXELS, 0),
    )?;
    check_len("sprite_det_dwords", a.sprite_det_dwords.len(), areas)?;
    check_len("sprite_det_dword_pos", a.sprite_det_dword_pos.len(), areas)?;
    check_len("sprite_det_areas", a.sprite_det_areas.len(), areas * 4)?;
    check_len("sprite_shape_mode", a.sprite_shape_mode.len(), by_format(0, ns))?;
    Ok(())
}

impl Archive {
    /// Serialize the archive into an LZ4 frame stream.
    pub fn write_cache_to<W: Write>(&self, w: W) -> io::Result<()> {
        let mut encoder = lz4_flex::frame::FrameEncoder::new(w);
        self.write_cache_body(&mut encoder)?;
        encoder.finish().map_err(io::Error::other)?;
        Ok(())
    }

    fn write_cache_body<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(CACHE_MAGIC)?;
        write_u16(w, CACHE_VERSION)?;
        write_u32(w, self.name.len() as u32)?;
        w.write_all(self.name.as_bytes())?;
        write_u8(w, self.format as u8)?;
        for v in [
            self.width,
            self.height,
            self.width_extra,
            self.height_extra,
            self.nframes,
            self.nocolors,
            self.nccolors,
            self.ncompmasks,
            self.nmovmasks,
            self.nsprites,
        ] {
            write_u32(w, v)?;
        }
        write_u16(w, self.nbackgrounds)?;
        write_u8(w, self.is256x64 as u8)?;

        cache_tables!(self, &mut *w, write_to);

        write_flat(w, &self.sprite_original)?;
        write_flat(w, &self.sprite_colored_v1)?;
        write_flat(w, &self.sprite_det_dwords)?;
        write_flat(w, &self.sprite_det_dword_pos)?;
        write_flat(w, &self.sprite_det_areas)?;
        write_flat(w, &self.sprite_shape_mode)?;
        Ok(())
    }

    /// Parse an archive from a stream written by [`write_cache_to`](Self::write_cache_to).
    ///
    /// All extra-resolution data is kept; callers prune it for their request.
    pub fn read_cache_from<R: Read>(r: R) -> Result<Self, ArchiveError> {
        let mut decoder = lz4_flex::frame::FrameDecoder::new(r);
        Self::read_cache_body(&mut decoder)
    }

    fn read_cache_body<R: Read>(r: &mut R) -> Result<Self, ArchiveError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != CACHE_MAGIC {
            return Err(ArchiveError::BadMagic);
        }
        let version = read_u16(r)?;
        if version != CACHE_VERSION {
            return Err(ArchiveError::UnsupportedCacheVersion(version));
        }

        let name_len = read_len(r, MAX_NAME_LEN, "name")?;
        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name)?;
        let tag = read_u8(r)?;
        let format = SourceFormat::from_u8(tag).ok_or(ArchiveError::UnknownFormat(tag))?;

        let mut a = Archive::empty(format);
        a.name = String::from_utf8_lossy(&name).into_owned();
        a.width = read_u32(r)?;
        a.height = read_u32(r)?;
        a.width_extra = read_u32(r)?;
        a.height_extra = read_u32(r)?;
        a.nframes = read_u32(r)?;
        a.nocolors = read_u32(r)?;
        a.nccolors = read_u32(r)?;
        a.ncompmasks = read_u32(r)?;
        a.nmovmasks = read_u32(r)?;
        a.nsprites = read_u32(r)?;
        a.nbackgrounds = read_u16(r)?;
        a.is256x64 = read_u8(r)? != 0;

        check_nonzero("width", a.width)?;
        check_nonzero("height", a.height)?;
        check_nonzero("frame count", a.nframes)?;
        check_max("width", a.width, MAX_FRAME_WIDTH)?;
        check_max("height", a.height, MAX_FRAME_HEIGHT)?;
        check_max("extra width", a.width_extra, MAX_FRAME_WIDTH)?;
        check_max("extra height", a.height_extra, MAX_FRAME_HEIGHT)?;
        check_max("frame count", a.nframes, MAX_FRAMES)?;
        check_max("color count", a.nocolors, MAX_COLORS)?;
        check_max("mask count", a.ncompmasks, MAX_MASKS)?;
        check_max("sprite count", a.nsprites, MAX_SPRITES)?;

        cache_tables!(a, &mut *r, read_from);

        a.sprite_original = read_flat(r)?;
        a.sprite_colored_v1 = read_flat(r)?;
        a.sprite_det_dwords = read_flat(r)?;
        a.sprite_det_dword_pos = read_flat(r)?;
        a.sprite_det_areas = read_flat(r)?;
        a.sprite_shape_mode = read_flat(r)?;
        check_layout(&a)?;
        Ok(a)
    }

    /// Write the cache file, replacing any previous one only once fully written.
    pub fn save_cache<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let partial = path.with_extension("cROMc.part");
        {
            let file = File::create(&partial)?;
            let mut writer = BufWriter::new(file);
            self.write_cache_to(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&partial, path)?;
        info!("Wrote cache {}", path.display());
        Ok(())
    }

    /// Read a cache file with every table intact.
    pub fn load_cache<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        debug!("Reading cache {}", path.display());
        let file = File::open(path)?;
        Self::read_cache_from(BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::synth::{CurrentBuilder, LegacyBuilder};
    use crate::archive::{LoadOrigin, NO_SPRITE};
    use crate::schema::RequestFlags;
    use crate::sparse::SparseVector;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn current_source() -> Vec<u8> {
        let mut builder = CurrentBuilder::new(16, 32, 3, 4);
        builder.hash(0, 7).hash(1, 8).hash(2, 9);
        builder.colors(1, &[0x0F0F; 16 * 32]);
        builder.extra_frame(2, 0x00FF);
        builder.trigger(2, 5);
        builder.build()
    }

    #[test]
    fn test_cache_roundtrip_in_memory() {
        let archive = Archive::read_source(&mut Cursor::new(current_source())).unwrap();
        let mut buf = Vec::new();
        archive.write_cache_to(&mut buf).unwrap();

        let back = Archive::read_cache_from(Cursor::new(&buf)).unwrap();
        assert_eq!(archive, back);
        assert!(back.cframes_v2_extra.has(2));

        let mut again = Vec::new();
        back.write_cache_to(&mut again).unwrap();
        assert_eq!(buf, again);
    }

    #[test]
    fn test_legacy_cache_roundtrip() {
        let mut builder = LegacyBuilder::new(8, 8, 2, 4);
        builder.hash(1, 0xABCD);
        builder.palette(0, &[(1, 2, 3)]);
        let archive = Archive::read_source(&mut Cursor::new(builder.build())).unwrap();
        let mut buf = Vec::new();
        archive.write_cache_to(&mut buf).unwrap();
        let back = Archive::read_cache_from(Cursor::new(&buf)).unwrap();
        assert_eq!(back.format, SourceFormat::Legacy);
        assert_eq!(archive, back);
    }

    fn legacy_sprite_source() -> Vec<u8> {
        let mut builder = LegacyBuilder::new(16, 8, 2, 4);
        let mut template = [NO_SPRITE; SPRITE_PIXELS];
        template[..4].copy_from_slice(&[1, 2, 3, 1]);
        builder.sprite(&template, &[9; SPRITE_PIXELS]);
        builder.detection(0, 0, u32::from_le_bytes([1, 2, 3, 1]), 0, [0, 0, 4, 1]);
        builder.frame_sprites(1, &[0]);
        builder.build()
    }

    fn current_sprite_source() -> Vec<u8> {
        let mut builder = CurrentBuilder::new(16, 32, 2, 4);
        let mut template = [NO_SPRITE; SPRITE_PIXELS];
        template[..3].copy_from_slice(&[3, 0, 2]);
        builder.sprite(&template, &[0x0A0A; SPRITE_PIXELS]);
        builder.sprite(&template, &[0x0B0B; SPRITE_PIXELS]);
        builder.detection(0, 0, 0x0002_0003, 0, [0, 0, 3, 1]);
        builder.detection(1, 0, 0x0002_0003, 0, [0, 0, 3, 1]);
        builder.shape_mode(1, 1);
        builder.frame_sprites(0, &[0, 1]);
        builder.build()
    }

    #[test]
    fn test_sprite_archives_roundtrip() {
        for source in [legacy_sprite_source(), current_sprite_source()] {
            let archive = Archive::read_source(&mut Cursor::new(source)).unwrap();
            assert!(archive.nsprites > 0);
            let mut buf = Vec::new();
            archive.write_cache_to(&mut buf).unwrap();
            let back = Archive::read_cache_from(Cursor::new(&buf)).unwrap();
            assert_eq!(archive, back);
        }

        let archive = Archive::read_source(&mut Cursor::new(current_sprite_source())).unwrap();
        let mut buf = Vec::new();
        archive.write_cache_to(&mut buf).unwrap();
        let back = Archive::read_cache_from(Cursor::new(&buf)).unwrap();
        assert_eq!(back.sprite_shape_mode, vec![0, 1]);
        assert!(back.sprite_uses_shape(1));
    }

    fn reread(archive: &Archive) -> Result<Archive, ArchiveError> {
        let mut buf = Vec::new();
        archive.write_cache_to(&mut buf).unwrap();
        Archive::read_cache_from(Cursor::new(&buf))
    }

    #[test]
    fn test_truncated_detection_arrays_are_rejected() {
        let mut archive = Archive::read_source(&mut Cursor::new(legacy_sprite_source())).unwrap();
        archive.sprite_det_dwords.clear();
        archive.sprite_det_dword_pos.clear();
        let err = reread(&archive).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::InconsistentCache {
                what: "sprite_det_dwords",
                expected: 8,
                actual: 0,
            }
        ));

        let mut archive = Archive::read_source(&mut Cursor::new(current_sprite_source())).unwrap();
        archive.sprite_original.truncate(SPRITE_PIXELS);
        assert!(matches!(
            reread(&archive),
            Err(ArchiveError::InconsistentCache { what: "sprite_original", .. })
        ));

        let mut archive = Archive::read_source(&mut Cursor::new(current_sprite_source())).unwrap();
        archive.sprite_shape_mode.pop();
        assert!(matches!(
            reread(&archive),
            Err(ArchiveError::InconsistentCache { what: "sprite_shape_mode", .. })
        ));
    }

    #[test]
    fn test_sprite_count_must_match_arrays() {
        let mut archive = Archive::read_source(&mut Cursor::new(legacy_sprite_source())).unwrap();
        archive.nsprites = 3;
        assert!(matches!(reread(&archive), Err(ArchiveError::InconsistentCache { .. })));
    }

    #[test]
    fn test_table_element_length_mismatch_is_rejected() {
        let mut archive = Archive::read_source(&mut Cursor::new(current_source())).unwrap();
        let mut frames = SparseVector::new_sparse(0u16, true);
        frames.set(0, &[1; 8], None);
        archive.cframes_v2 = frames;
        assert!(matches!(
            reread(&archive),
            Err(ArchiveError::InconsistentCache {
                what: "cframes_v2",
                expected: 512,
                actual: 8,
            })
        ));

        // A legacy-only table filled in a current archive
        let mut archive = Archive::read_source(&mut Cursor::new(current_source())).unwrap();
        archive.cframes.set(0, &[1; 16 * 32], None);
        assert!(matches!(
            reread(&archive),
            Err(ArchiveError::InconsistentCache { what: "cframes", .. })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = Vec::new();
        {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(&mut buf);
            encoder.write_all(b"NOPE and some more bytes").unwrap();
            encoder.finish().unwrap();
        }
        let err = Archive::read_cache_from(Cursor::new(&buf));
        assert!(matches!(err, Err(ArchiveError::BadMagic)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut buf = Vec::new();
        {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(&mut buf);
            encoder.write_all(CACHE_MAGIC).unwrap();
            encoder.write_all(&99u16.to_le_bytes()).unwrap();
            encoder.finish().unwrap();
        }
        let err = Archive::read_cache_from(Cursor::new(&buf));
        assert!(matches!(err, Err(ArchiveError::UnsupportedCacheVersion(99))));
    }

    #[test]
    fn test_cache_paths() {
        let source = Path::new("/roms/afm_113b/afm_113b.cROM");
        let cache = cache_path_for(source);
        assert_eq!(cache, Path::new("/roms/afm_113b/afm_113b.cROMc"));
        assert!(is_cache_path(&cache));
        assert!(!is_cache_path(source));
    }

    #[test]
    fn test_load_writes_then_uses_cache() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("t2.cROM");
        fs::write(&source, current_source()).unwrap();

        let (first, origin) = Archive::load(&source, RequestFlags::default(), true).unwrap();
        assert_eq!(origin, LoadOrigin::Source);
        assert!(cache_path_for(&source).exists());

        let (second, origin) = Archive::load(&source, RequestFlags::default(), true).unwrap();
        assert_eq!(origin, LoadOrigin::Cache);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_prunes_extra_on_load() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("t2.cROM");
        fs::write(&source, current_source()).unwrap();
        Archive::load(&source, RequestFlags::default(), true).unwrap();

        let request = RequestFlags::from_bits(RequestFlags::REQUEST_32P);
        let (archive, origin) = Archive::load(&source, request, true).unwrap();
        assert_eq!(origin, LoadOrigin::Cache);
        assert!(!archive.extra_available());
        assert!(!archive.cframes_v2_extra.has(2));

        // The cache on disk still carries the extra plane
        let full = Archive::load_cache(cache_path_for(&source)).unwrap();
        assert!(full.cframes_v2_extra.has(2));
    }

    #[test]
    fn test_corrupt_cache_falls_back_to_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("t2.cROM");
        fs::write(&source, current_source()).unwrap();
        fs::write(cache_path_for(&source), b"garbage").unwrap();

        let (archive, origin) = Archive::load(&source, RequestFlags::default(), false).unwrap();
        assert_eq!(origin, LoadOrigin::Source);
        assert_eq!(archive.trigger_ids.value(2), 5);
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempdir().unwrap();
        let err = Archive::load(dir.path().join("none.cROM"), RequestFlags::default(), true);
        assert!(matches!(err, Err(ArchiveError::NotFound(_))));
    }
}
