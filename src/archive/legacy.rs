//! Reader for the legacy source layout (header shorter than 14 words).

use std::io::Read;

use log::debug;

use super::format::{
    read_values, skip_bytes, LegacyHeader, SourcePreamble, LEGACY_BACKGROUNDS_MIN_WORDS,
    LEGACY_SPRITE_BOXES_MIN_WORDS, LEGACY_TRIGGERS_MIN_WORDS,
};
use super::{
    Archive, ArchiveError, SourceFormat, MAX_COLOR_ROTATIONS, MAX_DYNA_4COLS_PER_FRAME,
    MAX_SPRITES_PER_FRAME, MAX_SPRITE_DETECT_AREAS, SPRITE_PIXELS,
};

pub(crate) fn read_legacy<R: Read>(
    r: &mut R,
    preamble: &SourcePreamble,
) -> Result<Archive, ArchiveError> {
    let words = preamble.header_words();
    let header = LegacyHeader::read_from(r, words)?;
    debug!("Legacy header ({} words): {:?}", words, header);

    let mut a = Archive::empty(SourceFormat::Legacy);
    a.name = preamble.name.clone();
    a.width = header.width;
    a.height = header.height;
    a.nframes = header.nframes;
    a.nocolors = header.nocolors;
    a.nccolors = header.nccolors;
    a.ncompmasks = header.ncompmasks;
    a.nmovmasks = header.nmovmasks;
    a.nsprites = header.nsprites;
    a.nbackgrounds = header.nbackgrounds;

    let n = a.nframes;
    let px = a.frame_len();

    a.hashcodes.read_table(r, 1, n, None)?;
    a.shapecompmode.read_table(r, 1, n, None)?;
    a.compmask_id.read_table(r, 1, n, None)?;
    // Move-rectangle ids and masks are no longer used.
    skip_bytes(r, n as u64)?;
    a.compmasks.read_table(r, px, a.ncompmasks, None)?;
    skip_bytes(r, px as u64 * a.nmovmasks as u64)?;
    a.cpal.read_table(r, 3 * a.nccolors as usize, n, None)?;
    a.cframes.read_table(r, px, n, None)?;
    a.dynamasks.read_table(r, px, n, None)?;
    a.dyna4cols
        .read_table(r, MAX_DYNA_4COLS_PER_FRAME * a.nocolors as usize, n, None)?;
    a.framesprites.read_table(r, MAX_SPRITES_PER_FRAME, n, None)?;

    // Sprite pixels are stored interleaved: colored byte, then detection byte.
    let sprite_len = a.nsprites as usize * SPRITE_PIXELS;
    let pairs: Vec<u8> = read_values(r, sprite_len * 2)?;
    a.sprite_colored_v1 = pairs.iter().step_by(2).copied().collect();
    a.sprite_original = pairs.iter().skip(1).step_by(2).copied().collect();

    a.active_frames.read_table(r, 1, n, None)?;
    a.color_rotations
        .read_table(r, 3 * MAX_COLOR_ROTATIONS, n, None)?;
    read_detection_tables(r, &mut a)?;

    if words >= LEGACY_TRIGGERS_MIN_WORDS {
        a.trigger_ids.read_table(r, 1, n, None)?;
    } else {
        a.trigger_ids.reserve(1);
    }

    if words >= LEGACY_SPRITE_BOXES_MIN_WORDS {
        a.frame_sprite_bb
            .read_table(r, MAX_SPRITES_PER_FRAME * 4, n, Some(&a.framesprites))?;
    } else {
        // Older files search the whole frame for every sprite.
        let full = [0, 0, (a.width - 1) as u16, (a.height - 1) as u16];
        let boxes: Vec<u16> = full.iter().copied().cycle().take(MAX_SPRITES_PER_FRAME * 4).collect();
        for id in 0..n {
            a.frame_sprite_bb.set(id, &boxes, Some(&a.framesprites));
        }
    }

    if words >= LEGACY_BACKGROUNDS_MIN_WORDS {
        a.background_frames
            .read_table(r, px, a.nbackgrounds as u32, None)?;
        a.background_ids.read_table(r, 1, n, None)?;
        a.background_bb
            .read_table(r, 4, n, Some(&a.background_ids))?;
    } else {
        a.background_frames.reserve(px);
        a.background_ids.reserve(1);
        a.background_bb.reserve(4);
    }

    Ok(a)
}

/// Per-sprite detection signatures, positions and areas. Shared by both layouts.
pub(crate) fn read_detection_tables<R: Read + ?Sized>(
    r: &mut R,
    a: &mut Archive,
) -> std::io::Result<()> {
    let ns = a.nsprites as usize;
    a.sprite_det_dwords = read_values(r, ns * MAX_SPRITE_DETECT_AREAS)?;
    a.sprite_det_dword_pos = read_values(r, ns * MAX_SPRITE_DETECT_AREAS)?;
    a.sprite_det_areas = read_values(r, ns * MAX_SPRITE_DETECT_AREAS * 4)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::synth::LegacyBuilder;
    use crate::schema::RequestFlags;

    #[test]
    fn test_reads_frames_and_palettes() {
        let mut builder = LegacyBuilder::new(8, 8, 2, 4);
        builder.hash(0, 0x1111).hash(1, 0x2222);
        builder.palette(1, &[(10, 20, 30)]);
        builder.colors(1, &[3; 64]);
        let archive = Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap();

        assert_eq!(archive.hashcodes.value(0), 0x1111);
        assert_eq!(archive.hashcodes.value(1), 0x2222);
        assert_eq!(&archive.cpal.get(1)[..3], &[10, 20, 30]);
        assert_eq!(&*archive.cframes.get(1), &[3u8; 64][..]);
        assert!(!archive.cframes.has(0));
        assert_eq!(archive.active_frames.value(0), 1);
    }

    #[test]
    fn test_interleaved_sprites() {
        let mut builder = LegacyBuilder::new(16, 8, 1, 4);
        let mut template = [255u8; SPRITE_PIXELS];
        template[0] = 1;
        template[1] = 2;
        let mut colored = [0u8; SPRITE_PIXELS];
        colored[0] = 40;
        colored[1] = 41;
        builder.sprite(&template, &colored);
        let archive = Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap();

        assert_eq!(archive.nsprites, 1);
        assert_eq!(&archive.sprite_template(0)[..3], &[1, 2, 255]);
        assert_eq!(&archive.sprite_colors_v1(0)[..3], &[40, 41, 0]);
        assert!(archive.sprite_template(1).is_empty());
    }

    #[test]
    fn test_short_header_defaults_sprite_boxes() {
        let mut builder = LegacyBuilder::new(8, 8, 1, 4);
        builder.header_words(11);
        let mut template = [255u8; SPRITE_PIXELS];
        template[0] = 1;
        builder.sprite(&template, &[0; SPRITE_PIXELS]);
        builder.frame_sprites(0, &[0]);
        let archive = Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap();

        assert_eq!(&archive.frame_sprite_bb.get(0)[..4], &[0, 0, 7, 7]);
        assert_eq!(archive.nbackgrounds, 0);
        assert_eq!(archive.background_ids.value(0), crate::archive::NO_BACKGROUND);
    }
}
