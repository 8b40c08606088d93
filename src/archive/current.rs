//! Reader for the current source layout (header of 14 words or more).

use std::io::{self, Read};

use log::debug;

use super::format::{read_values, CurrentHeader, SourcePreamble, TrailingSection};
use super::legacy::read_detection_tables;
use super::{
    Archive, ArchiveError, SourceFormat, MAX_COLOR_ROTATIONS_V2, MAX_DYNA_SETS_PER_FRAME_V2,
    MAX_DYNA_SETS_PER_SPRITE, MAX_FRAME_PIXELS, MAX_LENGTH_COLOR_ROTATION, MAX_SPRITES_PER_FRAME,
    MAX_SPRITE_DETECT_AREAS, NO_SPRITE, SPRITE_PIXELS,
};

/// Optional groups appended to the current layout, in file order.
pub(crate) const TRAILING_SECTIONS: &[TrailingSection] = &[
    TrailingSection {
        name: "dynamic shadows",
        min_header_words: 15,
        read: read_shadows,
        absent: reserve_shadows,
    },
    TrailingSection {
        name: "dynamic sprites",
        min_header_words: 18,
        read: read_dynamic_sprites,
        absent: reserve_dynamic_sprites,
    },
    TrailingSection {
        name: "sprite shape mode",
        min_header_words: 19,
        read: read_shape_mode,
        absent: reserve_shape_mode,
    },
];

pub(crate) fn read_current<R: Read>(
    r: &mut R,
    preamble: &SourcePreamble,
) -> Result<Archive, ArchiveError> {
    let words = preamble.header_words();
    let header = CurrentHeader::read_from(r, words)?;
    debug!("Current header ({} words): {:?}", words, header);

    let mut a = Archive::empty(SourceFormat::Current);
    a.name = preamble.name.clone();
    a.width = header.width;
    a.height = header.height;
    a.width_extra = header.width_extra;
    a.height_extra = header.height_extra;
    a.nframes = header.nframes;
    a.nocolors = header.nocolors;
    a.ncompmasks = header.ncompmasks;
    a.nsprites = header.nsprites;
    a.nbackgrounds = header.nbackgrounds;
    a.is256x64 = header.is256x64;

    let n = a.nframes;
    let ns = a.nsprites;
    let nb = a.nbackgrounds as u32;
    let px = a.frame_len();
    let pxx = a.extra_frame_len();
    let mask_len = if a.is256x64 { MAX_FRAME_PIXELS } else { px };
    let dyna_len = MAX_DYNA_SETS_PER_FRAME_V2 * a.nocolors as usize;
    let rot_len = MAX_LENGTH_COLOR_ROTATION * MAX_COLOR_ROTATIONS_V2;

    a.hashcodes.read_table(r, 1, n, None)?;
    a.shapecompmode.read_table(r, 1, n, None)?;
    a.compmask_id.read_table(r, 1, n, None)?;
    a.compmasks.read_table(r, mask_len, a.ncompmasks, None)?;

    a.is_extra_frame.read_table(r, 1, n, None)?;
    a.cframes_v2.read_table(r, px, n, None)?;
    a.cframes_v2_extra
        .read_table(r, pxx, n, Some(&a.is_extra_frame))?;
    a.dynamasks.read_table(r, px, n, None)?;
    a.dynamasks_extra
        .read_table(r, pxx, n, Some(&a.is_extra_frame))?;
    a.dyna4cols_v2.read_table(r, dyna_len, n, None)?;
    a.dyna4cols_v2_extra
        .read_table(r, dyna_len, n, Some(&a.is_extra_frame))?;

    a.is_extra_sprite.read_table(r, 1, ns, None)?;
    a.framesprites.read_table(r, MAX_SPRITES_PER_FRAME, n, None)?;
    a.sprite_original = read_values(r, ns as usize * SPRITE_PIXELS)?;
    a.sprite_colored.read_table(r, SPRITE_PIXELS, ns, None)?;
    a.sprite_mask_extra
        .read_table(r, SPRITE_PIXELS, ns, Some(&a.is_extra_sprite))?;
    a.sprite_colored_extra
        .read_table(r, SPRITE_PIXELS, ns, Some(&a.is_extra_sprite))?;

    a.active_frames.read_table(r, 1, n, None)?;
    a.color_rotations_v2.read_table(r, rot_len, n, None)?;
    a.color_rotations_v2_extra
        .read_table(r, rot_len, n, Some(&a.is_extra_frame))?;
    read_detection_tables(r, &mut a)?;
    a.trigger_ids.read_table(r, 1, n, None)?;
    a.frame_sprite_bb
        .read_table(r, MAX_SPRITES_PER_FRAME * 4, n, Some(&a.framesprites))?;

    a.is_extra_background.read_table(r, 1, nb, None)?;
    a.background_frames_v2.read_table(r, px, nb, None)?;
    a.background_frames_v2_extra
        .read_table(r, pxx, nb, Some(&a.is_extra_background))?;
    a.background_ids.read_table(r, 1, n, None)?;
    a.background_mask
        .read_table(r, px, n, Some(&a.background_ids))?;
    a.background_mask_extra
        .read_table(r, pxx, n, Some(&a.background_ids))?;

    for section in TRAILING_SECTIONS {
        if words >= section.min_header_words {
            debug!("Reading {} section", section.name);
            (section.read)(&mut a, &mut *r)?;
        } else {
            (section.absent)(&mut a);
        }
    }

    Ok(a)
}

fn read_shadows(a: &mut Archive, r: &mut dyn Read) -> io::Result<()> {
    let n = a.nframes;
    a.dyna_shadows_dir
        .read_table(r, MAX_DYNA_SETS_PER_FRAME_V2, n, None)?;
    a.dyna_shadows_col
        .read_table(r, MAX_DYNA_SETS_PER_FRAME_V2, n, None)?;
    a.dyna_shadows_dir_extra
        .read_table(r, MAX_DYNA_SETS_PER_FRAME_V2, n, Some(&a.is_extra_frame))?;
    a.dyna_shadows_col_extra
        .read_table(r, MAX_DYNA_SETS_PER_FRAME_V2, n, Some(&a.is_extra_frame))?;
    Ok(())
}

fn reserve_shadows(a: &mut Archive) {
    a.dyna_shadows_dir.reserve(MAX_DYNA_SETS_PER_FRAME_V2);
    a.dyna_shadows_col.reserve(MAX_DYNA_SETS_PER_FRAME_V2);
    a.dyna_shadows_dir_extra.reserve(MAX_DYNA_SETS_PER_FRAME_V2);
    a.dyna_shadows_col_extra.reserve(MAX_DYNA_SETS_PER_FRAME_V2);
}

fn read_dynamic_sprites(a: &mut Archive, r: &mut dyn Read) -> io::Result<()> {
    let ns = a.nsprites;
    let len = MAX_DYNA_SETS_PER_SPRITE * a.nocolors as usize;
    a.dyna_sprite_4cols.read_table(r, len, ns, None)?;
    a.dyna_sprite_4cols_extra
        .read_table(r, len, ns, Some(&a.is_extra_sprite))?;
    a.dyna_sprite_masks.read_table(r, SPRITE_PIXELS, ns, None)?;
    a.dyna_sprite_masks_extra
        .read_table(r, SPRITE_PIXELS, ns, Some(&a.is_extra_sprite))?;
    Ok(())
}

fn reserve_dynamic_sprites(a: &mut Archive) {
    let len = MAX_DYNA_SETS_PER_SPRITE * a.nocolors as usize;
    a.dyna_sprite_4cols.reserve(len);
    a.dyna_sprite_4cols_extra.reserve(len);
    a.dyna_sprite_masks.reserve(SPRITE_PIXELS);
    a.dyna_sprite_masks_extra.reserve(SPRITE_PIXELS);
}

fn read_shape_mode(a: &mut Archive, r: &mut dyn Read) -> io::Result<()> {
    a.sprite_shape_mode = read_values(r, a.nsprites as usize)?;
    for sprite in 0..a.nsprites as usize {
        if a.sprite_shape_mode[sprite] == 0 {
            continue;
        }
        let areas = sprite * MAX_SPRITE_DETECT_AREAS..(sprite + 1) * MAX_SPRITE_DETECT_AREAS;
        for dword in &mut a.sprite_det_dwords[areas] {
            *dword = binarize_dword(*dword);
        }
        let pixels = sprite * SPRITE_PIXELS..(sprite + 1) * SPRITE_PIXELS;
        for p in &mut a.sprite_original[pixels] {
            if *p > 0 && *p != NO_SPRITE {
                *p = 1;
            }
        }
    }
    Ok(())
}

fn reserve_shape_mode(a: &mut Archive) {
    a.sprite_shape_mode = vec![0; a.nsprites as usize];
}

/// Map every non-zero byte of a detection signature to 1.
fn binarize_dword(dword: u32) -> u32 {
    let bytes = dword.to_le_bytes().map(|b| (b > 0) as u8);
    u32::from_le_bytes(bytes)
}
