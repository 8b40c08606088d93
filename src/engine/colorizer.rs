//! Frame and sprite composition into the output buffers.

use log::warn;

use super::output::{CurrentOutput, LegacyOutput, Plane, RotationMark};
use super::rotation::{rotated_color, RotationTimer};
use super::sprites::SpritePlacement;
use crate::archive::{
    Archive, MAX_COLOR_ROTATIONS_V2, MAX_LENGTH_COLOR_ROTATION, MAX_SPRITE_SIZE, NOT_DYNAMIC,
    NO_SPRITE,
};
use crate::schema::StandardPalette;
use crate::sparse::View;

/// Greyscale RGB565 ramps used when no standard palette is configured.
pub const GREYSCALE_4: [u16; 4] = [0x0000, 0x528A, 0xAD55, 0xFFFF];
pub const GREYSCALE_16: [u16; 16] = [
    0x0000, 0x1082, 0x2104, 0x3186, 0x4208, 0x528A, 0x630C, 0x738E, 0x8410, 0x9492, 0xA514,
    0xB596, 0xC618, 0xD69A, 0xE71C, 0xFFFF,
];

/// Shadow neighbours by direction bit: top-left, top, top-right, right,
/// bottom-right, bottom, bottom-left, left.
const SHADOW_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

/// Compose legacy frame `id` into `out`: pixels, palette and rotation table.
pub fn compose_legacy(archive: &Archive, frame: &[u8], id: u32, out: &mut LegacyOutput) {
    let w = archive.width as usize;
    let h = archive.height as usize;
    let nocolors = archive.nocolors as usize;

    let cframe = archive.cframes.get(id);
    let dynamask = archive.dynamasks.get(id);
    let dyna = archive.dyna4cols.get(id);
    let background = archive.background_ids.value(id);
    let bg_frame = (background < archive.nbackgrounds)
        .then(|| archive.background_frames.get(background as u32));
    let bb = archive.background_bb.get(id);
    let (min_x, min_y, max_x, max_y) = match &bb[..] {
        [a, b, c, d, ..] => (*a as usize, *b as usize, *c as usize, *d as usize),
        _ => (1, 1, 0, 0),
    };

    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let raw = frame[i];
            let in_box = x >= min_x && x <= max_x && y >= min_y && y <= max_y;
            out.frame[i] = match &bg_frame {
                Some(bg) if raw == 0 && in_box => bg.get(i).copied().unwrap_or(0),
                _ => {
                    let cell = dynamask.get(i).copied().unwrap_or(NOT_DYNAMIC);
                    if cell == NOT_DYNAMIC {
                        cframe.get(i).copied().unwrap_or(0)
                    } else {
                        dyna.get(cell as usize * nocolors + raw as usize)
                            .copied()
                            .unwrap_or(0)
                    }
                }
            };
        }
    }

    let palette = archive.cpal.get(id);
    let n = (archive.nccolors as usize * 3).min(palette.len()).min(out.palette.len());
    out.palette[..n].copy_from_slice(&palette[..n]);

    let rotations = archive.color_rotations.get(id);
    let n = rotations.len().min(out.rotations.len());
    out.rotations[..n].copy_from_slice(&rotations[..n]);
    out.rotations[n..].fill(255);
}

/// Copy the opaque pixels of a detected sprite over a legacy frame.
pub fn overlay_sprite_legacy(archive: &Archive, placement: &SpritePlacement, out: &mut LegacyOutput) {
    let template = archive.sprite_template(placement.sprite);
    let colors = archive.sprite_colors_v1(placement.sprite);
    if template.is_empty() || colors.is_empty() {
        return;
    }
    let w = out.width as usize;
    let h = out.height as usize;
    for tj in 0..placement.height as usize {
        let sy = tj + placement.sprite_y as usize;
        let fy = tj + placement.frame_y as usize;
        if sy >= MAX_SPRITE_SIZE || fy >= h {
            break;
        }
        for ti in 0..placement.width as usize {
            let sx = ti + placement.sprite_x as usize;
            let fx = ti + placement.frame_x as usize;
            if sx >= MAX_SPRITE_SIZE || fx >= w {
                break;
            }
            let tl = sy * MAX_SPRITE_SIZE + sx;
            if template[tl] != NO_SPRITE {
                out.frame[fy * w + fx] = colors[tl];
            }
        }
    }
}

/// Index in the base raster of extra-plane pixel (`x`, `y`).
#[inline]
fn base_index(archive: &Archive, x: usize, y: usize) -> usize {
    let w = archive.width as usize;
    if archive.height_extra == 64 {
        (y / 2) * w + x / 2
    } else {
        y * 2 * w + x * 2
    }
}

/// First rotation slot containing `color`.
fn color_in_rotation(rotations: &[u16], color: u16) -> Option<RotationMark> {
    for slot in 0..MAX_COLOR_ROTATIONS_V2 {
        let base = slot * MAX_LENGTH_COLOR_ROTATION;
        let Some(&len) = rotations.get(base) else {
            break;
        };
        let len = (len as usize).min(MAX_LENGTH_COLOR_ROTATION - 2);
        if let Some(position) = rotations[base + 2..base + 2 + len].iter().position(|&c| c == color) {
            return Some(RotationMark {
                slot: slot as u16,
                position: position as u16,
            });
        }
    }
    None
}

/// Store `color` at `i`, substituting the current phase of its rotation.
#[inline]
fn put_color(
    frame: &mut [u16],
    annotation: &mut [RotationMark],
    rotations: &[u16],
    timer: &RotationTimer,
    i: usize,
    color: u16,
) {
    match color_in_rotation(rotations, color) {
        Some(mark) => {
            let slot = mark.slot as usize;
            let members = rotations[slot * MAX_LENGTH_COLOR_ROTATION]
                .min(MAX_LENGTH_COLOR_ROTATION as u16 - 2);
            frame[i] = rotated_color(rotations, slot, members, mark.position, timer.phase(slot));
            annotation[i] = mark;
        }
        None => {
            frame[i] = color;
            annotation[i] = RotationMark::NONE;
        }
    }
}

/// Tables of one resolution for frame `id`.
struct FrameTables<'a> {
    cframe: View<'a, u16>,
    dynamask: View<'a, u8>,
    dyna: View<'a, u16>,
    rotations: View<'a, u16>,
    shadow_dir: View<'a, u8>,
    shadow_col: View<'a, u16>,
    background: Option<(View<'a, u16>, View<'a, u8>)>,
}

impl<'a> FrameTables<'a> {
    fn load(archive: &'a Archive, id: u32, extra: bool) -> Self {
        let bg = archive.background_ids.value(id);
        let has_bg = bg < archive.nbackgrounds;
        if extra {
            Self {
                cframe: archive.cframes_v2_extra.get(id),
                dynamask: archive.dynamasks_extra.get(id),
                dyna: archive.dyna4cols_v2_extra.get(id),
                rotations: archive.color_rotations_v2_extra.get(id),
                shadow_dir: archive.dyna_shadows_dir_extra.get(id),
                shadow_col: archive.dyna_shadows_col_extra.get(id),
                background: has_bg.then(|| {
                    (
                        archive.background_frames_v2_extra.get(bg as u32),
                        archive.background_mask_extra.get(id),
                    )
                }),
            }
        } else {
            Self {
                cframe: archive.cframes_v2.get(id),
                dynamask: archive.dynamasks.get(id),
                dyna: archive.dyna4cols_v2.get(id),
                rotations: archive.color_rotations_v2.get(id),
                shadow_dir: archive.dyna_shadows_dir.get(id),
                shadow_col: archive.dyna_shadows_col.get(id),
                background: has_bg.then(|| {
                    (
                        archive.background_frames_v2.get(bg as u32),
                        archive.background_mask.get(id),
                    )
                }),
            }
        }
    }

    fn covers(&self, len: usize) -> bool {
        self.cframe.len() >= len
            && self.dynamask.len() >= len
            && self
                .background
                .as_ref()
                .is_none_or(|(frame, mask)| frame.len() >= len && mask.len() >= len)
    }
}

/// Compose current-format frame `id` into `plane`.
///
/// `claimed` is scratch space of at least the plane size marking pixels
/// already written by a lit dynamic cell or its shadow. Returns whether the
/// plane was filled; an unfilled plane has its rotations cleared.
pub fn compose_current(
    archive: &Archive,
    frame: &[u8],
    id: u32,
    plane: &mut Plane,
    claimed: &mut [u8],
) -> bool {
    plane.filled = false;
    if plane.is_extra && !archive.extra_frame_available(id) {
        plane.clear_rotations();
        return false;
    }
    let tables = FrameTables::load(archive, id, plane.is_extra);
    let w = plane.width as usize;
    let h = plane.height as usize;
    let len = w * h;
    if tables.rotations.len() < plane.rotations.len() || !tables.covers(len) || claimed.len() < len {
        warn!("Frame {} has incomplete tables for the {}-line plane", id, h);
        plane.clear_rotations();
        return false;
    }
    let nrot = plane.rotations.len();
    plane.rotations.copy_from_slice(&tables.rotations[..nrot]);

    let nocolors = archive.nocolors as usize;
    let is_extra = plane.is_extra;
    let claimed = &mut claimed[..len];
    claimed.fill(0);
    let Plane {
        frame: out,
        rotations,
        annotation,
        timer,
        ..
    } = plane;

    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let src = if is_extra { base_index(archive, x, y) } else { i };
            let raw = frame.get(src).copied().unwrap_or(0);

            if let Some((bg, mask)) = &tables.background {
                if raw == 0 && mask[i] > 0 {
                    if claimed[i] == 0 {
                        put_color(out, annotation, rotations, timer, i, bg[i]);
                    }
                    continue;
                }
            }

            let cell = tables.dynamask[i];
            if cell == NOT_DYNAMIC {
                if claimed[i] == 0 {
                    put_color(out, annotation, rotations, timer, i, tables.cframe[i]);
                }
                continue;
            }

            let color = tables
                .dyna
                .get(cell as usize * nocolors + raw as usize)
                .copied()
                .unwrap_or(0);
            if raw > 0 {
                let dir = tables.shadow_dir.get(cell as usize).copied().unwrap_or(0);
                if dir != 0 {
                    let shade = tables.shadow_col.get(cell as usize).copied().unwrap_or(0);
                    cast_shadow(out, annotation, claimed, (x, y), (w, h), dir, shade);
                }
                claimed[i] = 1;
                out[i] = color;
            } else if claimed[i] == 0 {
                out[i] = color;
            }
            annotation[i] = RotationMark::NONE;
        }
    }
    plane.filled = true;
    true
}

/// Paint the unclaimed neighbours of a lit dynamic pixel selected by `dir`.
fn cast_shadow(
    out: &mut [u16],
    annotation: &mut [RotationMark],
    claimed: &mut [u8],
    (x, y): (usize, usize),
    (w, h): (usize, usize),
    dir: u8,
    color: u16,
) {
    for (bit, (dx, dy)) in SHADOW_OFFSETS.iter().enumerate() {
        if dir & (1 << bit) == 0 {
            continue;
        }
        let nx = x as i32 + dx;
        let ny = y as i32 + dy;
        if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
            continue;
        }
        let j = ny as usize * w + nx as usize;
        if claimed[j] == 0 {
            claimed[j] = 1;
            out[j] = color;
            annotation[j] = RotationMark::NONE;
        }
    }
}

/// Draw a detected sprite into a filled current-format plane.
///
/// Placements are in base coordinates; the extra plane scales them by 2 or ½.
pub fn overlay_sprite_current(
    archive: &Archive,
    frame: &[u8],
    placement: &SpritePlacement,
    plane: &mut Plane,
) {
    if !plane.filled {
        return;
    }
    let sprite = placement.sprite as u32;
    let template = archive.sprite_template(placement.sprite);
    let (mask, colored, dyna_mask, dyna) = if plane.is_extra {
        (
            archive.sprite_mask_extra.get(sprite),
            archive.sprite_colored_extra.get(sprite),
            archive.dyna_sprite_masks_extra.get(sprite),
            archive.dyna_sprite_4cols_extra.get(sprite),
        )
    } else {
        (
            View::Borrowed(template),
            archive.sprite_colored.get(sprite),
            archive.dyna_sprite_masks.get(sprite),
            archive.dyna_sprite_4cols.get(sprite),
        )
    };

    let is_extra = plane.is_extra;
    let shrink = plane.height == 32;
    let scale = |v: u16| -> usize {
        match (is_extra, shrink) {
            (false, _) => v as usize,
            (true, true) => v as usize / 2,
            (true, false) => v as usize * 2,
        }
    };
    let (frame_x, frame_y) = (scale(placement.frame_x), scale(placement.frame_y));
    let (sprite_x, sprite_y) = (scale(placement.sprite_x), scale(placement.sprite_y));
    let (width, height) = (scale(placement.width), scale(placement.height));

    let w = plane.width as usize;
    let h = plane.height as usize;
    let nocolors = archive.nocolors as usize;
    let Plane {
        frame: out,
        rotations,
        annotation,
        timer,
        ..
    } = plane;

    for tj in 0..height {
        let sy = tj + sprite_y;
        let fy = tj + frame_y;
        if sy >= MAX_SPRITE_SIZE || fy >= h {
            break;
        }
        for ti in 0..width {
            let sx = ti + sprite_x;
            let fx = ti + frame_x;
            if sx >= MAX_SPRITE_SIZE || fx >= w {
                break;
            }
            let tl = sy * MAX_SPRITE_SIZE + sx;
            if mask.get(tl).is_none_or(|&m| m == NO_SPRITE) {
                continue;
            }
            let tk = fy * w + fx;
            let cell = dyna_mask.get(tl).copied().unwrap_or(NOT_DYNAMIC);
            let color = if cell == NOT_DYNAMIC {
                colored.get(tl).copied().unwrap_or(0)
            } else {
                let src = if is_extra { base_index(archive, fx, fy) } else { tk };
                let raw = frame.get(src).copied().unwrap_or(0) as usize;
                dyna.get(cell as usize * nocolors + raw).copied().unwrap_or(0)
            };
            put_color(out, annotation, rotations, timer, tk, color);
        }
    }
}

/// Show the raw legacy frame through the standard palette (or a grey ramp).
pub fn render_standard_legacy(
    archive: &Archive,
    frame: &[u8],
    palette: Option<&StandardPalette>,
    out: &mut LegacyOutput,
) {
    let len = archive.frame_len().min(frame.len()).min(out.frame.len());
    out.frame[..len].copy_from_slice(&frame[..len]);
    match palette {
        Some(p) => {
            let n = p.colors.len().min(out.palette.len());
            out.palette[..n].copy_from_slice(&p.colors[..n]);
        }
        None => {
            let levels = archive.nocolors.max(2) as usize;
            for level in 0..levels.min(out.palette.len() / 3) {
                let v = (level * 255 / (levels - 1)) as u8;
                out.palette[level * 3..level * 3 + 3].fill(v);
            }
        }
    }
    out.rotations.fill(255);
    out.timer.clear();
}

/// Color of raw shade `raw` without colorization data.
#[inline]
pub fn standard_color(palette: Option<&StandardPalette>, nocolors: u32, raw: u8) -> u16 {
    match palette {
        Some(p) => p.rgb565(raw),
        None if nocolors == 16 => GREYSCALE_16[(raw as usize).min(15)],
        None => GREYSCALE_4[(raw as usize).min(3)],
    }
}

/// Show the raw frame in the base plane, or in the extra plane when only
/// that one is allocated. The other plane is marked unfilled.
pub fn render_standard_current(
    archive: &Archive,
    frame: &[u8],
    palette: Option<&StandardPalette>,
    out: &mut CurrentOutput,
) {
    let has_base = out.base().is_some();
    for plane in out.planes_mut() {
        plane.clear_rotations();
        if plane.is_extra == has_base {
            plane.filled = false;
            continue;
        }
        let w = plane.width as usize;
        for y in 0..plane.height as usize {
            for x in 0..w {
                let src = if plane.is_extra { base_index(archive, x, y) } else { y * w + x };
                let raw = frame.get(src).copied().unwrap_or(0);
                plane.frame[y * w + x] = standard_color(palette, archive.nocolors, raw);
            }
        }
        plane.filled = true;
    }
}
