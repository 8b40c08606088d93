//! Sprite detection inside an identified frame.

use crate::archive::{
    Archive, MAX_SPRITES_PER_FRAME, MAX_SPRITE_DETECT_AREAS, MAX_SPRITE_SIZE, NO_SPRITE,
    SPRITE_PIXELS,
};

/// Where a detected sprite is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpritePlacement {
    pub sprite: u8,
    /// Top-left corner in the frame.
    pub frame_x: u16,
    pub frame_y: u16,
    /// First visible pixel inside the sprite template.
    pub sprite_x: u16,
    pub sprite_y: u16,
    /// Visible size.
    pub width: u16,
    pub height: u16,
}

/// Extent of the opaque part of a sprite template.
fn sprite_size(template: &[u8]) -> (i32, i32) {
    let mut w = 0;
    let mut h = 0;
    for (i, &v) in template.iter().enumerate() {
        if v != NO_SPRITE {
            w = w.max((i % MAX_SPRITE_SIZE) as i32);
            h = h.max((i / MAX_SPRITE_SIZE) as i32);
        }
    }
    (w + 1, h + 1)
}

/// Find the sprites referenced by archive frame `frame_id` in `frame`.
///
/// `shaped` is scratch space for the binarized frame; results are written
/// into `found` (cleared first), at most [`MAX_SPRITES_PER_FRAME`] entries.
pub fn detect_sprites(
    archive: &Archive,
    frame: &[u8],
    frame_id: u32,
    shaped: &mut Vec<u8>,
    found: &mut Vec<SpritePlacement>,
) {
    found.clear();
    let w = archive.width as i32;
    let h = archive.height as i32;
    let px = archive.frame_len();
    if frame.len() < px {
        return;
    }
    let refs = archive.framesprites.get(frame_id);
    if refs.first().is_none_or(|&s| s == NO_SPRITE) {
        return;
    }
    let boxes = archive.frame_sprite_bb.get(frame_id);
    let mut shaped_ready = false;

    for (slot, &sprite) in refs.iter().enumerate().take(MAX_SPRITES_PER_FRAME) {
        if sprite == NO_SPRITE {
            break;
        }
        if sprite as u32 >= archive.nsprites {
            continue;
        }
        let pixels = if archive.sprite_uses_shape(sprite) {
            if !shaped_ready {
                shaped.clear();
                shaped.extend(frame[..px].iter().map(|&v| (v > 0) as u8));
                shaped_ready = true;
            }
            &shaped[..]
        } else {
            &frame[..px]
        };
        let template = archive.sprite_template(sprite);
        if template.len() < SPRITE_PIXELS {
            continue;
        }
        let (spw, sph) = sprite_size(template);

        let Some(bb) = boxes.get(slot * 4..slot * 4 + 4) else {
            continue;
        };
        let min_x = bb[0] as i32;
        let min_y = bb[1] as i32;
        let max_x = (bb[2] as i32).min(w - 1);
        let max_y = (bb[3] as i32).min(h - 1);
        if max_x - 3 < min_x || max_y < min_y {
            continue;
        }

        for area in 0..MAX_SPRITE_DETECT_AREAS {
            let k = sprite as usize * MAX_SPRITE_DETECT_AREAS + area;
            let Some(a) = archive.sprite_det_areas.get(k * 4..k * 4 + 4) else {
                continue;
            };
            if a[0] == 0xFFFF {
                continue;
            }
            let (det_x, det_y, det_w, det_h) = (a[0] as i32, a[1] as i32, a[2] as i32, a[3] as i32);
            if det_x + det_w > MAX_SPRITE_SIZE as i32 || det_y + det_h > MAX_SPRITE_SIZE as i32 {
                continue;
            }
            let (Some(&signature), Some(&pos)) =
                (archive.sprite_det_dwords.get(k), archive.sprite_det_dword_pos.get(k))
            else {
                continue;
            };
            let pos = pos as i32;
            let spr_x = pos % MAX_SPRITE_SIZE as i32;
            let spr_y = pos / MAX_SPRITE_SIZE as i32;

            for ty in min_y..=max_y {
                let row = (ty * w) as usize;
                let x0 = row + min_x as usize;
                let mut window = (pixels[x0] as u32) << 8
                    | (pixels[x0 + 1] as u32) << 16
                    | (pixels[x0 + 2] as u32) << 24;
                for tx in min_x..=max_x - 3 {
                    window = (window >> 8) | (pixels[row + tx as usize + 3] as u32) << 24;
                    if window != signature {
                        continue;
                    }
                    // Detection area must start inside the box
                    if tx - min_x < spr_x - det_x || ty - min_y < spr_y - det_y {
                        continue;
                    }
                    let off_x = tx - spr_x + det_x;
                    let off_y = ty - spr_y + det_y;
                    if off_x + det_w > max_x + 1 || off_y + det_h > max_y + 1 {
                        continue;
                    }
                    let matches = (0..det_h).all(|tk| {
                        (0..det_w).all(|tl| {
                            let v = template[((tk + det_y) * MAX_SPRITE_SIZE as i32 + tl + det_x) as usize];
                            v == NO_SPRITE || v == pixels[((tk + off_y) * w + tl + off_x) as usize]
                        })
                    });
                    if !matches {
                        continue;
                    }

                    let (frame_x, sprite_x, width) = if tx - min_x < spr_x {
                        let sx = spr_x - (tx - min_x);
                        (min_x, sx, (spw - sx).min(max_x - min_x + 1))
                    } else {
                        let fx = tx - spr_x;
                        (fx, 0, (max_x - fx + 1).min(spw))
                    };
                    let (frame_y, sprite_y, height) = if ty - min_y < spr_y {
                        let sy = spr_y - (ty - min_y);
                        (min_y, sy, (sph - sy).min(max_y - min_y + 1))
                    } else {
                        let fy = ty - spr_y;
                        (fy, 0, (max_y - fy + 1).min(sph))
                    };
                    let placement = SpritePlacement {
                        sprite,
                        frame_x: frame_x as u16,
                        frame_y: frame_y as u16,
                        sprite_x: sprite_x as u16,
                        sprite_y: sprite_y as u16,
                        width: width.max(0) as u16,
                        height: height.max(0) as u16,
                    };
                    let duplicate = found.iter().any(|p| {
                        p.sprite == placement.sprite
                            && p.frame_x == placement.frame_x
                            && p.frame_y == placement.frame_y
                            && p.width == placement.width
                            && p.height == placement.height
                    });
                    if !duplicate {
                        found.push(placement);
                        if found.len() == MAX_SPRITES_PER_FRAME {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::synth::LegacyBuilder;
    use crate::schema::RequestFlags;

    /// 16x8 archive with one 4x2 sprite `[1 2 3 1 / 2 2 2 2]`.
    fn sprite_archive() -> Archive {
        let mut builder = LegacyBuilder::new(16, 8, 1, 4);
        let mut template = [NO_SPRITE; SPRITE_PIXELS];
        template[..4].copy_from_slice(&[1, 2, 3, 1]);
        template[32..36].copy_from_slice(&[2, 2, 2, 2]);
        let mut colored = [0u8; SPRITE_PIXELS];
        colored[..4].copy_from_slice(&[20, 21, 22, 23]);
        colored[32..36].copy_from_slice(&[24, 24, 24, 24]);
        builder.sprite(&template, &colored);
        builder.detection(0, 0, u32::from_le_bytes([1, 2, 3, 1]), 0, [0, 0, 4, 2]);
        builder.frame_sprites(0, &[0]);
        Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap()
    }

    fn draw(frame: &mut [u8], x: usize, y: usize) {
        frame[y * 16 + x..y * 16 + x + 4].copy_from_slice(&[1, 2, 3, 1]);
        frame[(y + 1) * 16 + x..(y + 1) * 16 + x + 4].copy_from_slice(&[2, 2, 2, 2]);
    }

    #[test]
    fn test_sprite_size() {
        let mut template = [NO_SPRITE; SPRITE_PIXELS];
        template[2 * 32 + 5] = 0;
        assert_eq!(sprite_size(&template), (6, 3));
        assert_eq!(sprite_size(&[NO_SPRITE; SPRITE_PIXELS]), (1, 1));
    }

    #[test]
    fn test_detects_sprite() {
        let archive = sprite_archive();
        let mut frame = [0u8; 128];
        draw(&mut frame, 6, 3);

        let mut shaped = Vec::new();
        let mut found = Vec::new();
        detect_sprites(&archive, &frame, 0, &mut shaped, &mut found);
        assert_eq!(
            found,
            vec![SpritePlacement {
                sprite: 0,
                frame_x: 6,
                frame_y: 3,
                sprite_x: 0,
                sprite_y: 0,
                width: 4,
                height: 2,
            }]
        );
    }

    #[test]
    fn test_two_instances() {
        let archive = sprite_archive();
        let mut frame = [0u8; 128];
        draw(&mut frame, 0, 0);
        draw(&mut frame, 10, 5);

        let mut shaped = Vec::new();
        let mut found = Vec::new();
        detect_sprites(&archive, &frame, 0, &mut shaped, &mut found);
        assert_eq!(found.len(), 2);
        assert_eq!((found[1].frame_x, found[1].frame_y), (10, 5));
    }

    #[test]
    fn test_missing_signature_finds_nothing() {
        let archive = sprite_archive();
        let mut frame = [0u8; 128];
        // Signature present but the second row differs
        frame[16..20].copy_from_slice(&[1, 2, 3, 1]);

        let mut shaped = Vec::new();
        let mut found = vec![SpritePlacement::default()];
        detect_sprites(&archive, &frame, 0, &mut shaped, &mut found);
        assert!(found.is_empty());
    }

    #[test]
    fn test_missing_detection_data_finds_nothing() {
        let mut frame = [0u8; 128];
        draw(&mut frame, 6, 3);
        let mut shaped = Vec::new();
        let mut found = Vec::new();

        let mut archive = sprite_archive();
        archive.sprite_det_dwords.clear();
        archive.sprite_det_dword_pos.clear();
        detect_sprites(&archive, &frame, 0, &mut shaped, &mut found);
        assert!(found.is_empty());

        let mut archive = sprite_archive();
        archive.sprite_original.clear();
        detect_sprites(&archive, &frame, 0, &mut shaped, &mut found);
        assert!(found.is_empty());
    }
}
