//! Synthetic source archives for tests and benchmarks.
//!
//! The builders hold every table densely and serialize it in the exact
//! order of the corresponding source layout.

use super::format::{encode_name, CURRENT_256X64_MIN_WORDS, LEGACY_BACKGROUNDS_MIN_WORDS};
use super::{
    MAX_COLOR_ROTATIONS, MAX_COLOR_ROTATIONS_V2, MAX_DYNA_4COLS_PER_FRAME,
    MAX_DYNA_SETS_PER_FRAME_V2, MAX_DYNA_SETS_PER_SPRITE, MAX_FRAME_PIXELS,
    MAX_LENGTH_COLOR_ROTATION, MAX_SPRITES_PER_FRAME, MAX_SPRITE_DETECT_AREAS, NOT_DYNAMIC,
    NO_BACKGROUND, NO_MASK, NO_SPRITE, NO_TRIGGER, SPRITE_PIXELS,
};
use crate::engine::frame_checksum;
use crate::sparse::Element;

fn put<T: Element>(out: &mut Vec<u8>, values: &[T]) {
    T::encode_le(values, out);
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Checksum of `raw` as the matcher computes it for a frame using `mask`.
fn source_hash(raw: &[u8], masks: &[Vec<u8>], mask: Option<u8>, shape: bool) -> u32 {
    match mask.and_then(|m| masks.get(m as usize)) {
        Some(m) => frame_checksum(raw, Some(m), shape),
        None => frame_checksum(raw, None, shape),
    }
}

/// Per-sprite detection data shared by both layouts.
#[derive(Debug, Clone, Default)]
struct Detection {
    dwords: Vec<u32>,
    positions: Vec<u16>,
    areas: Vec<u16>,
}

impl Detection {
    fn add_sprite(&mut self) {
        self.dwords.extend([0; MAX_SPRITE_DETECT_AREAS]);
        self.positions.extend([0; MAX_SPRITE_DETECT_AREAS]);
        self.areas.extend([0xFFFF; MAX_SPRITE_DETECT_AREAS * 4]);
    }

    fn set(&mut self, sprite: u8, area: usize, dword: u32, pos: u16, rect: [u16; 4]) {
        let k = sprite as usize * MAX_SPRITE_DETECT_AREAS + area;
        self.dwords[k] = dword;
        self.positions[k] = pos;
        self.areas[k * 4..k * 4 + 4].copy_from_slice(&rect);
    }

    fn write(&self, out: &mut Vec<u8>) {
        put(out, &self.dwords);
        put(out, &self.positions);
        put(out, &self.areas);
    }
}

fn full_boxes(width: u32, height: u32, nframes: u32) -> Vec<u16> {
    [0, 0, (width - 1) as u16, (height - 1) as u16]
        .iter()
        .copied()
        .cycle()
        .take(nframes as usize * MAX_SPRITES_PER_FRAME * 4)
        .collect()
}

/// Builder for legacy-layout sources.
#[derive(Debug, Clone)]
pub struct LegacyBuilder {
    name: String,
    words: u32,
    width: u32,
    height: u32,
    nframes: u32,
    nocolors: u32,
    nccolors: u32,
    hashcodes: Vec<u32>,
    shapecompmode: Vec<u8>,
    compmask_id: Vec<u8>,
    compmasks: Vec<Vec<u8>>,
    cpal: Vec<u8>,
    cframes: Vec<u8>,
    dynamasks: Vec<u8>,
    dyna4cols: Vec<u8>,
    framesprites: Vec<u8>,
    sprites: Vec<(Vec<u8>, Vec<u8>)>,
    active: Vec<u8>,
    rotations: Vec<u8>,
    detection: Detection,
    triggers: Vec<u32>,
    sprite_bb: Vec<u16>,
    background_frames: Vec<Vec<u8>>,
    background_ids: Vec<u16>,
    background_bb: Vec<u16>,
}

impl LegacyBuilder {
    pub fn new(width: u32, height: u32, nframes: u32, nocolors: u32) -> Self {
        let n = nframes as usize;
        let px = (width * height) as usize;
        let nccolors = if nocolors > 16 { 64 } else { 16 };
        Self {
            name: "synthetic".into(),
            words: LEGACY_BACKGROUNDS_MIN_WORDS,
            width,
            height,
            nframes,
            nocolors,
            nccolors,
            hashcodes: vec![0; n],
            shapecompmode: vec![0; n],
            compmask_id: vec![NO_MASK; n],
            compmasks: Vec::new(),
            cpal: vec![0; n * 3 * nccolors as usize],
            cframes: vec![0; n * px],
            dynamasks: vec![NOT_DYNAMIC; n * px],
            dyna4cols: vec![0; n * MAX_DYNA_4COLS_PER_FRAME * nocolors as usize],
            framesprites: vec![NO_SPRITE; n * MAX_SPRITES_PER_FRAME],
            sprites: Vec::new(),
            active: vec![1; n],
            rotations: vec![0; n * 3 * MAX_COLOR_ROTATIONS],
            detection: Detection::default(),
            triggers: vec![NO_TRIGGER; n],
            sprite_bb: full_boxes(width, height, nframes),
            background_frames: Vec::new(),
            background_ids: vec![NO_BACKGROUND; n],
            background_bb: vec![0; n * 4],
        }
    }

    fn px(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Declared header length; below 13 words the optional tail sections are omitted.
    pub fn header_words(&mut self, words: u32) -> &mut Self {
        self.words = words;
        self
    }

    pub fn hash(&mut self, frame: u32, hash: u32) -> &mut Self {
        self.hashcodes[frame as usize] = hash;
        self
    }

    /// Add a comparison mask (non-zero bytes are excluded from the checksum).
    pub fn compmask(&mut self, mask: &[u8]) -> &mut Self {
        let mut m = mask.to_vec();
        m.resize(self.px(), 0);
        self.compmasks.push(m);
        self
    }

    /// Make `frame` identify `raw`, optionally through mask `mask` and shape comparison.
    pub fn match_frame(&mut self, frame: u32, raw: &[u8], mask: Option<u8>, shape: bool) -> &mut Self {
        let f = frame as usize;
        self.hashcodes[f] = source_hash(raw, &self.compmasks, mask, shape);
        self.compmask_id[f] = mask.unwrap_or(NO_MASK);
        self.shapecompmode[f] = shape as u8;
        self
    }

    /// Set the first palette entries of `frame`.
    pub fn palette(&mut self, frame: u32, colors: &[(u8, u8, u8)]) -> &mut Self {
        let base = frame as usize * 3 * self.nccolors as usize;
        for (i, &(r, g, b)) in colors.iter().enumerate() {
            self.cpal[base + i * 3..base + i * 3 + 3].copy_from_slice(&[r, g, b]);
        }
        self
    }

    pub fn colors(&mut self, frame: u32, pixels: &[u8]) -> &mut Self {
        let px = self.px();
        let base = frame as usize * px;
        self.cframes[base..base + px].copy_from_slice(&pixels[..px]);
        self
    }

    pub fn dynamask(&mut self, frame: u32, mask: &[u8]) -> &mut Self {
        let px = self.px();
        let base = frame as usize * px;
        self.dynamasks[base..base + px].copy_from_slice(&mask[..px]);
        self
    }

    /// Colors of dynamic set `set` of `frame`, one per raw shade.
    pub fn dyna_colors(&mut self, frame: u32, set: u8, colors: &[u8]) -> &mut Self {
        let per_frame = MAX_DYNA_4COLS_PER_FRAME * self.nocolors as usize;
        let base = frame as usize * per_frame + set as usize * self.nocolors as usize;
        self.dyna4cols[base..base + colors.len()].copy_from_slice(colors);
        self
    }

    /// Palette rotation of `count` entries from `first`, stepping every `delay_ms`.
    pub fn rotation(&mut self, frame: u32, slot: usize, first: u8, count: u8, delay_ms: u16) -> &mut Self {
        let base = frame as usize * 3 * MAX_COLOR_ROTATIONS + slot * 3;
        self.rotations[base..base + 3].copy_from_slice(&[first, count, (delay_ms / 10) as u8]);
        self
    }

    pub fn active(&mut self, frame: u32, active: bool) -> &mut Self {
        self.active[frame as usize] = active as u8;
        self
    }

    pub fn trigger(&mut self, frame: u32, trigger: u32) -> &mut Self {
        self.triggers[frame as usize] = trigger;
        self
    }

    /// Add a sprite from its detection template and colored pixels.
    pub fn sprite(&mut self, template: &[u8], colored: &[u8]) -> &mut Self {
        self.sprites
            .push((template[..SPRITE_PIXELS].to_vec(), colored[..SPRITE_PIXELS].to_vec()));
        self.detection.add_sprite();
        self
    }

    pub fn detection(&mut self, sprite: u8, area: usize, dword: u32, pos: u16, rect: [u16; 4]) -> &mut Self {
        self.detection.set(sprite, area, dword, pos, rect);
        self
    }

    /// Sprites searched in `frame`.
    pub fn frame_sprites(&mut self, frame: u32, sprites: &[u8]) -> &mut Self {
        let base = frame as usize * MAX_SPRITES_PER_FRAME;
        self.framesprites[base..base + sprites.len()].copy_from_slice(sprites);
        self
    }

    /// Search box of sprite slot `slot` in `frame`.
    pub fn sprite_box(&mut self, frame: u32, slot: usize, rect: [u16; 4]) -> &mut Self {
        let base = (frame as usize * MAX_SPRITES_PER_FRAME + slot) * 4;
        self.sprite_bb[base..base + 4].copy_from_slice(&rect);
        self
    }

    /// Add a background image. Ids follow insertion order.
    pub fn background(&mut self, pixels: &[u8]) -> &mut Self {
        self.background_frames.push(pixels[..self.px()].to_vec());
        self
    }

    pub fn background_for(&mut self, frame: u32, background: u16, rect: [u16; 4]) -> &mut Self {
        let f = frame as usize;
        self.background_ids[f] = background;
        self.background_bb[f * 4..f * 4 + 4].copy_from_slice(&rect);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let n = self.nframes as usize;
        let px = self.px();
        let mut out = Vec::new();
        out.extend_from_slice(&encode_name(&self.name));
        put_u32(&mut out, self.words * 4);
        for v in [
            self.width,
            self.height,
            self.nframes,
            self.nocolors,
            self.nccolors,
            self.compmasks.len() as u32,
            0,
            self.sprites.len() as u32,
        ] {
            put_u32(&mut out, v);
        }
        if self.words >= LEGACY_BACKGROUNDS_MIN_WORDS {
            put(&mut out, &[self.background_frames.len() as u16]);
        }

        put(&mut out, &self.hashcodes);
        put(&mut out, &self.shapecompmode);
        put(&mut out, &self.compmask_id);
        out.extend(std::iter::repeat_n(0u8, n));
        for mask in &self.compmasks {
            put(&mut out, mask);
        }
        put(&mut out, &self.cpal);
        put(&mut out, &self.cframes);
        put(&mut out, &self.dynamasks);
        put(&mut out, &self.dyna4cols);
        put(&mut out, &self.framesprites);
        for (template, colored) in &self.sprites {
            for (c, t) in colored.iter().zip(template) {
                out.extend_from_slice(&[*c, *t]);
            }
        }
        put(&mut out, &self.active);
        put(&mut out, &self.rotations);
        self.detection.write(&mut out);
        if self.words >= 11 {
            put(&mut out, &self.triggers);
        }
        if self.words >= 12 {
            put(&mut out, &self.sprite_bb);
        }
        if self.words >= LEGACY_BACKGROUNDS_MIN_WORDS {
            for frame in &self.background_frames {
                put(&mut out, &frame[..px]);
            }
            put(&mut out, &self.background_ids);
            put(&mut out, &self.background_bb);
        }
        out
    }
}

/// Builder for current-layout sources.
#[derive(Debug, Clone)]
pub struct CurrentBuilder {
    name: String,
    words: u32,
    width: u32,
    height: u32,
    width_extra: u32,
    height_extra: u32,
    nframes: u32,
    nocolors: u32,
    hashcodes: Vec<u32>,
    shapecompmode: Vec<u8>,
    compmask_id: Vec<u8>,
    compmasks: Vec<Vec<u8>>,
    is_extra_frame: Vec<u8>,
    cframes: Vec<u16>,
    cframes_extra: Vec<u16>,
    dynamasks: Vec<u8>,
    dynamasks_extra: Vec<u8>,
    dyna4cols: Vec<u16>,
    dyna4cols_extra: Vec<u16>,
    is_extra_sprite: Vec<u8>,
    framesprites: Vec<u8>,
    sprite_original: Vec<u8>,
    sprite_colored: Vec<u16>,
    sprite_mask_extra: Vec<u8>,
    sprite_colored_extra: Vec<u16>,
    active: Vec<u8>,
    rotations: Vec<u16>,
    rotations_extra: Vec<u16>,
    detection: Detection,
    triggers: Vec<u32>,
    sprite_bb: Vec<u16>,
    is_extra_background: Vec<u8>,
    background_frames: Vec<u16>,
    background_frames_extra: Vec<u16>,
    background_ids: Vec<u16>,
    background_mask: Vec<u8>,
    background_mask_extra: Vec<u8>,
    shadows_dir: Vec<u8>,
    shadows_col: Vec<u16>,
    shadows_dir_extra: Vec<u8>,
    shadows_col_extra: Vec<u16>,
    sprite_4cols: Vec<u16>,
    sprite_4cols_extra: Vec<u16>,
    sprite_masks: Vec<u8>,
    sprite_masks_extra: Vec<u8>,
    shape_mode: Vec<u8>,
    is256x64: bool,
}

impl CurrentBuilder {
    /// The extra resolution is derived from the base one: 32-line frames
    /// get a double-size extra plane, 64-line frames a half-size one.
    pub fn new(width: u32, height: u32, nframes: u32, nocolors: u32) -> Self {
        let (width_extra, height_extra) = match height {
            32 => (width * 2, 64),
            64 => (width / 2, 32),
            _ => (width, height),
        };
        let n = nframes as usize;
        let px = (width * height) as usize;
        let pxx = (width_extra * height_extra) as usize;
        let dyna = MAX_DYNA_SETS_PER_FRAME_V2 * nocolors as usize;
        let rot = MAX_COLOR_ROTATIONS_V2 * MAX_LENGTH_COLOR_ROTATION;
        Self {
            name: "synthetic".into(),
            words: CURRENT_256X64_MIN_WORDS - 1,
            width,
            height,
            width_extra,
            height_extra,
            nframes,
            nocolors,
            hashcodes: vec![0; n],
            shapecompmode: vec![0; n],
            compmask_id: vec![NO_MASK; n],
            compmasks: Vec::new(),
            is_extra_frame: vec![0; n],
            cframes: vec![0; n * px],
            cframes_extra: vec![0; n * pxx],
            dynamasks: vec![NOT_DYNAMIC; n * px],
            dynamasks_extra: vec![NOT_DYNAMIC; n * pxx],
            dyna4cols: vec![0; n * dyna],
            dyna4cols_extra: vec![0; n * dyna],
            is_extra_sprite: Vec::new(),
            framesprites: vec![NO_SPRITE; n * MAX_SPRITES_PER_FRAME],
            sprite_original: Vec::new(),
            sprite_colored: Vec::new(),
            sprite_mask_extra: Vec::new(),
            sprite_colored_extra: Vec::new(),
            active: vec![1; n],
            rotations: vec![0; n * rot],
            rotations_extra: vec![0; n * rot],
            detection: Detection::default(),
            triggers: vec![NO_TRIGGER; n],
            sprite_bb: full_boxes(width.max(1), height.max(1), nframes),
            is_extra_background: Vec::new(),
            background_frames: Vec::new(),
            background_frames_extra: Vec::new(),
            background_ids: vec![NO_BACKGROUND; n],
            background_mask: vec![0; n * px],
            background_mask_extra: vec![0; n * pxx],
            shadows_dir: vec![0; n * MAX_DYNA_SETS_PER_FRAME_V2],
            shadows_col: vec![0; n * MAX_DYNA_SETS_PER_FRAME_V2],
            shadows_dir_extra: vec![0; n * MAX_DYNA_SETS_PER_FRAME_V2],
            shadows_col_extra: vec![0; n * MAX_DYNA_SETS_PER_FRAME_V2],
            sprite_4cols: Vec::new(),
            sprite_4cols_extra: Vec::new(),
            sprite_masks: Vec::new(),
            sprite_masks_extra: Vec::new(),
            shape_mode: Vec::new(),
            is256x64: false,
        }
    }

    fn px(&self) -> usize {
        (self.width * self.height) as usize
    }

    fn mask_len(&self) -> usize {
        if self.is256x64 { MAX_FRAME_PIXELS } else { self.px() }
    }

    fn pxx(&self) -> usize {
        (self.width_extra * self.height_extra) as usize
    }

    fn dyna_len(&self) -> usize {
        MAX_DYNA_SETS_PER_FRAME_V2 * self.nocolors as usize
    }

    /// Declared header length; trailing sections below their threshold are omitted.
    pub fn header_words(&mut self, words: u32) -> &mut Self {
        self.words = words;
        self
    }

    pub fn hash(&mut self, frame: u32, hash: u32) -> &mut Self {
        self.hashcodes[frame as usize] = hash;
        self
    }

    /// Compare incoming frames over a full 256x64 raster. Call before adding masks.
    pub fn compare_256x64(&mut self) -> &mut Self {
        self.is256x64 = true;
        self.words = self.words.max(CURRENT_256X64_MIN_WORDS);
        self
    }

    pub fn compmask(&mut self, mask: &[u8]) -> &mut Self {
        let mut m = mask.to_vec();
        m.resize(self.mask_len(), 0);
        self.compmasks.push(m);
        self
    }

    pub fn match_frame(&mut self, frame: u32, raw: &[u8], mask: Option<u8>, shape: bool) -> &mut Self {
        let f = frame as usize;
        self.hashcodes[f] = source_hash(raw, &self.compmasks, mask, shape);
        self.compmask_id[f] = mask.unwrap_or(NO_MASK);
        self.shapecompmode[f] = shape as u8;
        self
    }

    pub fn colors(&mut self, frame: u32, pixels: &[u16]) -> &mut Self {
        let px = self.px();
        let base = frame as usize * px;
        self.cframes[base..base + px].copy_from_slice(&pixels[..px]);
        self
    }

    /// Give `frame` extra-resolution data filled with `color`.
    pub fn extra_frame(&mut self, frame: u32, color: u16) -> &mut Self {
        let pxx = self.pxx();
        let base = frame as usize * pxx;
        self.is_extra_frame[frame as usize] = 1;
        self.cframes_extra[base..base + pxx].fill(color);
        self
    }

    pub fn dynamask(&mut self, frame: u32, mask: &[u8]) -> &mut Self {
        let px = self.px();
        let base = frame as usize * px;
        self.dynamasks[base..base + px].copy_from_slice(&mask[..px]);
        self
    }

    pub fn dynamask_extra(&mut self, frame: u32, mask: &[u8]) -> &mut Self {
        let pxx = self.pxx();
        let base = frame as usize * pxx;
        self.dynamasks_extra[base..base + pxx].copy_from_slice(&mask[..pxx]);
        self
    }

    /// RGB565 colors of dynamic set `set`, one per raw shade.
    pub fn dyna_colors(&mut self, frame: u32, set: u8, colors: &[u16]) -> &mut Self {
        let base = frame as usize * self.dyna_len() + set as usize * self.nocolors as usize;
        self.dyna4cols[base..base + colors.len()].copy_from_slice(colors);
        self
    }

    pub fn dyna_colors_extra(&mut self, frame: u32, set: u8, colors: &[u16]) -> &mut Self {
        let base = frame as usize * self.dyna_len() + set as usize * self.nocolors as usize;
        self.dyna4cols_extra[base..base + colors.len()].copy_from_slice(colors);
        self
    }

    /// Shadow directions and color of dynamic set `set`.
    pub fn shadow(&mut self, frame: u32, set: u8, dir: u8, color: u16) -> &mut Self {
        let k = frame as usize * MAX_DYNA_SETS_PER_FRAME_V2 + set as usize;
        self.shadows_dir[k] = dir;
        self.shadows_col[k] = color;
        self
    }

    /// Color rotation in slot `slot` cycling through `colors` every `delay_ms`.
    pub fn rotation(&mut self, frame: u32, slot: usize, colors: &[u16], delay_ms: u16) -> &mut Self {
        Self::write_rotation(&mut self.rotations, frame, slot, colors, delay_ms);
        self
    }

    pub fn rotation_extra(&mut self, frame: u32, slot: usize, colors: &[u16], delay_ms: u16) -> &mut Self {
        Self::write_rotation(&mut self.rotations_extra, frame, slot, colors, delay_ms);
        self
    }

    fn write_rotation(table: &mut [u16], frame: u32, slot: usize, colors: &[u16], delay_ms: u16) {
        let per_frame = MAX_COLOR_ROTATIONS_V2 * MAX_LENGTH_COLOR_ROTATION;
        let base = frame as usize * per_frame + slot * MAX_LENGTH_COLOR_ROTATION;
        table[base] = colors.len() as u16;
        table[base + 1] = delay_ms;
        table[base + 2..base + 2 + colors.len()].copy_from_slice(colors);
    }

    pub fn active(&mut self, frame: u32, active: bool) -> &mut Self {
        self.active[frame as usize] = active as u8;
        self
    }

    pub fn trigger(&mut self, frame: u32, trigger: u32) -> &mut Self {
        self.triggers[frame as usize] = trigger;
        self
    }

    pub fn sprite(&mut self, template: &[u8], colored: &[u16]) -> &mut Self {
        self.is_extra_sprite.push(0);
        self.sprite_original.extend_from_slice(&template[..SPRITE_PIXELS]);
        self.sprite_colored.extend_from_slice(&colored[..SPRITE_PIXELS]);
        self.sprite_mask_extra.extend([NO_SPRITE; SPRITE_PIXELS]);
        self.sprite_colored_extra.extend([0; SPRITE_PIXELS]);
        self.sprite_4cols
            .extend(std::iter::repeat_n(0, MAX_DYNA_SETS_PER_SPRITE * self.nocolors as usize));
        self.sprite_4cols_extra
            .extend(std::iter::repeat_n(0, MAX_DYNA_SETS_PER_SPRITE * self.nocolors as usize));
        self.sprite_masks.extend([NOT_DYNAMIC; SPRITE_PIXELS]);
        self.sprite_masks_extra.extend([NOT_DYNAMIC; SPRITE_PIXELS]);
        self.shape_mode.push(0);
        self.detection.add_sprite();
        self
    }

    /// Extra-resolution mask and colors of `sprite`.
    pub fn sprite_extra(&mut self, sprite: u8, mask: &[u8], colored: &[u16]) -> &mut Self {
        let s = sprite as usize;
        let range = s * SPRITE_PIXELS..(s + 1) * SPRITE_PIXELS;
        self.is_extra_sprite[s] = 1;
        self.sprite_mask_extra[range.clone()].copy_from_slice(&mask[..SPRITE_PIXELS]);
        self.sprite_colored_extra[range].copy_from_slice(&colored[..SPRITE_PIXELS]);
        self
    }

    pub fn detection(&mut self, sprite: u8, area: usize, dword: u32, pos: u16, rect: [u16; 4]) -> &mut Self {
        self.detection.set(sprite, area, dword, pos, rect);
        self
    }

    pub fn shape_mode(&mut self, sprite: u8, mode: u8) -> &mut Self {
        self.shape_mode[sprite as usize] = mode;
        self
    }

    pub fn frame_sprites(&mut self, frame: u32, sprites: &[u8]) -> &mut Self {
        let base = frame as usize * MAX_SPRITES_PER_FRAME;
        self.framesprites[base..base + sprites.len()].copy_from_slice(sprites);
        self
    }

    pub fn sprite_box(&mut self, frame: u32, slot: usize, rect: [u16; 4]) -> &mut Self {
        let base = (frame as usize * MAX_SPRITES_PER_FRAME + slot) * 4;
        self.sprite_bb[base..base + 4].copy_from_slice(&rect);
        self
    }

    /// Add a base-resolution background image.
    pub fn background(&mut self, pixels: &[u16]) -> &mut Self {
        let px = self.px();
        let pxx = self.pxx();
        self.is_extra_background.push(0);
        self.background_frames.extend_from_slice(&pixels[..px]);
        self.background_frames_extra.extend(std::iter::repeat_n(0, pxx));
        self
    }

    /// Use `background` for `frame` where `mask` is non-zero.
    pub fn background_for(&mut self, frame: u32, background: u16, mask: &[u8]) -> &mut Self {
        let px = self.px();
        let f = frame as usize;
        self.background_ids[f] = background;
        self.background_mask[f * px..(f + 1) * px].copy_from_slice(&mask[..px]);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&encode_name(&self.name));
        put_u32(&mut out, self.words * 4);
        for v in [
            self.width,
            self.height,
            self.width_extra,
            self.height_extra,
            self.nframes,
            self.nocolors,
            self.compmasks.len() as u32,
            self.is_extra_sprite.len() as u32,
        ] {
            put_u32(&mut out, v);
        }
        put(&mut out, &[self.is_extra_background.len() as u16]);
        if self.words >= CURRENT_256X64_MIN_WORDS {
            put_u32(&mut out, self.is256x64 as u32);
        }

        put(&mut out, &self.hashcodes);
        put(&mut out, &self.shapecompmode);
        put(&mut out, &self.compmask_id);
        for mask in &self.compmasks {
            put(&mut out, mask);
        }
        put(&mut out, &self.is_extra_frame);
        put(&mut out, &self.cframes);
        put(&mut out, &self.cframes_extra);
        put(&mut out, &self.dynamasks);
        put(&mut out, &self.dynamasks_extra);
        put(&mut out, &self.dyna4cols);
        put(&mut out, &self.dyna4cols_extra);

        put(&mut out, &self.is_extra_sprite);
        put(&mut out, &self.framesprites);
        put(&mut out, &self.sprite_original);
        put(&mut out, &self.sprite_colored);
        put(&mut out, &self.sprite_mask_extra);
        put(&mut out, &self.sprite_colored_extra);

        put(&mut out, &self.active);
        put(&mut out, &self.rotations);
        put(&mut out, &self.rotations_extra);
        self.detection.write(&mut out);
        put(&mut out, &self.triggers);
        put(&mut out, &self.sprite_bb);

        put(&mut out, &self.is_extra_background);
        put(&mut out, &self.background_frames);
        put(&mut out, &self.background_frames_extra);
        put(&mut out, &self.background_ids);
        put(&mut out, &self.background_mask);
        put(&mut out, &self.background_mask_extra);

        if self.words >= 15 {
            put(&mut out, &self.shadows_dir);
            put(&mut out, &self.shadows_col);
            put(&mut out, &self.shadows_dir_extra);
            put(&mut out, &self.shadows_col_extra);
        }
        if self.words >= 18 {
            put(&mut out, &self.sprite_4cols);
            put(&mut out, &self.sprite_4cols_extra);
            put(&mut out, &self.sprite_masks);
            put(&mut out, &self.sprite_masks_extra);
        }
        if self.words >= 19 {
            put(&mut out, &self.shape_mode);
        }
        out
    }
}
