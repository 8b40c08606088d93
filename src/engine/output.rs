//! Output buffers owned by a playback session and reused for every frame.

use super::rotation::RotationTimer;
use crate::archive::{
    Archive, SourceFormat, LEGACY_PALETTE_SIZE, MAX_COLOR_ROTATIONS, MAX_COLOR_ROTATIONS_V2,
    MAX_LENGTH_COLOR_ROTATION,
};
use crate::schema::RequestFlags;

/// Rotation membership of one output pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationMark {
    pub slot: u16,
    /// Index of the pixel's color in the slot's member list.
    pub position: u16,
}

impl RotationMark {
    pub const NONE: Self = Self {
        slot: 0xFFFF,
        position: 0xFFFF,
    };

    #[inline]
    pub fn is_none(self) -> bool {
        self.slot == Self::NONE.slot
    }
}

impl Default for RotationMark {
    fn default() -> Self {
        Self::NONE
    }
}

/// One RGB565 output resolution of a current-format archive.
#[derive(Debug, Clone)]
pub struct Plane {
    pub width: u32,
    pub height: u32,
    /// Whether this plane holds the archive's extra resolution.
    pub is_extra: bool,
    /// Whether the last colorized frame was rendered into this plane.
    pub filled: bool,
    pub frame: Vec<u16>,
    /// Rotation table of the frame on display: `[len, delay_ms, colors..]` per slot.
    pub rotations: Vec<u16>,
    pub annotation: Vec<RotationMark>,
    /// Pixels rewritten by the last rotation step, when requested.
    pub modified: Option<Vec<u8>>,
    pub(crate) timer: RotationTimer,
}

impl Plane {
    pub(crate) fn new(width: u32, height: u32, is_extra: bool, fill_modified: bool) -> Self {
        let len = (width * height) as usize;
        Self {
            width,
            height,
            is_extra,
            filled: false,
            frame: vec![0; len],
            rotations: vec![0; MAX_COLOR_ROTATIONS_V2 * MAX_LENGTH_COLOR_ROTATION],
            annotation: vec![RotationMark::NONE; len],
            modified: fill_modified.then(|| vec![0; len]),
            timer: RotationTimer::new(MAX_COLOR_ROTATIONS_V2),
        }
    }

    #[inline]
    pub fn pixel_len(&self) -> usize {
        self.frame.len()
    }

    /// Width of the frame delivered this time, 0 when the plane was not filled.
    #[inline]
    pub fn filled_width(&self) -> u32 {
        if self.filled { self.width } else { 0 }
    }

    /// Drop every rotation: table, pixel annotation and timers.
    pub(crate) fn clear_rotations(&mut self) {
        self.rotations.fill(0);
        self.annotation.fill(RotationMark::NONE);
        self.timer.clear();
    }
}

/// Palettized output of a legacy archive.
#[derive(Debug, Clone)]
pub struct LegacyOutput {
    pub width: u32,
    pub height: u32,
    /// Palette indices.
    pub frame: Vec<u8>,
    /// 64 RGB entries.
    pub palette: Vec<u8>,
    /// `[first, count, delay / 10]` per slot; first = 255 when unused.
    pub rotations: [u8; 3 * MAX_COLOR_ROTATIONS],
    pub(crate) timer: RotationTimer,
}

impl LegacyOutput {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: vec![0; (width * height) as usize],
            palette: vec![0; LEGACY_PALETTE_SIZE],
            rotations: [255; 3 * MAX_COLOR_ROTATIONS],
            timer: RotationTimer::new(MAX_COLOR_ROTATIONS),
        }
    }
}

/// RGB565 planes of a current-format archive, keyed by line height.
#[derive(Debug, Clone, Default)]
pub struct CurrentOutput {
    pub plane32: Option<Plane>,
    pub plane64: Option<Plane>,
}

impl CurrentOutput {
    /// Allocate the planes `request` asks for. At least the base plane is
    /// always present.
    pub(crate) fn allocate(archive: &Archive, request: RequestFlags) -> Self {
        let mut out = Self::default();
        let base = request.wants_height(archive.height);
        let extra = archive.extra_requested(request);
        if base || !extra {
            *out.slot_mut(archive.height) = Some(Plane::new(
                archive.width,
                archive.height,
                false,
                request.fill_modified,
            ));
        }
        if extra {
            *out.slot_mut(archive.height_extra) = Some(Plane::new(
                archive.width_extra,
                archive.height_extra,
                true,
                request.fill_modified,
            ));
        }
        out
    }

    fn slot_mut(&mut self, height: u32) -> &mut Option<Plane> {
        if height == 64 { &mut self.plane64 } else { &mut self.plane32 }
    }

    /// Plane of the given line height.
    pub fn plane(&self, height: u32) -> Option<&Plane> {
        match height {
            32 => self.plane32.as_ref(),
            64 => self.plane64.as_ref(),
            _ => None,
        }
    }

    pub fn base(&self) -> Option<&Plane> {
        self.planes().find(|p| !p.is_extra)
    }

    pub fn extra(&self) -> Option<&Plane> {
        self.planes().find(|p| p.is_extra)
    }

    pub fn base_mut(&mut self) -> Option<&mut Plane> {
        self.planes_mut().find(|p| !p.is_extra)
    }

    pub fn extra_mut(&mut self) -> Option<&mut Plane> {
        self.planes_mut().find(|p| p.is_extra)
    }

    pub fn planes(&self) -> impl Iterator<Item = &Plane> {
        self.plane32.iter().chain(self.plane64.iter())
    }

    pub fn planes_mut(&mut self) -> impl Iterator<Item = &mut Plane> {
        self.plane32.iter_mut().chain(self.plane64.iter_mut())
    }
}

/// Output of a playback session.
#[derive(Debug, Clone)]
pub enum Output {
    Legacy(LegacyOutput),
    Current(CurrentOutput),
}

impl Output {
    pub(crate) fn for_archive(archive: &Archive, request: RequestFlags) -> Self {
        match archive.format {
            SourceFormat::Legacy => Output::Legacy(LegacyOutput::new(archive.width, archive.height)),
            SourceFormat::Current => Output::Current(CurrentOutput::allocate(archive, request)),
        }
    }

    pub fn as_legacy(&self) -> Option<&LegacyOutput> {
        match self {
            Output::Legacy(out) => Some(out),
            Output::Current(_) => None,
        }
    }

    pub fn as_current(&self) -> Option<&CurrentOutput> {
        match self {
            Output::Current(out) => Some(out),
            Output::Legacy(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::synth::CurrentBuilder;

    fn current_archive(height: u32, request: RequestFlags) -> Archive {
        let width = if height == 32 { 128 } else { 256 };
        let mut builder = CurrentBuilder::new(width, height, 1, 4);
        builder.extra_frame(0, 1);
        Archive::from_bytes(&builder.build(), request).unwrap()
    }

    #[test]
    fn test_allocates_both_planes() {
        let archive = current_archive(32, RequestFlags::default());
        let out = CurrentOutput::allocate(&archive, RequestFlags::default());
        let base = out.base().unwrap();
        let extra = out.extra().unwrap();
        assert_eq!((base.width, base.height), (128, 32));
        assert_eq!((extra.width, extra.height), (256, 64));
        assert!(out.plane(64).unwrap().is_extra);
        assert!(base.modified.is_none());
    }

    #[test]
    fn test_extra_only_request() {
        let request = RequestFlags::from_bits(RequestFlags::REQUEST_32P | RequestFlags::FILL_MODIFIED);
        let archive = current_archive(64, request);
        let out = CurrentOutput::allocate(&archive, request);
        assert!(out.plane64.is_none());
        let extra = out.plane32.as_ref().unwrap();
        assert!(extra.is_extra);
        assert_eq!(extra.width, 128);
        assert_eq!(extra.modified.as_ref().map(Vec::len), Some(128 * 32));
    }

    #[test]
    fn test_base_plane_is_the_floor() {
        let request = RequestFlags::from_bits(0);
        let archive = current_archive(32, request);
        let out = CurrentOutput::allocate(&archive, request);
        assert!(out.base().is_some());
        assert!(out.extra().is_none());
    }

    #[test]
    fn test_filled_width() {
        let mut plane = Plane::new(128, 32, false, false);
        assert_eq!(plane.filled_width(), 0);
        plane.filled = true;
        assert_eq!(plane.filled_width(), 128);
    }
}
