//! Frame identification against the archive checksums.

use super::checksum::{crc32, frame_checksum};
use crate::archive::{Archive, NO_MASK};

/// Outcome of one identification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// A new frame matched archive frame `id`.
    Found(u32),
    /// Same archive frame and same raster as the previous match.
    Unchanged,
    NotFound,
}

/// Identification state carried between frames.
#[derive(Debug, Clone)]
pub struct FrameMatcher {
    last_found: u32,
    first_match: bool,
    last_full_crc: u32,
    checked: Vec<bool>,
}

impl FrameMatcher {
    pub fn new(nframes: u32) -> Self {
        Self {
            last_found: 0,
            first_match: true,
            last_full_crc: 0,
            checked: vec![false; nframes as usize],
        }
    }

    /// Forget the previous match.
    pub fn reset(&mut self) {
        self.last_found = 0;
        self.first_match = true;
        self.last_full_crc = 0;
    }

    /// Id of the last matched archive frame.
    pub fn last_found(&self) -> u32 {
        self.last_found
    }

    /// Identify `frame` among the archive frames.
    ///
    /// The scan starts at the previously matched id and wraps around. A frame
    /// is checksummed once per distinct (mask, shape) pair; candidates sharing
    /// that pair are compared in the same pass and then skipped.
    pub fn identify(&mut self, archive: &Archive, frame: &[u8]) -> MatchResult {
        let nframes = archive.nframes;
        if nframes == 0 {
            return MatchResult::NotFound;
        }
        let Some(pixels) = frame.get(..archive.comparison_len()) else {
            return MatchResult::NotFound;
        };
        self.checked.clear();
        self.checked.resize(nframes as usize, false);
        let start = self.last_found.min(nframes - 1);

        let mut tj = start;
        loop {
            if !self.checked[tj as usize] {
                let mask_id = archive.compmask_id.value(tj);
                let shape = archive.shapecompmode.value(tj);
                let hash = if mask_id == NO_MASK {
                    frame_checksum(pixels, None, shape != 0)
                } else {
                    let mask = archive.compmasks.get(mask_id as u32);
                    frame_checksum(pixels, Some(&mask[..]), shape != 0)
                };

                let mut ti = tj;
                loop {
                    if !self.checked[ti as usize]
                        && archive.compmask_id.value(ti) == mask_id
                        && archive.shapecompmode.value(ti) == shape
                    {
                        if archive.hashcodes.value(ti) == hash {
                            return self.accept(ti, pixels);
                        }
                        self.checked[ti as usize] = true;
                    }
                    ti = (ti + 1) % nframes;
                    if ti == tj {
                        break;
                    }
                }
            }
            tj = (tj + 1) % nframes;
            if tj == start {
                break;
            }
        }
        MatchResult::NotFound
    }

    fn accept(&mut self, id: u32, pixels: &[u8]) -> MatchResult {
        let full = crc32(pixels);
        if self.first_match || id != self.last_found {
            self.first_match = false;
            self.last_found = id;
            self.last_full_crc = full;
            return MatchResult::Found(id);
        }
        // Same frame again: only a change outside the checksummed view makes it new.
        if full != self.last_full_crc {
            self.last_full_crc = full;
            return MatchResult::Found(id);
        }
        MatchResult::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::synth::{CurrentBuilder, LegacyBuilder};
    use crate::archive::MAX_FRAME_PIXELS;
    use crate::schema::RequestFlags;

    /// Two 8x8 frames, mask 0 hides columns 4..8.
    fn masked_archive() -> Archive {
        let mut builder = LegacyBuilder::new(8, 8, 2, 4);
        let mask: Vec<u8> = (0..64).map(|i| (i % 8 >= 4) as u8).collect();
        builder.compmask(&mask);
        let frame0 = [0u8; 64];
        let mut frame1 = [0u8; 64];
        for y in 0..8 {
            frame1[y * 8 + 7] = 3;
        }
        builder.match_frame(0, &frame0, Some(0), false);
        builder.match_frame(1, &frame1, None, false);
        Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap()
    }

    #[test]
    fn test_masked_match_then_unchanged() {
        let archive = masked_archive();
        let mut matcher = FrameMatcher::new(archive.nframes);
        let mut raw = [0u8; 64];
        for y in 0..8 {
            raw[y * 8 + 7] = 2;
        }
        assert_eq!(matcher.identify(&archive, &raw), MatchResult::Found(0));
        assert_eq!(matcher.identify(&archive, &raw), MatchResult::Unchanged);

        // A change in the masked columns makes the same id new again
        raw[5] = 1;
        assert_eq!(matcher.identify(&archive, &raw), MatchResult::Found(0));
    }

    #[test]
    fn test_unmasked_frame_repeat() {
        let archive = masked_archive();
        let mut matcher = FrameMatcher::new(archive.nframes);
        let mut raw = [0u8; 64];
        for y in 0..8 {
            raw[y * 8 + 7] = 3;
        }
        // Frame 0's masked view is checked first and matches.
        let first = matcher.identify(&archive, &raw);
        assert_eq!(first, MatchResult::Found(0));
        assert_eq!(matcher.identify(&archive, &raw), MatchResult::Unchanged);
    }

    #[test]
    fn test_not_found() {
        let archive = masked_archive();
        let mut matcher = FrameMatcher::new(archive.nframes);
        let mut raw = [0u8; 64];
        raw[0] = 3;
        assert_eq!(matcher.identify(&archive, &raw), MatchResult::NotFound);
    }

    #[test]
    fn test_reset_forgets_previous_match() {
        let archive = masked_archive();
        let mut matcher = FrameMatcher::new(archive.nframes);
        let raw = [0u8; 64];
        assert_eq!(matcher.identify(&archive, &raw), MatchResult::Found(0));
        matcher.reset();
        assert_eq!(matcher.identify(&archive, &raw), MatchResult::Found(0));
    }

    #[test]
    fn test_every_frame_matches_its_own_source() {
        let mut builder = LegacyBuilder::new(8, 4, 6, 4);
        let mask: Vec<u8> = (0..32).map(|i| (i < 8) as u8).collect();
        builder.compmask(&mask);
        let mut sources = Vec::new();
        for id in 0..6u32 {
            let raw: Vec<u8> = (0..32).map(|i| ((i as u32 * (id + 1)) % 4) as u8).collect();
            let mask = if id % 2 == 0 { Some(0) } else { None };
            builder.match_frame(id, &raw, mask, id == 3);
            sources.push(raw);
        }
        let archive = Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap();

        for (id, raw) in sources.iter().enumerate() {
            let mut matcher = FrameMatcher::new(archive.nframes);
            let result = matcher.identify(&archive, raw);
            assert!(matches!(result, MatchResult::Found(_)), "frame {} not matched", id);
        }
    }

    #[test]
    fn test_256x64_comparison_uses_full_raster() {
        let mut builder = CurrentBuilder::new(128, 32, 2, 4);
        builder.compare_256x64();
        let frame0 = vec![0u8; MAX_FRAME_PIXELS];
        let mut frame1 = vec![0u8; MAX_FRAME_PIXELS];
        // Outside the 128x32 prefix
        frame1[10_000] = 2;
        builder.match_frame(0, &frame0, None, false);
        builder.match_frame(1, &frame1, None, false);
        let archive = Archive::from_bytes(&builder.build(), RequestFlags::default()).unwrap();
        assert!(archive.is256x64);

        let mut matcher = FrameMatcher::new(archive.nframes);
        assert_eq!(matcher.identify(&archive, &frame1), MatchResult::Found(1));
        assert_eq!(matcher.identify(&archive, &frame0), MatchResult::Found(0));
        assert_eq!(
            matcher.identify(&archive, &frame0[..archive.frame_len()]),
            MatchResult::NotFound
        );
    }
}
