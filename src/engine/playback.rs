//! Playback engine: one loaded archive plus the state carried between frames.
//!
//! The caller feeds raw frames to [`Engine::colorize`] and calls
//! [`Engine::rotate`] whenever the delay it was given elapses. Both return
//! immediately; nothing runs in the background.

use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};

use super::colorizer::{
    compose_current, compose_legacy, overlay_sprite_current, overlay_sprite_legacy,
    render_standard_current, render_standard_legacy,
};
use super::matcher::{FrameMatcher, MatchResult};
use super::output::Output;
use super::rotation::{advance_legacy, advance_plane, arm_legacy, arm_plane, delay_until};
use super::sprites::{detect_sprites, SpritePlacement};
use crate::archive::{Archive, ArchiveError, LoadOrigin, MAX_FRAME_PIXELS, MAX_SPRITES_PER_FRAME, NO_TRIGGER};
use crate::schema::{ConfigError, PlaybackConfig, StandardPalette};

/// A repeated trigger is reported again once this much time has passed.
pub const TRIGGER_REPEAT_TIMEOUT_MS: u64 = 500;

/// Result of [`Engine::colorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorizeOutcome {
    /// A new frame was identified and composed into the output.
    Colorized {
        frame_id: u32,
        /// Delay before the first rotation step, when the frame rotates.
        first_rotation_in_ms: Option<u32>,
        /// Trigger to report to the caller.
        trigger: Option<u32>,
    },
    /// Same frame as last time; the output was left untouched.
    Unchanged,
    /// The raw frame was rendered through the standard palette.
    Fallback,
    NotFound,
}

/// Result of [`Engine::rotate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotateOutcome {
    /// Delay until the next rotation step, `None` when nothing rotates.
    pub next_in_ms: Option<u32>,
    /// The legacy palette changed.
    pub palette_rotated: bool,
    /// Pixels of the 32-line plane changed.
    pub rotated_32: bool,
    /// Pixels of the 64-line plane changed.
    pub rotated_64: bool,
}

/// State tied to one loaded archive.
#[derive(Debug)]
struct Session {
    archive: Archive,
    matcher: FrameMatcher,
    output: Output,
    claimed: Vec<u8>,
    shaped: Vec<u8>,
    sprites: Vec<SpritePlacement>,
    last_found_at: Option<u64>,
    skipped: u8,
    last_trigger: u32,
    last_trigger_at: Option<u64>,
}

impl Session {
    fn new(archive: Archive, config: &PlaybackConfig) -> Self {
        let output = Output::for_archive(&archive, config.request);
        Self {
            matcher: FrameMatcher::new(archive.nframes),
            output,
            claimed: vec![0; MAX_FRAME_PIXELS],
            shaped: Vec::with_capacity(archive.frame_len()),
            sprites: Vec::with_capacity(MAX_SPRITES_PER_FRAME),
            last_found_at: None,
            skipped: 0,
            last_trigger: NO_TRIGGER,
            last_trigger_at: None,
            archive,
        }
    }

    /// Compose archive frame `id` and arm its rotations. Returns the delay
    /// before the first rotation step.
    fn render(&mut self, frame: &[u8], id: u32, now: u64) -> Option<u32> {
        let Self {
            archive,
            output,
            claimed,
            shaped,
            sprites,
            ..
        } = self;
        detect_sprites(archive, frame, id, shaped, sprites);
        if !sprites.is_empty() {
            debug!("Frame {}: {} sprites", id, sprites.len());
        }

        match output {
            Output::Legacy(out) => {
                compose_legacy(archive, frame, id, out);
                for placement in sprites.iter() {
                    overlay_sprite_legacy(archive, placement, out);
                }
                arm_legacy(out, now);
                delay_until(out.timer.next_due(), now)
            }
            Output::Current(out) => {
                let mut due = None;
                for plane in out.planes_mut() {
                    if compose_current(archive, frame, id, plane, claimed) {
                        for placement in sprites.iter() {
                            overlay_sprite_current(archive, frame, placement, plane);
                        }
                    }
                    arm_plane(plane, now);
                    due = min_due(due, plane.timer.next_due());
                }
                delay_until(due, now)
            }
        }
    }

    /// Trigger of frame `id` if it should be reported now.
    fn take_trigger(&mut self, id: u32, now: u64) -> Option<u32> {
        let trigger = self.archive.trigger_ids.value(id);
        let stale = self
            .last_trigger_at
            .is_none_or(|at| now.saturating_sub(at) > TRIGGER_REPEAT_TIMEOUT_MS);
        if trigger == self.last_trigger && !stale {
            return None;
        }
        self.last_trigger = trigger;
        self.last_trigger_at = Some(now);
        (trigger != NO_TRIGGER).then_some(trigger)
    }

    /// Render `frame` without colorization. The next identified frame is
    /// always composed again.
    fn fallback(&mut self, frame: &[u8], palette: Option<&StandardPalette>) {
        self.matcher.reset();
        match &mut self.output {
            Output::Legacy(out) => render_standard_legacy(&self.archive, frame, palette, out),
            Output::Current(out) => render_standard_current(&self.archive, frame, palette, out),
        }
    }
}

fn min_due(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Colorization engine owning at most one loaded archive.
///
/// Instances share nothing and can live on different threads.
#[derive(Debug)]
pub struct Engine {
    config: PlaybackConfig,
    enabled: bool,
    clock: Instant,
    session: Option<Session>,
}

impl Engine {
    pub fn new(config: PlaybackConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            enabled: true,
            clock: Instant::now(),
            session: None,
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Load an archive (source or cache), replacing the current one.
    ///
    /// The previous archive is released first, so a failed load leaves the
    /// engine unloaded.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<LoadOrigin, ArchiveError> {
        self.dispose();
        let (archive, origin) =
            Archive::load(path, self.config.request, self.config.write_cache)?;
        self.load_archive(archive);
        Ok(origin)
    }

    /// Start a session on an already parsed archive.
    pub fn load_archive(&mut self, archive: Archive) {
        info!(
            "Playing '{}' ({} frames, {} triggers)",
            archive.name,
            archive.nframes,
            archive.trigger_count()
        );
        self.session = Some(Session::new(archive, &self.config));
    }

    /// Release the archive and every buffer.
    pub fn dispose(&mut self) {
        self.session = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    pub fn archive(&self) -> Option<&Archive> {
        self.session.as_ref().map(|s| &s.archive)
    }

    /// Output buffers, present while an archive is loaded.
    pub fn output(&self) -> Option<&Output> {
        self.session.as_ref().map(|s| &s.output)
    }

    /// Milliseconds since the engine was created.
    pub fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    /// Colorize a raw frame at the current time.
    pub fn colorize(&mut self, frame: &[u8]) -> ColorizeOutcome {
        let now = self.now_ms();
        self.colorize_at(frame, now)
    }

    /// Colorize a raw frame with an explicit timestamp in milliseconds.
    pub fn colorize_at(&mut self, frame: &[u8], now_ms: u64) -> ColorizeOutcome {
        let Some(session) = self.session.as_mut() else {
            return ColorizeOutcome::NotFound;
        };
        // 256x64 archives compare over the full raster, not just the base frame
        let expected = session.archive.comparison_len();
        if frame.len() < expected {
            warn!(
                "Frame of {} bytes is shorter than the archive's {}",
                frame.len(),
                expected
            );
            return ColorizeOutcome::NotFound;
        }
        let palette = self.config.standard_palette.as_ref();
        if !self.enabled {
            session.fallback(frame, palette);
            return ColorizeOutcome::Fallback;
        }

        session.last_found_at.get_or_insert(now_ms);
        let result = session.matcher.identify(&session.archive, frame);
        match result {
            MatchResult::Unchanged => {
                session.last_found_at = Some(now_ms);
                session.skipped = 0;
                return ColorizeOutcome::Unchanged;
            }
            MatchResult::Found(id) => {
                session.last_found_at = Some(now_ms);
                session.skipped = 0;
                if session.archive.active_frames.value(id) != 0 {
                    let first_rotation_in_ms = session.render(frame, id, now_ms);
                    let trigger = session.take_trigger(id, now_ms);
                    return ColorizeOutcome::Colorized {
                        frame_id: id,
                        first_rotation_in_ms,
                        trigger,
                    };
                }
            }
            MatchResult::NotFound => {}
        }

        let timeout = self.config.unknown_frame_timeout_ms as u64;
        let max_skip = self.config.max_unknown_frames_to_skip;
        let since = now_ms.saturating_sub(session.last_found_at.unwrap_or(now_ms));
        let timed_out = timeout > 0 && since >= timeout;
        let skipped_out = max_skip > 0 && result == MatchResult::NotFound && {
            session.skipped = session.skipped.saturating_add(1);
            session.skipped >= max_skip
        };
        if timed_out || skipped_out {
            debug!("Unknown frame, falling back to the standard palette");
            session.fallback(frame, palette);
            return ColorizeOutcome::Fallback;
        }
        ColorizeOutcome::NotFound
    }

    /// Step due rotations at the current time.
    pub fn rotate(&mut self) -> RotateOutcome {
        let now = self.now_ms();
        self.rotate_at(now)
    }

    /// Step due rotations with an explicit timestamp in milliseconds.
    pub fn rotate_at(&mut self, now_ms: u64) -> RotateOutcome {
        let Some(session) = self.session.as_mut() else {
            return RotateOutcome::default();
        };
        let mut outcome = RotateOutcome::default();
        match &mut session.output {
            Output::Legacy(out) => {
                outcome.palette_rotated = advance_legacy(out, now_ms);
                outcome.next_in_ms = delay_until(out.timer.next_due(), now_ms);
            }
            Output::Current(out) => {
                let mut due = None;
                for plane in out.planes_mut() {
                    let rotated = advance_plane(plane, now_ms);
                    match plane.height {
                        32 => outcome.rotated_32 |= rotated,
                        _ => outcome.rotated_64 |= rotated,
                    }
                    due = min_due(due, plane.timer.next_due());
                }
                outcome.next_in_ms = delay_until(due, now_ms);
            }
        }
        outcome
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// While disabled every frame goes through the standard palette.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fall back after `ms` milliseconds without an identified frame (0 disables).
    pub fn set_ignore_unknown_frames_timeout(&mut self, ms: u16) {
        self.config.unknown_frame_timeout_ms = ms;
    }

    /// Fall back after `n` consecutive unidentified frames (0 disables).
    pub fn set_maximum_unknown_frames_to_skip(&mut self, n: u8) {
        self.config.max_unknown_frames_to_skip = n;
    }

    /// Palette for the fallback path, `3 << bit_depth` RGB bytes.
    pub fn set_standard_palette(&mut self, colors: &[u8], bit_depth: u8) -> Result<(), ConfigError> {
        self.config.standard_palette = Some(StandardPalette::new(colors, bit_depth)?);
        Ok(())
    }
}
