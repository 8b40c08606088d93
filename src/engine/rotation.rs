//! Color rotation timers.
//!
//! Each rotation slot steps on its own schedule. Legacy archives rotate a
//! run of palette entries; current archives rewrite the output pixels whose
//! [`RotationMark`](super::RotationMark) names the slot.

use super::output::{LegacyOutput, Plane};
use crate::archive::{LEGACY_PALETTE_SIZE, MAX_COLOR_ROTATIONS_V2, MAX_LENGTH_COLOR_ROTATION};

/// Shortest delay ever reported to the caller.
pub const MIN_ROTATION_DELAY_MS: u32 = 10;

/// Longest member list of a current-format rotation.
const MAX_ROTATION_MEMBERS: u16 = (MAX_LENGTH_COLOR_ROTATION - 2) as u16;

#[derive(Debug, Clone, Copy, Default)]
struct SlotTimer {
    phase: u16,
    started: u64,
    next_due: Option<u64>,
}

/// Schedule of every rotation slot of one output.
#[derive(Debug, Clone)]
pub struct RotationTimer {
    slots: Vec<SlotTimer>,
}

impl RotationTimer {
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![SlotTimer::default(); slots],
        }
    }

    /// Disarm every slot and reset the phases.
    pub fn clear(&mut self) {
        self.slots.fill(SlotTimer::default());
    }

    /// Current phase of `slot`.
    pub fn phase(&self, slot: usize) -> u16 {
        self.slots.get(slot).map_or(0, |s| s.phase)
    }

    /// Earliest scheduled step, if any slot is armed.
    pub fn next_due(&self) -> Option<u64> {
        self.slots.iter().filter_map(|s| s.next_due).min()
    }

    /// Schedule `slot` for a newly displayed frame. `delay` is `None` when
    /// the slot is unused by that frame.
    ///
    /// A slot that was already running keeps its start time unless a full
    /// step has elapsed since, so identical consecutive frames do not stall
    /// the animation.
    pub fn arm(&mut self, slot: usize, delay: Option<u32>, now: u64) {
        let Some(s) = self.slots.get_mut(slot) else {
            return;
        };
        let Some(delay) = delay else {
            s.next_due = None;
            return;
        };
        if s.next_due.is_none() || s.started + delay as u64 <= now {
            s.started = now;
        }
        s.next_due = Some(s.started + delay as u64);
    }

    /// Step `slot` if its delay has elapsed. Returns whether it stepped.
    pub fn step(&mut self, slot: usize, members: u16, delay: u32, now: u64) -> bool {
        let Some(s) = self.slots.get_mut(slot) else {
            return false;
        };
        if members == 0 || now.saturating_sub(s.started) < delay as u64 {
            return false;
        }
        s.phase = (s.phase + 1) % members;
        s.started = now;
        s.next_due = Some(now + delay as u64);
        true
    }
}

/// Delay until the earliest of `due` times, floored at [`MIN_ROTATION_DELAY_MS`].
pub fn delay_until(due: Option<u64>, now: u64) -> Option<u32> {
    due.map(|t| (t.saturating_sub(now).min(u32::MAX as u64) as u32).max(MIN_ROTATION_DELAY_MS))
}

/// Members and delay of current-format slot `slot`, `None` when unused.
#[inline]
pub(crate) fn slot_params(rotations: &[u16], slot: usize) -> Option<(u16, u32)> {
    let base = slot * MAX_LENGTH_COLOR_ROTATION;
    let members = (*rotations.get(base)?).min(MAX_ROTATION_MEMBERS);
    let delay = *rotations.get(base + 1)?;
    (members > 0 && delay > 0).then_some((members, delay as u32))
}

/// Color of member `position` of `slot` shifted by `phase`.
#[inline]
pub(crate) fn rotated_color(rotations: &[u16], slot: usize, members: u16, position: u16, phase: u16) -> u16 {
    let index = slot * MAX_LENGTH_COLOR_ROTATION + 2 + ((position + phase) % members) as usize;
    rotations.get(index).copied().unwrap_or(0)
}

/// Arm every slot of a plane from its rotation table.
pub fn arm_plane(plane: &mut Plane, now: u64) {
    for slot in 0..MAX_COLOR_ROTATIONS_V2 {
        let delay = slot_params(&plane.rotations, slot).map(|(_, d)| d);
        plane.timer.arm(slot, delay, now);
    }
}

/// Step the due slots of a plane and rewrite their pixels.
///
/// Returns whether any slot stepped.
pub fn advance_plane(plane: &mut Plane, now: u64) -> bool {
    if let Some(modified) = plane.modified.as_mut() {
        modified.fill(0);
    }
    let mut stepped = [false; MAX_COLOR_ROTATIONS_V2];
    let mut members = [0u16; MAX_COLOR_ROTATIONS_V2];
    for slot in 0..MAX_COLOR_ROTATIONS_V2 {
        if let Some((len, delay)) = slot_params(&plane.rotations, slot) {
            members[slot] = len;
            stepped[slot] = plane.timer.step(slot, len, delay, now);
        }
    }
    if !stepped.contains(&true) {
        return false;
    }

    let Plane {
        frame,
        rotations,
        annotation,
        modified,
        timer,
        ..
    } = plane;
    for (i, mark) in annotation.iter().enumerate() {
        let slot = mark.slot as usize;
        if slot >= MAX_COLOR_ROTATIONS_V2 || !stepped[slot] {
            continue;
        }
        frame[i] = rotated_color(rotations, slot, members[slot], mark.position, timer.phase(slot));
        if let Some(modified) = modified.as_mut() {
            modified[i] = 1;
        }
    }
    true
}

/// Delay of legacy slot `slot`, `None` when unused.
#[inline]
fn legacy_params(rotations: &[u8], slot: usize) -> Option<(u8, u8, u32)> {
    let r = rotations.get(slot * 3..slot * 3 + 3)?;
    (r[0] != 255 && r[1] > 0).then(|| (r[0], r[1], r[2] as u32 * 10))
}

/// Arm every legacy palette rotation.
pub fn arm_legacy(out: &mut LegacyOutput, now: u64) {
    for slot in 0..out.rotations.len() / 3 {
        let delay = legacy_params(&out.rotations, slot).map(|(_, _, d)| d);
        out.timer.arm(slot, delay, now);
    }
}

/// Step the due legacy rotations, shifting their palette runs by one entry.
pub fn advance_legacy(out: &mut LegacyOutput, now: u64) -> bool {
    let mut rotated = false;
    for slot in 0..out.rotations.len() / 3 {
        let Some((first, count, delay)) = legacy_params(&out.rotations, slot) else {
            continue;
        };
        if !out.timer.step(slot, count as u16, delay, now) {
            continue;
        }
        rotated = true;
        let start = first as usize * 3;
        let end = start + count as usize * 3;
        if end <= LEGACY_PALETTE_SIZE.min(out.palette.len()) {
            out.palette[start..end].rotate_left(3);
        }
    }
    rotated
}
