//! Replace-with-visible-feedback as an explicit state machine.
//!
//! Each `step` performs one discrete buffer operation and returns how long the driver
//! should wait before the next one. Driving it to completion, or calling `finish` at any
//! point, leaves the buffer exactly as an instantaneous replace would.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::editor::buffer::TextBuffer;
use crate::patch::field_locator::Span;

/// Pacing of the animated replace. Cosmetic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationOptions {
    /// Delay between single-character deletions / insertions.
    pub speed_ms: u64,
    /// How long the old and new values stay highlighted.
    pub highlight_ms: u64,
    /// Pause after scrolling to the match.
    pub scroll_delay_ms: u64,
    pub show_highlight: bool,
}

impl Default for AnimationOptions {
    fn default() -> Self {
        Self {
            speed_ms: 30,
            highlight_ms: 1500,
            scroll_delay_ms: 300,
            show_highlight: true,
        }
    }
}

impl AnimationOptions {
    /// No pauses at all; the sequence still runs step by step.
    pub fn instant() -> Self {
        Self {
            speed_ms: 0,
            highlight_ms: 0,
            scroll_delay_ms: 0,
            show_highlight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Focusing,
    Highlighting,
    Deleting { deleted: usize },
    Inserting { inserted: usize },
    Settling,
    Done,
}

#[derive(Debug, Clone)]
pub struct ReplaceAnimation {
    from: usize,
    old_len: usize,
    new_value: Vec<char>,
    options: AnimationOptions,
    phase: Phase,
}

impl ReplaceAnimation {
    pub fn new(position: Span, new_value: &str, options: AnimationOptions) -> Self {
        Self {
            from: position.from,
            old_len: position.to.saturating_sub(position.from),
            new_value: new_value.chars().collect(),
            options,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    fn old_end(&self) -> usize {
        self.from + self.old_len
    }

    fn new_end(&self) -> usize {
        self.from + self.new_value.len()
    }

    /// Performs the next operation. `None` once the replace is complete.
    pub fn step(&mut self, buf: &mut TextBuffer) -> Option<Duration> {
        let ms = Duration::from_millis;
        let (next, wait) = match self.phase {
            Phase::Idle => {
                buf.scroll_to(self.from);
                buf.select(self.from, self.old_end());
                (Phase::Focusing, ms(self.options.scroll_delay_ms))
            }
            Phase::Focusing if self.options.show_highlight => {
                buf.highlight(self.from, self.old_end(), self.options.highlight_ms);
                (Phase::Highlighting, ms(self.options.highlight_ms))
            }
            Phase::Focusing => (Phase::Deleting { deleted: 0 }, Duration::ZERO),
            Phase::Highlighting => {
                buf.clear_highlight();
                (Phase::Deleting { deleted: 0 }, Duration::ZERO)
            }
            Phase::Deleting { deleted } if deleted < self.old_len => {
                // Backspace from the end of the old value.
                let at = self.old_end() - deleted - 1;
                buf.delete(at, at + 1);
                (
                    Phase::Deleting {
                        deleted: deleted + 1,
                    },
                    ms(self.options.speed_ms),
                )
            }
            Phase::Deleting { .. } => (Phase::Inserting { inserted: 0 }, Duration::ZERO),
            Phase::Inserting { inserted } if inserted < self.new_value.len() => {
                let ch = self.new_value[inserted].to_string();
                buf.insert(self.from + inserted, &ch);
                (
                    Phase::Inserting {
                        inserted: inserted + 1,
                    },
                    ms(self.options.speed_ms),
                )
            }
            Phase::Inserting { .. } if self.options.show_highlight => {
                buf.highlight(self.from, self.new_end(), self.options.highlight_ms);
                (Phase::Settling, ms(self.options.highlight_ms))
            }
            Phase::Inserting { .. } => (Phase::Done, Duration::ZERO),
            Phase::Settling => {
                buf.clear_highlight();
                (Phase::Done, Duration::ZERO)
            }
            Phase::Done => return None,
        };
        self.phase = next;
        Some(wait)
    }

    /// Jumps straight to the final buffer state from wherever the animation stopped.
    pub fn finish(&mut self, buf: &mut TextBuffer) {
        match self.phase {
            Phase::Idle | Phase::Focusing | Phase::Highlighting => {
                buf.delete(self.from, self.old_end());
                buf.insert(self.from, &self.new_value.iter().collect::<String>());
            }
            Phase::Deleting { deleted } => {
                buf.delete(self.from, self.old_end() - deleted);
                buf.insert(self.from, &self.new_value.iter().collect::<String>());
            }
            Phase::Inserting { inserted } => {
                let rest: String = self.new_value[inserted..].iter().collect();
                buf.insert(self.from + inserted, &rest);
            }
            Phase::Settling | Phase::Done => {}
        }
        if matches!(self.phase, Phase::Highlighting | Phase::Settling) {
            buf.clear_highlight();
        }
        self.phase = Phase::Done;
    }
}
