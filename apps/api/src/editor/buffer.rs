//! The live editable buffer. Positions are character offsets, matching `FieldMatch`.
//!
//! Every view-affecting operation is appended to an event log so the HTTP layer can hand
//! the client a replayable trace of what the editor did.

use serde::Serialize;

use crate::patch::field_locator::byte_offset;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    ScrollTo { pos: usize },
    Select { from: usize, to: usize },
    Highlight { from: usize, to: usize, duration_ms: u64 },
    ClearHighlight,
    Delete { from: usize, to: usize },
    Insert { pos: usize, text: String },
    Reset,
}

#[derive(Debug, Default)]
pub struct TextBuffer {
    text: String,
    events: Vec<ViewEvent>,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            events: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the whole buffer. Used when a chat patch or a client upload lands.
    /// Pending events address the old text, so they are dropped.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.events.clear();
        self.events.push(ViewEvent::Reset);
    }

    pub fn scroll_to(&mut self, pos: usize) {
        self.events.push(ViewEvent::ScrollTo { pos });
    }

    pub fn select(&mut self, from: usize, to: usize) {
        self.events.push(ViewEvent::Select { from, to });
    }

    pub fn highlight(&mut self, from: usize, to: usize, duration_ms: u64) {
        self.events.push(ViewEvent::Highlight {
            from,
            to,
            duration_ms,
        });
    }

    pub fn clear_highlight(&mut self) {
        self.events.push(ViewEvent::ClearHighlight);
    }

    /// Removes characters `[from, to)`. Out-of-range offsets are clamped.
    pub fn delete(&mut self, from: usize, to: usize) {
        if from >= to {
            return;
        }
        let start = byte_offset(&self.text, from);
        let end = byte_offset(&self.text, to);
        self.text.replace_range(start..end, "");
        self.events.push(ViewEvent::Delete { from, to });
    }

    /// Inserts `text` before character `pos`, clamped to the end of the buffer.
    pub fn insert(&mut self, pos: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        let at = byte_offset(&self.text, pos);
        self.text.insert_str(at, text);
        self.events.push(ViewEvent::Insert {
            pos,
            text: text.to_string(),
        });
    }

    /// Drains the event log.
    pub fn take_events(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }
}
