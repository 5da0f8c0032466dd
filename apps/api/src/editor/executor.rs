//! Animated Edit Executor: the fast, LLM-free path for "change my email to x@y.com".
//!
//! At most one animated edit is in flight per buffer. A second request while one is running
//! is rejected with `EditError::Busy`, never queued. If the driving future is dropped
//! mid-animation, the replace is fast-forwarded so the buffer never holds a half edit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::editor::animation::{AnimationOptions, ReplaceAnimation};
use crate::editor::buffer::{TextBuffer, ViewEvent};
use crate::patch::field_locator::{locate_field, FieldLookup, Span};
use crate::patch::tables::FieldKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("Editor is busy with another edit")]
    Busy,

    #[error("{0}")]
    Unresolved(String),

    #[error("Could not extract new value from command")]
    MissingValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditSuccess {
    pub field: FieldKind,
    pub old_value: String,
    pub new_value: String,
    pub position: Span,
}

pub struct EditExecutor {
    buffer: Mutex<TextBuffer>,
    busy: AtomicBool,
}

impl EditExecutor {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            buffer: Mutex::new(TextBuffer::new(document)),
            busy: AtomicBool::new(false),
        }
    }

    fn lock_buffer(&self) -> MutexGuard<'_, TextBuffer> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims the busy flag; released when the returned guard drops.
    fn claim(&self) -> Result<InFlight<'_>, EditError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EditError::Busy)?;
        Ok(InFlight {
            executor: self,
            animation: None,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Snapshot of the live buffer.
    pub fn document(&self) -> String {
        self.lock_buffer().text().to_string()
    }

    /// Replaces the whole buffer. Rejected while an animated edit is running.
    pub fn replace_document(&self, document: impl Into<String>) -> Result<(), EditError> {
        let _flight = self.claim()?;
        self.lock_buffer().set_text(document);
        Ok(())
    }

    pub fn take_events(&self) -> Vec<ViewEvent> {
        self.lock_buffer().take_events()
    }

    /// Resolves `instruction` against the live buffer. Read-only.
    pub fn parse_edit_command(&self, instruction: &str) -> FieldLookup {
        let buffer = self.lock_buffer();
        locate_field(buffer.text(), instruction)
    }

    /// Applies a field edit with visible feedback, pacing steps with `tokio::time::sleep`.
    pub async fn execute_edit_command(
        &self,
        instruction: &str,
        options: AnimationOptions,
    ) -> Result<EditSuccess, EditError> {
        let mut flight = self.claim()?;

        let field_match = match self.parse_edit_command(instruction) {
            FieldLookup::Found(m) => m,
            FieldLookup::NotFound { reason } => {
                debug!(%reason, "edit command unresolved");
                return Err(EditError::Unresolved(reason));
            }
        };
        let new_value = field_match.new_value.clone().ok_or(EditError::MissingValue)?;

        info!(
            field = %field_match.field,
            from = field_match.position.from,
            to = field_match.position.to,
            "applying field edit"
        );

        let animation = flight
            .animation
            .insert(ReplaceAnimation::new(field_match.position, &new_value, options));

        loop {
            let wait = {
                let mut buffer = self.lock_buffer();
                animation.step(&mut buffer)
            };
            match wait {
                Some(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
                Some(_) => {}
                None => break,
            }
        }

        Ok(EditSuccess {
            field: field_match.field,
            old_value: field_match.old_value,
            new_value,
            position: field_match.position,
        })
    }
}

/// Holds the busy flag for one operation. On drop, any unfinished animation is
/// fast-forwarded before the flag is cleared.
struct InFlight<'a> {
    executor: &'a EditExecutor,
    animation: Option<ReplaceAnimation>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(animation) = self.animation.as_mut().filter(|a| !a.is_done()) {
            warn!(phase = ?animation.phase(), "edit interrupted; completing replace");
            let mut buffer = self.executor.lock_buffer();
            animation.finish(&mut buffer);
        }
        self.executor.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::patch::field_locator::REASON_NO_FIELD;

    const DOC: &str = "\\documentclass{resume}\n\\name{Jane Doe}\n\\email{jane.old@example.com}\n\\begin{document}\n\\end{document}";

    #[tokio::test]
    async fn test_execute_replaces_field_value() {
        let exec = EditExecutor::new(DOC);
        let result = exec
            .execute_edit_command("change my email to jane@doe.com", AnimationOptions::instant())
            .await
            .unwrap();

        assert_eq!(result.field, FieldKind::Email);
        assert_eq!(result.old_value, "jane.old@example.com");
        assert_eq!(result.new_value, "jane@doe.com");
        assert_eq!(exec.document(), DOC.replace("jane.old@example.com", "jane@doe.com"));
        assert!(!exec.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_run_produces_same_buffer() {
        let exec = EditExecutor::new(DOC);
        exec.execute_edit_command("update my name to John Smith", AnimationOptions::default())
            .await
            .unwrap();
        assert_eq!(exec.document(), DOC.replace("Jane Doe", "John Smith"));

        let events = exec.take_events();
        assert!(matches!(events.first(), Some(ViewEvent::ScrollTo { .. })));
        let deletes = events
            .iter()
            .filter(|e| matches!(e, ViewEvent::Delete { .. }))
            .count();
        assert_eq!(deletes, "Jane Doe".len());
    }

    #[tokio::test]
    async fn test_unresolved_command_leaves_buffer_untouched() {
        let exec = EditExecutor::new(DOC);
        let err = exec
            .execute_edit_command("make the summary punchier", AnimationOptions::instant())
            .await
            .unwrap_err();
        assert_eq!(err, EditError::Unresolved(REASON_NO_FIELD.to_string()));
        assert_eq!(exec.document(), DOC);
        assert!(!exec.is_busy());
    }

    #[tokio::test]
    async fn test_missing_value_is_rejected() {
        let exec = EditExecutor::new(DOC);
        let err = exec
            .execute_edit_command("change my email", AnimationOptions::instant())
            .await
            .unwrap_err();
        assert_eq!(err, EditError::MissingValue);
        assert_eq!(err.to_string(), "Could not extract new value from command");
        assert_eq!(exec.document(), DOC);
        assert!(!exec.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_edit_while_busy_is_rejected() {
        let exec = Arc::new(EditExecutor::new(DOC));

        let running = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute_edit_command("change my email to a@b.co", AnimationOptions::default())
                    .await
            })
        };
        while !exec.is_busy() {
            tokio::task::yield_now().await;
        }

        let err = exec
            .execute_edit_command("update my name to John", AnimationOptions::instant())
            .await
            .unwrap_err();
        assert_eq!(err, EditError::Busy);
        assert_eq!(exec.replace_document("x"), Err(EditError::Busy));

        running.await.unwrap().unwrap();
        assert!(exec.document().contains("\\email{a@b.co}"));
        assert!(exec.document().contains("\\name{Jane Doe}"));
        assert!(!exec.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_edit_is_fast_forwarded() {
        let exec = EditExecutor::new(DOC);
        // 300ms focus + 1500ms highlight, then 30ms per deleted char: stops mid-deletion.
        let outcome = tokio::time::timeout(
            Duration::from_millis(1_900),
            exec.execute_edit_command("change my email to jane@doe.com", AnimationOptions::default()),
        )
        .await;

        assert!(outcome.is_err(), "edit should still be running at the timeout");
        assert_eq!(exec.document(), DOC.replace("jane.old@example.com", "jane@doe.com"));
        assert!(!exec.is_busy());
    }

    #[tokio::test]
    async fn test_replace_document_when_idle() {
        let exec = EditExecutor::new(DOC);
        exec.replace_document("new text").unwrap();
        assert_eq!(exec.document(), "new text");
        assert!(!exec.is_busy());
    }

    #[test]
    fn test_parse_is_read_only() {
        let exec = EditExecutor::new(DOC);
        assert!(matches!(
            exec.parse_edit_command("change my phone to 555"),
            FieldLookup::NotFound { .. }
        ));
        assert!(matches!(
            exec.parse_edit_command("set name to Bob"),
            FieldLookup::Found(_)
        ));
        assert_eq!(exec.document(), DOC);
        assert!(exec.take_events().is_empty());
    }
}
