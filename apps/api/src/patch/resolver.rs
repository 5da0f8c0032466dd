//! Patch Resolver: turns an LLM reply into the next revision of the document.
//!
//! The reply is unwrapped from surrounding prose, classified, and dispatched to one
//! merge strategy. Every branch produces an `UpdateResult`; a `warning` is attached
//! whenever the merge had to guess.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::patch::classifier::{classify, is_full_document, strip_fences, unwrap_reply, Classification};
use crate::patch::section_locator::{identify_section, locate_section};
use crate::patch::tables::{SectionKind, EDIT_VERBS};

/// Fragments shorter than this may replace a single matching line.
const SHORT_FRAGMENT_LINES: usize = 5;
/// Search terms must be longer than this many characters.
const MIN_TERM_CHARS: usize = 3;

pub const PREAMBLE_SECTION_LABEL: &str = "contact info";
pub const LOW_CONFIDENCE_WARNING: &str = "Could not tell where this change belongs, so the AI \
    response replaced the whole document. Review it before compiling.";

static RSECTION_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\\begin\{rSection\}\{[^}]*\}\s*").expect("pattern must compile")
});
static RSECTION_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\\end\{rSection\}").expect("pattern must compile"));

/// Which strategy produced the new document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Full,
    Preamble,
    Section,
    Smart,
}

/// The single contract the orchestration layer consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub document: String,
    pub update_type: UpdateType,
    pub section: Option<String>,
    pub warning: Option<String>,
}

/// Where a section merge put the new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The reply was itself a full document and was used as-is.
    FullDocument,
    /// The section body was replaced between its header and closing marker.
    Replaced,
    /// The section was missing; content went right after `\begin{document}`.
    InsertedAfterBegin,
    /// The section was missing and there was nowhere to insert.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionMerge {
    pub document: String,
    pub placement: Placement,
}

impl SectionMerge {
    fn warning(&self, section: SectionKind) -> Option<String> {
        match self.placement {
            Placement::FullDocument | Placement::Replaced => None,
            Placement::InsertedAfterBegin => Some(format!(
                "Section '{section}' not found; inserted the new content at the top of the document body."
            )),
            Placement::Unchanged => Some(format!(
                "Section '{section}' not found and the document has no \\begin{{document}}; nothing was changed."
            )),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Entry point
// ────────────────────────────────────────────────────────────────────────────

/// Resolves an LLM `reply` against the current `document` for the given `instruction`.
pub fn resolve_update(document: &str, reply: &str, instruction: &str) -> UpdateResult {
    let payload = unwrap_reply(reply);

    match classify(document, payload, instruction) {
        Classification::Full => UpdateResult {
            document: payload.to_string(),
            update_type: UpdateType::Full,
            section: None,
            warning: None,
        },
        Classification::Preamble { document, .. } => UpdateResult {
            document,
            update_type: UpdateType::Preamble,
            section: Some(PREAMBLE_SECTION_LABEL.to_string()),
            warning: None,
        },
        Classification::Section(section) => {
            let merged = merge_section(document, payload, section);
            let warning = merged.warning(section);
            UpdateResult {
                document: merged.document,
                update_type: UpdateType::Section,
                section: Some(section.to_string()),
                warning,
            }
        }
        Classification::Fragment => smart_merge(document, payload, instruction),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Section merge
// ────────────────────────────────────────────────────────────────────────────

/// Replaces the body of `section` with the reply's content.
///
/// Echoed `rSection` wrappers are stripped so the document's own header and closer are
/// kept. A missing section is inserted after `\begin{document}`; with no body marker
/// either, the document comes back unchanged.
pub fn merge_section(document: &str, reply: &str, section: SectionKind) -> SectionMerge {
    if is_full_document(reply) {
        return SectionMerge {
            document: reply.to_string(),
            placement: Placement::FullDocument,
        };
    }

    let content = strip_section_wrappers(&strip_fences(reply));

    if let Some(boundary) = locate_section(document, section) {
        debug!(
            %section,
            start = boundary.start,
            end = boundary.end,
            "replacing section body"
        );
        return SectionMerge {
            document: boundary.replace_content(&content),
            placement: Placement::Replaced,
        };
    }

    warn!(%section, "section not found in document");

    let mut lines: Vec<&str> = document.split('\n').collect();
    match lines.iter().position(|l| l.contains(r"\begin{document}")) {
        Some(idx) => {
            lines.splice(idx + 1..idx + 1, ["", content.as_str(), ""]);
            SectionMerge {
                document: lines.join("\n"),
                placement: Placement::InsertedAfterBegin,
            }
        }
        None => SectionMerge {
            document: document.to_string(),
            placement: Placement::Unchanged,
        },
    }
}

/// Drops echoed `\begin{rSection}{..}` / `\end{rSection}` lines, and an outer itemize
/// wrapper whose only content is another itemize block.
pub fn strip_section_wrappers(content: &str) -> String {
    let content = RSECTION_OPEN.replace_all(content, "");
    let content = RSECTION_CLOSE.replace_all(&content, "");
    let content = content.trim();

    let lines: Vec<&str> = content.split('\n').collect();
    if is_single_itemize_block(&lines) && is_single_itemize_block(&lines[1..lines.len() - 1]) {
        return lines[1..lines.len() - 1].join("\n").trim().to_string();
    }

    content.to_string()
}

/// True when the first line opens an itemize that closes exactly on the last line.
fn is_single_itemize_block(lines: &[&str]) -> bool {
    if lines.len() < 2
        || lines[0].trim() != r"\begin{itemize}"
        || lines[lines.len() - 1].trim() != r"\end{itemize}"
    {
        return false;
    }

    let mut depth: i32 = 0;
    for (i, line) in lines.iter().enumerate() {
        depth += line.matches(r"\begin{itemize}").count() as i32;
        depth -= line.matches(r"\end{itemize}").count() as i32;
        if depth <= 0 && i + 1 < lines.len() {
            return false;
        }
    }
    depth == 0
}

// ────────────────────────────────────────────────────────────────────────────
// Smart merge (fallback)
// ────────────────────────────────────────────────────────────────────────────

/// Best-effort merge for fragments that classified as nothing in particular.
///
/// 1. A short fragment replaces the first line containing a search term.
/// 2. Otherwise a section inferred from the fragment or instruction is merged.
/// 3. Otherwise the fragment becomes the whole document, with a warning.
pub fn smart_merge(document: &str, reply: &str, instruction: &str) -> UpdateResult {
    let fragment = strip_fences(reply);
    let terms = search_terms(instruction);

    if !terms.is_empty() && fragment.split('\n').count() < SHORT_FRAGMENT_LINES {
        let mut lines: Vec<&str> = document.split('\n').collect();
        let hit = lines.iter().position(|line| {
            let line = line.to_lowercase();
            terms.iter().any(|t| line.contains(t.as_str()))
        });

        if let Some(idx) = hit {
            debug!(line = idx, "smart merge replaced a single line");
            lines[idx] = &fragment;
            return UpdateResult {
                document: lines.join("\n"),
                update_type: UpdateType::Smart,
                section: None,
                warning: None,
            };
        }
    }

    if let Some(section) = identify_section(&fragment, instruction) {
        let merged = merge_section(document, &fragment, section);
        let warning = merged.warning(section);
        return UpdateResult {
            document: merged.document,
            update_type: UpdateType::Smart,
            section: Some(section.to_string()),
            warning,
        };
    }

    warn!("smart merge fell through; using the fragment as the full document");
    UpdateResult {
        document: fragment,
        update_type: UpdateType::Smart,
        section: None,
        warning: Some(LOW_CONFIDENCE_WARNING.to_string()),
    }
}

/// Lowercased instruction words longer than three characters, editing verbs removed.
pub fn search_terms(instruction: &str) -> Vec<String> {
    instruction
        .to_lowercase()
        .split_whitespace()
        .filter(|word| !EDIT_VERBS.contains(word))
        .filter(|word| word.chars().count() > MIN_TERM_CHARS)
        .map(String::from)
        .collect()
}
