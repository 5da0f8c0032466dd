//! Field Locator: maps a free-text instruction to one scalar field of the document
//! and extracts the value the user wants written there.
//!
//! Locating is read-only. Positions are character offsets into the document, which is
//! what the editor buffer addresses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::patch::tables::{FieldKind, FIELD_PATTERNS, FIELD_TABLE};

pub const REASON_NO_FIELD: &str = "Could not identify what to edit";

/// "change|update|set|make|edit ... to|as VALUE", optional trailing period dropped.
/// A period that belongs to the value ("Jr.") is dropped too; sentence punctuation
/// is far more common in instructions.
static NEW_VALUE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:change|update|set|make|edit)\b.*?\b(?:to|as)\s+(.+?)\.?\s*$")
        .expect("new value pattern must compile")
});

/// Leading connector left over after cutting at a keyword ("to ", "as ", ": ").
/// A bare "to" or "as" at the end counts as a connector with no value.
static CONNECTOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:to|as)(?:\s+|$)|:\s*)").expect("connector pattern must compile")
});

/// Half-open character range `[from, to)` in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub from: usize,
    pub to: usize,
}

/// A located field. Constructed per call, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub field: FieldKind,
    pub position: Span,
    /// Literal text currently holding the value.
    pub old_value: String,
    /// Value extracted from the instruction. `None` means the command named a field
    /// but gave nothing to write; callers must not apply it.
    pub new_value: Option<String>,
    /// Full matched text, including any command wrapper around the value.
    pub pattern: String,
}

/// Outcome of a field lookup. "Not found" is an expected result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldLookup {
    Found(FieldMatch),
    NotFound { reason: String },
}

/// Finds the field an instruction targets and where its value sits in `document`.
///
/// Fields are tried in table order. A field qualifies when one of its keywords is a
/// case-insensitive substring of the instruction and one of its patterns matches the
/// document. The first qualifying (field, pattern) pair wins.
pub fn locate_field(document: &str, instruction: &str) -> FieldLookup {
    let lowered = instruction.to_ascii_lowercase();

    for (spec, patterns) in FIELD_TABLE.iter().zip(FIELD_PATTERNS.iter()) {
        if !spec.keywords.iter().any(|kw| lowered.contains(kw)) {
            continue;
        }

        for re in patterns {
            let Some(caps) = re.captures(document) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let value = caps.get(1).unwrap_or(whole);

            let from = char_offset(document, value.start());
            let to = from + value.as_str().chars().count();

            return FieldLookup::Found(FieldMatch {
                field: spec.kind,
                position: Span { from, to },
                old_value: value.as_str().to_string(),
                new_value: extract_new_value(instruction, spec.keywords),
                pattern: whole.as_str().to_string(),
            });
        }
    }

    FieldLookup::NotFound {
        reason: REASON_NO_FIELD.to_string(),
    }
}

/// Pulls the intended new value out of an instruction.
///
/// First tries "verb ... to/as VALUE". Falls back to whatever follows the last
/// keyword occurrence, minus a leading "to", "as" or ":". Empty results are `None`.
pub fn extract_new_value(instruction: &str, keywords: &[&str]) -> Option<String> {
    if let Some(caps) = NEW_VALUE_PATTERN.captures(instruction) {
        let value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    // ASCII lowering keeps byte offsets aligned with the original instruction.
    let lowered = instruction.to_ascii_lowercase();
    let cut = keywords
        .iter()
        .filter_map(|kw| lowered.rfind(kw).map(|idx| idx + kw.len()))
        .max()?;

    let rest = instruction[cut..].trim();
    let rest = CONNECTOR_PATTERN.replace(rest, "");
    let rest = rest.trim();

    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Applies a located field's new value to `document`, replacing only the matched span.
/// Returns `None` when the match carries no new value.
pub fn apply_field_match(document: &str, field_match: &FieldMatch) -> Option<String> {
    let new_value = field_match.new_value.as_deref()?;
    let start = byte_offset(document, field_match.position.from);
    let end = byte_offset(document, field_match.position.to);

    let mut out = String::with_capacity(document.len() + new_value.len());
    out.push_str(&document[..start]);
    out.push_str(new_value);
    out.push_str(&document[end..]);
    Some(out)
}

/// Converts a byte index into a character offset.
pub fn char_offset(text: &str, byte_idx: usize) -> usize {
    text[..byte_idx].chars().count()
}

/// Converts a character offset into a byte index, clamped to the end of `text`.
pub fn byte_offset(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r"\documentclass{resume}
\name{Jane Doe}
\address{123 Main St \\ Springfield}
\email{jane.old@example.com}
\phone{(555) 123-4567}
\begin{document}
\href{https://www.linkedin.com/in/janedoe}{linkedin.com/in/janedoe}
\href{https://github.com/janedoe}{github.com/janedoe}
\end{document}";

    fn found(lookup: FieldLookup) -> FieldMatch {
        match lookup {
            FieldLookup::Found(m) => m,
            FieldLookup::NotFound { reason } => panic!("expected a match, got: {reason}"),
        }
    }

    #[test]
    fn test_change_email_extracts_full_address() {
        let m = found(locate_field(HEADER, "change my email to jane@doe.com"));
        assert_eq!(m.field, FieldKind::Email);
        assert_eq!(m.old_value, "jane.old@example.com");
        assert_eq!(m.new_value.as_deref(), Some("jane@doe.com"));
        assert_eq!(m.pattern, r"\email{jane.old@example.com}");
    }

    #[test]
    fn test_applying_email_match_replaces_only_that_span() {
        let m = found(locate_field(HEADER, "change my email to jane@doe.com"));
        let updated = apply_field_match(HEADER, &m).unwrap();
        assert_eq!(
            updated,
            HEADER.replace("jane.old@example.com", "jane@doe.com")
        );
    }

    #[test]
    fn test_position_points_at_old_value() {
        let m = found(locate_field(HEADER, "update my name to John Smith"));
        let chars: Vec<char> = HEADER.chars().collect();
        let slice: String = chars[m.position.from..m.position.to].iter().collect();
        assert_eq!(slice, "Jane Doe");
        assert_eq!(m.new_value.as_deref(), Some("John Smith"));
    }

    #[test]
    fn test_position_is_character_based() {
        let doc = "% Résumé – header\n\\name{Zoë Doe}";
        let m = found(locate_field(doc, "set name to Zoe Doe"));
        let chars: Vec<char> = doc.chars().collect();
        let slice: String = chars[m.position.from..m.position.to].iter().collect();
        assert_eq!(slice, "Zoë Doe");
        let updated = apply_field_match(doc, &m).unwrap();
        assert_eq!(updated, "% Résumé – header\n\\name{Zoe Doe}");
    }

    #[test]
    fn test_linkedin_matches_link_text() {
        let m = found(locate_field(
            HEADER,
            "change linkedin to linkedin.com/in/jane-d",
        ));
        assert_eq!(m.field, FieldKind::Linkedin);
        assert_eq!(m.old_value, "linkedin.com/in/janedoe");
        assert_eq!(m.new_value.as_deref(), Some("linkedin.com/in/jane-d"));
    }

    #[test]
    fn test_github_matches_link_text() {
        let m = found(locate_field(HEADER, "update github to github.com/jd"));
        assert_eq!(m.field, FieldKind::Github);
        assert_eq!(m.old_value, "github.com/janedoe");
    }

    #[test]
    fn test_pattern_order_prefers_command_over_bare_value() {
        let doc = "contact: other@site.org\n\\email{me@site.org}";
        let m = found(locate_field(doc, "change email to new@site.org"));
        assert_eq!(m.old_value, "me@site.org");
    }

    #[test]
    fn test_bare_email_is_found_without_command() {
        let doc = r"\address{Springfield \\ jane@old.io}";
        let m = found(locate_field(doc, "change email to jane@new.io"));
        assert_eq!(m.old_value, "jane@old.io");
        assert_eq!(m.pattern, "jane@old.io");
    }

    #[test]
    fn test_no_keyword_is_not_found() {
        let lookup = locate_field(HEADER, "make the summary punchier");
        assert_eq!(
            lookup,
            FieldLookup::NotFound {
                reason: REASON_NO_FIELD.to_string()
            }
        );
    }

    #[test]
    fn test_keyword_without_matching_pattern_is_not_found() {
        let doc = "\\begin{document}\nNothing here\n\\end{document}";
        assert!(matches!(
            locate_field(doc, "change my github to github.com/x"),
            FieldLookup::NotFound { .. }
        ));
    }

    #[test]
    fn test_locating_does_not_mutate_document() {
        let doc = HEADER.to_string();
        let _ = locate_field(&doc, "change my email to jane@doe.com");
        assert_eq!(doc, HEADER);
    }

    #[test]
    fn test_extract_value_trailing_period_dropped() {
        let v = extract_new_value("Please change my name to John Smith.", &["name"]);
        assert_eq!(v.as_deref(), Some("John Smith"));
    }

    #[test]
    fn test_extract_value_ignores_to_inside_words() {
        let v = extract_new_value("update my last name as Doe", &["name"]);
        assert_eq!(v.as_deref(), Some("Doe"));
    }

    #[test]
    fn test_extract_value_falls_back_to_text_after_keyword() {
        let v = extract_new_value("email: jane@doe.com", &["email", "e-mail", "mail"]);
        assert_eq!(v.as_deref(), Some("jane@doe.com"));

        let v = extract_new_value("new phone to 555-0000", &["phone"]);
        assert_eq!(v.as_deref(), Some("555-0000"));
    }

    #[test]
    fn test_extract_value_empty_is_none() {
        assert_eq!(
            extract_new_value("change my email", &["email", "e-mail", "mail"]),
            None
        );
    }

    #[test]
    fn test_extract_value_bare_trailing_connector_is_none() {
        assert_eq!(
            extract_new_value("change my email to", &["email", "e-mail", "mail"]),
            None
        );
        assert_eq!(
            extract_new_value("set name as", &["name", "full name"]),
            None
        );
        assert_eq!(extract_new_value("phone:", &["phone"]), None);
    }

    #[test]
    fn test_bare_trailing_connector_is_never_applied() {
        let m = found(locate_field(HEADER, "change my email to"));
        assert_eq!(m.new_value, None);
        assert_eq!(apply_field_match(HEADER, &m), None);
    }

    #[test]
    fn test_extract_value_keeps_words_starting_with_connector() {
        let v = extract_new_value("change my name to Tom Astor", &["name"]);
        assert_eq!(v.as_deref(), Some("Tom Astor"));
        let v = extract_new_value("name tomas", &["name"]);
        assert_eq!(v.as_deref(), Some("tomas"));
    }

    #[test]
    fn test_extract_value_drops_period_that_belongs_to_value() {
        // Sentence punctuation and abbreviation dots are indistinguishable here.
        let v = extract_new_value("change my name to John Smith Jr.", &["name"]);
        assert_eq!(v.as_deref(), Some("John Smith Jr"));
    }

    #[test]
    fn test_match_without_value_is_still_found() {
        let m = found(locate_field(HEADER, "change my email"));
        assert_eq!(m.field, FieldKind::Email);
        assert_eq!(m.new_value, None);
        assert_eq!(apply_field_match(HEADER, &m), None);
    }

    #[test]
    fn test_byte_and_char_offsets_round_trip() {
        let text = "aé😀b";
        for (char_idx, (byte_idx, _)) in text.char_indices().enumerate() {
            assert_eq!(byte_offset(text, char_idx), byte_idx);
            assert_eq!(char_offset(text, byte_idx), char_idx);
        }
        assert_eq!(byte_offset(text, 99), text.len());
    }
}
