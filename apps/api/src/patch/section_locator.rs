//! Section Locator: finds the line range a logical section occupies.
//!
//! Documents are not normalized, so three opening syntaxes are accepted
//! (`\begin{rSection}{T}`, `\section{T}`, `% T`) and the earliest terminating marker
//! after the header ends the section. Stopping early on an ambiguous line is
//! preferred over swallowing the next section.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::patch::tables::{
    SectionKind, HARD_SEPARATOR, SECTION_MARKERS, SECTION_TABLE, SECTION_TERMINATORS,
};

/// Headings embedded in a reply: `\section{T}`, `\section*{T}` or `\begin{rSection}{T}`.
static EMBEDDED_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\\(?:section\*?|begin\{rSection\})\{(.*?)\}")
        .expect("embedded title pattern must compile")
});

/// Line range of one section, computed fresh per query.
///
/// Invariant: `start <= content_start <= end <= lines.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionBoundary<'a> {
    lines: Vec<&'a str>,
    /// Line holding the opening marker.
    pub start: usize,
    /// First non-blank line after the header.
    pub content_start: usize,
    /// First line that terminates the section, or `lines.len()`.
    pub end: usize,
}

impl<'a> SectionBoundary<'a> {
    pub fn lines_before(&self) -> &[&'a str] {
        &self.lines[..self.start]
    }

    pub fn section_header(&self) -> &'a str {
        self.lines[self.start]
    }

    pub fn section_content(&self) -> &[&'a str] {
        &self.lines[self.content_start..self.end]
    }

    /// Everything from the terminating line on, closing marker included.
    pub fn lines_after(&self) -> &[&'a str] {
        &self.lines[self.end..]
    }

    /// Reassembles the document with `content` in place of the section body.
    /// The header and the closing marker are kept; `content` is framed by blank lines.
    pub fn replace_content(&self, content: &str) -> String {
        let mut out: Vec<&str> = Vec::with_capacity(self.lines.len() + 3);
        out.extend_from_slice(self.lines_before());
        out.push(self.section_header());
        out.push("");
        out.push(content);
        out.push("");
        out.extend_from_slice(self.lines_after());
        out.join("\n")
    }
}

/// Locates `section` in `document` under any accepted heading syntax.
/// `None` means no opening marker matched; callers pick an insertion fallback.
pub fn locate_section(document: &str, section: SectionKind) -> Option<SectionBoundary<'_>> {
    let markers = SECTION_MARKERS
        .iter()
        .find(|(kind, _)| *kind == section)
        .map(|(_, markers)| markers.as_slice())?;

    locate_with_markers(document, markers)
}

fn locate_with_markers<'a>(document: &'a str, markers: &[Regex]) -> Option<SectionBoundary<'a>> {
    let lines: Vec<&str> = document.split('\n').collect();

    let start = lines
        .iter()
        .position(|line| markers.iter().any(|m| m.is_match(line)))?;

    let mut content_start = start + 1;
    while content_start < lines.len() && lines[content_start].trim().is_empty() {
        content_start += 1;
    }

    let end = lines[content_start..]
        .iter()
        .position(|line| is_terminator(line.trim()))
        .map(|offset| content_start + offset)
        .unwrap_or(lines.len());

    debug!(start, content_start, end, total = lines.len(), "section located");

    Some(SectionBoundary {
        lines,
        start,
        content_start,
        end,
    })
}

fn is_terminator(trimmed: &str) -> bool {
    trimmed == HARD_SEPARATOR || SECTION_TERMINATORS.iter().any(|re| re.is_match(trimmed))
}

/// Infers the logical section from the user's instruction, then from a heading title
/// embedded in `content`. Table order breaks ties.
pub fn identify_section(content: &str, instruction: &str) -> Option<SectionKind> {
    let query = instruction.to_lowercase();
    if let Some(kind) = section_for_text(&query) {
        return Some(kind);
    }

    let title = EMBEDDED_TITLE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())?;
    section_for_text(&title)
}

fn section_for_text(lowered: &str) -> Option<SectionKind> {
    SECTION_TABLE
        .iter()
        .find(|spec| spec.keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|spec| spec.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSECTION_DOC: &str = r"\documentclass{resume}
\name{Jane Doe}
\begin{document}

\begin{rSection}{EXPERIENCE}

\textbf{Engineer} \hfill 2020 -- Present
\begin{itemize}
\item Built things
\end{itemize}

\end{rSection}

\begin{rSection}{Education}
BSc Computer Science
\end{rSection}

\end{document}";

    fn assert_invariant(b: &SectionBoundary<'_>, doc: &str) {
        let total = doc.split('\n').count();
        assert!(b.start <= b.content_start, "start <= content_start");
        assert!(b.content_start <= b.end, "content_start <= end");
        assert!(b.end <= total, "end <= len");
    }

    #[test]
    fn test_locates_rsection_environment() {
        let b = locate_section(RSECTION_DOC, SectionKind::Experience).unwrap();
        assert_invariant(&b, RSECTION_DOC);
        assert_eq!(b.section_header(), r"\begin{rSection}{EXPERIENCE}");
        assert_eq!(b.section_content()[0], r"\textbf{Engineer} \hfill 2020 -- Present");
        assert_eq!(b.lines_after()[0], r"\end{rSection}");
        assert_eq!(b.start, 4);
        assert_eq!(b.content_start, 6);
        assert_eq!(b.end, 11);
    }

    #[test]
    fn test_locates_section_command_case_insensitively() {
        let doc = "\\begin{document}\n\\section*{skills}\nRust, Go\n\\section{Projects}\nX\n\\end{document}";
        let b = locate_section(doc, SectionKind::Skills).unwrap();
        assert_invariant(&b, doc);
        assert_eq!(b.section_content(), &["Rust, Go"]);
        assert_eq!(b.lines_after()[0], "\\section{Projects}");
    }

    #[test]
    fn test_locates_comment_heading() {
        let doc = "\\begin{document}\n% Awards\n\\textbf{Best Paper}\n%%%%%%%%\nrest";
        let b = locate_section(doc, SectionKind::Awards).unwrap();
        assert_invariant(&b, doc);
        assert_eq!(b.section_content(), &["\\textbf{Best Paper}"]);
        assert_eq!(b.lines_after()[0], "%%%%%%%%");
    }

    #[test]
    fn test_section_without_terminator_runs_to_end() {
        let doc = "\\section{Publications}\nPaper A\nPaper B";
        let b = locate_section(doc, SectionKind::Publications).unwrap();
        assert_invariant(&b, doc);
        assert_eq!(b.end, 3);
        assert!(b.lines_after().is_empty());
    }

    #[test]
    fn test_header_on_last_line_gives_empty_content() {
        let doc = "intro\n\\section{Summary}";
        let b = locate_section(doc, SectionKind::Summary).unwrap();
        assert_invariant(&b, doc);
        assert_eq!(b.content_start, 2);
        assert_eq!(b.end, 2);
        assert!(b.section_content().is_empty());
    }

    #[test]
    fn test_missing_section_is_none() {
        assert!(locate_section(RSECTION_DOC, SectionKind::Publications).is_none());
    }

    #[test]
    fn test_first_matching_line_wins() {
        let doc = "\\section{Skills}\nA\n\\section{Technical Skills}\nB";
        let b = locate_section(doc, SectionKind::Skills).unwrap();
        assert_eq!(b.start, 0);
        assert_eq!(b.section_content(), &["A"]);
    }

    #[test]
    fn test_stops_at_next_rsection_without_closer() {
        let doc = "\\begin{rSection}{SKILLS}\nRust\n\\begin{rSection}{PROJECTS}\nP\n\\end{rSection}";
        let b = locate_section(doc, SectionKind::Skills).unwrap();
        assert_eq!(b.section_content(), &["Rust"]);
    }

    #[test]
    fn test_replace_content_keeps_header_and_closer() {
        let b = locate_section(RSECTION_DOC, SectionKind::Education).unwrap();
        let merged = b.replace_content("MSc Physics");
        assert!(merged.contains("\\begin{rSection}{Education}\n\nMSc Physics\n\n\\end{rSection}"));
        assert!(!merged.contains("BSc Computer Science"));
        assert!(merged.contains("\\item Built things"));
    }

    #[test]
    fn test_identify_section_from_instruction() {
        assert_eq!(
            identify_section("", "Update my EXPERIENCE section"),
            Some(SectionKind::Experience)
        );
        assert_eq!(
            identify_section("", "add a certificate from AWS"),
            None,
            "'certificate' alone is not a keyword"
        );
        assert_eq!(
            identify_section("", "list my certifications"),
            Some(SectionKind::Certifications)
        );
    }

    #[test]
    fn test_identify_section_from_embedded_heading() {
        let reply = "\\begin{rSection}{Technical Skills}\nRust\n\\end{rSection}";
        assert_eq!(
            identify_section(reply, "rewrite this"),
            Some(SectionKind::Skills)
        );
        let reply = "\\section*{Honors}\n\\item Dean's list";
        assert_eq!(identify_section(reply, "please redo"), Some(SectionKind::Awards));
    }

    #[test]
    fn test_identify_section_none_without_hints() {
        assert_eq!(identify_section("plain text", "make it better"), None);
    }
}
