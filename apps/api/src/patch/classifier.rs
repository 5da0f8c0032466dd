//! Response Classifier: decides what an untrusted LLM reply is before anything
//! structural is done with it.
//!
//! Decision order (first match wins):
//! 1. full document (class declaration, or both body markers)
//! 2. preamble / field update (a single-line command also present in the preamble)
//! 3. section update (section inferred from the instruction or an embedded heading)
//! 4. fragment (best-effort smart merge)

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use tracing::debug;

use crate::patch::section_locator::identify_section;
use crate::patch::tables::{SectionKind, STRUCTURAL_COMMANDS};

static DOCUMENT_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\\documentclass").expect("pattern must compile"));
static BEGIN_DOCUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\\begin\{document\}").expect("pattern must compile"));
static END_DOCUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\\end\{document\}").expect("pattern must compile"));

/// A fenced block tagged `latex`, as the chat prompt asks the model to produce.
static LATEX_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```latex\s*\n([\s\S]*?)\n\s*```").expect("pattern must compile")
});

/// Any fenced block tagged `latex`, `tex`, or untagged.
static ANY_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:latex|tex)?[ \t]*\r?\n([\s\S]*?)\r?\n[ \t]*```")
        .expect("pattern must compile")
});

static FENCE_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:latex)?\n?").expect("pattern must compile"));

/// A named command with a literal single-line argument: `\name{...}`.
static COMMAND_WITH_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(\w+)\{[^}\n]*\}").expect("pattern must compile"));

/// What the reply is, consumed exhaustively by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The reply is a complete document; use it verbatim.
    Full,
    /// Preamble commands were rewritten in place.
    Preamble {
        document: String,
        commands: Vec<String>,
    },
    /// The reply is the body of one section.
    Section(SectionKind),
    /// Nothing structured matched.
    Fragment,
}

/// Classifies `reply` against the current `document` and the user's `instruction`.
/// `reply` should already be unwrapped from any surrounding prose (see [`unwrap_reply`]).
pub fn classify(document: &str, reply: &str, instruction: &str) -> Classification {
    if is_full_document(reply) {
        debug!("reply classified as full document");
        return Classification::Full;
    }

    if let Some((document, commands)) = update_preamble_commands(document, reply) {
        debug!(?commands, "reply classified as preamble update");
        return Classification::Preamble { document, commands };
    }

    if let Some(section) = identify_section(reply, instruction) {
        debug!(%section, "reply classified as section update");
        return Classification::Section(section);
    }

    debug!("reply classified as fragment");
    Classification::Fragment
}

/// A document-class declaration, or both body-open and body-close markers.
pub fn is_full_document(text: &str) -> bool {
    DOCUMENT_CLASS.is_match(text) || (BEGIN_DOCUMENT.is_match(text) && END_DOCUMENT.is_match(text))
}

/// Returns the first ```` ```latex ```` block of a chat message, if any.
pub fn extract_latex_block(message: &str) -> Option<&str> {
    LATEX_FENCE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Strips prose around a fenced block. A reply with no fence is returned unchanged.
pub fn unwrap_reply(reply: &str) -> &str {
    ANY_FENCE
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
}

/// Removes every code-fence marker and trims.
pub fn strip_fences(text: &str) -> String {
    FENCE_MARKERS.replace_all(text, "").trim().to_string()
}

/// Rewrites preamble commands named in `reply`.
///
/// For each non-structural `\cmd{...}` in the reply, the first preamble line (before
/// `\begin{document}`) holding a `\cmd{...}` gets its first occurrence replaced by the
/// reply's command. Returns the new document and the commands applied, or `None` when
/// nothing was replaced.
pub fn update_preamble_commands(document: &str, reply: &str) -> Option<(String, Vec<String>)> {
    let mut lines: Vec<String> = document.split('\n').map(String::from).collect();
    let preamble_end = lines
        .iter()
        .position(|line| line.contains(r"\begin{document}"))
        .unwrap_or(lines.len());

    let mut applied = Vec::new();

    for caps in COMMAND_WITH_ARG.captures_iter(reply) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        if STRUCTURAL_COMMANDS.contains(&name) {
            continue;
        }

        let Ok(existing) = Regex::new(&format!(r"\\{}\{{[^}}]*\}}", regex::escape(name))) else {
            continue;
        };

        if let Some(line) = lines[..preamble_end]
            .iter_mut()
            .find(|line| existing.is_match(line))
        {
            let replaced = existing
                .replacen(line.as_str(), 1, NoExpand(whole.as_str()))
                .into_owned();
            *line = replaced;
            applied.push(whole.as_str().to_string());
        }
    }

    if applied.is_empty() {
        None
    } else {
        Some((lines.join("\n"), applied))
    }
}
