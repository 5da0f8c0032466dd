//! Declarative pattern tables shared by the field and section locators.
//!
//! Adding a field, a section, or another title spelling is a data change here;
//! neither locator branches on a specific field or section name.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Fields
// ────────────────────────────────────────────────────────────────────────────

/// A scalar value living in the document's header area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    Email,
    Phone,
    Address,
    Linkedin,
    Github,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Name => "name",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Address => "address",
            FieldKind::Linkedin => "linkedin",
            FieldKind::Github => "github",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the field table.
///
/// `keywords` are matched as lowercase substrings of the instruction.
/// `patterns` are tried against the document in declaration order; capture
/// group 1 of each pattern holds the field's current value.
#[derive(Debug)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub keywords: &'static [&'static str],
    pub patterns: &'static [&'static str],
}

/// Declaration order is the tie-break: the first field whose keyword appears in
/// the instruction and whose pattern matches the document wins.
pub const FIELD_TABLE: &[FieldSpec] = &[
    FieldSpec {
        kind: FieldKind::Name,
        keywords: &["name", "my name", "called"],
        patterns: &[r"\\name\{([^}]+)\}", r"\\author\{([^}]+)\}"],
    },
    FieldSpec {
        kind: FieldKind::Email,
        keywords: &["email", "e-mail", "mail"],
        patterns: &[
            r"\\email\{([^}]+)\}",
            r"\\href\{mailto:([^}]+)\}",
            r"([a-zA-Z0-9._-]+@[a-zA-Z0-9._-]+\.[a-zA-Z0-9_-]+)",
        ],
    },
    FieldSpec {
        kind: FieldKind::Phone,
        keywords: &["phone", "mobile", "cell", "number"],
        patterns: &[
            r"\\phone\{([^}]+)\}",
            r"\\mobile\{([^}]+)\}",
            r"(\+?\d{1,3}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{1,4}[-.\s]?\d{1,9})",
        ],
    },
    FieldSpec {
        kind: FieldKind::Address,
        keywords: &["address", "location", "city", "street"],
        patterns: &[r"\\address\{([^}]+)\}", r"\\location\{([^}]+)\}"],
    },
    FieldSpec {
        kind: FieldKind::Linkedin,
        keywords: &["linkedin", "linked in"],
        patterns: &[
            r"\\linkedin\{([^}]+)\}",
            r"\\href\{https?://(?:www\.)?linkedin\.com/[^}]+\}\{([^}]+)\}",
        ],
    },
    FieldSpec {
        kind: FieldKind::Github,
        keywords: &["github", "git hub"],
        patterns: &[
            r"\\github\{([^}]+)\}",
            r"\\href\{https?://(?:www\.)?github\.com/[^}]+\}\{([^}]+)\}",
        ],
    },
];

/// Compiled field patterns, index-aligned with `FIELD_TABLE`.
pub static FIELD_PATTERNS: Lazy<Vec<Vec<Regex>>> = Lazy::new(|| {
    FIELD_TABLE
        .iter()
        .map(|spec| {
            spec.patterns
                .iter()
                .map(|p| Regex::new(p).expect("field pattern must compile"))
                .collect()
        })
        .collect()
});

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

/// A named logical block of the résumé.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Summary,
    Experience,
    Education,
    Skills,
    Projects,
    Certifications,
    Awards,
    Publications,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Summary => "summary",
            SectionKind::Experience => "experience",
            SectionKind::Education => "education",
            SectionKind::Skills => "skills",
            SectionKind::Projects => "projects",
            SectionKind::Certifications => "certifications",
            SectionKind::Awards => "awards",
            SectionKind::Publications => "publications",
        }
    }

    pub fn spec(&self) -> &'static SectionSpec {
        SECTION_TABLE
            .iter()
            .find(|s| s.kind == *self)
            .unwrap_or(&SECTION_TABLE[0])
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the section table.
///
/// `keywords` infer the section from free text (instruction or a heading title).
/// `titles` are the literal heading spellings accepted when locating it.
#[derive(Debug)]
pub struct SectionSpec {
    pub kind: SectionKind,
    pub keywords: &'static [&'static str],
    pub titles: &'static [&'static str],
}

pub const SECTION_TABLE: &[SectionSpec] = &[
    SectionSpec {
        kind: SectionKind::Summary,
        keywords: &["summary", "profile", "about", "objective", "professional summary"],
        titles: &["OBJECTIVE", "Professional Summary", "Summary", "Profile", "About"],
    },
    SectionSpec {
        kind: SectionKind::Experience,
        keywords: &["experience", "work history", "employment", "job", "work experience"],
        titles: &[
            "EXPERIENCE",
            "Work Experience",
            "Employment",
            "Professional Experience",
        ],
    },
    SectionSpec {
        kind: SectionKind::Education,
        keywords: &["education", "degree", "university", "college", "school"],
        titles: &["Education", "EDUCATION", "Academic Background"],
    },
    SectionSpec {
        kind: SectionKind::Skills,
        keywords: &["skills", "technologies", "expertise", "technical skills"],
        titles: &["SKILLS", "Technical Skills", "Skills", "Expertise"],
    },
    SectionSpec {
        kind: SectionKind::Projects,
        keywords: &["projects", "portfolio", "work"],
        titles: &["PROJECTS", "Projects", "Portfolio"],
    },
    SectionSpec {
        kind: SectionKind::Certifications,
        keywords: &["certifications", "certificates", "credentials"],
        titles: &["Certifications", "CERTIFICATIONS", "Certificates"],
    },
    SectionSpec {
        kind: SectionKind::Awards,
        keywords: &["awards", "achievements", "honors"],
        titles: &["Awards", "AWARDS", "Achievements", "Honors"],
    },
    SectionSpec {
        kind: SectionKind::Publications,
        keywords: &["publications", "papers", "articles"],
        titles: &["Publications", "PUBLICATIONS", "Papers"],
    },
];

/// Builds the three accepted opening markers for one heading title:
/// `\begin{rSection}{T}`, `\section{T}` / `\section*{T}`, and `% T`.
pub fn opening_markers(title: &str) -> Vec<Regex> {
    let title = regex::escape(title);
    [
        format!(r"(?i)\\begin\{{rSection\}}\{{{title}\}}"),
        format!(r"(?i)\\section\*?\{{{title}\}}"),
        format!(r"(?i)%+\s*{title}"),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("section marker must compile"))
    .collect()
}

/// Compiled opening markers per section, in title declaration order.
pub static SECTION_MARKERS: Lazy<Vec<(SectionKind, Vec<Regex>)>> = Lazy::new(|| {
    SECTION_TABLE
        .iter()
        .map(|spec| {
            let markers = spec.titles.iter().flat_map(|t| opening_markers(t)).collect();
            (spec.kind, markers)
        })
        .collect()
});

/// Lines (trimmed) that close whatever section is currently open.
/// The earliest one after the header wins.
pub static SECTION_TERMINATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\\end\{rSection\}",
        r"^\\section\*?\{",
        r"^\\end\{document\}",
        r"^%%%+",
        r"^\\begin\{rSection\}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("terminator pattern must compile"))
    .collect()
});

/// Separator some templates put between sections.
pub const HARD_SEPARATOR: &str = "%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%%";

// ────────────────────────────────────────────────────────────────────────────
// Structural commands
// ────────────────────────────────────────────────────────────────────────────

/// Command names that carry document structure rather than a field value.
/// A reply command with one of these names is never treated as a preamble update.
pub const STRUCTURAL_COMMANDS: &[&str] = &[
    "begin",
    "end",
    "section",
    "subsection",
    "item",
    "textbf",
    "textit",
    "href",
];

/// Editing verbs dropped from an instruction before deriving smart-merge search terms.
pub const EDIT_VERBS: &[&str] = &[
    "change", "update", "modify", "edit", "add", "remove", "delete", "fix",
];

/// Words that make an instruction worth trying on the field-edit fast path.
pub const EDIT_COMMAND_HINTS: &[&str] = &[
    "change", "update", "edit", "modify", "replace", "set", "name", "email", "phone", "address",
    "linkedin", "github",
];
