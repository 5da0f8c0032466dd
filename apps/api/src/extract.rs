//! Text extraction collaborator for uploaded files.
//!
//! Kind is decided by file extension. PDF goes through `pdf-extract`; DOCX is read as a
//! zip and its `w:t` runs collected, one line per paragraph; TeX and plain text are UTF-8.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use serde::Serialize;
use thiserror::Error;

/// Zip-bomb guard for `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const DOCX_BODY: &str = "word/document.xml";

pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "tex", "latex", "txt"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("File type not allowed: '{0}'. Allowed types: pdf, docx, tex, latex, txt")]
    Unsupported(String),

    #[error("File is empty")]
    Empty,

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("File is not valid UTF-8 text")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Docx,
    Tex,
    Text,
}

impl FileKind {
    /// Resolves a kind from a file name's extension, case-insensitively.
    pub fn from_file_name(name: &str) -> Result<Self, ExtractError> {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "docx" => Ok(FileKind::Docx),
            "tex" | "latex" => Ok(FileKind::Tex),
            "txt" => Ok(FileKind::Text),
            _ => Err(ExtractError::Unsupported(ext)),
        }
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], kind: FileKind) -> Result<String, ExtractError>;
}

/// The production extractor. Stateless.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTextExtractor;

impl TextExtractor for FileTextExtractor {
    fn extract(&self, bytes: &[u8], kind: FileKind) -> Result<String, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::Empty);
        }
        match kind {
            FileKind::Pdf => extract_pdf(bytes),
            FileKind::Docx => extract_docx(bytes),
            FileKind::Tex | FileKind::Text => Ok(String::from_utf8(bytes.to_vec())?),
        }
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name(DOCX_BODY)
        .map_err(|_| ExtractError::Docx(format!("{DOCX_BODY} not found")))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(format!("{DOCX_BODY} exceeds size limit")));
    }

    paragraphs_text(&xml)
}

/// Concatenates `w:t` runs; each closed `w:p` ends a line.
fn paragraphs_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => lines.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        lines.push(current);
    }

    Ok(lines.join("\n").trim().to_string())
}
