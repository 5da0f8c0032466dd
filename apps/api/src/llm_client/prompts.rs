// System prompt for the résumé chat assistant.
// The live document is embedded in the system message on every call so the model never
// has to rely on chat history to know what the user is looking at.

use crate::models::conversation::{LearnedExample, UploadedFile};

/// Characters of a learned example's reply shown in the prompt.
const EXAMPLE_PREVIEW_CHARS: usize = 150;

const ROLE_PREAMBLE: &str = "You are an expert resume assistant. The user is editing a LaTeX \
    resume in a live editor. The complete document is embedded below and is the user's \
    current working copy. Answer questions about the resume from this document, not from \
    chat history.";

const EDITING_RULES: &str = "\
When the user asks you to change the resume:
1. First explain the change in one or two plain sentences.
2. Then return the ENTIRE updated document, from \\documentclass to \\end{document}, in a single ```latex code block.
Never return only a section or a partial snippet; the editor replaces the document with your code block.
Never claim you cannot see the resume. Reference concrete details from it instead.
For questions that need no change, answer conversationally and omit the code block.";

const NO_DOCUMENT: &str = "No resume loaded yet.";

/// Builds the system message for one chat call.
pub fn build_system_prompt(
    document: &str,
    uploaded_files: &[UploadedFile],
    examples: &[LearnedExample],
) -> String {
    let document = if document.trim().is_empty() {
        NO_DOCUMENT
    } else {
        document
    };

    let mut prompt = format!(
        "{ROLE_PREAMBLE}\n\nCURRENT RESUME (LaTeX):\n```latex\n{document}\n```\n\n"
    );

    if !uploaded_files.is_empty() {
        prompt.push_str("ADDITIONAL UPLOADED FILES:\n");
        let files: Vec<String> = uploaded_files
            .iter()
            .map(|f| format!("{}:\n{}", f.name, f.content))
            .collect();
        prompt.push_str(&files.join("\n\n"));
        prompt.push_str("\n\n");
    }

    if !examples.is_empty() {
        prompt.push_str("LEARNED PATTERNS (responses the user rated highly):\n");
        for (i, ex) in examples.iter().enumerate() {
            let preview: String = ex.ai_response.chars().take(EXAMPLE_PREVIEW_CHARS).collect();
            prompt.push_str(&format!(
                "Example {}: {} -> {}...\n",
                i + 1,
                ex.user_message,
                preview
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str(EDITING_RULES);
    prompt
}
