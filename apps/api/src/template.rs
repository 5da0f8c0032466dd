use std::path::Path;

use anyhow::{Context, Result};

pub const TEMPLATE_NAME: &str = "FAANGPath Template";

/// Bundled starter résumé, used when no template file is configured.
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/resume_faangpath.tex");

/// Reads the configured template, or returns the bundled one.
pub async fn load_template(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to load template {}", path.display())),
        None => Ok(DEFAULT_TEMPLATE.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::field_locator::locate_field;
    use crate::patch::FieldLookup;

    #[tokio::test]
    async fn test_bundled_template_is_default() {
        let template = load_template(None).await.unwrap();
        assert!(template.contains("\\documentclass{resume}"));
        assert!(template.trim_end().ends_with("\\end{document}"));
    }

    #[test]
    fn test_bundled_template_header_is_editable() {
        for instruction in [
            "change my name to Ada Lovelace",
            "update my email to ada@example.com",
            "change my github to github.com/ada",
        ] {
            assert!(
                matches!(
                    locate_field(DEFAULT_TEMPLATE, instruction),
                    FieldLookup::Found(_)
                ),
                "{instruction}"
            );
        }
    }

    #[tokio::test]
    async fn test_configured_template_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.tex");
        std::fs::write(&path, "\\documentclass{article}").unwrap();
        assert_eq!(
            load_template(Some(&path)).await.unwrap(),
            "\\documentclass{article}"
        );
    }

    #[tokio::test]
    async fn test_missing_template_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_template(Some(&dir.path().join("absent.tex")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("absent.tex"));
    }
}
