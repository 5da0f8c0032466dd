//! Document compiler collaborator: LaTeX source in, PDF bytes out.
//!
//! Each compile runs in its own temp dir, so concurrent compiles never share files.
//! Failures are reported verbatim and never retried.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

const TEX_FILE: &str = "resume.tex";
const PDF_FILE: &str = "resume.pdf";

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{message}")]
    Failed { message: String, details: String },

    #[error("Compilation timed out after {0}s")]
    Timeout(u64),

    #[error("Compiler I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compiler finished without producing a PDF")]
    MissingOutput,
}

impl CompileError {
    /// Compiler log for the user, when there is one.
    pub fn details(&self) -> Option<&str> {
        match self {
            CompileError::Failed { details, .. } => Some(details),
            _ => None,
        }
    }
}

#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    async fn compile(&self, document: &str) -> Result<Vec<u8>, CompileError>;

    /// Version string of the underlying toolchain, for the status endpoint.
    async fn version(&self) -> Result<String, CompileError>;
}

/// Runs `tectonic <file> --outdir <dir>`.
#[derive(Debug, Clone)]
pub struct TectonicCompiler {
    bin: String,
    timeout: Duration,
    class_file: Option<PathBuf>,
}

impl TectonicCompiler {
    pub fn new(bin: impl Into<String>, timeout: Duration, class_file: Option<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            timeout,
            class_file,
        }
    }

    async fn run(&self, command: &mut Command) -> Result<std::process::Output, CompileError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "compiler timed out");
                Err(CompileError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}

#[async_trait]
impl DocumentCompiler for TectonicCompiler {
    async fn compile(&self, document: &str) -> Result<Vec<u8>, CompileError> {
        let workdir = tempfile::tempdir()?;
        let tex_path = workdir.path().join(TEX_FILE);
        tokio::fs::write(&tex_path, document).await?;

        if let Some(class_file) = &self.class_file {
            if let Some(name) = class_file.file_name() {
                tokio::fs::copy(class_file, workdir.path().join(name)).await?;
            }
        }

        debug!(bin = %self.bin, dir = %workdir.path().display(), "compiling document");

        let output = self
            .run(
                Command::new(&self.bin)
                    .arg(&tex_path)
                    .arg("--outdir")
                    .arg(workdir.path()),
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let details = if stderr.is_empty() { stdout } else { stderr };
            let message = match output.status.code() {
                Some(code) => format!("LaTeX compilation failed (exit code {code})"),
                None => "LaTeX compilation failed".to_string(),
            };
            warn!(%message, "compile failed");
            return Err(CompileError::Failed { message, details });
        }

        let pdf = match tokio::fs::read(workdir.path().join(PDF_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CompileError::MissingOutput)
            }
            Err(e) => return Err(e.into()),
        };

        info!(bytes = pdf.len(), "document compiled");
        Ok(pdf)
    }

    async fn version(&self) -> Result<String, CompileError> {
        let output = self.run(Command::new(&self.bin).arg("--version")).await?;
        if !output.status.success() {
            return Err(CompileError::Failed {
                message: format!("'{} --version' failed", self.bin),
                details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
