//! Optional content compression applied to uploads before they are stored.

use std::{
    fmt,
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};

use tracing::debug;

use crate::error::Error;

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("{0} not found on PATH")]
    ToolNotFound(&'static str),

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("compressor does not handle {0}")]
    Unsupported(PathBuf),

    #[error("compressor produced no output")]
    EmptyOutput,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transformation that shrinks stored content.
///
/// `input` and `output` are distinct files; the compressor must not touch
/// `input`. Callers keep the original bytes when `compress` fails.
pub trait Compressor: Send + Sync {
    /// Whether this compressor handles files stored under `name`.
    fn applies_to(&self, name: &Path) -> bool;

    fn compress(&self, input: &Path, output: &Path) -> Result<(), CompressError>;
}

/// Ghostscript `-dPDFSETTINGS` presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Quality {
    Default,
    Prepress,
    #[default]
    Printer,
    Ebook,
    Screen,
}

impl Quality {
    pub const ALL: [Quality; 5] = [
        Quality::Default,
        Quality::Prepress,
        Quality::Printer,
        Quality::Ebook,
        Quality::Screen,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Default => "default",
            Quality::Prepress => "prepress",
            Quality::Printer => "printer",
            Quality::Ebook => "ebook",
            Quality::Screen => "screen",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Quality::ALL
            .into_iter()
            .find(|q| q.as_str() == wanted)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unknown PDF quality {s:?} (expected one of default, \
                     prepress, printer, ebook, screen)"
                ))
            })
    }
}

const GS_CANDIDATES: [&str; 3] = ["gs", "gswin64c", "gswin32c"];

/// Rewrites PDFs through Ghostscript's `pdfwrite` device.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ghostscript {
    pub quality: Quality,
}

impl Ghostscript {
    pub fn new(quality: Quality) -> Self {
        Self { quality }
    }

    /// Locate the Ghostscript executable on PATH.
    pub fn find_binary() -> Option<PathBuf> {
        GS_CANDIDATES
            .into_iter()
            .find_map(|candidate| which::which(candidate).ok())
    }

    pub fn is_available() -> bool {
        Self::find_binary().is_some()
    }
}

impl Compressor for Ghostscript {
    fn applies_to(&self, name: &Path) -> bool {
        name.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
    }

    fn compress(&self, input: &Path, output: &Path) -> Result<(), CompressError> {
        let binary =
            Self::find_binary().ok_or(CompressError::ToolNotFound("ghostscript"))?;

        debug!(
            binary = %binary.display(),
            quality = %self.quality,
            input = %input.display(),
            "compressing pdf"
        );

        let result = Command::new(&binary)
            .args([
                "-sDEVICE=pdfwrite",
                "-dCompatibilityLevel=1.4",
                "-dNOPAUSE",
                "-dQUIET",
                "-dBATCH",
            ])
            .arg(format!("-dPDFSETTINGS=/{}", self.quality))
            .arg(format!("-sOutputFile={}", output.display()))
            .arg(input)
            .output()?;

        if !result.status.success() {
            return Err(CompressError::Failed {
                tool: "ghostscript",
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        if std::fs::metadata(output)?.len() == 0 {
            return Err(CompressError::EmptyOutput);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_parses_presets() {
        assert_eq!("ebook".parse::<Quality>().unwrap(), Quality::Ebook);
        assert_eq!(" Screen ".parse::<Quality>().unwrap(), Quality::Screen);
        assert!(matches!(
            "lossless".parse::<Quality>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn default_quality_is_printer() {
        assert_eq!(Ghostscript::default().quality, Quality::Printer);
        assert_eq!(Quality::default().to_string(), "printer");
    }

    #[test]
    fn ghostscript_applies_to_pdf_only() {
        let gs = Ghostscript::default();
        assert!(gs.applies_to(Path::new("scan.pdf")));
        assert!(gs.applies_to(Path::new("SCAN.PDF")));
        assert!(!gs.applies_to(Path::new("photo.jpg")));
        assert!(!gs.applies_to(Path::new("pdf")));
    }

    #[test]
    fn garbage_input_fails_without_touching_input() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("broken.pdf");
        let output = tmp.path().join("out.pdf");
        std::fs::write(&input, b"definitely not a pdf").unwrap();

        let result = Ghostscript::default().compress(&input, &output);

        // Either Ghostscript is missing or it rejects the input.
        assert!(result.is_err());
        assert_eq!(std::fs::read(&input).unwrap(), b"definitely not a pdf");
    }
}
