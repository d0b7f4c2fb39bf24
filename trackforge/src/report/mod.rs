//! Import diagnostics.
//!
//! Importing a track file never aborts on the first bad element. Problems are
//! collected into an [`ImportReport`] with a severity per finding:
//!
//! - [`Severity::Warning`]: the element was understood with a caveat and the
//!   data was kept.
//! - [`Severity::Error`]: one element was dropped; the rest of the file was
//!   imported.
//! - [`Severity::Fatal`]: the file is not usable (malformed XML, wrong root,
//!   I/O failure) and the partial result must be discarded.
//!
//! The report's overall severity is the maximum of its findings.

use std::fmt;

/// Severity of a single import finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Nothing to report.
    None,
    /// Data kept, with a caveat.
    Warning,
    /// One element dropped, rest of the file kept.
    Error,
    /// File unusable.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::None => write!(f, "ok"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// One import finding.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Byte offset into the source where the finding was made, when known.
    pub offset: Option<u64>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{}: {} (at byte {})", self.severity, self.message, offset),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Collected findings for one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    file: Option<String>,
    diagnostics: Vec<Diagnostic>,
    severity: Option<Severity>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the source file the findings refer to.
    pub fn set_file(&mut self, file: impl Into<String>) {
        self.file = Some(file.into());
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// Records a finding and raises the overall severity if needed.
    pub fn add(&mut self, severity: Severity, message: impl Into<String>, offset: Option<u64>) {
        self.diagnostics.push(Diagnostic {
            severity,
            message: message.into(),
            offset,
        });
        self.severity = Some(self.severity().max(severity));
    }

    pub fn warning(&mut self, message: impl Into<String>, offset: Option<u64>) {
        self.add(Severity::Warning, message, offset);
    }

    pub fn error(&mut self, message: impl Into<String>, offset: Option<u64>) {
        self.add(Severity::Error, message, offset);
    }

    pub fn fatal(&mut self, message: impl Into<String>, offset: Option<u64>) {
        self.add(Severity::Fatal, message, offset);
    }

    /// Overall severity, the maximum over all findings.
    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or(Severity::None)
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Findings as display strings, in the order they were recorded.
    pub fn to_message_list(&self) -> Vec<String> {
        self.diagnostics.iter().map(|d| d.to_string()).collect()
    }
}
