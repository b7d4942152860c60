use std::fmt;

use crate::range::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A compile-time problem reported against a source span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Accumulates diagnostics from the binder. Nothing here aborts; the caller
/// decides what to do once binding is over.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, message: impl Into<String>, span: Span, severity: Severity) {
        let diagnostic = Diagnostic {
            message: message.into(),
            span,
            severity,
        };
        tracing::debug!(%diagnostic, ?span, "diagnostic reported");
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.report(message, span, Severity::Error);
    }

    pub fn warning(&mut self, message: impl Into<String>, span: Span) {
        self.report(message, span, Severity::Warning);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_fatal)
    }

    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.is_fatal())
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_fatal())
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_are_not_fatal() {
        let mut sink = DiagnosticSink::new();
        sink.warning("name 'x' is used prior to global declaration", Span::new(0, 3));
        assert!(!sink.has_errors());
        assert_eq!(sink.warnings().count(), 1);

        sink.error("can not delete variable 'x' referenced in nested scope", Span::new(4, 9));
        assert!(sink.has_errors());
        assert_eq!(sink.first_error().map(|d| d.span), Some(Span::new(4, 9)));
        assert_eq!(sink.len(), 2);
    }
}
