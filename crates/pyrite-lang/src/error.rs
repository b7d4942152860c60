use miette::{Diagnostic as MietteDiagnostic, SourceSpan};

use crate::diagnostic::{Diagnostic, Severity};

/// A compilation unit rejected because binding reported at least one fatal
/// diagnostic.
#[derive(PartialEq, Debug, thiserror::Error)]
#[error("{}", cause.message)]
pub struct Error {
    /// The first fatal diagnostic.
    pub cause: Diagnostic,
    /// Every diagnostic reported for the unit, warnings included.
    pub diagnostics: Vec<Diagnostic>,
    pub source_code: String,
    pub location: SourceSpan,
}

impl Error {
    /// Builds an error from the accumulated diagnostics, or `None` when none
    /// of them are fatal.
    pub fn from_diagnostics(source_code: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Option<Self> {
        let cause = diagnostics.iter().find(|d| d.is_fatal())?.clone();
        let source_code = source_code.into();
        let start = (cause.span.start as usize).min(source_code.len());
        let len = (cause.span.len() as usize)
            .min(source_code.len().saturating_sub(start))
            .max(1);

        Some(Self {
            location: SourceSpan::new(start.into(), len),
            cause,
            diagnostics,
            source_code,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning)
    }
}

impl MietteDiagnostic for Error {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        Some(Box::new("pyrite::binding"))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let others = self.diagnostics.len().saturating_sub(1);
        if others == 0 {
            None
        } else {
            Some(Box::new(format!("{others} more diagnostic(s) reported")))
        }
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(
            miette::LabeledSpan::new_with_span(Some(self.cause.message.clone()), self.location),
        )))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.source_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Span;

    fn diagnostic(message: &str, start: u32, end: u32, severity: Severity) -> Diagnostic {
        Diagnostic {
            message: message.to_string(),
            span: Span::new(start, end),
            severity,
        }
    }

    #[test]
    fn test_from_diagnostics_picks_first_fatal() {
        let error = Error::from_diagnostics(
            "global x\nx = 1\n",
            vec![
                diagnostic("warn", 0, 8, Severity::Warning),
                diagnostic("boom", 9, 14, Severity::Error),
            ],
        )
        .unwrap();

        assert_eq!(error.to_string(), "boom");
        assert_eq!(error.location, SourceSpan::new(9.into(), 5));
        assert_eq!(error.warnings().count(), 1);
        assert!(error.help().is_some());
    }

    #[test]
    fn test_from_diagnostics_without_errors() {
        assert!(
            Error::from_diagnostics("", vec![diagnostic("warn", 0, 1, Severity::Warning)]).is_none()
        );
    }

    #[test]
    fn test_location_is_clamped_to_source() {
        let error =
            Error::from_diagnostics("x", vec![diagnostic("bad", 40, 50, Severity::Error)]).unwrap();
        assert_eq!(error.location, SourceSpan::new(1.into(), 1));
    }
}
