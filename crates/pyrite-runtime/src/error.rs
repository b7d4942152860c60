use std::fmt;

use pyrite_lang::ir::{LabelId, YieldId};
use smol_str::SmolStr;
use thiserror::Error;

use crate::{builtins, value::Value};

/// Non-local exits carried through every evaluation step.
///
/// Language exceptions travel as [`Unwind::Exception`]; the other variants
/// are control transfers that the nodes introducing them catch again.
#[derive(Debug, Clone)]
pub enum Unwind {
    Exception(Value),
    Break(LabelId),
    Continue(LabelId),
    Return(Value),
    /// A generator reached `Yield`; the frame is kept for resumption.
    Suspend { id: YieldId, value: Value },
}

impl Unwind {
    pub fn exception(&self) -> Option<&Value> {
        match self {
            Unwind::Exception(e) => Some(e),
            _ => None,
        }
    }
}

/// Builtin exception classes the runtime raises by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BaseException,
    Exception,
    GeneratorExit,
    StopIteration,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    NameError,
    UnboundLocalError,
    AttributeError,
    TypeError,
    ValueError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    ImportError,
    AssertionError,
    SystemError,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 21] = [
        ErrorKind::BaseException,
        ErrorKind::Exception,
        ErrorKind::GeneratorExit,
        ErrorKind::StopIteration,
        ErrorKind::ArithmeticError,
        ErrorKind::ZeroDivisionError,
        ErrorKind::OverflowError,
        ErrorKind::LookupError,
        ErrorKind::IndexError,
        ErrorKind::KeyError,
        ErrorKind::NameError,
        ErrorKind::UnboundLocalError,
        ErrorKind::AttributeError,
        ErrorKind::TypeError,
        ErrorKind::ValueError,
        ErrorKind::RuntimeError,
        ErrorKind::RecursionError,
        ErrorKind::NotImplementedError,
        ErrorKind::ImportError,
        ErrorKind::AssertionError,
        ErrorKind::SystemError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::BaseException => "BaseException",
            ErrorKind::Exception => "Exception",
            ErrorKind::GeneratorExit => "GeneratorExit",
            ErrorKind::StopIteration => "StopIteration",
            ErrorKind::ArithmeticError => "ArithmeticError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::LookupError => "LookupError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::NameError => "NameError",
            ErrorKind::UnboundLocalError => "UnboundLocalError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::NotImplementedError => "NotImplementedError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::SystemError => "SystemError",
        }
    }

    /// Direct base class; `None` only for `BaseException`.
    pub fn base(self) -> Option<ErrorKind> {
        match self {
            ErrorKind::BaseException => None,
            ErrorKind::Exception | ErrorKind::GeneratorExit => Some(ErrorKind::BaseException),
            ErrorKind::ZeroDivisionError | ErrorKind::OverflowError => Some(ErrorKind::ArithmeticError),
            ErrorKind::IndexError | ErrorKind::KeyError => Some(ErrorKind::LookupError),
            ErrorKind::UnboundLocalError => Some(ErrorKind::NameError),
            ErrorKind::RecursionError | ErrorKind::NotImplementedError => Some(ErrorKind::RuntimeError),
            _ => Some(ErrorKind::Exception),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raises a new instance of a builtin exception class.
#[cold]
pub fn raise(kind: ErrorKind, message: impl Into<String>) -> Unwind {
    Unwind::Exception(builtins::new_exception(kind, message.into()))
}

pub fn type_error(message: impl Into<String>) -> Unwind {
    raise(ErrorKind::TypeError, message)
}

/// One traceback line: the code object name and the line being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub code: SmolStr,
    pub line: u32,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, in {}", self.line, self.code)
    }
}

/// Errors surfaced to the embedding host.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Compile(#[from] pyrite_lang::Error),
    #[error("{class}: {message}")]
    Uncaught {
        class: SmolStr,
        message: String,
        /// Innermost frame last.
        traceback: Vec<TraceEntry>,
        exception: Value,
    },
    #[error("Unexpected {0} outside of a function")]
    Escaped(&'static str),
}

impl RuntimeError {
    pub(crate) fn from_unwind(unwind: Unwind) -> Self {
        match unwind {
            Unwind::Exception(exception) => {
                let traceback = exception
                    .as_instance()
                    .map(|i| {
                        let mut entries = i.traceback.borrow().clone();
                        entries.reverse();
                        entries
                    })
                    .unwrap_or_default();
                RuntimeError::Uncaught {
                    class: exception.type_name(),
                    message: builtins::exception_message(&exception),
                    traceback,
                    exception,
                }
            }
            Unwind::Break(_) => RuntimeError::Escaped("break"),
            Unwind::Continue(_) => RuntimeError::Escaped("continue"),
            Unwind::Return(_) => RuntimeError::Escaped("return"),
            Unwind::Suspend { .. } => RuntimeError::Escaped("yield"),
        }
    }

    /// Class name of an uncaught exception.
    pub fn exception_class(&self) -> Option<&str> {
        match self {
            RuntimeError::Uncaught { class, .. } => Some(class),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::zero_division(ErrorKind::ZeroDivisionError, ErrorKind::ArithmeticError)]
    #[case::key(ErrorKind::KeyError, ErrorKind::LookupError)]
    #[case::unbound(ErrorKind::UnboundLocalError, ErrorKind::NameError)]
    #[case::generator_exit(ErrorKind::GeneratorExit, ErrorKind::BaseException)]
    fn test_base(#[case] kind: ErrorKind, #[case] base: ErrorKind) {
        assert_eq!(kind.base(), Some(base));
    }

    #[test]
    fn test_uncaught_exception_message() {
        let error = RuntimeError::from_unwind(raise(ErrorKind::ValueError, "bad"));
        assert_eq!(error.to_string(), "ValueError: bad");
        assert_eq!(error.exception_class(), Some("ValueError"));
    }

    #[test]
    fn test_escaped_control_transfer() {
        let error = RuntimeError::from_unwind(Unwind::Break(0));
        assert_eq!(error.to_string(), "Unexpected break outside of a function");
    }
}
