//! Error types for trigger parsing and evaluation.
//!
//! Every error is an ordinary, cloneable value. The registry stores them per task so a later
//! reference to a broken task re-surfaces the very same error instead of re-parsing.

use std::fmt;
use std::time::Duration;

use nom::error::{ErrorKind, ParseError};
use thiserror::Error;

/// A nom parse error with a user-friendly message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseErrorInfo<I> {
    /// The input position where the error occurred
    pub input: I,
    /// A description of what went wrong
    pub message: String,
    /// The kind of error (from nom)
    pub kind: ErrorKind,
}

impl<I> ParseErrorInfo<I> {
    /// Create a new parse error with a custom message.
    pub fn new(input: I, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            input,
            message: message.into(),
            kind,
        }
    }

    /// Create a parse error from a nom ErrorKind with a default message.
    pub fn from_kind(input: I, kind: ErrorKind) -> Self {
        let message = match kind {
            ErrorKind::Digit => "expected a number".to_string(),
            ErrorKind::Alpha => "expected an identifier".to_string(),
            ErrorKind::Tag | ErrorKind::Char | ErrorKind::OneOf => {
                "unexpected character".to_string()
            }
            ErrorKind::Eof => "unexpected end of input".to_string(),
            _ => format!("parse error: {:?}", kind),
        };

        Self {
            input,
            message,
            kind,
        }
    }
}

impl<I: fmt::Display> fmt::Display for ParseErrorInfo<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at: {}", self.message, self.input)
    }
}

impl<I: fmt::Display + fmt::Debug> std::error::Error for ParseErrorInfo<I> {}

impl<I> ParseError<I> for ParseErrorInfo<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        Self::from_kind(input, kind)
    }

    fn append(_input: I, _kind: ErrorKind, other: Self) -> Self {
        // The innermost error carries the most specific expectation
        other
    }
}

/// Helper function to create a parse error with a custom message.
pub fn parse_error<I>(input: I, message: impl Into<String>) -> ParseErrorInfo<I> {
    ParseErrorInfo::new(input, message, ErrorKind::Fail)
}

/// The error a task carries when it cannot be parsed or evaluated.
///
/// Each variant keeps the source text that produced it for diagnostics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// The task name is not valid trigger syntax.
    #[error("syntax error at {line}:{column} in '{text}': {message}")]
    Syntax {
        text: String,
        line: usize,
        column: usize,
        message: String,
    },
    /// The trigger is well formed but cannot be evaluated.
    #[error("{error} (in '{text}')")]
    Semantic { text: String, error: SemanticError },
    /// An external helper program broke its output protocol.
    #[error("{error} (in '{text}')")]
    Process { text: String, error: ProcessError },
}

impl TaskError {
    pub fn semantic(text: impl Into<String>, error: SemanticError) -> Self {
        TaskError::Semantic {
            text: text.into(),
            error,
        }
    }

    pub fn process(text: impl Into<String>, error: ProcessError) -> Self {
        TaskError::Process {
            text: text.into(),
            error,
        }
    }

    /// The semantic error kind, if this is a semantic error.
    pub fn semantic_kind(&self) -> Option<&SemanticError> {
        match self {
            TaskError::Semantic { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The process error kind, if this is a process error.
    pub fn process_kind(&self) -> Option<&ProcessError> {
        match self {
            TaskError::Process { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
    #[error("illegal expression '{0}'")]
    IllegalExpression(String),
    #[error("'{name}' expects {expected} argument(s), got {found}")]
    ArgumentCount {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("argument {index} of '{name}' must be a literal word")]
    ExpectedLiteral { name: String, index: usize },
    #[error("'{0}' can only be used as an argument of bin()")]
    MisplacedPlaceholder(String),
    #[error("'{0}' is not a date")]
    InvalidDate(String),
    #[error("unknown builtin '{0}'")]
    UnknownBuiltin(String),
    #[error("no task declares id '{0}'")]
    IdNotFound(String),
    #[error("id '{0}' is declared by more than one task")]
    DuplicateId(String),
    #[error("reference cycle detected through id '{0}'")]
    Cycle(String),
    #[error("line {line} is out of range, the task has {count} line(s)")]
    LineOutOfRange { line: String, count: usize },
    #[error("'{0}' is not a filter output")]
    NotAFilterOutput(String),
    #[error("'{0}' is neither a readable file nor a directory")]
    NotFileOrDirectory(String),
    #[error("no task at '{0}'")]
    UnknownTask(String),
    #[error("a task with an id() cannot repeat")]
    CannotRepeat,
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Failures reported by the filesystem collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FsError {
    #[error("path '{0}' escapes the jail")]
    OutsideJail(String),
    #[error("'{0}' does not exist")]
    NotFound(String),
    #[error("'{0}' is not a symbolic link")]
    NotASymlink(String),
    #[error("'{0}' has no native path")]
    NoNativePath(String),
    #[error("binary '{0}' not found or not a regular executable file")]
    BinaryNotFound(String),
    #[error("{path}: {message}")]
    Io { path: String, message: String },
}

impl FsError {
    pub fn io(path: impl fmt::Display, err: std::io::Error) -> Self {
        FsError::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Violations of the helper program protocol: exit 0, empty stderr, exactly one stdout line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessError {
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("'{program}' could not be started: {message}")]
    Spawn { program: String, message: String },
    #[error("'{program}' exited with status {code}")]
    ExitStatus { program: String, code: String },
    #[error("'{program}' wrote to stderr: {stderr}")]
    Stderr { program: String, stderr: String },
    #[error("'{program}' printed more than one line")]
    MultipleLines { program: String },
    #[error("'{program}' printed nothing")]
    EmptyOutput { program: String },
    #[error("'{program}' printed '{line}', which is not a date")]
    InvalidDate { program: String, line: String },
}
