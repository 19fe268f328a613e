use std::fmt::{self, Display};

/// The closed taxonomy of things that can go wrong while lexing, evaluating
/// or controlling a program. Carries the offending line number when one is
/// known, in the spirit of `ast::ParseError`/`typechecker::TypeError` in the
/// teacher crate: a message plus a position, manually `Display`ed.
#[derive(Debug, Clone, PartialEq)]
pub enum BasicError {
    Syntax { message: String, line: Option<i64> },
    Name { message: String, line: Option<i64> },
    Type { message: String, line: Option<i64> },
    Index { message: String, line: Option<i64> },
    Value { message: String, line: Option<i64> },
    Io { message: String, line: Option<i64> },
    Runtime { message: String, line: Option<i64> },
    /// RUN was aborted by a Ctrl-C soft interrupt rather than a language
    /// error; carries no line since it can land between any two statements.
    Interrupted,
}

impl BasicError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax { message: message.into(), line: None }
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self::Name { message: message.into(), line: None }
    }

    pub fn type_err(message: impl Into<String>) -> Self {
        Self::Type { message: message.into(), line: None }
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::Index { message: message.into(), line: None }
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::Value { message: message.into(), line: None }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into(), line: None }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime { message: message.into(), line: None }
    }

    pub fn interrupted() -> Self {
        Self::Interrupted
    }

    /// Tag this error with the line number it occurred on, if it isn't
    /// already tagged. The controller calls this as an error bubbles up
    /// through a statement whose line it knows.
    pub fn with_line(self, line: i64) -> Self {
        macro_rules! tag {
            ($variant:ident, $message:ident, $existing:ident) => {
                Self::$variant {
                    message: $message,
                    line: $existing.or(Some(line)),
                }
            };
        }
        match self {
            Self::Syntax { message, line: l } => tag!(Syntax, message, l),
            Self::Name { message, line: l } => tag!(Name, message, l),
            Self::Type { message, line: l } => tag!(Type, message, l),
            Self::Index { message, line: l } => tag!(Index, message, l),
            Self::Value { message, line: l } => tag!(Value, message, l),
            Self::Io { message, line: l } => tag!(Io, message, l),
            Self::Runtime { message, line: l } => tag!(Runtime, message, l),
            Self::Interrupted => Self::Interrupted,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    fn parts(&self) -> (&'static str, &str, Option<i64>) {
        match self {
            Self::Syntax { message, line } => ("SyntaxError", message.as_str(), *line),
            Self::Name { message, line } => ("NameError", message.as_str(), *line),
            Self::Type { message, line } => ("TypeError", message.as_str(), *line),
            Self::Index { message, line } => ("IndexError", message.as_str(), *line),
            Self::Value { message, line } => ("ValueError", message.as_str(), *line),
            Self::Io { message, line } => ("IOError", message.as_str(), *line),
            Self::Runtime { message, line } => ("RuntimeError", message.as_str(), *line),
            Self::Interrupted => ("Interrupted", "Program terminated", None),
        }
    }
}

impl Display for BasicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Self::Interrupted = self {
            return write!(f, "Program terminated");
        }
        let (tag, message, line) = self.parts();
        match line {
            Some(line) => write!(f, "{tag}: {message} (line {line})"),
            None => write!(f, "{tag}: {message}"),
        }
    }
}

impl std::error::Error for BasicError {}

pub type BasicResult<T> = Result<T, BasicError>;
