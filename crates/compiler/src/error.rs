use codegen::util::line_col;
use parser::{ParseError, Span};
use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 1-based position in a module's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn of(src: &str, span: Span) -> Self {
        let (line, column) = line_col(src, span.start);
        Location { line, column }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

fn at(location: &Option<Location>) -> String {
    location.map(|l| format!(":{l}")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{module}:{location}: syntax error: {message}")]
    Syntax {
        module: String,
        location: Location,
        message: String,
    },

    #[error("{module}:{location}: {message}")]
    Scope {
        module: String,
        location: Location,
        message: String,
    },

    #[error("{module}{}: {message}", at(.location))]
    Resolution {
        module: String,
        location: Option<Location>,
        message: String,
    },

    #[error("{module}:{location}: {message}")]
    Codegen {
        module: String,
        location: Location,
        message: String,
    },

    #[error("{module}:{location}: {feature} is not supported")]
    Unsupported {
        module: String,
        location: Location,
        feature: String,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn syntax(module: &str, src: &str, e: &ParseError) -> Self {
        let (line, column) = e.position(src);
        Error::Syntax {
            module: module.to_string(),
            location: Location { line, column },
            message: e.message().to_string(),
        }
    }

    pub(crate) fn codegen(module: &str, src: &str, e: codegen::Error) -> Self {
        let location = Location::of(src, e.span());
        let module = module.to_string();
        match e {
            codegen::Error::Scope { message, .. } => Error::Scope {
                module,
                location,
                message,
            },
            codegen::Error::Codegen { message, .. } => Error::Codegen {
                module,
                location,
                message,
            },
            codegen::Error::Unsupported { feature, .. } => Error::Unsupported {
                module,
                location,
                feature,
            },
            codegen::Error::Import { message, .. } => Error::Resolution {
                module,
                location: Some(location),
                message,
            },
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}
