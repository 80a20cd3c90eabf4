use parser::Span;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{message}")]
    Scope { message: String, span: Span },

    #[error("{message}")]
    Codegen { message: String, span: Span },

    #[error("{feature} is not supported")]
    Unsupported { feature: String, span: Span },

    #[error("{message}")]
    Import { message: String, span: Span },
}

impl Error {
    pub fn span(&self) -> Span {
        match self {
            Error::Scope { span, .. }
            | Error::Codegen { span, .. }
            | Error::Unsupported { span, .. }
            | Error::Import { span, .. } => *span,
        }
    }

    pub(crate) fn scope(message: impl Into<String>, span: Span) -> Self {
        Error::Scope {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn codegen(message: impl Into<String>, span: Span) -> Self {
        Error::Codegen {
            message: message.into(),
            span,
        }
    }

    pub(crate) fn unsupported(feature: impl Into<String>, span: Span) -> Self {
        Error::Unsupported {
            feature: feature.into(),
            span,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
