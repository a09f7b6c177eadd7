use cedar_policy::ParseErrors;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// What went wrong while scanning a condition, CEL expression or JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    UnbalancedParen,
    UnbalancedBracket,
    IncompleteExpression,
    MissingLogicalOperator,
    UnsupportedOperator,
    InvalidNestedValuePath,
    UnexpectedToken,
    UnterminatedString,
    InvalidValue,
    InvalidJson,
}

/// A positioned parse failure. `line` and `column` are 1-based, `offset` is a byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    /// Build an error for a single-line input, where the column follows from the offset.
    pub fn at(kind: ParseErrorKind, input: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = crate::document::LineIndex::new(input).position(offset);
        ParseError {
            kind,
            offset,
            line,
            column,
            message: message.into(),
        }
    }

    /// Move this error so that it points into an enclosing text where the original
    /// input started at `base`.
    pub fn rebase(mut self, index: &crate::document::LineIndex, base: usize) -> Self {
        self.offset += base;
        let (line, column) = index.position(self.offset);
        self.line = line;
        self.column = column;
        self
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum PolicyError {
    #[error("failed to parse condition: {0}")]
    ConditionParse(ParseError),

    #[error("failed to parse CEL expression: {0}")]
    CelParse(ParseError),

    #[error("failed to parse document: {0}")]
    Document(ParseError),

    #[error("failed to parse policy: {0}")]
    ParseError(String),

    #[error("unsupported Cedar construct: {0}")]
    UnsupportedCedarConstruct(String),

    #[error("unsupported by CEL: {0}")]
    UnsupportedByCel(String),

    #[error("unsupported by IAM bindings: {0}")]
    UnsupportedByIam(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid entity reference: {0}")]
    InvalidEntity(String),

    #[error("invalid mapper options: {0}")]
    InvalidOptions(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl PolicyError {
    /// The positioned parse error carried by this error, if any.
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            PolicyError::ConditionParse(e) | PolicyError::CelParse(e) | PolicyError::Document(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

impl From<ParseErrors> for PolicyError {
    fn from(err: ParseErrors) -> Self {
        PolicyError::ParseError(err.to_string())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::InvalidFormat(err.to_string())
    }
}
