//! Obligation and statement types.
//!
//! These types enforce their shape at construction time. Once you hold a
//! [`Statement`], you know it is a single bare proposition: no obligation
//! keyword, no terminator, no line comment, no line break.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Surface syntax of an obligation line in the verified language.
///
/// Defaults describe Dafny: `assert <expr>;` with `//` line comments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObligationSyntax {
    pub keyword: String,
    pub terminator: String,
    pub line_comment: String,
}

impl Default for ObligationSyntax {
    fn default() -> Self {
        Self {
            keyword: "assert".to_string(),
            terminator: ";".to_string(),
            line_comment: "//".to_string(),
        }
    }
}

impl ObligationSyntax {
    /// Whether `text` begins with the obligation keyword as a whole word.
    #[must_use]
    pub fn starts_with_keyword(&self, text: &str) -> bool {
        let Some(rest) = text.strip_prefix(self.keyword.as_str()) else {
            return false;
        };
        match rest.chars().next() {
            None => true,
            Some(c) => !(c.is_alphanumeric() || c == '_' || c == '\''),
        }
    }

    /// Render an obligation line with the given indentation.
    #[must_use]
    pub fn render(&self, indent: &str, statement: &Statement) -> String {
        format!(
            "{indent}{} {}{}",
            self.keyword,
            statement.as_str(),
            self.terminator
        )
    }

    /// Make a line inert by commenting it out after its indentation.
    ///
    /// Line count is unchanged; an already-disabled line is returned as is.
    #[must_use]
    pub fn disable(&self, line: &str) -> String {
        let body = line.trim_start();
        if body.starts_with(self.line_comment.as_str()) {
            return line.to_string();
        }
        let indent = &line[..line.len() - body.len()];
        format!("{indent}{} {body}", self.line_comment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatementError {
    #[error("statement is empty")]
    Empty,
    #[error("statement spans {lines} lines")]
    Multiline { lines: usize },
    #[error("statement starts with the obligation keyword `{keyword}`")]
    LeadingKeyword { keyword: String },
    #[error("statement contains the terminator `{terminator}`")]
    Terminator { terminator: String },
    #[error("statement contains the line comment marker `{marker}`")]
    Comment { marker: String },
}

/// A single bare proposition, trimmed.
///
/// # Invariants
///
/// - Non-empty after trimming
/// - No `\n` or `\r`
/// - Does not start with the obligation keyword
/// - Does not contain the statement terminator anywhere
/// - Does not contain the line comment marker, which would swallow the
///   terminator once rendered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement(String);

impl Statement {
    pub fn parse(raw: &str, syntax: &ObligationSyntax) -> Result<Self, StatementError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StatementError::Empty);
        }
        if trimmed.contains(['\n', '\r']) {
            return Err(StatementError::Multiline {
                lines: trimmed.lines().count(),
            });
        }
        if syntax.starts_with_keyword(trimmed) {
            return Err(StatementError::LeadingKeyword {
                keyword: syntax.keyword.clone(),
            });
        }
        if !syntax.terminator.is_empty() && trimmed.contains(syntax.terminator.as_str()) {
            return Err(StatementError::Terminator {
                terminator: syntax.terminator.clone(),
            });
        }
        if !syntax.line_comment.is_empty() && trimmed.contains(syntax.line_comment.as_str()) {
            return Err(StatementError::Comment {
                marker: syntax.line_comment.clone(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare ignoring whitespace differences.
    #[must_use]
    pub fn same_as(&self, other: &Statement) -> bool {
        let squash = |s: &str| s.split_whitespace().collect::<String>();
        squash(&self.0) == squash(&other.0)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Statement {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A provable proposition anchored to a 0-indexed buffer line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obligation {
    line: u32,
    statement: Statement,
}

impl Obligation {
    #[must_use]
    pub fn new(line: u32, statement: Statement) -> Self {
        Self { line, statement }
    }

    /// 0-indexed line.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The same obligation after one line was inserted above it.
    #[must_use]
    pub fn shifted_down(&self) -> Self {
        Self {
            line: self.line + 1,
            statement: self.statement.clone(),
        }
    }
}

impl fmt::Display for Obligation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line + 1, self.statement)
    }
}
