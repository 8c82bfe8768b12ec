//! Target extraction: recognise the obligation under the cursor.

use std::fmt;

use wedge_types::{Obligation, ObligationSyntax, Statement, StatementError};

/// Why a line was not accepted as an obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotObligationReason {
    OutOfRange { lines: usize },
    Disabled,
    MissingKeyword,
    MissingTerminator,
    Statement(StatementError),
}

impl fmt::Display for NotObligationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { lines } => write!(f, "the buffer has only {lines} line(s)"),
            Self::Disabled => f.write_str("the line is commented out"),
            Self::MissingKeyword => f.write_str("the line does not start with the obligation keyword"),
            Self::MissingTerminator => f.write_str("the line does not end with the terminator"),
            Self::Statement(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("line {} is not an obligation: {reason}", line + 1)]
    NotAnObligation {
        line: u32,
        reason: NotObligationReason,
    },
}

/// Parse the obligation on 0-indexed `line` of `text`.
///
/// Accepted shape: indentation, the keyword, whitespace, one expression, the
/// terminator, then optional whitespace or a trailing line comment.
pub fn extract_obligation(
    text: &str,
    line: u32,
    syntax: &ObligationSyntax,
) -> Result<Obligation, ExtractError> {
    let reject = |reason| ExtractError::NotAnObligation { line, reason };

    let raw = text.lines().nth(line as usize).ok_or_else(|| {
        reject(NotObligationReason::OutOfRange {
            lines: text.lines().count(),
        })
    })?;

    let body = raw.trim();
    if !syntax.line_comment.is_empty() && body.starts_with(syntax.line_comment.as_str()) {
        return Err(reject(NotObligationReason::Disabled));
    }
    if !syntax.starts_with_keyword(body) {
        return Err(reject(NotObligationReason::MissingKeyword));
    }

    let rest = &body[syntax.keyword.len()..];
    if !rest.starts_with(char::is_whitespace) {
        return Err(reject(NotObligationReason::MissingKeyword));
    }

    let rest = match rest.find(syntax.line_comment.as_str()) {
        Some(idx) if !syntax.line_comment.is_empty() => &rest[..idx],
        _ => rest,
    };
    let expr = rest
        .trim_end()
        .strip_suffix(syntax.terminator.as_str())
        .ok_or_else(|| reject(NotObligationReason::MissingTerminator))?;

    let statement = Statement::parse(expr, syntax)
        .map_err(|e| reject(NotObligationReason::Statement(e)))?;
    Ok(Obligation::new(line, statement))
}
