//! Expression diagnostics pass
//!
//! Runs a fixed sequence of independent syntax checkers over one
//! expression's tokens. Checkers are pure functions over an immutable
//! token slice; the pass decides how their results are merged.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::token::Token;

mod checks;

pub use checks::{check_matching_parentheses, check_missing_comma, check_number_exponent, check_unterminated_quotes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    MissingExponent,
    MalformedExponent,
    MissingClosingParenthesis,
    UnexpectedClosingParenthesis,
    MissingClosingBracket,
    MissingClosingQuote,
    UnexpectedCharacter,
    MissingComma,
}

impl DiagnosticKind {
    pub fn message(&self) -> &'static str {
        match self {
            DiagnosticKind::MissingExponent => "Missing exponent",
            DiagnosticKind::MalformedExponent => "Malformed exponent",
            DiagnosticKind::MissingClosingParenthesis => "Expecting a closing parenthesis",
            DiagnosticKind::UnexpectedClosingParenthesis => "Expecting an opening parenthesis",
            DiagnosticKind::MissingClosingBracket => "Missing a closing bracket",
            DiagnosticKind::MissingClosingQuote => "Missing closing quotes",
            DiagnosticKind::UnexpectedCharacter => "Invalid character in expression",
            DiagnosticKind::MissingComma => "Expecting a comma",
        }
    }
}

/// A single problem, anchored at the offending token's byte range.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message} at {start}..{end}")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub start: usize,
    pub end: usize,
}

impl Diagnostic {
    pub fn at(kind: DiagnosticKind, token: &Token) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            start: token.start,
            end: token.end,
        }
    }

    /// Format with the offending source line and a caret underline
    pub fn render(&self, source: &str) -> String {
        let offset = self.start.min(source.len());
        let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
        let line_end = source[offset..].find('\n').map_or(source.len(), |i| offset + i);
        let line = &source[line_start..line_end];
        let line_number = source[..line_start].matches('\n').count() + 1;
        let column = source[line_start..offset].chars().count();
        let end = self.end.clamp(offset, line_end);
        let width = source[offset..end].chars().count().max(1);

        format!(
            "Error at line {}, column {}:\n{}\n{}{}\n{}",
            line_number,
            column + 1,
            line,
            " ".repeat(column),
            "^".repeat(width),
            self.message
        )
    }
}

pub type Checker = fn(&[Token]) -> Result<(), Diagnostic>;

/// How results from several checkers are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticPolicy {
    /// Run every checker and report all failures, ordered by position.
    #[default]
    CollectAll,
    /// Stop at the first checker that fails.
    FirstError,
}

impl fmt::Display for DiagnosticPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticPolicy::CollectAll => f.write_str("collect-all"),
            DiagnosticPolicy::FirstError => f.write_str("first-error"),
        }
    }
}

impl std::str::FromStr for DiagnosticPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collect-all" => Ok(DiagnosticPolicy::CollectAll),
            "first-error" => Ok(DiagnosticPolicy::FirstError),
            other => Err(format!("unknown diagnostics policy \"{other}\"")),
        }
    }
}

pub struct DiagnosticsPass {
    checkers: Vec<(&'static str, Checker)>,
    policy: DiagnosticPolicy,
}

impl Default for DiagnosticsPass {
    fn default() -> Self {
        Self::new(DiagnosticPolicy::default())
    }
}

impl DiagnosticsPass {
    /// The standard checkers, in their standard order.
    pub fn new(policy: DiagnosticPolicy) -> Self {
        Self {
            checkers: vec![
                ("number-exponent", check_number_exponent as Checker),
                ("matching-parentheses", check_matching_parentheses),
                ("unterminated-quotes", check_unterminated_quotes),
                ("missing-comma", check_missing_comma),
            ],
            policy,
        }
    }

    /// A pass running only the given checkers, in order.
    pub fn with_checkers(policy: DiagnosticPolicy, checkers: Vec<(&'static str, Checker)>) -> Self {
        Self { checkers, policy }
    }

    pub fn policy(&self) -> DiagnosticPolicy {
        self.policy
    }

    pub fn checker_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.checkers.iter().map(|(name, _)| *name)
    }

    pub fn run(&self, tokens: &[Token]) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for (name, check) in &self.checkers {
            if let Err(diagnostic) = check(tokens) {
                debug!(checker = *name, kind = ?diagnostic.kind, start = diagnostic.start, "Checker failed");
                diagnostics.push(diagnostic);
                if self.policy == DiagnosticPolicy::FirstError {
                    break;
                }
            }
        }
        // Stable: ties keep checker order.
        diagnostics.sort_by_key(|d| d.start);
        diagnostics
    }
}
