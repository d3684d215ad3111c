//! Custom expression syntax diagnostics
//!
//! Tokenizes expression source text and runs the syntax checkers over the
//! resulting tokens before an expression is accepted into a query.

pub mod diagnostics;
pub mod token;
pub mod tokenizer;

pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticPolicy, DiagnosticsPass};
pub use token::{Token, TokenKind};
pub use tokenizer::{tokenize, TokenizeError};

/// Tokenize `source` and run `pass` over the tokens
pub fn check_source(pass: &DiagnosticsPass, source: &str) -> Result<Vec<Diagnostic>, TokenizeError> {
    let tokens = tokenize(source)?;
    Ok(pass.run(&tokens))
}
