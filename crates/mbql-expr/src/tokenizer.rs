//! Pest-based tokenizer for custom expression source

use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;
use tracing::trace;

use crate::token::{Token, TokenKind};

#[derive(Parser)]
#[grammar = "expression.pest"]
pub struct ExpressionLexer;

#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("Pest error: {0}")]
    Pest(#[from] Box<pest::error::Error<Rule>>),
}

/// Split expression source into tokens.
///
/// Malformed input still tokenizes: unterminated strings and fields and
/// stray characters come back as [`TokenKind::Bad`] for the diagnostics
/// pass to report.
pub fn tokenize(source: &str) -> Result<Vec<Token>, TokenizeError> {
    let pairs = ExpressionLexer::parse(Rule::tokens, source).map_err(Box::new)?;

    let mut tokens = Vec::new();
    for pair in pairs.flatten() {
        let kind = match pair.as_rule() {
            Rule::number => TokenKind::Number,
            Rule::string => TokenKind::String,
            Rule::field => TokenKind::Field,
            Rule::boolean => TokenKind::Boolean,
            Rule::identifier => TokenKind::Identifier,
            Rule::operator | Rule::logical => TokenKind::Operator,
            Rule::comma => TokenKind::Comma,
            Rule::open_paren => TokenKind::OpenParen,
            Rule::close_paren => TokenKind::CloseParen,
            Rule::unterminated_string | Rule::unterminated_field | Rule::bad_char => TokenKind::Bad,
            _ => continue,
        };
        let span = pair.as_span();
        tokens.push(Token::new(kind, span.as_str(), span.start(), span.end()));
    }

    trace!(count = tokens.len(), "Tokenized expression");
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_call_expression() {
        let tokens = tokenize(r#"CONCAT("a", 1e)"#).unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["CONCAT", "(", "\"a\"", ",", "1e", ")"]);
        assert_eq!(tokens[4].kind, TokenKind::Number);
        assert_eq!((tokens[4].start, tokens[4].end), (12, 14));
    }

    #[test]
    fn test_numbers() {
        for source in ["1", "1.5", ".5", "1E10", "2.5e-3", "1e", "1e+"] {
            let tokens = tokenize(source).unwrap();
            assert_eq!(tokens.len(), 1, "{source}");
            assert_eq!(tokens[0].kind, TokenKind::Number);
            assert_eq!(tokens[0].text, source);
        }
    }

    #[test]
    fn test_fields_and_operators() {
        assert_eq!(
            kinds("[Subtotal] * 1.1 >= [Total Price]"),
            vec![
                TokenKind::Field,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::Operator,
                TokenKind::Field,
            ]
        );
    }

    #[test]
    fn test_booleans_need_word_boundary() {
        assert_eq!(kinds("True"), vec![TokenKind::Boolean]);
        assert_eq!(kinds("trueish"), vec![TokenKind::Identifier]);
    }

    #[test]
    fn test_logical_keywords_are_operators() {
        assert_eq!(
            kinds("NOT [A] and [B] Or [C]"),
            vec![
                TokenKind::Operator,
                TokenKind::Field,
                TokenKind::Operator,
                TokenKind::Field,
                TokenKind::Operator,
                TokenKind::Field,
            ]
        );
        assert_eq!(kinds("notes order"), vec![TokenKind::Identifier, TokenKind::Identifier]);
    }

    #[test]
    fn test_malformed_input_still_tokenizes() {
        assert_eq!(kinds("\"abc"), vec![TokenKind::Bad]);
        assert_eq!(kinds("[Total + 1"), vec![TokenKind::Bad]);
        assert_eq!(kinds("1 # 2"), vec![TokenKind::Number, TokenKind::Bad, TokenKind::Number]);
        assert!(tokenize("").unwrap().is_empty());
    }
}
