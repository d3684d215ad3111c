//! Syntax checkers
//!
//! Each checker walks the whole token slice in source order and returns
//! the first violation of its rule.

use tracing::warn;

use super::{Diagnostic, DiagnosticKind};
use crate::token::{Token, TokenKind};

/// A numeric exponent marker must be followed by at least one digit.
pub fn check_number_exponent(tokens: &[Token]) -> Result<(), Diagnostic> {
    for token in tokens.iter().filter(|t| t.kind == TokenKind::Number) {
        let value = token.text.to_lowercase();
        let mut parts = value.split('e').skip(1);

        match parts.next() {
            Some(exponent) if !exponent.ends_with(|c: char| c.is_ascii_digit()) => {
                return Err(Diagnostic::at(DiagnosticKind::MissingExponent, token));
            }
            Some(_) if parts.next().is_some() => {
                warn!(text = %token.text, start = token.start, "Number token with more than one exponent");
                return Err(Diagnostic::at(DiagnosticKind::MalformedExponent, token));
            }
            _ => {}
        }
    }
    Ok(())
}

pub fn check_matching_parentheses(tokens: &[Token]) -> Result<(), Diagnostic> {
    let mut open = Vec::new();
    for token in tokens {
        match token.kind {
            TokenKind::OpenParen => open.push(token),
            TokenKind::CloseParen => {
                if open.pop().is_none() {
                    return Err(Diagnostic::at(DiagnosticKind::UnexpectedClosingParenthesis, token));
                }
            }
            _ => {}
        }
    }
    match open.first() {
        Some(unmatched) => Err(Diagnostic::at(DiagnosticKind::MissingClosingParenthesis, unmatched)),
        None => Ok(()),
    }
}

pub fn check_unterminated_quotes(tokens: &[Token]) -> Result<(), Diagnostic> {
    let Some(token) = tokens.iter().find(|t| t.kind == TokenKind::Bad) else {
        return Ok(());
    };
    let kind = match token.text.chars().next() {
        Some('[') => DiagnosticKind::MissingClosingBracket,
        Some('"' | '\'') => DiagnosticKind::MissingClosingQuote,
        _ => DiagnosticKind::UnexpectedCharacter,
    };
    Err(Diagnostic::at(kind, token))
}

/// Two operands side by side with nothing between them, wherever they sit:
/// at the top level, inside a grouping, or inside a call's arguments.
pub fn check_missing_comma(tokens: &[Token]) -> Result<(), Diagnostic> {
    for pair in tokens.windows(2) {
        if pair[0].ends_operand() && pair[1].starts_operand() {
            return Err(Diagnostic::at(DiagnosticKind::MissingComma, &pair[1]));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(text: &str) -> Token {
        Token::new(TokenKind::Number, text, 0, text.len())
    }

    #[test]
    fn test_exponent_rules() {
        for ok in ["1", "1.5", "1E10", "1e10", "2.5e-3", "7e+2"] {
            assert!(check_number_exponent(&[number(ok)]).is_ok(), "{ok}");
        }
        for missing in ["1e", "1e+", "1E-", "1ee5"] {
            let err = check_number_exponent(&[number(missing)]).unwrap_err();
            assert_eq!(err.kind, DiagnosticKind::MissingExponent, "{missing}");
        }
        let err = check_number_exponent(&[number("1e5e3")]).unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::MalformedExponent);
    }

    #[test]
    fn test_exponent_ignores_other_tokens() {
        let tokens = [Token::new(TokenKind::Identifier, "e", 0, 1), Token::new(TokenKind::String, "\"1e\"", 2, 6)];
        assert!(check_number_exponent(&tokens).is_ok());
    }

    #[test]
    fn test_exponent_reports_first_offender() {
        let tokens = [
            Token::new(TokenKind::Number, "1e", 0, 2),
            Token::new(TokenKind::Operator, "+", 3, 4),
            Token::new(TokenKind::Number, "2e", 5, 7),
        ];
        let err = check_number_exponent(&tokens).unwrap_err();
        assert_eq!((err.start, err.end), (0, 2));
    }

    #[test]
    fn test_parentheses() {
        let open = Token::new(TokenKind::OpenParen, "(", 0, 1);
        let close = Token::new(TokenKind::CloseParen, ")", 1, 2);

        assert!(check_matching_parentheses(&[open.clone(), close.clone()]).is_ok());
        assert_eq!(
            check_matching_parentheses(&[close.clone()]).unwrap_err().kind,
            DiagnosticKind::UnexpectedClosingParenthesis
        );
        assert_eq!(
            check_matching_parentheses(&[open]).unwrap_err().kind,
            DiagnosticKind::MissingClosingParenthesis
        );
    }

    fn scan(source: &str) -> Result<(), Diagnostic> {
        check_missing_comma(&crate::tokenize(source).unwrap())
    }

    #[test]
    fn test_adjacent_operands_anywhere() {
        for (source, start) in [("1 2", 2), ("(1 2)", 3), ("concat(\"a\" [B])", 11), ("1e5e3", 3), ("f(x) y", 5)] {
            let err = scan(source).unwrap_err();
            assert_eq!(err.kind, DiagnosticKind::MissingComma, "{source}");
            assert_eq!(err.start, start, "{source}");
        }
    }

    #[test]
    fn test_separated_operands_pass() {
        for source in ["[A] and [B]", "not [X]", "(1 - 2) * 3", "lower([A])", "f(1, (2))", "x or not y"] {
            assert!(scan(source).is_ok(), "{source}");
        }
    }
}
