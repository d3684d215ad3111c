use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offsets into the source, end exclusive.
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            start,
            end,
        }
    }

    /// Whether this token can begin an operand.
    pub fn starts_operand(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Number | TokenKind::String | TokenKind::Field | TokenKind::Identifier | TokenKind::Boolean
        )
    }

    /// Whether this token can end an operand.
    pub fn ends_operand(&self) -> bool {
        self.starts_operand() || self.kind == TokenKind::CloseParen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Number,
    String,
    /// `[Column Name]`
    Field,
    Identifier,
    Boolean,
    Operator,
    Comma,
    OpenParen,
    CloseParen,
    /// Unterminated string or field, or a character no rule accepts.
    Bad,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Number => "NUMBER",
            TokenKind::String => "STRING",
            TokenKind::Field => "FIELD",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::Boolean => "BOOLEAN",
            TokenKind::Operator => "OPERATOR",
            TokenKind::Comma => "COMMA",
            TokenKind::OpenParen => "OPEN_PAREN",
            TokenKind::CloseParen => "CLOSE_PAREN",
            TokenKind::Bad => "BAD",
        };
        f.write_str(name)
    }
}
