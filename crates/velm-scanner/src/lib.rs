//! Binding expression tokenizer for the velm framework.
//!
//! This crate provides the lexical analysis phase of binding compilation:
//! - `SyntaxKind` - token types of the constrained expression grammar
//! - `Token` - one scanned token with its source span
//! - `Scanner` - the tokenizer state machine
//!
//! The grammar is deliberately small: identifiers, literals, member access,
//! calls, indexing, arithmetic/comparison/logical operators, the conditional
//! operator, null coalescing and lambdas.

use memchr::memchr2;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyntaxKind {
    Identifier,
    IntLiteral,
    FloatLiteral,
    StringLiteral,
    TrueKeyword,
    FalseKeyword,
    NullKeyword,
    Dot,
    Comma,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Exclamation,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
    EqualsEquals,
    ExclamationEquals,
    AmpersandAmpersand,
    BarBar,
    Question,
    QuestionQuestion,
    Colon,
    /// `=>`
    EqualsGreaterThan,
    EndOfInput,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: SyntaxKind,
    pub start: usize,
    pub end: usize,
    /// Cooked text: the unescaped value for string literals, the raw slice
    /// otherwise.
    pub text: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ScanError {
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },
    #[error("invalid number literal '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },
}

pub struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Scanner { source, bytes: source.as_bytes(), position: 0 }
    }

    /// Scans the whole input. The last token is always `EndOfInput`.
    pub fn scan_all(mut self) -> Result<Vec<Token>, ScanError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == SyntaxKind::EndOfInput;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ScanError> {
        self.skip_whitespace();
        let start = self.position;
        let Some(&b) = self.bytes.get(self.position) else {
            return Ok(self.token(SyntaxKind::EndOfInput, start));
        };

        match b {
            b'\'' | b'"' => self.scan_string(b),
            b'0'..=b'9' => self.scan_number(),
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => Ok(self.scan_identifier()),
            b'.' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Dot, start))
            }
            b',' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Comma, start))
            }
            b'(' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::OpenParen, start))
            }
            b')' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::CloseParen, start))
            }
            b'[' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::OpenBracket, start))
            }
            b']' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::CloseBracket, start))
            }
            b'+' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Plus, start))
            }
            b'-' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Minus, start))
            }
            b'*' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Asterisk, start))
            }
            b'/' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Slash, start))
            }
            b'%' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Percent, start))
            }
            b':' => {
                self.position += 1;
                Ok(self.token(SyntaxKind::Colon, start))
            }
            b'!' => {
                self.position += 1;
                if self.peek() == Some(b'=') {
                    self.position += 1;
                    Ok(self.token(SyntaxKind::ExclamationEquals, start))
                } else {
                    Ok(self.token(SyntaxKind::Exclamation, start))
                }
            }
            b'<' => {
                self.position += 1;
                if self.peek() == Some(b'=') {
                    self.position += 1;
                    Ok(self.token(SyntaxKind::LessThanEquals, start))
                } else {
                    Ok(self.token(SyntaxKind::LessThan, start))
                }
            }
            b'>' => {
                self.position += 1;
                if self.peek() == Some(b'=') {
                    self.position += 1;
                    Ok(self.token(SyntaxKind::GreaterThanEquals, start))
                } else {
                    Ok(self.token(SyntaxKind::GreaterThan, start))
                }
            }
            b'=' => {
                self.position += 1;
                match self.peek() {
                    Some(b'=') => {
                        self.position += 1;
                        Ok(self.token(SyntaxKind::EqualsEquals, start))
                    }
                    Some(b'>') => {
                        self.position += 1;
                        Ok(self.token(SyntaxKind::EqualsGreaterThan, start))
                    }
                    _ => Err(ScanError::UnexpectedCharacter { character: '=', position: start }),
                }
            }
            b'&' => {
                self.position += 1;
                if self.peek() == Some(b'&') {
                    self.position += 1;
                    Ok(self.token(SyntaxKind::AmpersandAmpersand, start))
                } else {
                    Err(ScanError::UnexpectedCharacter { character: '&', position: start })
                }
            }
            b'|' => {
                self.position += 1;
                if self.peek() == Some(b'|') {
                    self.position += 1;
                    Ok(self.token(SyntaxKind::BarBar, start))
                } else {
                    Err(ScanError::UnexpectedCharacter { character: '|', position: start })
                }
            }
            b'?' => {
                self.position += 1;
                if self.peek() == Some(b'?') {
                    self.position += 1;
                    Ok(self.token(SyntaxKind::QuestionQuestion, start))
                } else {
                    Ok(self.token(SyntaxKind::Question, start))
                }
            }
            _ => {
                let character = self.source[self.position..].chars().next().unwrap_or('\u{fffd}');
                Err(ScanError::UnexpectedCharacter { character, position: start })
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.bytes.get(self.position), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.position += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }

    fn token(&self, kind: SyntaxKind, start: usize) -> Token {
        Token { kind, start, end: self.position, text: self.source[start..self.position].to_string() }
    }

    fn scan_identifier(&mut self) -> Token {
        let start = self.position;
        while matches!(self.bytes.get(self.position), Some(b'_' | b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9'))
        {
            self.position += 1;
        }
        let text = &self.source[start..self.position];
        let kind = match text {
            "true" => SyntaxKind::TrueKeyword,
            "false" => SyntaxKind::FalseKeyword,
            "null" => SyntaxKind::NullKeyword,
            _ => SyntaxKind::Identifier,
        };
        self.token(kind, start)
    }

    fn scan_number(&mut self) -> Result<Token, ScanError> {
        let start = self.position;
        while matches!(self.bytes.get(self.position), Some(b'0'..=b'9')) {
            self.position += 1;
        }
        let mut is_float = false;
        // A dot only belongs to the number when a digit follows; `1.ToString`
        // must scan as int, dot, identifier.
        if self.peek() == Some(b'.')
            && matches!(self.bytes.get(self.position + 1), Some(b'0'..=b'9'))
        {
            is_float = true;
            self.position += 1;
            while matches!(self.bytes.get(self.position), Some(b'0'..=b'9')) {
                self.position += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mark = self.position;
            self.position += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.position += 1;
            }
            if matches!(self.peek(), Some(b'0'..=b'9')) {
                is_float = true;
                while matches!(self.bytes.get(self.position), Some(b'0'..=b'9')) {
                    self.position += 1;
                }
            } else {
                // Not an exponent, back off; `2e` is `2` followed by `e`.
                self.position = mark;
            }
        }
        let text = &self.source[start..self.position];
        let kind = if is_float { SyntaxKind::FloatLiteral } else { SyntaxKind::IntLiteral };
        if kind == SyntaxKind::IntLiteral && text.parse::<i64>().is_err() {
            return Err(ScanError::InvalidNumber { text: text.to_string(), position: start });
        }
        Ok(self.token(kind, start))
    }

    fn scan_string(&mut self, quote: u8) -> Result<Token, ScanError> {
        let start = self.position;
        self.position += 1;
        let mut value = String::new();
        loop {
            let rest = &self.bytes[self.position..];
            let Some(offset) = memchr2(quote, b'\\', rest) else {
                return Err(ScanError::UnterminatedString { position: start });
            };
            value.push_str(&self.source[self.position..self.position + offset]);
            self.position += offset;
            if self.bytes[self.position] == quote {
                self.position += 1;
                return Ok(Token {
                    kind: SyntaxKind::StringLiteral,
                    start,
                    end: self.position,
                    text: value,
                });
            }
            // Escape sequence.
            self.position += 1;
            match self.bytes.get(self.position) {
                Some(b'n') => value.push('\n'),
                Some(b't') => value.push('\t'),
                Some(b'r') => value.push('\r'),
                Some(b'\\') => value.push('\\'),
                Some(&c) if c == quote => value.push(c as char),
                Some(&c) => value.push(c as char),
                None => return Err(ScanError::UnterminatedString { position: start }),
            }
            self.position += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<SyntaxKind> {
        Scanner::new(source)
            .scan_all()
            .expect("scan")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_member_access_and_call() {
        assert_eq!(
            kinds("Customer.Name.ToUpper()"),
            vec![
                SyntaxKind::Identifier,
                SyntaxKind::Dot,
                SyntaxKind::Identifier,
                SyntaxKind::Dot,
                SyntaxKind::Identifier,
                SyntaxKind::OpenParen,
                SyntaxKind::CloseParen,
                SyntaxKind::EndOfInput,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a <= b && c != d ?? e"),
            vec![
                SyntaxKind::Identifier,
                SyntaxKind::LessThanEquals,
                SyntaxKind::Identifier,
                SyntaxKind::AmpersandAmpersand,
                SyntaxKind::Identifier,
                SyntaxKind::ExclamationEquals,
                SyntaxKind::Identifier,
                SyntaxKind::QuestionQuestion,
                SyntaxKind::Identifier,
                SyntaxKind::EndOfInput,
            ]
        );
    }

    #[test]
    fn test_lambda_arrow() {
        assert_eq!(
            kinds("x => x + 1"),
            vec![
                SyntaxKind::Identifier,
                SyntaxKind::EqualsGreaterThan,
                SyntaxKind::Identifier,
                SyntaxKind::Plus,
                SyntaxKind::IntLiteral,
                SyntaxKind::EndOfInput,
            ]
        );
    }

    #[test]
    fn test_number_member_access_does_not_eat_dot() {
        assert_eq!(
            kinds("1.5 + 2.ToString"),
            vec![
                SyntaxKind::FloatLiteral,
                SyntaxKind::Plus,
                SyntaxKind::IntLiteral,
                SyntaxKind::Dot,
                SyntaxKind::Identifier,
                SyntaxKind::EndOfInput,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = Scanner::new(r#"'it\'s' + "a\nb""#).scan_all().expect("scan");
        assert_eq!(tokens[0].kind, SyntaxKind::StringLiteral);
        assert_eq!(tokens[0].text, "it's");
        assert_eq!(tokens[2].text, "a\nb");
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            Scanner::new("'abc").scan_all(),
            Err(ScanError::UnterminatedString { position: 0 })
        );
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(
            Scanner::new("a # b").scan_all(),
            Err(ScanError::UnexpectedCharacter { character: '#', .. })
        ));
    }
}
