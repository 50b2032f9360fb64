//! Recursive-descent expression parser.
//!
//! Binary expressions use precedence climbing; lambdas are detected with a
//! bounded lookahead before falling back to a parenthesized expression.

use thiserror::Error;

use velm_scanner::{ScanError, Scanner, SyntaxKind, Token};

use crate::ast::{BinaryOperator, Expr, ExprKind, Literal, Span, UnaryOperator};

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("expected {expected} but found '{found}' at position {position}")]
    UnexpectedToken { expected: String, found: String, position: usize },
    #[error("invalid number literal '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },
}

/// Parses a complete binding expression; trailing input is an error.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let tokens = Scanner::new(source).scan_all()?;
    let mut parser = ParserState { tokens, position: 0 };
    let expr = parser.parse_expression()?;
    parser.expect(SyntaxKind::EndOfInput, "end of expression")?;
    Ok(expr)
}

struct ParserState {
    tokens: Vec<Token>,
    position: usize,
}

impl ParserState {
    fn current(&self) -> &Token {
        // The token stream always ends with EndOfInput.
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> SyntaxKind {
        self.tokens
            .get(self.position + offset)
            .map(|t| t.kind)
            .unwrap_or(SyntaxKind::EndOfInput)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, kind: SyntaxKind) -> bool {
        if self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: SyntaxKind, expected: &str) -> Result<Token, ParseError> {
        if self.current().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.current();
        let found = if token.kind == SyntaxKind::EndOfInput {
            "end of expression".to_string()
        } else {
            token.text.clone()
        };
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found,
            position: token.start,
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        if let Some(lambda) = self.try_parse_lambda()? {
            return Ok(lambda);
        }
        self.parse_conditional()
    }

    /// `x => body`, `(a, b) => body` or `() => body`. Detected by lookahead
    /// so that `(a)` still parses as a parenthesized expression.
    fn try_parse_lambda(&mut self) -> Result<Option<Expr>, ParseError> {
        let is_lambda = match self.current().kind {
            SyntaxKind::Identifier => self.peek_kind(1) == SyntaxKind::EqualsGreaterThan,
            SyntaxKind::OpenParen => {
                let mut offset = 1;
                loop {
                    match self.peek_kind(offset) {
                        SyntaxKind::CloseParen => {
                            break self.peek_kind(offset + 1) == SyntaxKind::EqualsGreaterThan;
                        }
                        SyntaxKind::Identifier | SyntaxKind::Comma => offset += 1,
                        _ => break false,
                    }
                }
            }
            _ => false,
        };
        if !is_lambda {
            return Ok(None);
        }

        let start = self.current().start;
        let mut parameters = Vec::new();
        if self.current().kind == SyntaxKind::Identifier {
            parameters.push(self.advance().text);
        } else {
            self.expect(SyntaxKind::OpenParen, "'('")?;
            while self.current().kind == SyntaxKind::Identifier {
                parameters.push(self.advance().text);
                if !self.eat(SyntaxKind::Comma) {
                    break;
                }
            }
            self.expect(SyntaxKind::CloseParen, "')'")?;
        }
        self.expect(SyntaxKind::EqualsGreaterThan, "'=>'")?;
        let body = self.parse_expression()?;
        let span = Span::new(start, body.span.end);
        Ok(Some(Expr::new(ExprKind::Lambda { parameters, body: Box::new(body) }, span)))
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_binary(1)?;
        if !self.eat(SyntaxKind::Question) {
            return Ok(condition);
        }
        let when_true = self.parse_expression()?;
        self.expect(SyntaxKind::Colon, "':'")?;
        let when_false = self.parse_expression()?;
        let span = condition.span.to(when_false.span);
        Ok(Expr::new(
            ExprKind::Conditional {
                condition: Box::new(condition),
                when_true: Box::new(when_true),
                when_false: Box::new(when_false),
            },
            span,
        ))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some((precedence, operator)) = binary_operator(self.current().kind) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            // `??` is right-associative, everything else left-associative.
            let next_min = if operator == BinaryOperator::NullCoalesce {
                precedence
            } else {
                precedence + 1
            };
            let right = self.parse_binary(next_min)?;
            let span = left.span.to(right.span);
            left = Expr::new(
                ExprKind::Binary { operator, left: Box::new(left), right: Box::new(right) },
                span,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let operator = match self.current().kind {
            SyntaxKind::Exclamation => Some(UnaryOperator::Not),
            SyntaxKind::Minus => Some(UnaryOperator::Negate),
            _ => None,
        };
        if let Some(operator) = operator {
            let start = self.advance().start;
            let operand = self.parse_unary()?;
            let span = Span::new(start, operand.span.end);
            return Ok(Expr::new(ExprKind::Unary { operator, operand: Box::new(operand) }, span));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current().kind {
                SyntaxKind::Dot => {
                    self.advance();
                    let name = self.expect(SyntaxKind::Identifier, "member name")?;
                    let span = Span::new(expr.span.start, name.end);
                    expr = Expr::new(
                        ExprKind::Member { target: Box::new(expr), name: name.text },
                        span,
                    );
                }
                SyntaxKind::OpenParen => {
                    self.advance();
                    let mut arguments = Vec::new();
                    if self.current().kind != SyntaxKind::CloseParen {
                        loop {
                            arguments.push(self.parse_expression()?);
                            if !self.eat(SyntaxKind::Comma) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(SyntaxKind::CloseParen, "')'")?;
                    let span = Span::new(expr.span.start, close.end);
                    expr = Expr::new(ExprKind::Call { target: Box::new(expr), arguments }, span);
                }
                SyntaxKind::OpenBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let close = self.expect(SyntaxKind::CloseBracket, "']'")?;
                    let span = Span::new(expr.span.start, close.end);
                    expr = Expr::new(
                        ExprKind::Index { target: Box::new(expr), index: Box::new(index) },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.kind {
            SyntaxKind::IntLiteral => {
                self.advance();
                let value = token.text.parse::<i64>().map_err(|_| ParseError::InvalidNumber {
                    text: token.text.clone(),
                    position: token.start,
                })?;
                Ok(self.literal(Literal::Int(value), &token))
            }
            SyntaxKind::FloatLiteral => {
                self.advance();
                let value = token.text.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
                    text: token.text.clone(),
                    position: token.start,
                })?;
                Ok(self.literal(Literal::Double(value), &token))
            }
            SyntaxKind::StringLiteral => {
                self.advance();
                Ok(self.literal(Literal::String(token.text.clone()), &token))
            }
            SyntaxKind::TrueKeyword => {
                self.advance();
                Ok(self.literal(Literal::Bool(true), &token))
            }
            SyntaxKind::FalseKeyword => {
                self.advance();
                Ok(self.literal(Literal::Bool(false), &token))
            }
            SyntaxKind::NullKeyword => {
                self.advance();
                Ok(self.literal(Literal::Null, &token))
            }
            SyntaxKind::Identifier => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Identifier(token.text.clone()),
                    Span::new(token.start, token.end),
                ))
            }
            SyntaxKind::OpenParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(SyntaxKind::CloseParen, "')'")?;
                Ok(inner)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn literal(&self, literal: Literal, token: &Token) -> Expr {
        Expr::new(ExprKind::Literal(literal), Span::new(token.start, token.end))
    }
}

fn binary_operator(kind: SyntaxKind) -> Option<(u8, BinaryOperator)> {
    Some(match kind {
        SyntaxKind::QuestionQuestion => (1, BinaryOperator::NullCoalesce),
        SyntaxKind::BarBar => (2, BinaryOperator::Or),
        SyntaxKind::AmpersandAmpersand => (3, BinaryOperator::And),
        SyntaxKind::EqualsEquals => (4, BinaryOperator::Equal),
        SyntaxKind::ExclamationEquals => (4, BinaryOperator::NotEqual),
        SyntaxKind::LessThan => (5, BinaryOperator::Less),
        SyntaxKind::LessThanEquals => (5, BinaryOperator::LessOrEqual),
        SyntaxKind::GreaterThan => (5, BinaryOperator::Greater),
        SyntaxKind::GreaterThanEquals => (5, BinaryOperator::GreaterOrEqual),
        SyntaxKind::Plus => (6, BinaryOperator::Add),
        SyntaxKind::Minus => (6, BinaryOperator::Subtract),
        SyntaxKind::Asterisk => (7, BinaryOperator::Multiply),
        SyntaxKind::Slash => (7, BinaryOperator::Divide),
        SyntaxKind::Percent => (7, BinaryOperator::Modulo),
        _ => return None,
    })
}
