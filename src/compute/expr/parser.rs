//! Recursive-descent parser producing the formula AST.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! formula     := ["return"] [conditional] {";"}
//! conditional := or ["?" conditional ":" conditional]
//! or          := and {"||" and}
//! and         := equality {"&&" equality}
//! equality    := relational {("==" | "!=" | "===" | "!==") relational}
//! relational  := additive {("<" | "<=" | ">" | ">=") additive}
//! additive    := term {("+" | "-") term}
//! term        := unary {("*" | "/" | "%") unary}
//! unary       := ("-" | "+" | "!") unary | "new" postfix | postfix
//! postfix     := primary {"." ident | "[" conditional "]" | "(" args ")"}
//! primary     := number | string | ident | "(" conditional ")"
//! ```

use super::lexer::{tokenize, Spanned, Token};
use crate::compute::ledger::ComputationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Conditional { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Member { target: Box<Expr>, name: String },
    Index { target: Box<Expr>, index: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    New { callee: Box<Expr>, args: Vec<Expr> },
}

/// Parses a formula. `Ok(None)` means the source holds no expression at all
/// (blank, or only comments).
pub fn parse(src: &str, max_depth: usize) -> Result<Option<Expr>, ComputationError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0, max_depth, src_len: src.len() };
    parser.parse_formula()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    src_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.src_len, |s| s.offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), ComputationError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn error(&self, message: impl Into<String>) -> ComputationError {
        ComputationError::Parse { offset: self.offset(), message: message.into() }
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == name)
    }

    fn enter(&mut self) -> Result<(), ComputationError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ComputationError::NestingTooDeep { limit: self.max_depth });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Charges one level for a node built on top of an existing left operand
    /// or postfix target. Chains deepen the tree as much as nesting does.
    fn link(&mut self, links: &mut usize) -> Result<(), ComputationError> {
        *links += 1;
        self.enter()
    }

    fn unwind(&mut self, links: usize) {
        self.depth -= links;
    }

    fn parse_formula(&mut self) -> Result<Option<Expr>, ComputationError> {
        if self.is_ident("return") {
            self.pos += 1;
        }
        let expr = if self.peek().is_none() || self.peek() == Some(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_conditional()?)
        };
        while self.eat(&Token::Semicolon) {}
        if self.peek().is_some() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ComputationError> {
        self.enter()?;
        let cond = self.parse_or()?;
        let expr = if self.eat(&Token::Question) {
            let then = self.parse_conditional()?;
            self.expect(&Token::Colon, "':' in conditional")?;
            let otherwise = self.parse_conditional()?;
            Expr::Conditional { cond: Box::new(cond), then: Box::new(then), otherwise: Box::new(otherwise) }
        } else {
            cond
        };
        self.leave();
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ComputationError> {
        let mut links = 0;
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            self.link(&mut links)?;
            let rhs = self.parse_and()?;
            lhs = Expr::Logical { op: LogicalOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.unwind(links);
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ComputationError> {
        let mut links = 0;
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::And) {
            self.link(&mut links)?;
            let rhs = self.parse_equality()?;
            lhs = Expr::Logical { op: LogicalOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.unwind(links);
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ComputationError> {
        let mut links = 0;
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::StrictEq) => BinaryOp::StrictEq,
                Some(Token::StrictNe) => BinaryOp::StrictNe,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.unwind(links);
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ComputationError> {
        let mut links = 0;
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.unwind(links);
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ComputationError> {
        let mut links = 0;
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.unwind(links);
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ComputationError> {
        let mut links = 0;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.unwind(links);
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ComputationError> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Bang) => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            self.enter()?;
            let operand = self.parse_unary()?;
            self.leave();
            return Ok(Expr::Unary { op, operand: Box::new(operand) });
        }

        if self.is_ident("new") {
            self.pos += 1;
            let callee = self.parse_primary()?;
            let args = if self.eat(&Token::LParen) { self.parse_args()? } else { Vec::new() };
            let target = Expr::New { callee: Box::new(callee), args };
            return self.parse_postfix(target);
        }

        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, ComputationError> {
        let mut links = 0;
        loop {
            if matches!(self.peek(), Some(Token::Dot | Token::LBracket | Token::LParen)) {
                self.link(&mut links)?;
            }
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.advance() {
                        Some(Token::Ident(name)) => {
                            expr = Expr::Member { target: Box::new(expr), name };
                        }
                        _ => return Err(self.error("expected property name after '.'")),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_conditional()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index { target: Box::new(expr), index: Box::new(index) };
                }
                Some(Token::LParen) => {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    expr = Expr::Call { callee: Box::new(expr), args };
                }
                _ => break,
            }
        }
        self.unwind(links);
        Ok(expr)
    }

    /// Parses call arguments; the opening parenthesis is already consumed.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ComputationError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_conditional()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "',' or ')' in argument list")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ComputationError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" | "undefined" => Expr::Null,
                _ => Expr::Ident(name),
            }),
            Some(Token::LParen) => {
                let inner = self.parse_conditional()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(other) => Err(ComputationError::Parse {
                offset,
                message: format!("unexpected token {:?}", other),
            }),
            None => Err(ComputationError::Parse { offset, message: "unexpected end of formula".into() }),
        }
    }
}
