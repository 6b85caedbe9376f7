// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Line-oriented statements of the pattern language.

use std::collections::BTreeMap;

use logos::{Lexer, Logos};

use crate::core::{RawFormat, Result, WorkerError};

#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+")]
enum Token {
    #[token("=")]
    Equals,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[regex("[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Number(i64),

    #[regex("[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    Eof,
}

impl Token {
    fn name(&self) -> &'static str {
        match self {
            Token::Equals => "'='",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::Number(_) => "number",
            Token::Ident => "identifier",
            Token::Eof => "end of line",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(i64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn eval(&self, vars: &BTreeMap<String, i64>) -> Result<i64> {
        let overflow = || WorkerError::Script("integer overflow".into());
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Var(name) => vars
                .get(name)
                .copied()
                .ok_or_else(|| WorkerError::Script(format!("undefined name '{}'", name))),
            Expr::Neg(inner) => inner.eval(vars)?.checked_neg().ok_or_else(overflow),
            Expr::Binary(op, lhs, rhs) => {
                let (lhs, rhs) = (lhs.eval(vars)?, rhs.eval(vars)?);
                match op {
                    BinOp::Add => lhs.checked_add(rhs),
                    BinOp::Sub => lhs.checked_sub(rhs),
                    BinOp::Mul => lhs.checked_mul(rhs),
                }
                .ok_or_else(overflow)
            }
        }
    }
}

/// `output` options. Missing ones fall back to the script defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub key: String,
    pub length: Expr,
    pub width: Option<Expr>,
    pub height: Option<Expr>,
    pub format: Option<RawFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Assign { name: String, value: Expr },
    Output(OutputSpec),
    Clear,
    Fail(String),
    Sleep(Expr),
    Kill,
}

struct Parser<'src> {
    lexer: Lexer<'src, Token>,
}

impl<'src> Parser<'src> {
    fn new(line: &'src str) -> Self {
        Self {
            lexer: Token::lexer(line),
        }
    }

    fn next(&mut self) -> Result<Token> {
        match self.lexer.next() {
            None => Ok(Token::Eof),
            Some(Ok(token)) => Ok(token),
            Some(Err(())) => Err(WorkerError::Script(format!(
                "unexpected '{}'",
                self.lexer.slice()
            ))),
        }
    }

    fn peek(&self) -> Result<Token> {
        let mut lookahead = self.lexer.clone();
        match lookahead.next() {
            None => Ok(Token::Eof),
            Some(Ok(token)) => Ok(token),
            Some(Err(())) => Err(WorkerError::Script(format!(
                "unexpected '{}'",
                lookahead.slice()
            ))),
        }
    }

    fn accept(&mut self, expected: &Token) -> Result<bool> {
        if &self.peek()? == expected {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        let next = self.next()?;
        if &next == expected {
            Ok(())
        } else {
            Err(WorkerError::Script(format!(
                "expected {}, found {}",
                expected.name(),
                next.name()
            )))
        }
    }

    fn ident(&mut self) -> Result<&'src str> {
        match self.next()? {
            Token::Ident => Ok(self.lexer.slice()),
            other => Err(WorkerError::Script(format!(
                "expected identifier, found {}",
                other.name()
            ))),
        }
    }

    /// Output keys may be names or bare numbers.
    fn key(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident | Token::Number(_) => Ok(self.lexer.slice().to_string()),
            other => Err(WorkerError::Script(format!(
                "expected output key, found {}",
                other.name()
            ))),
        }
    }

    fn end_of_line(&mut self) -> Result<()> {
        self.expect(&Token::Eof)
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.accept(&Token::Plus)? {
                BinOp::Add
            } else if self.accept(&Token::Minus)? {
                BinOp::Sub
            } else {
                return Ok(lhs);
            };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while self.accept(&Token::Star)? {
            lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.accept(&Token::Minus)? {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        match self.next()? {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident => Ok(Expr::Var(self.lexer.slice().to_string())),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            other => Err(WorkerError::Script(format!(
                "expected expression, found {}",
                other.name()
            ))),
        }
    }

    fn output(&mut self) -> Result<OutputSpec> {
        let key = self.key()?;
        let (mut length, mut width, mut height, mut format) = (None, None, None, None);

        while self.peek()? != Token::Eof {
            let option = self.ident()?;
            self.expect(&Token::Equals)?;
            match option {
                "length" => length = Some(self.expr()?),
                "width" => width = Some(self.expr()?),
                "height" => height = Some(self.expr()?),
                "format" => format = Some(self.ident()?.parse::<RawFormat>()?),
                other => {
                    return Err(WorkerError::Script(format!(
                        "unknown output option '{}'",
                        other
                    )))
                }
            }
        }

        let length = length.ok_or_else(|| {
            WorkerError::Script(format!("output '{}' needs length=", key))
        })?;
        Ok(OutputSpec {
            key,
            length,
            width,
            height,
            format,
        })
    }

    fn statement(&mut self, first_word: &str) -> Result<Statement> {
        let statement = match first_word {
            "output" => {
                self.next()?;
                Statement::Output(self.output()?)
            }
            "clear" => {
                self.next()?;
                Statement::Clear
            }
            "kill" => {
                self.next()?;
                Statement::Kill
            }
            "sleep" => {
                self.next()?;
                Statement::Sleep(self.expr()?)
            }
            _ => {
                let name = self.ident()?.to_string();
                self.expect(&Token::Equals)?;
                Statement::Assign {
                    name,
                    value: self.expr()?,
                }
            }
        };
        self.end_of_line()?;
        Ok(statement)
    }
}

fn parse_line(line: &str) -> Result<Option<Statement>> {
    let line = match line.split_once('#') {
        Some((code, _comment)) => code,
        None => line,
    }
    .trim();
    if line.is_empty() {
        return Ok(None);
    }

    let first_word = line.split_whitespace().next().unwrap_or_default();
    if first_word == "fail" {
        let message = line["fail".len()..].trim();
        return Ok(Some(Statement::Fail(message.to_string())));
    }
    Parser::new(line).statement(first_word).map(Some)
}

/// Parse a whole program. Errors carry the 1-based line number.
pub fn parse(source: &str) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for (number, line) in source.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(statement)) => statements.push(statement),
            Ok(None) => {}
            Err(e) => {
                return Err(WorkerError::Script(format!("line {}: {}", number + 1, e)));
            }
        }
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> i64 {
        match parse(source).unwrap().as_slice() {
            [Statement::Assign { value, .. }] => value.eval(&BTreeMap::new()).unwrap(),
            other => panic!("not a single assignment: {:?}", other),
        }
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval("x = 1+1"), 2);
        assert_eq!(eval("x = 2 + 3 * 4"), 14);
        assert_eq!(eval("x = (2 + 3) * 4"), 20);
        assert_eq!(eval("x = 10 - 4 - 3"), 3);
        assert_eq!(eval("x = -2 * -3"), 6);
    }

    #[test]
    fn test_output_options() {
        let statements = parse("output 0 length=5\noutput big length=2*3 width=w format=gray8").unwrap();
        assert_eq!(
            statements[0],
            Statement::Output(OutputSpec {
                key: "0".into(),
                length: Expr::Number(5),
                width: None,
                height: None,
                format: None,
            })
        );
        let Statement::Output(big) = &statements[1] else {
            panic!("expected output");
        };
        assert_eq!(big.key, "big");
        assert_eq!(big.width, Some(Expr::Var("w".into())));
        assert_eq!(big.format, Some(RawFormat::GRAY8));
    }

    #[test]
    fn test_comments_blank_lines_and_fail() {
        let statements = parse("# setup\n\nclear  # reset\nfail went # wrong\nkill").unwrap();
        assert_eq!(
            statements,
            vec![
                Statement::Clear,
                Statement::Fail("went".into()),
                Statement::Kill
            ]
        );
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse("x = 1\noutput 0 width=3").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);

        let err = parse("x = 1 +").unwrap_err();
        assert!(err.to_string().contains("line 1"), "{}", err);

        assert!(parse("x = 1 $").is_err());
        assert!(parse("output 0 length=1 colour=red").is_err());
    }

    #[test]
    fn test_undefined_name_and_overflow() {
        let vars = BTreeMap::from([("a".to_string(), i64::MAX)]);
        assert!(Expr::Var("b".into()).eval(&vars).is_err());
        let sum = Expr::Binary(BinOp::Add, Box::new(Expr::Var("a".into())), Box::new(Expr::Number(1)));
        assert!(sum.eval(&vars).is_err());
    }
}
