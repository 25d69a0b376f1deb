use serde_json::Value;

use super::lexer::{Spanned, Token};
use super::MAX_DEPTH;
use crate::error::PredicateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Abs,
    Str,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Lower,
    Upper,
    Strip,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    /// The payload the predicate is invoked with.
    Arg,
    Index(Box<Expr>, Box<Expr>),
    Method(Box<Expr>, Method, Vec<Expr>),
    Call(Builtin, Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Arith(Box<Expr>, ArithOp, Box<Expr>),
    In {
        needle: Box<Expr>,
        haystack: Box<Expr>,
        negated: bool,
    },
}

/// Parse a full predicate source, including the optional `lambda <name>:` header.
pub fn parse(tokens: &[Spanned], source_len: usize) -> Result<Expr, PredicateError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        arg: "data".to_string(),
        source_len,
    };

    if parser.peek_ident("lambda") {
        parser.pos += 1;
        parser.arg = parser.expect_ident()?;
        parser.expect(&Token::Colon, "expected ':' after lambda parameter")?;
    }

    let expr = parser.expression()?;
    if parser.pos < tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
    arg: String,
    source_len: usize,
}

impl Parser<'_> {
    fn expression(&mut self) -> Result<Expr, PredicateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PredicateError::TooDeep);
        }
        let expr = self.or();
        self.depth -= 1;
        expr
    }

    fn or(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.and()?;
        while self.eat_ident("or") {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.not()?;
        while self.eat_ident("and") {
            let rhs = self.not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, PredicateError> {
        if self.eat_ident("not") {
            let inner = self.nested(Self::not)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, PredicateError> {
        let lhs = self.sum()?;

        let op = match self.peek() {
            Some(Token::Eq) => CmpOp::Eq,
            Some(Token::Ne) => CmpOp::Ne,
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            Some(Token::Ident(word)) if word == "in" => {
                self.pos += 1;
                return self.membership(lhs, false);
            }
            Some(Token::Ident(word)) if word == "not" && self.peek_ident_at(1, "in") => {
                self.pos += 2;
                return self.membership(lhs, true);
            }
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.sum()?;
        Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)))
    }

    fn membership(&mut self, needle: Expr, negated: bool) -> Result<Expr, PredicateError> {
        let haystack = self.sum()?;
        Ok(Expr::In {
            needle: Box::new(needle),
            haystack: Box::new(haystack),
            negated,
        })
    }

    fn sum(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Arith(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::Percent) => ArithOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Arith(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, PredicateError> {
        if self.eat(&Token::Minus) {
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, PredicateError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::LBracket) {
                let key = self.expression()?;
                self.expect(&Token::RBracket, "expected ']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else if self.eat(&Token::Dot) {
                let offset = self.offset();
                let name = self.expect_ident()?;
                let method = match name.as_str() {
                    "get" => Method::Get,
                    "lower" => Method::Lower,
                    "upper" => Method::Upper,
                    "strip" => Method::Strip,
                    "startswith" => Method::StartsWith,
                    "endswith" => Method::EndsWith,
                    _ => return Err(PredicateError::UnknownName(name)),
                };
                self.expect(&Token::LParen, "expected '(' after method name")?;
                let args = self.arguments()?;
                check_arity(method_arity(method), args.len(), offset)?;
                expr = Expr::Method(Box::new(expr), method, args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, PredicateError> {
        let offset = self.offset();
        let token = match self.tokens.get(self.pos) {
            Some(spanned) => spanned.token.clone(),
            None => return Err(self.error("unexpected end of input")),
        };
        self.pos += 1;

        match token {
            Token::Number(n) => serde_json::Number::from_f64(n)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| self.error("invalid number")),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma, "expected ',' or ']'")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
                "None" | "null" => Ok(Expr::Literal(Value::Null)),
                _ if name == self.arg => Ok(Expr::Arg),
                "len" | "abs" | "str" | "float" if self.peek() == Some(&Token::LParen) => {
                    self.pos += 1;
                    let builtin = match name.as_str() {
                        "len" => Builtin::Len,
                        "abs" => Builtin::Abs,
                        "str" => Builtin::Str,
                        _ => Builtin::Float,
                    };
                    let args = self.arguments()?;
                    check_arity((1, 1), args.len(), offset)?;
                    Ok(Expr::Call(builtin, args))
                }
                _ => Err(PredicateError::UnknownName(name)),
            },
            _ => Err(PredicateError::Syntax {
                offset,
                message: "expected an expression".to_string(),
            }),
        }
    }

    /// Comma-separated arguments after an already consumed '('.
    fn arguments(&mut self) -> Result<Vec<Expr>, PredicateError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "expected ',' or ')'")?;
        }
    }

    fn nested(
        &mut self,
        rule: fn(&mut Self) -> Result<Expr, PredicateError>,
    ) -> Result<Expr, PredicateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PredicateError::TooDeep);
        }
        let expr = rule(self);
        self.depth -= 1;
        expr
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_ident(&self, word: &str) -> bool {
        self.peek_ident_at(0, word)
    }

    fn peek_ident_at(&self, ahead: usize, word: &str) -> bool {
        matches!(
            self.tokens.get(self.pos + ahead).map(|s| &s.token),
            Some(Token::Ident(w)) if w == word
        )
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.peek_ident(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), PredicateError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn expect_ident(&mut self) -> Result<String, PredicateError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or(self.source_len)
    }

    fn error(&self, message: &str) -> PredicateError {
        PredicateError::Syntax {
            offset: self.offset(),
            message: message.to_string(),
        }
    }
}

fn method_arity(method: Method) -> (usize, usize) {
    match method {
        Method::Get => (1, 2),
        Method::Lower | Method::Upper | Method::Strip => (0, 0),
        Method::StartsWith | Method::EndsWith => (1, 1),
    }
}

fn check_arity((min, max): (usize, usize), got: usize, offset: usize) -> Result<(), PredicateError> {
    if got < min || got > max {
        return Err(PredicateError::Syntax {
            offset,
            message: format!("wrong number of arguments: {}", got),
        });
    }
    Ok(())
}
