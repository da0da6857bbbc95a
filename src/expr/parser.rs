//! 表达式语法分析（递归下降）
//!
//! ```text
//! expr    := or ('?' expr ':' expr)?
//! or      := and ('||' and)*
//! and     := eq ('&&' eq)*
//! eq      := cmp (('==' | '!=') cmp)*
//! cmp     := add (('<' | '<=' | '>' | '>=') add)*
//! add     := mul (('+' | '-') mul)*
//! mul     := unary (('*' | '/' | '%') unary)*
//! unary   := ('!' | '-') unary | postfix
//! postfix := primary ('.' ident | '[' expr ']')*
//! primary := literal | ident | ident '(' args ')' | '(' expr ')' | '[' args ']'
//! ```

use super::lexer::{Lexer, Token};
use super::path::{Path, Segment};
use super::ExprError;
use serde_json::Value;

/// 语法树最大嵌套层数，超出时报语法错误而不是耗尽栈
const MAX_DEPTH: usize = 128;

/// 二元运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// 访问片段，静态片段直接折叠进 [`Path`]
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Static(Segment),
    Dynamic(Box<Expr>),
}

/// 表达式语法树
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Unset,
    /// 根标识符加访问链，如 `data.revenue.total`
    Path { root: String, access: Vec<Access> },
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let tokens = Lexer::new(source).tokenize()?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let expr = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(ExprError::Syntax {
                position: parser.pos,
                message: format!("unexpected token {:?}", parser.tokens[parser.pos]),
            });
        }
        Ok(expr)
    }

    /// 纯静态路径（无动态索引）时返回根与 [`Path`]
    pub fn as_static_path(&self) -> Option<(&str, Path)> {
        let Expr::Path { root, access } = self else {
            return None;
        };
        let mut segments = Vec::with_capacity(access.len());
        for item in access {
            match item {
                Access::Static(segment) => segments.push(segment.clone()),
                Access::Dynamic(_) => return None,
            }
        }
        Some((root, Path::from_segments(segments)))
    }

    /// 收集 `data.<id>` / `ds.<id>` 形式引用的数据源 id
    pub fn referenced_datasources(&self, out: &mut Vec<String>) {
        match self {
            Expr::Path { root, access } => {
                if root == "data" || root == "ds" {
                    if let Some(Access::Static(Segment::Key(id))) = access.first() {
                        if !out.contains(id) {
                            out.push(id.clone());
                        }
                    }
                }
                for item in access {
                    if let Access::Dynamic(inner) = item {
                        inner.referenced_datasources(out);
                    }
                }
            }
            Expr::List(items) | Expr::Call(_, items) => {
                items.iter().for_each(|item| item.referenced_datasources(out));
            }
            Expr::Unary(_, inner) => inner.referenced_datasources(out),
            Expr::Binary(_, left, right) => {
                left.referenced_datasources(out);
                right.referenced_datasources(out);
            }
            Expr::Conditional(cond, then, otherwise) => {
                cond.referenced_datasources(out);
                then.referenced_datasources(out);
                otherwise.referenced_datasources(out);
            }
            Expr::Literal(_) | Expr::Unset => {}
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
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

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    fn error(&self, message: String) -> ExprError {
        ExprError::Syntax {
            position: self.pos,
            message,
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("expression nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = self.conditional();
        self.depth -= 1;
        expr
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        let cond = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.expr()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.expr()?;
            return Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn binary_level(
        &mut self,
        ops: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut left = next(self)?;
        // 左结合链每多一层，求值时也多一层递归
        let mut chained = 0;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    self.enter()?;
                    chained += 1;
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            self.depth -= chained;
            return Ok(left);
        }
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[(Token::Or, BinaryOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[(Token::And, BinaryOp::And)], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[(Token::Eq, BinaryOp::Eq), (Token::Ne, BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                (Token::Le, BinaryOp::Le),
                (Token::Ge, BinaryOp::Ge),
                (Token::Lt, BinaryOp::Lt),
                (Token::Gt, BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat(&Token::Not) {
            UnaryOp::Not
        } else if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else {
            return self.postfix();
        };
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let primary = self.primary()?;
        let Expr::Path { root, mut access } = primary else {
            if matches!(self.peek(), Some(Token::Dot) | Some(Token::LBracket)) {
                return Err(self.error("member access is only allowed on identifiers".to_string()));
            }
            return Ok(primary);
        };
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(name)) => access.push(Access::Static(Segment::Key(name))),
                    // `items.0` 风格
                    Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                        access.push(Access::Static(Segment::Index(n as usize)))
                    }
                    _ => return Err(self.error("expected field name after `.`".to_string())),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(&Token::RBracket)?;
                access.push(match index {
                    Expr::Literal(Value::String(key)) => Access::Static(Segment::Key(key)),
                    Expr::Literal(Value::Number(n)) if n.as_u64().is_some() => {
                        Access::Static(Segment::Index(n.as_u64().unwrap_or_default() as usize))
                    }
                    other => Access::Dynamic(Box::new(other)),
                });
            } else {
                return Ok(Expr::Path { root, access });
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Unset) => Ok(Expr::Unset),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => Ok(Expr::List(self.arguments(&Token::RBracket)?)),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments(&Token::RParen)?;
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Path {
                    root: name,
                    access: Vec::new(),
                })
            }
            Some(other) => Err(ExprError::Syntax {
                position: self.pos.saturating_sub(1),
                message: format!("unexpected token {other:?}"),
            }),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }

    fn arguments(&mut self, close: &Token) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }
}

/// 整数保持整数表示，避免 `1` 变成 `1.0`
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
