//! 表达式词法分析

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Unset,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Question,
    Colon,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }
            let token = match c {
                '0'..='9' => self.number()?,
                '\'' | '"' => self.string(c)?,
                c if c.is_alphabetic() || c == '_' || c == '$' => self.ident(),
                _ => self.operator()?,
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn number(&mut self) -> Result<Token, ExprError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            // `1.5` 是小数，`items.0` 这类写法不在语法内
            if c.is_ascii_digit() || (c == '.' && self.peek_next().is_some_and(|n| n.is_ascii_digit())) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExprError::Syntax {
                position: start,
                message: format!("invalid number `{text}`"),
            })
    }

    fn string(&mut self, quote: char) -> Result<Token, ExprError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    let escaped = self.peek().ok_or(ExprError::Syntax {
                        position: self.pos,
                        message: "unterminated escape".to_string(),
                    })?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                c if c == quote => return Ok(Token::Str(out)),
                c => out.push(c),
            }
        }
        Err(ExprError::Syntax {
            position: start,
            message: format!("unterminated string in `{}`", self.input),
        })
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            "unset" => Token::Unset,
            _ => Token::Ident(word),
        }
    }

    fn operator(&mut self) -> Result<Token, ExprError> {
        let c = self.peek().unwrap_or_default();
        let next = self.peek_next();
        let (token, width) = match (c, next) {
            ('=', Some('=')) => {
                // 兼容 `===`
                if self.chars.get(self.pos + 2) == Some(&'=') {
                    (Token::Eq, 3)
                } else {
                    (Token::Eq, 2)
                }
            }
            ('!', Some('=')) => {
                if self.chars.get(self.pos + 2) == Some(&'=') {
                    (Token::Ne, 3)
                } else {
                    (Token::Ne, 2)
                }
            }
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('!', _) => (Token::Not, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            ('?', _) => (Token::Question, 1),
            (':', _) => (Token::Colon, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            _ => {
                return Err(ExprError::Syntax {
                    position: self.pos,
                    message: format!("unexpected character `{c}`"),
                })
            }
        };
        self.pos += width;
        Ok(token)
    }
}
