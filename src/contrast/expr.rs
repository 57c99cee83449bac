//! Arithmetic expressions over named columns.
//!
//! Grammar: `+ - * /`, unary minus, parentheses, numeric literals, bare
//! identifiers (`[A-Za-z_][A-Za-z0-9_]*`) and backtick-quoted identifiers
//! (`` `(Intercept)` ``). Identifiers are resolved at compile time against an
//! allow-list of column names.

use thiserror::Error;

/// Deepest nesting of parentheses, signs and operator chains accepted.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedCharacter { ch: char, offset: usize },
    #[error("unterminated backtick quote starting at offset {0}")]
    UnterminatedQuote(usize),
    #[error("invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("empty expression")]
    Empty,
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("expression nests deeper than {max} levels at offset {offset}")]
    TooDeep { max: usize, offset: usize },
}

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Var(usize), // index into `CompiledExpr::columns`
    Neg(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// A parsed expression ready for row-wise evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    ast: Expr,
    /// Column names referenced by the expression, by first occurrence.
    pub columns: Vec<String>,
}

impl CompiledExpr {
    /// Parse `input`, resolving identifiers against `allowed`.
    ///
    /// With `unknown_as_nan`, identifiers outside `allowed` evaluate to NaN
    /// instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `ExprError` for syntax errors and, unless `unknown_as_nan`,
    /// for identifiers outside `allowed`.
    pub fn compile(input: &str, allowed: &[&str], unknown_as_nan: bool) -> Result<Self, ExprError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            allowed,
            unknown_as_nan,
            columns: Vec::new(),
            depth: 0,
        };
        let (ast, _) = parser.parse_add()?;
        if let Some(token) = parser.peek() {
            return Err(ExprError::UnexpectedToken {
                found: token.kind.describe(),
                offset: token.offset,
            });
        }
        Ok(Self {
            ast,
            columns: parser.columns,
        })
    }

    /// Evaluate for one row; `values` follows the order of `columns`.
    #[must_use]
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval(&self.ast, values)
    }

    /// Evaluate column-wise; `columns` follows the order of `self.columns`
    /// and every slice holds `rows` values.
    #[must_use]
    pub fn eval_bulk(&self, columns: &[&[f64]], rows: usize) -> Vec<f64> {
        let mut scratch = vec![0.0; columns.len()];
        (0..rows)
            .map(|row| {
                for (slot, column) in scratch.iter_mut().zip(columns) {
                    *slot = column[row];
                }
                self.eval_row(&scratch)
            })
            .collect()
    }
}

fn eval(expr: &Expr, values: &[f64]) -> f64 {
    match expr {
        Expr::Number(n) => *n,
        Expr::Var(i) => values[*i],
        Expr::Neg(inner) => -eval(inner, values),
        Expr::BinOp(op, lhs, rhs) => {
            let lhs = eval(lhs, values);
            let rhs = eval(rhs, values);
            match op {
                BinOp::Add => lhs + rhs,
                BinOp::Sub => lhs - rhs,
                BinOp::Mul => lhs * rhs,
                BinOp::Div => lhs / rhs,
            }
        }
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            Self::Num(n) => format!("number {n}"),
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Plus => "'+'".to_string(),
            Self::Minus => "'-'".to_string(),
            Self::Star => "'*'".to_string(),
            Self::Slash => "'/'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let kind = match ch {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            _ => None,
        };
        if let Some(kind) = kind {
            chars.next();
            tokens.push(Token { kind, offset });
            continue;
        }

        if ch == '`' {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == '`' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                return Err(ExprError::UnterminatedQuote(offset));
            }
            tokens.push(Token {
                kind: TokenKind::Ident(name),
                offset,
            });
        } else if ch.is_ascii_digit() || ch == '.' {
            let mut text = String::new();
            while let Some(&(_, c)) = chars.peek() {
                let exponent_sign =
                    (c == '+' || c == '-') && text.ends_with(['e', 'E']);
                if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                    text.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = text
                .parse::<f64>()
                .map_err(|_| ExprError::InvalidNumber {
                    text: text.clone(),
                    offset,
                })?;
            tokens.push(Token {
                kind: TokenKind::Num(value),
                offset,
            });
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            let mut name = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident(name),
                offset,
            });
        } else {
            return Err(ExprError::UnexpectedCharacter { ch, offset });
        }
    }
    Ok(tokens)
}

// ── Parser ─────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    allowed: &'a [&'a str],
    unknown_as_nan: bool,
    columns: Vec<String>,
    /// Current recursion depth of `parse_unary`.
    depth: usize,
}

/// A parsed subtree and its height.
type Parsed = (Expr, usize);

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek()
            .or_else(|| self.tokens.last())
            .map_or(0, |token| token.offset)
    }

    /// Combine two subtrees, keeping the height under `MAX_DEPTH`.
    fn combine(&self, op: BinOp, lhs: Parsed, rhs: Parsed) -> Result<Parsed, ExprError> {
        let height = lhs.1.max(rhs.1) + 1;
        if height > MAX_DEPTH {
            return Err(ExprError::TooDeep {
                max: MAX_DEPTH,
                offset: self.offset(),
            });
        }
        Ok((Expr::BinOp(op, Box::new(lhs.0), Box::new(rhs.0)), height))
    }

    fn resolve_var(&mut self, name: String) -> Result<Expr, ExprError> {
        if !self.allowed.contains(&name.as_str()) {
            return if self.unknown_as_nan {
                Ok(Expr::Number(f64::NAN))
            } else {
                Err(ExprError::UnknownIdentifier(name))
            };
        }
        let idx = match self.columns.iter().position(|column| *column == name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name);
                self.columns.len() - 1
            }
        };
        Ok(Expr::Var(idx))
    }

    fn parse_add(&mut self) -> Result<Parsed, ExprError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = self.combine(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Parsed, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.combine(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Parsed, ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::TooDeep {
                max: MAX_DEPTH,
                offset: self.offset(),
            });
        }
        self.depth += 1;
        let parsed = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => {
                self.advance();
                self.parse_unary()
                    .map(|(inner, height)| (Expr::Neg(Box::new(inner)), height + 1))
            }
            Some(TokenKind::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_atom(),
        };
        self.depth -= 1;
        parsed
    }

    fn parse_atom(&mut self) -> Result<Parsed, ExprError> {
        let token = self.advance().ok_or(ExprError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Num(n) => Ok((Expr::Number(n), 1)),
            TokenKind::Ident(name) => self.resolve_var(name).map(|var| (var, 1)),
            TokenKind::LParen => {
                let inner = self.parse_add()?;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(ExprError::UnexpectedToken {
                        found: other.kind.describe(),
                        offset: other.offset,
                    }),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
                offset: token.offset,
            }),
        }
    }
}
