//! Formula Parser
//!
//! Tokenizer plus a precedence-climbing parser for the cell formula
//! language. Grammar, loosest to tightest:
//!
//! ```text
//! comparison  = <> < <= > >=
//! concat      &
//! additive    + -
//! term        * /
//! power       ^
//! unary       - +
//! primary     number | "text" | #ERR! | ref | ref:ref | NAME(args) | NAME | (expr)
//! ```

use super::ast::{column_index, BinaryOp, CellAddr, CellRef, Expr, ROW_COUNT_VARIABLE};
use super::value::{EvalError, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Error(EvalError),
    Word(String),
    Op(BinaryOp),
    Minus,
    Plus,
    LParen,
    RParen,
    Comma,
    Colon,
}

fn tokenize(src: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent part
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::Parse(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            '"' => {
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(EvalError::Parse("unterminated string".into())),
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            text.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Text(text));
            }
            '#' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '/') {
                    i += 1;
                }
                // Markers end with '!' or '?', except "#N/A".
                if i < chars.len() && matches!(chars[i], '!' | '?') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let err = EvalError::from_marker(&text)
                    .ok_or_else(|| EvalError::Parse(format!("unknown error literal '{text}'")))?;
                tokens.push(Token::Error(err));
            }
            c if c.is_ascii_alphabetic() || c == '$' || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '$' | '_' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinaryOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinaryOp::Div));
                i += 1;
            }
            '^' => {
                tokens.push(Token::Op(BinaryOp::Pow));
                i += 1;
            }
            '&' => {
                tokens.push(Token::Op(BinaryOp::Concat));
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(BinaryOp::Eq));
                i += 1;
            }
            '<' => {
                match chars.get(i + 1) {
                    Some('=') => {
                        tokens.push(Token::Op(BinaryOp::Le));
                        i += 2;
                    }
                    Some('>') => {
                        tokens.push(Token::Op(BinaryOp::Ne));
                        i += 2;
                    }
                    _ => {
                        tokens.push(Token::Op(BinaryOp::Lt));
                        i += 1;
                    }
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(BinaryOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinaryOp::Gt));
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' | ';' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            other => {
                return Err(EvalError::Parse(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

/// Parse a word as an A1-style reference (`B7`, `$B$7`, `b$7`).
fn parse_cell_addr(word: &str) -> Option<CellAddr> {
    let bytes = word.as_bytes();
    let mut i = 0;

    let col_fixed = bytes.first() == Some(&b'$');
    if col_fixed {
        i += 1;
    }
    let col_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters = &word[col_start..i];
    // Three letters is the widest column we accept in a reference.
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }

    let row_fixed = bytes.get(i) == Some(&b'$');
    if row_fixed {
        i += 1;
    }
    let digits = &word[i..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }

    Some(CellAddr {
        cell: CellRef::new(row - 1, column_index(letters)?),
        row_fixed,
        col_fixed,
    })
}

/// Deepest expression tree a formula may produce. Also bounds how deep the
/// parser itself recurses.
pub const MAX_NESTING: usize = 256;

fn too_deep() -> EvalError {
    EvalError::Parse("formula nested too deeply".into())
}

/// An expression plus the height of its tree.
type Parsed = (Expr, usize);

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvalError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(EvalError::Parse(format!("expected {expected:?}, found {t:?}"))),
            None => Err(EvalError::Parse(format!("expected {expected:?}, found end of formula"))),
        }
    }

    /// Run `f` one recursion level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        if self.nesting >= MAX_NESTING {
            return Err(too_deep());
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    /// Peek at the next binary operator, treating `+`/`-` as additive.
    fn peek_binary(&self) -> Option<BinaryOp> {
        match self.peek()? {
            Token::Op(op) => Some(*op),
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        }
    }

    fn expression(&mut self, min_prec: u8) -> Result<Parsed, EvalError> {
        self.nested(|p| {
            let (mut lhs, mut height) = p.unary()?;
            while let Some(op) = p.peek_binary() {
                let prec = op.precedence();
                if prec < min_prec {
                    break;
                }
                p.pos += 1;
                let (rhs, rhs_height) = p.expression(prec + 1)?;
                height = grow(height.max(rhs_height))?;
                lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
            }
            Ok((lhs, height))
        })
    }

    fn unary(&mut self) -> Result<Parsed, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                let (inner, height) = self.nested(Self::unary)?;
                Ok((Expr::Neg(Box::new(inner)), grow(height)?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Parsed, EvalError> {
        match self.next() {
            Some(Token::Number(n)) => Ok((Expr::Literal(Value::Number(n)), 1)),
            Some(Token::Text(s)) => Ok((Expr::Literal(Value::Text(s)), 1)),
            Some(Token::Error(e)) => Ok((Expr::Error(e), 1)),
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Word(word)) => self.word(word),
            Some(t) => Err(EvalError::Parse(format!("unexpected token {t:?}"))),
            None => Err(EvalError::Parse("unexpected end of formula".into())),
        }
    }

    fn word(&mut self, word: String) -> Result<Parsed, EvalError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let (args, height) = self.arguments()?;
            return Ok((Expr::Call(word.to_ascii_uppercase(), args), grow(height)?));
        }

        if let Some(start) = parse_cell_addr(&word) {
            if self.peek() == Some(&Token::Colon) {
                self.pos += 1;
                return match self.next() {
                    Some(Token::Word(end)) => parse_cell_addr(&end)
                        .map(|end| (Expr::Range(start, end), 1))
                        .ok_or_else(|| EvalError::Parse(format!("invalid range end '{end}'"))),
                    _ => Err(EvalError::Parse("range is missing its end".into())),
                };
            }
            return Ok((Expr::Ref(start), 1));
        }

        if word.contains('$') {
            return Err(EvalError::Parse(format!("invalid reference '{word}'")));
        }

        let upper = word.to_ascii_uppercase();
        let expr = match upper.as_str() {
            "TRUE" => Expr::Literal(Value::Bool(true)),
            "FALSE" => Expr::Literal(Value::Bool(false)),
            ROW_COUNT_VARIABLE => Expr::RowCount,
            _ => Expr::Name(word),
        };
        Ok((expr, 1))
    }

    /// Arguments of a call, with the height of the tallest one.
    fn arguments(&mut self) -> Result<(Vec<Expr>, usize), EvalError> {
        let mut args = Vec::new();
        let mut height = 0;
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok((args, height));
        }
        loop {
            let (arg, arg_height) = self.expression(0)?;
            height = height.max(arg_height);
            args.push(arg);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(t) => return Err(EvalError::Parse(format!("unexpected token {t:?} in arguments"))),
                None => return Err(EvalError::Parse("unclosed function call".into())),
            }
        }
        Ok((args, height))
    }
}

/// Height of a new node over children of height `child`.
fn grow(child: usize) -> Result<usize, EvalError> {
    let height = child + 1;
    if height > MAX_NESTING {
        Err(too_deep())
    } else {
        Ok(height)
    }
}

/// Parse formula text. A leading `=` is optional.
///
/// Formulas whose expression tree is deeper than [`MAX_NESTING`] are
/// rejected, so evaluating or printing a parsed formula never recurses
/// further than that.
pub fn parse(text: &str) -> Result<Expr, EvalError> {
    let body = text.trim_start();
    let body = body.strip_prefix('=').unwrap_or(body);
    let tokens = tokenize(body)?;
    if tokens.is_empty() {
        return Err(EvalError::Parse("empty formula".into()));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let (expr, _) = parser.expression(0)?;
    if let Some(t) = parser.peek() {
        return Err(EvalError::Parse(format!("unexpected trailing token {t:?}")));
    }
    Ok(expr)
}

/// Check whether cell text is a formula rather than a literal.
pub fn is_formula(text: &str) -> bool {
    text.trim_start().starts_with('=')
}
