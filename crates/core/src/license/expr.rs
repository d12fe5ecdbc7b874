//! License expression parsing and evaluation.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or_expr  := and_expr ( OR and_expr )*
//! and_expr := primary ( AND primary )*
//! primary  := "(" or_expr ")" | license
//! license  := word+ ( WITH word+ )?
//! ```
//!
//! Operators are case-insensitive. Adjacent words form one identifier, so
//! `MIT License` is a single license rather than a syntax error.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use super::snapshot::PolicySnapshot;
use super::types::{LicenseTier, LicenseVerdict};
use crate::metrics;

/// Nesting limit for parenthesised groups.
const MAX_DEPTH: usize = 64;

/// Why an expression could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,

    #[error("invalid character '{0}' at offset {1}")]
    InvalidCharacter(char, usize),

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unbalanced parentheses")]
    UnbalancedParentheses,

    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

/// A single license reference, optionally with an SPDX exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseRef {
    pub identifier: String,
    pub exception: Option<String>,
}

impl fmt::Display for LicenseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exception {
            Some(exception) => write!(f, "{} WITH {}", self.identifier, exception),
            None => f.write_str(&self.identifier),
        }
    }
}

/// Parsed license expression.
///
/// A chain of the same operator is kept flat (`A OR B OR C` is one `Or` with
/// three operands), so tree depth only grows with parenthesised nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseExpr {
    Leaf(LicenseRef),
    /// Two or more operands.
    And(Vec<LicenseExpr>),
    /// Two or more operands.
    Or(Vec<LicenseExpr>),
}

impl fmt::Display for LicenseExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (operands, op) = match self {
            LicenseExpr::Leaf(license) => return write!(f, "{}", license),
            LicenseExpr::And(operands) => (operands, " AND "),
            LicenseExpr::Or(operands) => (operands, " OR "),
        };
        f.write_str("(")?;
        for (i, operand) in operands.iter().enumerate() {
            if i > 0 {
                f.write_str(op)?;
            }
            write!(f, "{}", operand)?;
        }
        f.write_str(")")
    }
}

impl LicenseExpr {
    /// Resolve the expression against a policy snapshot.
    ///
    /// `OR` keeps the higher-scoring operand, `AND` the lower one. On a tie the
    /// leftmost operand is kept.
    pub fn evaluate(&self, policy: &PolicySnapshot) -> LicenseVerdict {
        match self {
            LicenseExpr::Leaf(license) => evaluate_leaf(license, policy),
            LicenseExpr::Or(operands) => fold(operands, policy, |r, l| r.score > l.score),
            LicenseExpr::And(operands) => fold(operands, policy, |r, l| r.score < l.score),
        }
    }
}

/// Evaluate operands left to right, replacing the kept verdict whenever
/// `better(candidate, kept)` holds.
fn fold(
    operands: &[LicenseExpr],
    policy: &PolicySnapshot,
    better: impl Fn(&LicenseVerdict, &LicenseVerdict) -> bool,
) -> LicenseVerdict {
    let mut kept: Option<LicenseVerdict> = None;
    for operand in operands {
        let candidate = operand.evaluate(policy);
        kept = match kept {
            Some(current) if !better(&candidate, &current) => Some(current),
            _ => Some(candidate),
        };
    }
    kept.unwrap_or_else(|| LicenseVerdict::malformed(policy.unknown_score()))
}

fn evaluate_leaf(license: &LicenseRef, policy: &PolicySnapshot) -> LicenseVerdict {
    if license.exception.is_some() {
        if let Some(entry) = policy.lookup(&license.to_string()) {
            return LicenseVerdict {
                identifier: Some(entry.identifier.clone()),
                tier: entry.tier,
                score: Some(entry.score),
            };
        }
    }

    match policy.lookup(&license.identifier) {
        Some(entry) => {
            let identifier = match &license.exception {
                Some(exception) => format!("{} WITH {}", entry.identifier, exception),
                None => entry.identifier.clone(),
            };
            LicenseVerdict {
                identifier: Some(identifier),
                tier: entry.tier,
                score: Some(entry.score),
            }
        }
        None => LicenseVerdict {
            identifier: Some(license.to_string()),
            tier: LicenseTier::Unknown,
            score: Some(policy.unknown_score()),
        },
    }
}

/// Evaluate a raw expression. Never fails: empty input yields an unknown verdict
/// without a score, malformed input an unknown verdict with the unknown score.
pub fn evaluate(expression: &str, policy: &PolicySnapshot) -> LicenseVerdict {
    let verdict = evaluate_inner(expression, policy);
    metrics::LICENSE_EVALUATIONS
        .with_label_values(&[verdict.tier.as_str()])
        .inc();
    verdict
}

fn evaluate_inner(expression: &str, policy: &PolicySnapshot) -> LicenseVerdict {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return LicenseVerdict::empty();
    }

    // Whole-string match first: some registered names contain punctuation the
    // expression grammar does not allow ("Apache License, Version 2.0").
    if let Some(entry) = policy.lookup(trimmed) {
        return LicenseVerdict {
            identifier: Some(entry.identifier.clone()),
            tier: entry.tier,
            score: Some(entry.score),
        };
    }

    match parse_expression(trimmed) {
        Ok(expr) => expr.evaluate(policy),
        Err(e) => {
            warn!("Malformed license expression {:?}: {}", expression, e);
            LicenseVerdict::malformed(policy.unknown_score())
        }
    }
}

/// Parse an expression into a tree.
pub fn parse_expression(input: &str) -> Result<LicenseExpr, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;

    match parser.peek() {
        None => Ok(expr),
        Some(Token::RParen) => Err(ExpressionError::UnbalancedParentheses),
        Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    With,
    Word(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::And => "AND".to_string(),
            Token::Or => "OR".to_string(),
            Token::With => "WITH".to_string(),
            Token::Word(w) => format!("'{}'", w),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '+' | ':' | '_')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            tokens.push(Token::LParen);
            chars.next();
        } else if c == ')' {
            tokens.push(Token::RParen);
            chars.next();
        } else if is_word_char(c) {
            let mut word = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !is_word_char(c) {
                    break;
                }
                word.push(c);
                chars.next();
            }
            let token = match word.to_ascii_uppercase().as_str() {
                "AND" => Token::And,
                "OR" => Token::Or,
                "WITH" => Token::With,
                _ => Token::Word(word),
            };
            tokens.push(token);
        } else {
            return Err(ExpressionError::InvalidCharacter(c, offset));
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<LicenseExpr, ExpressionError> {
        let mut operands = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            LicenseExpr::Or(operands)
        })
    }

    fn parse_and(&mut self) -> Result<LicenseExpr, ExpressionError> {
        let mut operands = vec![self.parse_primary()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            operands.push(self.parse_primary()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            LicenseExpr::And(operands)
        })
    }

    fn parse_primary(&mut self) -> Result<LicenseExpr, ExpressionError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.next();
                self.depth += 1;
                if self.depth > MAX_DEPTH {
                    return Err(ExpressionError::TooDeep(MAX_DEPTH));
                }
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => {
                        self.depth -= 1;
                        Ok(inner)
                    }
                    None => Err(ExpressionError::UnbalancedParentheses),
                    Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
                }
            }
            Some(Token::Word(_)) => self.parse_license(),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_license(&mut self) -> Result<LicenseExpr, ExpressionError> {
        let identifier = self.parse_words()?;
        let exception = if self.peek() == Some(&Token::With) {
            self.next();
            Some(self.parse_words()?)
        } else {
            None
        };
        Ok(LicenseExpr::Leaf(LicenseRef {
            identifier,
            exception,
        }))
    }

    fn parse_words(&mut self) -> Result<String, ExpressionError> {
        let mut words = Vec::new();
        while let Some(Token::Word(word)) = self.peek() {
            words.push(word.as_str());
            self.next();
        }
        if words.is_empty() {
            return match self.peek() {
                Some(token) => Err(ExpressionError::UnexpectedToken(token.describe())),
                None => Err(ExpressionError::UnexpectedEnd),
            };
        }
        Ok(words.join(" "))
    }
}
