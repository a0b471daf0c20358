//! Recursive-descent parser over query-string tokens
//!
//! Precedence, lowest first: implicit sequence, `OR`, `AND`, unary
//! modifiers (`+`, `-`, `NOT`), primaries.

use super::lexer::{tokenize, unescape, Token};
use crate::error::{Result, TranslateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultOperator {
    And,
    Or,
}

impl DefaultOperator {
    /// Case-insensitive; anything but `AND` means `OR`
    pub fn parse(text: &str) -> Self {
        if text.eq_ignore_ascii_case("and") {
            DefaultOperator::And
        } else {
            DefaultOperator::Or
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Exists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QsValue {
    Text(String),
    Phrase(String),
    Int(i64),
    Float(f64),
    Regex(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldExpr {
    /// Explicit field path; the default field applies when unset
    pub field: Option<Vec<String>>,
    pub value: QsValue,
    pub op: CompareOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QsExpr {
    And(Box<QsExpr>, Box<QsExpr>),
    Or(Box<QsExpr>, Box<QsExpr>),
    Not(Box<QsExpr>),
    Field(FieldExpr),
}

impl QsExpr {
    fn and(l: QsExpr, r: QsExpr) -> Self {
        QsExpr::And(Box::new(l), Box::new(r))
    }

    fn or(l: QsExpr, r: QsExpr) -> Self {
        QsExpr::Or(Box::new(l), Box::new(r))
    }

    /// Assign `field` to every leaf that has none
    fn set_default_field(&mut self, field: &[String]) {
        match self {
            QsExpr::And(l, r) | QsExpr::Or(l, r) => {
                l.set_default_field(field);
                r.set_default_field(field);
            }
            QsExpr::Not(e) => e.set_default_field(field),
            QsExpr::Field(fe) => {
                if fe.field.is_none() {
                    fe.field = Some(field.to_vec());
                }
            }
        }
    }
}

/// A top-level item with its occurrence modifier
#[derive(Debug, Clone)]
enum Clause {
    Plain(QsExpr),
    Must(QsExpr),
    MustNot(QsExpr),
}

impl Clause {
    fn into_expr(self) -> QsExpr {
        match self {
            Clause::Plain(e) | Clause::Must(e) => e,
            Clause::MustNot(e) => QsExpr::Not(Box::new(e)),
        }
    }

    fn set_default_field(&mut self, field: &[String]) {
        match self {
            Clause::Plain(e) | Clause::Must(e) | Clause::MustNot(e) => e.set_default_field(field),
        }
    }
}

/// Required and prohibited clauses are always ANDed. Plain clauses are
/// joined with the default operator; with `OR` they become optional once a
/// required clause exists.
fn combine(default_op: DefaultOperator, clauses: Vec<Clause>) -> Option<QsExpr> {
    let mut musts: Option<QsExpr> = None;
    let mut plains: Option<QsExpr> = None;
    let mut has_required = false;

    for clause in clauses {
        match clause {
            Clause::Must(_) | Clause::MustNot(_) => {
                has_required |= matches!(clause, Clause::Must(_));
                let e = clause.into_expr();
                musts = Some(match musts {
                    Some(acc) => QsExpr::and(acc, e),
                    None => e,
                });
            }
            Clause::Plain(e) => {
                plains = Some(match plains {
                    Some(acc) if default_op == DefaultOperator::And => QsExpr::and(acc, e),
                    Some(acc) => QsExpr::or(acc, e),
                    None => e,
                });
            }
        }
    }

    if default_op == DefaultOperator::Or && has_required {
        return musts;
    }
    match (musts, plains) {
        (Some(m), Some(p)) => Some(QsExpr::and(m, p)),
        (m, p) => m.or(p),
    }
}

struct Parser<'q> {
    query: &'q str,
    tokens: Vec<Token>,
    pos: usize,
    default_op: DefaultOperator,
}

impl<'q> Parser<'q> {
    fn error(&self) -> TranslateError {
        TranslateError::malformed(format!("error parsing query string {:?}", self.query))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            _ => Err(self.error()),
        }
    }

    fn sequence(&mut self) -> Result<Vec<Clause>> {
        let mut clauses = Vec::new();
        while let Some(token) = self.peek() {
            if *token == Token::RParen {
                break;
            }
            clauses.push(self.or_expr()?);
        }
        Ok(clauses)
    }

    fn or_expr(&mut self) -> Result<Clause> {
        let first = self.and_expr()?;
        if self.peek() != Some(&Token::Or) {
            return Ok(first);
        }
        let mut expr = first.into_expr();
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            expr = QsExpr::or(expr, self.and_expr()?.into_expr());
        }
        Ok(Clause::Plain(expr))
    }

    fn and_expr(&mut self) -> Result<Clause> {
        let first = self.unary()?;
        if self.peek() != Some(&Token::And) {
            return Ok(first);
        }
        let mut expr = first.into_expr();
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            expr = QsExpr::and(expr, self.unary()?.into_expr());
        }
        Ok(Clause::Plain(expr))
    }

    fn unary(&mut self) -> Result<Clause> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                Ok(Clause::Must(self.primary()?))
            }
            Some(Token::Minus) | Some(Token::Not) => {
                self.pos += 1;
                Ok(Clause::MustNot(self.primary()?))
            }
            _ => Ok(Clause::Plain(self.primary()?)),
        }
    }

    fn primary(&mut self) -> Result<QsExpr> {
        let field = match self.peek() {
            Some(Token::Field(name)) => {
                let name = name.clone();
                self.pos += 1;
                Some(name)
            }
            _ => None,
        };

        if field.as_deref() == Some("_exists_") {
            let expr = match self.next() {
                Some(Token::Term(name)) | Some(Token::Phrase(name)) => QsExpr::Field(FieldExpr {
                    field: Some(split_field(&unescape(&name))),
                    value: QsValue::Text(String::new()),
                    op: CompareOp::Exists,
                }),
                _ => return Err(self.error()),
            };
            self.skip_suffixes();
            return Ok(expr);
        }

        let field_parts = field.as_deref().map(split_field);
        let expr = match self.next() {
            Some(Token::LParen) => {
                let clauses = self.sequence()?;
                self.expect(&Token::RParen)?;
                let mut clauses = clauses;
                if let Some(parts) = &field_parts {
                    clauses.iter_mut().for_each(|c| c.set_default_field(parts));
                }
                combine(self.default_op, clauses).ok_or_else(|| self.error())?
            }
            Some(Token::RangeOpen { inclusive }) => self.range(field_parts, inclusive)?,
            Some(Token::Compare(op)) => {
                let op = match op.as_str() {
                    ">=" => CompareOp::Ge,
                    ">" => CompareOp::Gt,
                    "<=" => CompareOp::Le,
                    _ => CompareOp::Lt,
                };
                let value = self.value()?;
                QsExpr::Field(FieldExpr {
                    field: field_parts,
                    value,
                    op,
                })
            }
            Some(Token::Term(text)) => QsExpr::Field(FieldExpr {
                field: field_parts,
                value: term_value(text),
                op: CompareOp::Eq,
            }),
            Some(Token::Phrase(text)) => QsExpr::Field(FieldExpr {
                field: field_parts,
                value: QsValue::Phrase(text),
                op: CompareOp::Eq,
            }),
            Some(Token::Regex(text)) => QsExpr::Field(FieldExpr {
                field: field_parts,
                value: QsValue::Regex(text),
                op: CompareOp::Eq,
            }),
            _ => return Err(self.error()),
        };

        self.skip_suffixes();
        Ok(expr)
    }

    fn value(&mut self) -> Result<QsValue> {
        match self.next() {
            Some(Token::Term(text)) => Ok(term_value(text)),
            Some(Token::Phrase(text)) => Ok(QsValue::Text(text)),
            Some(Token::Minus) => match self.next() {
                Some(Token::Term(text)) => Ok(term_value(format!("-{}", text))),
                _ => Err(self.error()),
            },
            _ => Err(self.error()),
        }
    }

    fn range(&mut self, field: Option<Vec<String>>, lower_inclusive: bool) -> Result<QsExpr> {
        let lower = self.value()?;
        self.expect(&Token::To)?;
        let upper = self.value()?;
        let upper_inclusive = match self.next() {
            Some(Token::RangeClose { inclusive }) => inclusive,
            _ => return Err(self.error()),
        };

        let is_star = |v: &QsValue| matches!(v, QsValue::Text(t) if t == "*");
        let mut bounds = Vec::new();
        if !is_star(&lower) {
            let op = if lower_inclusive { CompareOp::Ge } else { CompareOp::Gt };
            bounds.push((op, lower));
        }
        if !is_star(&upper) {
            let op = if upper_inclusive { CompareOp::Le } else { CompareOp::Lt };
            bounds.push((op, upper));
        }

        let leaf = |op, value| {
            QsExpr::Field(FieldExpr {
                field: field.clone(),
                value,
                op,
            })
        };
        let expr = bounds
            .into_iter()
            .map(|(op, value)| leaf(op, value))
            .reduce(QsExpr::and);
        Ok(expr.unwrap_or_else(|| leaf(CompareOp::Exists, QsValue::Text(String::new()))))
    }

    fn skip_suffixes(&mut self) {
        while let Some(Token::Boost(_)) | Some(Token::Fuzzy(_)) = self.peek() {
            tracing::trace!(token = ?self.peek(), "ignoring query-string boost/fuzziness");
            self.pos += 1;
        }
    }
}

fn split_field(name: &str) -> Vec<String> {
    name.split('.').map(str::to_string).collect()
}

fn term_value(text: String) -> QsValue {
    if let Ok(i) = text.parse::<i64>() {
        return QsValue::Int(i);
    }
    if text.contains(|c: char| c.is_ascii_digit()) && !text.contains(|c: char| c.is_alphabetic()) {
        if let Ok(f) = text.parse::<f64>() {
            return QsValue::Float(f);
        }
    }
    QsValue::Text(text)
}

/// Parse a query string. An empty query yields `None`.
pub fn parse(query: &str, default_op: DefaultOperator) -> Result<Option<QsExpr>> {
    let parse_error = || TranslateError::malformed(format!("error parsing query string {:?}", query));
    let (rest, tokens) = tokenize(query).map_err(|_| parse_error())?;
    if !rest.is_empty() {
        return Err(parse_error());
    }

    let mut parser = Parser {
        query,
        tokens,
        pos: 0,
        default_op,
    };
    let clauses = parser.sequence()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error());
    }
    Ok(combine(default_op, clauses))
}
