//! Calculation-rule parsing and evaluation.
//!
//! Derived metrics carry a formula over other metric ids, e.g.
//! `(revenue - cost_of_revenue) / revenue`. Rules are parsed once at table
//! construction; a malformed rule is a configuration error, never a
//! per-filing runtime error.

use std::collections::{BTreeSet, HashMap};

use normalize_core::{NormalizeError, Result};

/// A parsed calculation rule.
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    expr: Expr,
    inputs: BTreeSet<String>,
    text: String,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Number(f64),
    Metric(String),
    Neg(Box<Expr>),
    Binary {
        op: Op,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Formula {
    /// Parses a calculation rule.
    ///
    /// # Errors
    /// Returns [`NormalizeError::Parse`] on any syntax error.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(NormalizeError::Parse(format!(
                "unexpected trailing input in formula '{text}'"
            )));
        }
        let mut inputs = BTreeSet::new();
        collect_inputs(&expr, &mut inputs);
        Ok(Self {
            expr,
            inputs,
            text: text.to_string(),
        })
    }

    /// The metric ids this formula reads.
    #[must_use]
    pub const fn inputs(&self) -> &BTreeSet<String> {
        &self.inputs
    }

    /// The original rule text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluates the formula over resolved metric values.
    ///
    /// Returns `None` when any referenced metric is missing from `values`,
    /// a divisor is zero, or the result is not finite. A derived metric
    /// must never silently emit null, inf, or NaN.
    #[must_use]
    pub fn eval(&self, values: &HashMap<String, f64>) -> Option<f64> {
        let result = eval_expr(&self.expr, values)?;
        result.is_finite().then_some(result)
    }
}

fn collect_inputs(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Metric(id) => {
            out.insert(id.clone());
        }
        Expr::Neg(inner) => collect_inputs(inner, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_inputs(lhs, out);
            collect_inputs(rhs, out);
        }
    }
}

fn eval_expr(expr: &Expr, values: &HashMap<String, f64>) -> Option<f64> {
    match expr {
        Expr::Number(n) => Some(*n),
        Expr::Metric(id) => values.get(id).copied(),
        Expr::Neg(inner) => Some(-eval_expr(inner, values)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_expr(lhs, values)?;
            let r = eval_expr(rhs, values)?;
            match op {
                Op::Add => Some(l + r),
                Op::Sub => Some(l - r),
                Op::Mul => Some(l * r),
                Op::Div => {
                    if r == 0.0 {
                        None
                    } else {
                        Some(l / r)
                    }
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = num
                    .parse::<f64>()
                    .map_err(|_| NormalizeError::Parse(format!("invalid number '{num}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(NormalizeError::Parse(format!(
                    "unexpected character '{other}' in formula '{text}'"
                )));
            }
        }
    }
    if tokens.is_empty() {
        return Err(NormalizeError::Parse("empty formula".to_string()));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => Op::Add,
                Token::Minus => Op::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_factor()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => Op::Mul,
                Token::Slash => Op::Div,
                _ => break,
            };
            self.next();
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // factor := '-' factor | '(' expr ')' | number | metric_id
    fn parse_factor(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.parse_factor()?))),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(NormalizeError::Parse("missing closing paren".to_string())),
                }
            }
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(id)) => Ok(Expr::Metric(id)),
            other => Err(NormalizeError::Parse(format!(
                "unexpected token {other:?} in formula"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn parses_and_evaluates_margin() {
        let f = Formula::parse("(revenue - cost_of_revenue) / revenue").unwrap();
        assert_eq!(
            f.inputs().iter().collect::<Vec<_>>(),
            vec!["cost_of_revenue", "revenue"]
        );
        let result = f
            .eval(&values(&[("revenue", 1000.0), ("cost_of_revenue", 600.0)]))
            .unwrap();
        assert!((result - 0.4).abs() < 1e-12);
    }

    #[test]
    fn respects_precedence() {
        let f = Formula::parse("a + b * c").unwrap();
        let result = f
            .eval(&values(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]))
            .unwrap();
        assert!((result - 7.0).abs() < 1e-12);
    }

    #[test]
    fn missing_input_is_none() {
        let f = Formula::parse("net_income / revenue").unwrap();
        assert_eq!(f.eval(&values(&[("net_income", 5.0)])), None);
    }

    #[test]
    fn zero_divisor_is_none() {
        let f = Formula::parse("net_income / revenue").unwrap();
        assert_eq!(
            f.eval(&values(&[("net_income", 5.0), ("revenue", 0.0)])),
            None
        );
    }

    #[test]
    fn unary_minus_and_literals() {
        let f = Formula::parse("-capex + 0.5 * ocf").unwrap();
        let result = f
            .eval(&values(&[("capex", 100.0), ("ocf", 400.0)]))
            .unwrap();
        assert!((result - 100.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Formula::parse("").is_err());
        assert!(Formula::parse("revenue +").is_err());
        assert!(Formula::parse("(revenue").is_err());
        assert!(Formula::parse("revenue $ 2").is_err());
        assert!(Formula::parse("a b").is_err());
    }
}
