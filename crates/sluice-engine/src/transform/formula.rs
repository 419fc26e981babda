//! Row expressions for the `formula` step
//!
//! Expressions reference columns by name and support arithmetic
//! (`+ - * / % ^`, `mod`), comparisons, `and`/`or`/`not` (also `&& || !`),
//! the ternary `c ? a : b` and a small set of numeric functions. An
//! expression is parsed once per table and evaluated per row.

use std::fmt;

use serde_json::Value;

use crate::error::{EtlError, Result};
use crate::value;
use crate::working_set::Row;

fn formula_error(message: impl Into<String>) -> EtlError {
    EtlError::Formula(message.into())
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const SYMBOLS: [&str; 20] = [
    "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "^", "<", ">", "!", "(", ")",
    ",", "?", ":",
];

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
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
            let number = text
                .parse::<f64>()
                .map_err(|_| formula_error(format!("invalid number '{}'", text)))?;
            tokens.push(Token::Num(number));
        } else if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(formula_error("unterminated string literal")),
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            text.push(*next);
                        }
                        i += 2;
                    },
                    Some(ch) if *ch == quote => {
                        i += 1;
                        break;
                    },
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    },
                }
            }
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let symbol = SYMBOLS
                .iter()
                .find(|s| rest.starts_with(**s))
                .ok_or_else(|| formula_error(format!("unexpected character '{}'", c)))?;
            tokens.push(Token::Op(*symbol));
            i += symbol.len();
        }
    }

    Ok(tokens)
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Ceil,
    Floor,
    Round,
    Sqrt,
    Exp,
    Log,
    Log10,
    Pow,
    Min,
    Max,
    Mod,
    Concat,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Func::Abs,
            "ceil" => Func::Ceil,
            "floor" => Func::Floor,
            "round" => Func::Round,
            "sqrt" => Func::Sqrt,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            "mod" => Func::Mod,
            "concat" => Func::Concat,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive
    fn arity(self) -> (usize, usize) {
        match self {
            Func::Abs | Func::Ceil | Func::Floor | Func::Sqrt | Func::Exp | Func::Log10 => (1, 1),
            Func::Round | Func::Log => (1, 2),
            Func::Pow | Func::Mod => (2, 2),
            Func::Min | Func::Max | Func::Concat => (1, usize::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Val),
    Column(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

// ============================================================================
// Parser
// ============================================================================

const TERNARY_BP: u8 = 1;
const PREFIX_BP: u8 = 14;

fn infix(token: &Token) -> Option<(BinaryOp, u8, u8)> {
    let op = match token {
        Token::Op(op) => *op,
        Token::Ident(word) => match word.as_str() {
            "and" => "&&",
            "or" => "||",
            "mod" => "%",
            _ => return None,
        },
        _ => return None,
    };
    Some(match op {
        "||" => (BinaryOp::Or, 2, 3),
        "&&" => (BinaryOp::And, 4, 5),
        "==" => (BinaryOp::Eq, 6, 7),
        "!=" => (BinaryOp::Ne, 6, 7),
        "<" => (BinaryOp::Lt, 8, 9),
        "<=" => (BinaryOp::Le, 8, 9),
        ">" => (BinaryOp::Gt, 8, 9),
        ">=" => (BinaryOp::Ge, 8, 9),
        "+" => (BinaryOp::Add, 10, 11),
        "-" => (BinaryOp::Sub, 10, 11),
        "*" => (BinaryOp::Mul, 12, 13),
        "/" => (BinaryOp::Div, 12, 13),
        "%" => (BinaryOp::Mod, 12, 13),
        "^" => (BinaryOp::Pow, 16, 15),
        _ => return None,
    })
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
        self.pos += 1;
        token
    }

    fn expect(&mut self, symbol: &str) -> Result<()> {
        match self.next() {
            Some(Token::Op(op)) if op == symbol => Ok(()),
            Some(other) => Err(formula_error(format!("expected '{}', found {:?}", symbol, other))),
            None => Err(formula_error(format!("expected '{}' at end of expression", symbol))),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr> {
        let mut left = self.prefix()?;

        loop {
            let Some(token) = self.peek() else { break };

            if *token == Token::Op("?") {
                if TERNARY_BP < min_bp {
                    break;
                }
                self.pos += 1;
                let then = self.expression(0)?;
                self.expect(":")?;
                let otherwise = self.expression(TERNARY_BP)?;
                left = Expr::Conditional(Box::new(left), Box::new(then), Box::new(otherwise));
                continue;
            }

            let Some((op, left_bp, right_bp)) = infix(token) else { break };
            if left_bp < min_bp {
                break;
            }
            self.pos += 1;
            let right = self.expression(right_bp)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Literal(Val::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Val::Str(s))),
            Some(Token::Op("-")) => Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.expression(PREFIX_BP)?))),
            Some(Token::Op("+")) => self.expression(PREFIX_BP),
            Some(Token::Op("!")) => Ok(Expr::Unary(UnaryOp::Not, Box::new(self.expression(PREFIX_BP)?))),
            Some(Token::Op("(")) => {
                let inner = self.expression(0)?;
                self.expect(")")?;
                Ok(inner)
            },
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Val::Bool(true))),
                "false" => Ok(Expr::Literal(Val::Bool(false))),
                "null" => Ok(Expr::Literal(Val::Null)),
                "not" => Ok(Expr::Unary(UnaryOp::Not, Box::new(self.expression(PREFIX_BP)?))),
                _ if self.peek() == Some(&Token::Op("(")) => self.call(&name),
                _ => Ok(Expr::Column(name)),
            },
            Some(other) => Err(formula_error(format!("unexpected token {:?}", other))),
            None => Err(formula_error("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr> {
        let func = Func::lookup(name).ok_or_else(|| formula_error(format!("unknown function '{}'", name)))?;
        self.expect("(")?;

        let mut args = Vec::new();
        if self.peek() == Some(&Token::Op(")")) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expression(0)?);
                match self.next() {
                    Some(Token::Op(",")) => continue,
                    Some(Token::Op(")")) => break,
                    _ => return Err(formula_error(format!("expected ',' or ')' in call to {}", name))),
                }
            }
        }

        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(formula_error(format!(
                "wrong number of arguments to {} ({} given)",
                name,
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Val {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Val::Num(n) => write!(f, "{}", n),
            Val::Str(s) => f.write_str(s),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Null => Ok(()),
        }
    }
}

impl Val {
    fn from_cell(column: &str, cell: &Value) -> Result<Self> {
        match cell {
            Value::Null => Ok(Val::Null),
            Value::Bool(b) => Ok(Val::Bool(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(Val::Num)
                .ok_or_else(|| formula_error(format!("column '{}' is not a finite number", column))),
            Value::String(s) => Ok(Val::Str(s.clone())),
            _ => Err(formula_error(format!("column '{}' is not a scalar value", column))),
        }
    }

    /// Numeric reading; null is zero and numeric strings are parsed
    fn number(&self) -> Option<f64> {
        match self {
            Val::Num(n) => Some(*n),
            Val::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Val::Null => Some(0.0),
            Val::Str(s) => s.trim().parse::<f64>().ok(),
        }
    }

    fn expect_number(&self) -> Result<f64> {
        self.number()
            .ok_or_else(|| formula_error(format!("cannot use '{}' as a number", self)))
    }

    fn truthy(&self) -> bool {
        match self {
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::Bool(b) => *b,
            Val::Null => false,
        }
    }

    fn into_value(self) -> Result<Value> {
        match self {
            Val::Num(n) => value::number(n).ok_or_else(|| formula_error("result is not a finite number")),
            Val::Str(s) => Ok(Value::String(s)),
            Val::Bool(b) => Ok(Value::Bool(b)),
            Val::Null => Ok(Value::Null),
        }
    }
}

fn loosely_equal(left: &Val, right: &Val) -> bool {
    match (left, right) {
        (Val::Null, Val::Null) => true,
        (Val::Null, _) | (_, Val::Null) => false,
        (Val::Str(a), Val::Str(b)) => a == b,
        _ => match (left.number(), right.number()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn compare(op: BinaryOp, left: &Val, right: &Val) -> Result<bool> {
    let ordering = match (left, right) {
        (Val::Str(a), Val::Str(b)) => a.partial_cmp(b),
        _ => left.expect_number()?.partial_cmp(&right.expect_number()?),
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn arithmetic(op: BinaryOp, left: Val, right: Val) -> Result<Val> {
    if op == BinaryOp::Add {
        if let (Some(a), Some(b)) = (left.number(), right.number()) {
            return Ok(Val::Num(a + b));
        }
        return Ok(Val::Str(format!("{}{}", left, right)));
    }

    let (a, b) = (left.expect_number()?, right.expect_number()?);
    Ok(Val::Num(match op {
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => a.powf(b),
    }))
}

fn round_to(x: f64, digits: f64) -> Result<f64> {
    if digits.fract() != 0.0 || !(0.0..=15.0).contains(&digits) {
        return Err(formula_error("round() digits must be an integer between 0 and 15"));
    }
    let factor = 10f64.powi(digits as i32);
    Ok((x * factor).round() / factor)
}

fn apply(func: Func, args: Vec<Val>) -> Result<Val> {
    if func == Func::Concat {
        return Ok(Val::Str(args.iter().map(Val::to_string).collect()));
    }

    let numbers = args.iter().map(Val::expect_number).collect::<Result<Vec<f64>>>()?;
    let x = numbers[0];
    let second = numbers.get(1).copied();

    Ok(Val::Num(match func {
        Func::Abs => x.abs(),
        Func::Ceil => x.ceil(),
        Func::Floor => x.floor(),
        Func::Round => round_to(x, second.unwrap_or(0.0))?,
        Func::Sqrt => x.sqrt(),
        Func::Exp => x.exp(),
        Func::Log => match second {
            Some(base) => x.log(base),
            None => x.ln(),
        },
        Func::Log10 => x.log10(),
        Func::Pow => x.powf(second.unwrap_or(1.0)),
        Func::Mod => x % second.unwrap_or(1.0),
        Func::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        Func::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Func::Concat => 0.0,
    }))
}

fn eval(expr: &Expr, row: &Row) -> Result<Val> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column(name) => {
            let cell = row
                .get(name)
                .ok_or_else(|| formula_error(format!("Undefined symbol {}", name)))?;
            Val::from_cell(name, cell)
        },
        Expr::Unary(UnaryOp::Neg, inner) => Ok(Val::Num(-eval(inner, row)?.expect_number()?)),
        Expr::Unary(UnaryOp::Not, inner) => Ok(Val::Bool(!eval(inner, row)?.truthy())),
        Expr::Conditional(cond, then, otherwise) => {
            if eval(cond, row)?.truthy() {
                eval(then, row)
            } else {
                eval(otherwise, row)
            }
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            Ok(Val::Bool(eval(left, row)?.truthy() && eval(right, row)?.truthy()))
        },
        Expr::Binary(BinaryOp::Or, left, right) => {
            Ok(Val::Bool(eval(left, row)?.truthy() || eval(right, row)?.truthy()))
        },
        Expr::Binary(op, left, right) => {
            let (l, r) = (eval(left, row)?, eval(right, row)?);
            match op {
                BinaryOp::Eq => Ok(Val::Bool(loosely_equal(&l, &r))),
                BinaryOp::Ne => Ok(Val::Bool(!loosely_equal(&l, &r))),
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    Ok(Val::Bool(compare(*op, &l, &r)?))
                },
                _ => arithmetic(*op, l, r),
            }
        },
        Expr::Call(func, args) => {
            let values = args.iter().map(|a| eval(a, row)).collect::<Result<Vec<_>>>()?;
            apply(*func, values)
        },
    }
}

/// A parsed row expression
#[derive(Debug, Clone)]
pub struct Formula {
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        let expr = parser.expression(0)?;
        if let Some(token) = parser.peek() {
            return Err(formula_error(format!("unexpected token {:?}", token)));
        }
        Ok(Self { expr })
    }

    /// Evaluate against one row
    ///
    /// Fails on a column the row does not have, on non-numeric operands to
    /// arithmetic, and on results that are not finite.
    pub fn evaluate(&self, row: &Row) -> Result<Value> {
        eval(&self.expr, row)?.into_value()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn eval_on(source: &str, data: Value) -> Result<Value> {
        Formula::parse(source)?.evaluate(&row(data))
    }

    #[test]
    fn test_arithmetic_precedence() {
        let data = json!({"price": 10, "qty": 2});
        assert_eq!(eval_on("price * qty", data.clone()).unwrap(), json!(20));
        assert_eq!(eval_on("price + qty * 3", data.clone()).unwrap(), json!(16));
        assert_eq!(eval_on("(price + qty) * 3", data.clone()).unwrap(), json!(36));
        assert_eq!(eval_on("-2 ^ 2", data.clone()).unwrap(), json!(-4));
        assert_eq!(eval_on("2 ^ 3 ^ 2", data.clone()).unwrap(), json!(512));
        assert_eq!(eval_on("price mod 3", data.clone()).unwrap(), json!(1));
        assert_eq!(eval_on("price / 4", data).unwrap(), json!(2.5));
    }

    #[test]
    fn test_logic_and_ternary() {
        let data = json!({"amount": 120, "status": "paid"});
        assert_eq!(
            eval_on("amount > 100 and status == 'paid' ? 'big' : 'small'", data.clone()).unwrap(),
            json!("big")
        );
        assert_eq!(eval_on("not (amount >= 200) || false", data.clone()).unwrap(), json!(true));
        assert_eq!(eval_on("status != \"open\"", data).unwrap(), json!(true));
    }

    #[test]
    fn test_functions() {
        let data = json!({"x": -3.14159, "y": "4"});
        assert_eq!(eval_on("round(abs(x), 2)", data.clone()).unwrap(), json!(3.14));
        assert_eq!(eval_on("max(1, y, 2)", data.clone()).unwrap(), json!(4));
        assert_eq!(eval_on("sqrt(y)", data.clone()).unwrap(), json!(2));
        assert_eq!(eval_on("concat('v', y)", data).unwrap(), json!("v4"));
    }

    #[test]
    fn test_strings_and_nulls() {
        let data = json!({"first": "Ada", "last": "Lovelace", "bonus": null, "salary": "100.5"});
        assert_eq!(eval_on("first + ' ' + last", data.clone()).unwrap(), json!("Ada Lovelace"));
        assert_eq!(eval_on("salary + bonus", data).unwrap(), json!(100.5));
    }

    #[test]
    fn test_errors() {
        let data = json!({"a": 1, "name": "x"});
        assert!(eval_on("a + missing", data.clone()).unwrap_err().to_string().contains("Undefined symbol missing"));
        assert!(eval_on("a / 0", data.clone()).is_err());
        assert!(eval_on("name * 2", data.clone()).is_err());
        assert!(Formula::parse("a +").is_err());
        assert!(Formula::parse("a b").is_err());
        assert!(Formula::parse("nope(a)").is_err());
        assert!(Formula::parse("abs(1, 2)").is_err());
    }
}
