//! Whitelisted transform expression language.
//!
//! The original engine evaluated inline transforms by compiling source text
//! into executable code. This rewrite deliberately narrows that capability to
//! a small interpreted language: literals, the implicit variable `$` bound to
//! the resolved value, arithmetic, comparisons, boolean connectives, and a
//! fixed function set. Nothing outside this grammar can run.
//!
//! ```text
//! "root.test | $ + 5"
//! "roots[*].name | upper($)"
//! "root.price | $ * 100 >= 2500"
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::{fold_many0, separated_list0},
    sequence::{delimited, pair, tuple},
    IResult,
};
use serde_json::{Number, Value};

use crate::error::{MappingError, MappingResult};

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Input,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// The fixed, whitelisted function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abs,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Length,
    Lower,
    Upper,
    Trim,
    String,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Self::Abs),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "round" => Some(Self::Round),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "length" => Some(Self::Length),
            "lower" => Some(Self::Lower),
            "upper" => Some(Self::Upper),
            "trim" => Some(Self::Trim),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            Self::Min | Self::Max => 2,
            _ => 1,
        }
    }
}

/// A parsed transform expression, kept with its source text for error
/// reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformExpr {
    source: String,
    ast: Expr,
}

impl TransformExpr {
    /// Parse a transform expression, failing with
    /// [`MappingError::Expression`] on anything outside the whitelisted
    /// grammar.
    pub fn parse(source: &str) -> MappingResult<Self> {
        match all_consuming(expression)(source) {
            Ok((_, ast)) => Ok(Self { source: source.to_string(), ast }),
            Err(nom::Err::Error(err) | nom::Err::Failure(err)) => Err(MappingError::Expression {
                expression: source.to_string(),
                message: format!("parse error near `{}`", err.input),
            }),
            Err(nom::Err::Incomplete(_)) => Err(MappingError::Expression {
                expression: source.to_string(),
                message: "incomplete expression".to_string(),
            }),
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a resolved value, which is bound to `$`.
    pub fn apply(&self, input: &Value) -> MappingResult<Value> {
        eval(&self.ast, input).map_err(|message| MappingError::Expression {
            expression: self.source.clone(),
            message,
        })
    }
}

// ---- parser ----------------------------------------------------------------

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn number_literal(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = recognize(tuple((digit1, opt(pair(char('.'), digit1)))))(input)?;
    let literal = if text.contains('.') {
        text.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
    } else {
        text.parse::<i64>().ok().map(|n| Value::Number(Number::from(n)))
    };
    match literal {
        Some(value) => Ok((rest, Expr::Literal(value))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Digit,
        ))),
    }
}

fn string_literal(input: &str) -> IResult<&str, Expr> {
    let single = delimited(char('\''), take_while(|c| c != '\''), char('\''));
    let double = delimited(char('"'), take_while(|c| c != '"'), char('"'));
    map(alt((single, double)), |text: &str| {
        Expr::Literal(Value::String(text.to_string()))
    })(input)
}

fn keyword_literal(input: &str) -> IResult<&str, Expr> {
    alt((
        value(Expr::Literal(Value::Bool(true)), tag("true")),
        value(Expr::Literal(Value::Bool(false)), tag("false")),
        value(Expr::Literal(Value::Null), tag("null")),
    ))(input)
}

fn function_call(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = take_while1(|c: char| c.is_ascii_alphabetic())(input)?;
    let Some(function) = Function::from_name(name) else {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    };
    let (rest, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expression),
        char(')'),
    )(rest)?;
    Ok((rest, Expr::Call(function, args)))
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        number_literal,
        string_literal,
        function_call,
        keyword_literal,
        value(Expr::Input, char('$')),
        delimited(char('('), expression, char(')')),
    )))(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            pair(
                ws(alt((
                    value(UnaryOp::Neg, char('-')),
                    value(UnaryOp::Not, char('!')),
                ))),
                unary,
            ),
            |(op, operand)| Expr::Unary(op, Box::new(operand)),
        ),
        primary,
    ))(input)
}

fn binary_level<'a>(
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
    operator: fn(&'a str) -> IResult<&'a str, BinaryOp>,
    input: &'a str,
) -> IResult<&'a str, Expr> {
    let (input, init) = operand(input)?;
    fold_many0(
        pair(ws(operator), operand),
        move || init.clone(),
        |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)),
    )(input)
}

fn multiplicative(input: &str) -> IResult<&str, Expr> {
    fn operator(input: &str) -> IResult<&str, BinaryOp> {
        alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
            value(BinaryOp::Rem, char('%')),
        ))(input)
    }
    binary_level(unary, operator, input)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    fn operator(input: &str) -> IResult<&str, BinaryOp> {
        alt((
            value(BinaryOp::Add, char('+')),
            value(BinaryOp::Sub, char('-')),
        ))(input)
    }
    binary_level(multiplicative, operator, input)
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    fn operator(input: &str) -> IResult<&str, BinaryOp> {
        alt((
            value(BinaryOp::Eq, tag("==")),
            value(BinaryOp::Ne, tag("!=")),
            value(BinaryOp::Le, tag("<=")),
            value(BinaryOp::Ge, tag(">=")),
            value(BinaryOp::Lt, char('<')),
            value(BinaryOp::Gt, char('>')),
        ))(input)
    }
    binary_level(additive, operator, input)
}

fn conjunction(input: &str) -> IResult<&str, Expr> {
    fn operator(input: &str) -> IResult<&str, BinaryOp> {
        value(BinaryOp::And, tag("&&"))(input)
    }
    binary_level(comparison, operator, input)
}

fn expression(input: &str) -> IResult<&str, Expr> {
    fn operator(input: &str) -> IResult<&str, BinaryOp> {
        value(BinaryOp::Or, tag("||"))(input)
    }
    binary_level(conjunction, operator, input)
}

// ---- evaluator -------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(n) => n as f64,
            Self::Float(n) => n,
        }
    }
}

fn as_num(value: &Value) -> Option<Num> {
    let number = value.as_number()?;
    if let Some(n) = number.as_i64() {
        Some(Num::Int(n))
    } else {
        number.as_f64().map(Num::Float)
    }
}

/// Integral float results collapse back to integers so arithmetic over
/// integer inputs stays integer-valued.
#[allow(clippy::cast_possible_truncation)]
fn float_value(result: f64) -> Value {
    if result.is_finite() && result.fract() == 0.0 && result.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(result as i64))
    } else {
        Number::from_f64(result).map_or(Value::Null, Value::Number)
    }
}

fn num_pair(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<(Num, Num), String> {
    match (as_num(lhs), as_num(rhs)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(format!("operator {op:?} requires numeric operands")),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (as_num(lhs), as_num(rhs)) {
        // Integer pairs compare exactly; going through f64 would collapse
        // distinct values above 2^53.
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => (a.as_f64() - b.as_f64()).abs() == 0.0,
        _ => lhs == rhs,
    }
}

fn eval(expr: &Expr, input: &Value) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Input => Ok(input.clone()),
        Expr::Unary(op, operand) => {
            let operand = eval(operand, input)?;
            match op {
                UnaryOp::Neg => match as_num(&operand) {
                    Some(Num::Int(n)) => Ok(Value::Number(Number::from(-n))),
                    Some(Num::Float(n)) => Ok(float_value(-n)),
                    None => Err("unary `-` requires a numeric operand".to_string()),
                },
                UnaryOp::Not => match operand {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    _ => Err("unary `!` requires a boolean operand".to_string()),
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, input)?;
            let rhs = eval(rhs, input)?;
            eval_binary(*op, &lhs, &rhs)
        }
        Expr::Call(function, args) => {
            if args.len() != function.arity() {
                return Err(format!(
                    "{function:?} expects {} argument(s), got {}",
                    function.arity(),
                    args.len()
                ));
            }
            let args = args
                .iter()
                .map(|arg| eval(arg, input))
                .collect::<Result<Vec<_>, _>>()?;
            eval_call(*function, &args)
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    match op {
        BinaryOp::Add => {
            if lhs.is_string() || rhs.is_string() {
                return Ok(Value::String(format!("{}{}", display(lhs), display(rhs))));
            }
            let (a, b) = num_pair(op, lhs, rhs)?;
            match (a, b) {
                (Num::Int(a), Num::Int(b)) => match a.checked_add(b) {
                    Some(sum) => Ok(Value::Number(Number::from(sum))),
                    None => Ok(float_value(a as f64 + b as f64)),
                },
                _ => Ok(float_value(a.as_f64() + b.as_f64())),
            }
        }
        BinaryOp::Sub => {
            let (a, b) = num_pair(op, lhs, rhs)?;
            match (a, b) {
                (Num::Int(a), Num::Int(b)) => match a.checked_sub(b) {
                    Some(diff) => Ok(Value::Number(Number::from(diff))),
                    None => Ok(float_value(a as f64 - b as f64)),
                },
                _ => Ok(float_value(a.as_f64() - b.as_f64())),
            }
        }
        BinaryOp::Mul => {
            let (a, b) = num_pair(op, lhs, rhs)?;
            match (a, b) {
                (Num::Int(a), Num::Int(b)) => match a.checked_mul(b) {
                    Some(product) => Ok(Value::Number(Number::from(product))),
                    None => Ok(float_value(a as f64 * b as f64)),
                },
                _ => Ok(float_value(a.as_f64() * b.as_f64())),
            }
        }
        BinaryOp::Div => {
            let (a, b) = num_pair(op, lhs, rhs)?;
            if b.as_f64() == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(float_value(a.as_f64() / b.as_f64()))
        }
        BinaryOp::Rem => {
            let (a, b) = num_pair(op, lhs, rhs)?;
            if b.as_f64() == 0.0 {
                return Err("remainder by zero".to_string());
            }
            match (a, b) {
                (Num::Int(a), Num::Int(b)) => Ok(Value::Number(Number::from(a % b))),
                _ => Ok(float_value(a.as_f64() % b.as_f64())),
            }
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => eval_ordering(op, lhs, rhs),
        BinaryOp::And | BinaryOp::Or => match (lhs, rhs) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == BinaryOp::And {
                *a && *b
            } else {
                *a || *b
            })),
            _ => Err(format!("operator {op:?} requires boolean operands")),
        },
    }
}

fn eval_ordering(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
        _ => {
            let (a, b) = num_pair(op, lhs, rhs)?;
            a.as_f64().partial_cmp(&b.as_f64())
        }
    };
    let Some(ordering) = ordering else {
        return Err(format!("operands of {op:?} are not comparable"));
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Value::Bool(result))
}

fn require_num(function: Function, value: &Value) -> Result<Num, String> {
    as_num(value).ok_or_else(|| format!("{function:?} requires a numeric argument"))
}

fn require_str<'a>(function: Function, value: &'a Value) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{function:?} requires a string argument"))
}

fn eval_call(function: Function, args: &[Value]) -> Result<Value, String> {
    match function {
        Function::Abs => match require_num(function, &args[0])? {
            Num::Int(n) => Ok(Value::Number(Number::from(n.abs()))),
            Num::Float(n) => Ok(float_value(n.abs())),
        },
        Function::Floor => Ok(float_value(require_num(function, &args[0])?.as_f64().floor())),
        Function::Ceil => Ok(float_value(require_num(function, &args[0])?.as_f64().ceil())),
        Function::Round => Ok(float_value(require_num(function, &args[0])?.as_f64().round())),
        Function::Min | Function::Max => {
            let a = require_num(function, &args[0])?.as_f64();
            let b = require_num(function, &args[1])?.as_f64();
            let picked = if function == Function::Min { a.min(b) } else { a.max(b) };
            Ok(float_value(picked))
        }
        Function::Length => match &args[0] {
            Value::String(text) => Ok(Value::Number(Number::from(text.chars().count()))),
            Value::Array(items) => Ok(Value::Number(Number::from(items.len()))),
            _ => Err("length requires a string or array argument".to_string()),
        },
        Function::Lower => Ok(Value::String(require_str(function, &args[0])?.to_lowercase())),
        Function::Upper => Ok(Value::String(require_str(function, &args[0])?.to_uppercase())),
        Function::Trim => Ok(Value::String(require_str(function, &args[0])?.trim().to_string())),
        Function::String => Ok(Value::String(display(&args[0]))),
    }
}
