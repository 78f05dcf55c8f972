//! Path expressions addressing a root or the whole roots batch.
//!
//! A leaf string in a mapping spec is a path expression iff it starts with
//! `root` or `roots` (optionally prefixed by `$.`) immediately followed by a
//! `.field`, `[*]`, or `[<index>]` segment. Anything else is a literal.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, value},
    multi::many1,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde_json::Value;

use crate::error::{MappingError, MappingResult};
use crate::mapping::MappingContext;

/// Which context binding a path expression starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextHead {
    /// A single source item (`root.`).
    Root,
    /// The ordered batch of source items (`roots[*]`).
    Roots,
}

/// One traversal step after the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    head: ContextHead,
    segments: Vec<Segment>,
}

/// Outcome of resolving a path expression against a context.
///
/// `One(None)` is absence: some hop along a singular path was missing.
/// Missing hops are never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    One(Option<Value>),
    Many(Vec<Value>),
}

/// Returns true when `text` should be treated as a path expression rather
/// than a literal constant.
#[must_use]
pub fn is_path_expression(text: &str) -> bool {
    let rest = text.strip_prefix("$.").unwrap_or(text);
    let Some(rest) = rest.strip_prefix("root") else {
        return false;
    };
    let rest = rest.strip_prefix('s').unwrap_or(rest);
    rest.starts_with('.') || rest.starts_with('[')
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn field_segment(input: &str) -> IResult<&str, Segment> {
    map(preceded(char('.'), identifier), |name: &str| {
        Segment::Field(name.to_string())
    })(input)
}

fn bracket_segment(input: &str) -> IResult<&str, Segment> {
    delimited(
        char('['),
        alt((
            value(Segment::Wildcard, char('*')),
            map_res(digit1, |digits: &str| {
                digits.parse::<usize>().map(Segment::Index)
            }),
        )),
        char(']'),
    )(input)
}

fn head(input: &str) -> IResult<&str, ContextHead> {
    alt((
        value(ContextHead::Roots, tag("roots")),
        value(ContextHead::Root, tag("root")),
    ))(input)
}

fn path_expr(input: &str) -> IResult<&str, PathExpr> {
    map(
        all_consuming(tuple((
            opt(tag("$.")),
            head,
            many1(alt((field_segment, bracket_segment))),
        ))),
        |(_, head, segments)| PathExpr { head, segments },
    )(input)
}

/// Parse a path expression, failing with [`MappingError::Path`] on malformed
/// syntax.
pub fn parse_path(expression: &str) -> MappingResult<PathExpr> {
    match path_expr(expression) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(err) | nom::Err::Failure(err)) => Err(MappingError::Path {
            expression: expression.to_string(),
            message: format!("syntax error near `{}`", err.input),
        }),
        Err(nom::Err::Incomplete(_)) => Err(MappingError::Path {
            expression: expression.to_string(),
            message: "incomplete expression".to_string(),
        }),
    }
}

/// Traversal state. `OneList` is a singular value known to be an array,
/// borrowed element-wise so the roots slice never needs re-wrapping.
enum State<'a> {
    Absent,
    One(&'a Value),
    OneList(&'a [Value]),
    Many(Vec<&'a Value>),
}

impl PathExpr {
    #[must_use]
    pub fn head(&self) -> ContextHead {
        self.head
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve this path against `ctx`.
    ///
    /// Singular paths yield `One`; a wildcard hop pluralizes the result into
    /// `Many`, preserving element order. A second wildcard over an already
    /// plural value flattens one level. An empty batch yields `Many(vec![])`,
    /// while a missing hop on a singular path yields `One(None)`.
    #[must_use]
    pub fn resolve(&self, ctx: &MappingContext<'_>) -> Resolved {
        let mut state = match (self.head, *ctx) {
            (ContextHead::Root, MappingContext::Root(root)) => State::One(root),
            (ContextHead::Roots, MappingContext::Roots(roots)) => State::OneList(roots),
            _ => State::Absent,
        };

        for segment in &self.segments {
            state = step(state, segment);
        }

        match state {
            State::Absent => Resolved::One(None),
            State::One(value) => Resolved::One(Some(value.clone())),
            State::OneList(values) => Resolved::One(Some(Value::Array(values.to_vec()))),
            State::Many(values) => Resolved::Many(values.into_iter().cloned().collect()),
        }
    }
}

fn step<'a>(state: State<'a>, segment: &Segment) -> State<'a> {
    match segment {
        Segment::Field(name) => match state {
            State::Absent | State::OneList(_) => State::Absent,
            State::One(value) => match value.get(name) {
                Some(child) => State::One(child),
                None => State::Absent,
            },
            State::Many(values) => {
                State::Many(values.into_iter().filter_map(|v| v.get(name)).collect())
            }
        },
        Segment::Index(index) => match state {
            State::Absent => State::Absent,
            State::One(value) => match value.get(index) {
                Some(child) => State::One(child),
                None => State::Absent,
            },
            State::OneList(values) => match values.get(*index) {
                Some(child) => State::One(child),
                None => State::Absent,
            },
            State::Many(values) => {
                State::Many(values.into_iter().filter_map(|v| v.get(index)).collect())
            }
        },
        Segment::Wildcard => match state {
            State::Absent => State::Absent,
            State::One(value) => match value.as_array() {
                Some(items) => State::Many(items.iter().collect()),
                None => State::Many(Vec::new()),
            },
            State::OneList(values) => State::Many(values.iter().collect()),
            // Flatten one level: each already-plural element contributes its
            // own items; non-array elements are skipped.
            State::Many(values) => State::Many(
                values
                    .into_iter()
                    .filter_map(Value::as_array)
                    .flat_map(|items| items.iter())
                    .collect(),
            ),
        },
    }
}
