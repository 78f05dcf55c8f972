//! Field-selection compilation and splicing.
//!
//! Two directions, both derived from the same mapping specs:
//! - [`SelectionSet::from_mappings`] reads the *path-expression values* and
//!   produces the parent-side fields a caller must request so the mappings
//!   can be evaluated (`{authorId}` for `roots[*].authorId`).
//! - [`key_field_paths`] reads a key mapping's *structural keys* — the
//!   entity-side fields needed to recompute join keys — and
//!   [`SelectionSet::ensure_paths`] splices them into a pre-existing
//!   selection for the batched query, reusing nodes that are already there.
//!
//! The compact textual form renders a leaf field as its name and a composite
//! as `name{child1 child2}`, with the synthetic root carrying braces but no
//! name: `{person{name friends}}`.

use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use serde_json::Value;

use crate::error::{MappingError, MappingResult};
use crate::path::{is_path_expression, parse_path, Segment};
use crate::subset::leaf_paths;

/// One requested field with its nested selections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionField {
    pub name: String,
    pub children: SelectionSet,
}

/// An ordered set of requested fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    pub fields: Vec<SelectionField>,
}

impl SelectionSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build the minimal parent-side selection needed to evaluate `specs`.
    ///
    /// Every path-expression leaf contributes its field segments with the
    /// `root`/`roots` head and all bracket segments stripped; duplicate
    /// paths merge. Literal leaves are ignored.
    ///
    /// # Errors
    /// [`MappingError::Path`] when a leaf that looks like a path expression
    /// fails to parse.
    pub fn from_mappings(specs: &[&Value]) -> MappingResult<Self> {
        let mut selection = Self::default();
        for spec in specs {
            collect_expression_paths(spec, &mut selection)?;
        }
        Ok(selection)
    }

    /// Splice required leaf paths into this selection, reusing an existing
    /// node at each segment when one with a matching name is present, else
    /// creating one.
    pub fn ensure_paths(&mut self, paths: &[Vec<String>]) {
        for path in paths {
            self.ensure_path(path);
        }
    }

    pub fn ensure_path(&mut self, path: &[String]) {
        let mut current = self;
        for segment in path {
            let index = match current.fields.iter().position(|f| f.name == *segment) {
                Some(index) => index,
                None => {
                    current.fields.push(SelectionField {
                        name: segment.clone(),
                        children: Self::default(),
                    });
                    current.fields.len() - 1
                }
            };
            current = &mut current.fields[index].children;
        }
    }

    /// Render the compact textual form.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{{{}}}", self.render_fields())
    }

    fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(SelectionField::render)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse the compact textual form back into a tree.
    ///
    /// # Errors
    /// [`MappingError::Selection`] on malformed input.
    pub fn parse(input: &str) -> MappingResult<Self> {
        match all_consuming(terminated(preceded(multispace0, selection_set), multispace0))(input) {
            Ok((_, parsed)) => Ok(parsed),
            Err(nom::Err::Error(err) | nom::Err::Failure(err)) => Err(MappingError::Selection {
                input: input.to_string(),
                message: format!("syntax error near `{}`", err.input),
            }),
            Err(nom::Err::Incomplete(_)) => Err(MappingError::Selection {
                input: input.to_string(),
                message: "incomplete selection".to_string(),
            }),
        }
    }
}

impl SelectionField {
    fn render(&self) -> String {
        if self.children.is_empty() {
            self.name.clone()
        } else {
            format!("{}{{{}}}", self.name, self.children.render_fields())
        }
    }
}

/// Entity-side field paths a key mapping needs the batched fetch to return:
/// the mapping's own structural leaf paths.
#[must_use]
pub fn key_field_paths(key_mapping: &Value) -> Vec<Vec<String>> {
    leaf_paths(key_mapping)
        .into_iter()
        .filter(|path| !path.is_empty())
        .collect()
}

fn collect_expression_paths(node: &Value, selection: &mut SelectionSet) -> MappingResult<()> {
    match node {
        Value::Object(entries) => {
            for (_, child) in entries {
                collect_expression_paths(child, selection)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_expression_paths(item, selection)?;
            }
        }
        Value::String(text) if is_path_expression(text) => {
            let path_part = text.split_once(" | ").map_or(text.as_str(), |(path, _)| path);
            let parsed = parse_path(path_part)?;
            let fields: Vec<String> = parsed
                .segments()
                .iter()
                .filter_map(|segment| match segment {
                    Segment::Field(name) => Some(name.clone()),
                    Segment::Index(_) | Segment::Wildcard => None,
                })
                .collect();
            if !fields.is_empty() {
                selection.ensure_path(&fields);
            }
        }
        _ => {}
    }
    Ok(())
}

fn field_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn selection_field(input: &str) -> IResult<&str, SelectionField> {
    map(
        pair(field_name, opt(preceded(multispace0, selection_set))),
        |(name, children)| SelectionField {
            name: name.to_string(),
            children: children.unwrap_or_default(),
        },
    )(input)
}

fn selection_set(input: &str) -> IResult<&str, SelectionSet> {
    map(
        delimited(
            char('{'),
            many0(preceded(multispace0, selection_field)),
            preceded(multispace0, char('}')),
        ),
        |fields| SelectionSet { fields },
    )(input)
}
